use std::time::Duration;

/// Configuration for a sync session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a cancelled or finalized task id keeps suppressing events
    pub cancel_ttl_secs: u64,
    pub default_speed_ms: u64,
    pub min_speed_ms: u64,
    pub max_speed_ms: u64,
    /// Capacity of the session driver's channels
    pub event_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cancel_ttl_secs: 60,
            default_speed_ms: 500,
            min_speed_ms: 100,
            max_speed_ms: 2000,
            event_buffer_size: 256,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `FLOWSYNC_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ttl) = env_number("FLOWSYNC_CANCEL_TTL_SECS") {
            config.cancel_ttl_secs = ttl;
        }
        if let Some(speed) = env_number("FLOWSYNC_DEFAULT_SPEED_MS") {
            config.default_speed_ms = speed;
        }
        if let Some(buffer) = env_number("FLOWSYNC_EVENT_BUFFER") {
            config.event_buffer_size = buffer.max(1) as usize;
        }
        config.default_speed_ms = config.clamp_speed(config.default_speed_ms);
        config
    }
    
    pub fn cancel_ttl(&self) -> Duration {
        Duration::from_secs(self.cancel_ttl_secs)
    }
    
    /// Supported speed bounds, lowest first even if the fields are swapped
    pub fn speed_range(&self) -> (u64, u64) {
        if self.min_speed_ms <= self.max_speed_ms {
            (self.min_speed_ms, self.max_speed_ms)
        } else {
            (self.max_speed_ms, self.min_speed_ms)
        }
    }
    
    /// Clamp a playback speed into the supported range
    pub fn clamp_speed(&self, speed_ms: u64) -> u64 {
        let (min, max) = self.speed_range();
        speed_ms.clamp(min, max)
    }
}

fn env_number(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={:?}", key, raw);
            None
        }
    }
}
