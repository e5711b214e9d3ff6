use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declares a string-backed identifier.
///
/// Ids minted by this client are prefixed UUIDs, but anything the server
/// echoes back must deserialize, including ids this client never issued.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);
        
        impl $name {
            /// Mint a fresh client-side id
            pub fn generate() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::new_v4().simple()))
            }
            
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
        
        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
        
        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
        
        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
        
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// One chat request/response cycle
    TaskId,
    "task"
);
string_id!(
    /// One run of a workflow's stepped visualization
    ExecutionId,
    "exec"
);
string_id!(ConversationId, "conv");
string_id!(SessionId, "session");
string_id!(MessageId, "msg");
