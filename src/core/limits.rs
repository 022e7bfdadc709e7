//! Protocol and liveness limits (normative defaults).
//!
//! Values are explicit about their units to avoid confusion.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Longest accepted status string, in bytes.
    pub max_status_bytes: usize,
    /// Longest accepted message content, in bytes.
    pub max_content_bytes: usize,
    /// Cap on unframed payloads (REGISTER / LOGIN names, SET_STATUS body).
    pub max_unframed_bytes: usize,
    /// Cap on any length-prefixed string read off the wire.
    pub max_string_bytes: usize,
    /// Cap on the member count of one group registration.
    pub max_group_members: usize,

    /// Per-receive timeout inside a handler. A client that stalls mid-request
    /// is dropped after this long.
    pub read_timeout_ms: u64,
    /// How long an unframed read waits for more bytes before treating the
    /// payload as complete.
    pub stall_timeout_ms: u64,
    /// Idle deadline after which the pruner closes a silent connection.
    pub idle_timeout_ms: u64,
    /// Acceptor sleep between non-blocking accept attempts.
    pub accept_poll_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_status_bytes: 32,
            max_content_bytes: 256,
            max_unframed_bytes: 4096,
            max_string_bytes: 4096,
            max_group_members: 1024,
            read_timeout_ms: 200,
            stall_timeout_ms: 5,
            idle_timeout_ms: 20_000,
            accept_poll_ms: 100,
        }
    }
}

impl Limits {
    pub fn read_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.read_timeout_ms)
    }

    pub fn stall_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.idle_timeout_ms)
    }
}
