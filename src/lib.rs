#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod journal;
pub mod server;
pub mod telemetry;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the types the binary and tests reach for most often.
pub use crate::config::Config;
pub use crate::core::{Group, Limits, Message, Recipient, User};
pub use crate::journal::{IdAllocator, Journal, Record};
pub use crate::server::{ServerHandle, run, start};
