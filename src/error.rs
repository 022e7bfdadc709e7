use thiserror::Error;

use crate::config::ConfigError;
use crate::journal::JournalError;
use crate::server::WireError;

/// Crate-level convenience error.
///
/// A thin wrapper over the per-module errors; handlers never surface these to
/// clients (clients only ever see a one-byte result code).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
