//! The server: wire codec, per-opcode dispatch, connection handling, journal
//! replay, and lifecycle.

pub mod bootstrap;
pub mod conn;
pub mod ops;
pub mod run;
pub mod state;
pub mod wire;

pub use run::{ServerHandle, run, start};
pub use state::{ServerState, StateMessage, StateReply, StateRequest, run_state_loop};
pub use wire::{Opcode, ResultCode, WireError, WireReader, WireWriter};
