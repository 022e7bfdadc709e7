//! Domain types and in-memory stores.
//!
//! Durable records (users, groups, messages) are plain data resolved by name;
//! everything session-scoped lives in [`session`] and is never journaled.

pub mod limits;
pub mod message;
pub mod roster;
pub mod session;
pub mod stores;

pub use limits::Limits;
pub use message::{Message, Recipient};
pub use roster::{Group, User};
pub use session::{ConnId, STATUS_OFFLINE, STATUS_ONLINE, Session, SessionTable};
pub use stores::{GroupStore, MessageStore, UserStore};
