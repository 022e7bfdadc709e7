//! Durable roster records: users and groups.
//!
//! Both are created through the journal and never deleted. Session state
//! (login, status, heartbeat) deliberately does not live here; see
//! [`super::session`].

/// A registered user. Only the name is durable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub name: String,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A named, immutable set of member usernames.
///
/// Members are stored in registration order and must reference existing users
/// at creation time; the stores enforce that before a group is appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub members: Vec<String>,
}

impl Group {
    pub fn new(name: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }
}
