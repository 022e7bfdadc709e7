//! Transient session state.
//!
//! A session is the binding of (user id, connection, status) created by a
//! successful LOGIN. It is cleared by LOGOUT, by GOODBYE, or by the pruner,
//! and it is never journaled: after a replay every user is logged out and
//! reports the default status.

pub const STATUS_OFFLINE: &str = "Offline";
pub const STATUS_ONLINE: &str = "Online";

/// Opaque identity of one accepted connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnId(pub(crate) u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct Session {
    /// Session id handed to the client by LOGIN; allocated like message ids.
    pub id: i32,
    pub username: String,
    pub conn: ConnId,
    pub status: String,
}

/// All live sessions, owned by the state thread.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: Vec<Session>,
}

impl SessionTable {
    pub fn insert(&mut self, session: Session) {
        self.sessions.push(session);
    }

    pub fn find_by_id(&self, id: i32) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn find_by_id_mut(&mut self, id: i32) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn find_by_user(&self, username: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.username == username)
    }

    pub fn remove_by_id(&mut self, id: i32) -> Option<Session> {
        let index = self.sessions.iter().position(|s| s.id == id)?;
        Some(self.sessions.remove(index))
    }

    pub fn remove_by_conn(&mut self, conn: ConnId) -> Option<Session> {
        let index = self.sessions.iter().position(|s| s.conn == conn)?;
        Some(self.sessions.remove(index))
    }

    /// Status a user currently reports: their session status when logged in,
    /// the default otherwise.
    pub fn status_for(&self, username: &str) -> &str {
        self.find_by_user(username)
            .map(|s| s.status.as_str())
            .unwrap_or(STATUS_OFFLINE)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
