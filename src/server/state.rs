//! State thread: the serialization point.
//!
//! One thread owns the stores, the session table, the journal, and the id
//! allocator. Connection threads do wire I/O only and talk to it through
//! [`StateMessage`]s; every mutation and every journal commit therefore has a
//! total order, and replaying the journal reproduces it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crossbeam::channel::{Receiver, Sender};

use super::ops;
use super::wire::ResultCode;
use crate::core::{
    ConnId, GroupStore, Limits, MessageStore, Recipient, SessionTable, UserStore,
};
use crate::journal::{IdAllocator, Journal};

/// Request from a connection thread.
///
/// Two-phase opcodes (SET_STATUS, SEND_MESSAGE, DELETE_MESSAGE,
/// REGISTER_GROUP) gate the rest of their wire exchange on `Authorize` or
/// `GroupNameAvailable`; the mutating request re-validates, so the early ACK
/// never authorizes anything by itself.
pub enum StateRequest {
    Attach {
        shutdown: Arc<AtomicBool>,
    },
    Detach {
        conn: ConnId,
    },
    Heartbeat {
        conn: ConnId,
    },
    Authorize {
        conn: ConnId,
        user_id: i32,
    },
    Register {
        conn: ConnId,
        username: String,
    },
    GroupNameAvailable {
        name: String,
    },
    RegisterGroup {
        conn: ConnId,
        name: String,
        members: Vec<String>,
    },
    Login {
        conn: ConnId,
        username: String,
    },
    Logout {
        conn: ConnId,
        user_id: i32,
    },
    SetStatus {
        conn: ConnId,
        user_id: i32,
        status: String,
    },
    GetUsers {
        conn: ConnId,
        user_id: i32,
    },
    GetGroups {
        conn: ConnId,
        user_id: i32,
    },
    SendMessage {
        conn: ConnId,
        user_id: i32,
        recipient: Recipient,
        content: String,
    },
    DeleteMessage {
        conn: ConnId,
        user_id: i32,
        message_id: i32,
    },
    GetMessages {
        conn: ConnId,
        user_id: i32,
    },
    Shutdown,
}

pub enum StateReply {
    Attached { conn: ConnId },
    Result(ResultCode),
    Login { id: i32, result: ResultCode },
    Sent { result: ResultCode, message_id: i32 },
    Users { users: Vec<(String, String)> },
    Groups { groups: Vec<(String, Vec<String>)> },
    Messages { messages: Vec<(i32, String, String)> },
    ShuttingDown,
}

pub struct StateMessage {
    pub request: StateRequest,
    pub respond: Sender<StateReply>,
}

struct ConnEntry {
    last_activity: Instant,
    shutdown: Arc<AtomicBool>,
}

/// Everything the dispatcher mutates, owned by the state thread.
pub struct ServerState {
    pub users: UserStore,
    pub groups: GroupStore,
    pub messages: MessageStore,
    pub sessions: SessionTable,
    pub journal: Journal,
    pub ids: IdAllocator,
    pub limits: Limits,
    conns: HashMap<ConnId, ConnEntry>,
    next_conn: u64,
}

impl ServerState {
    pub fn new(
        journal: Journal,
        ids: IdAllocator,
        users: UserStore,
        groups: GroupStore,
        messages: MessageStore,
        limits: Limits,
    ) -> Self {
        Self {
            users,
            groups,
            messages,
            sessions: SessionTable::default(),
            journal,
            ids,
            limits,
            conns: HashMap::new(),
            next_conn: 0,
        }
    }

    /// Register a freshly accepted connection in the liveness table.
    pub fn attach(&mut self, shutdown: Arc<AtomicBool>) -> ConnId {
        self.next_conn += 1;
        let conn = ConnId(self.next_conn);
        self.conns.insert(
            conn,
            ConnEntry {
                last_activity: Instant::now(),
                shutdown,
            },
        );
        tracing::debug!(%conn, "connection attached");
        conn
    }

    /// Drop a connection's liveness slot and clear any session bound to it.
    /// GOODBYE, EOF, socket errors, and mid-request stalls all land here.
    pub fn detach(&mut self, conn: ConnId) {
        self.conns.remove(&conn);
        if let Some(session) = self.sessions.remove_by_conn(conn) {
            tracing::info!(user = %session.username, %conn, "session closed with connection");
        }
        tracing::debug!(%conn, "connection detached");
    }

    /// Refresh a connection's activity stamp. Every completed request does
    /// this; HEARTBEAT exists so idle clients can too.
    pub fn touch(&mut self, conn: ConnId) {
        if let Some(entry) = self.conns.get_mut(&conn) {
            entry.last_activity = Instant::now();
        }
    }

    pub fn heartbeat(&mut self, conn: ConnId) -> ResultCode {
        match self.conns.get_mut(&conn) {
            Some(entry) => {
                entry.last_activity = Instant::now();
                ResultCode::Success
            }
            None => ResultCode::InvalidRequest,
        }
    }

    /// Close every connection whose last activity is older than the idle
    /// deadline, clearing any session bound to it.
    pub fn prune_idle(&mut self, now: Instant) {
        let deadline = self.limits.idle_timeout();
        let expired: Vec<ConnId> = self
            .conns
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_activity) > deadline)
            .map(|(conn, _)| *conn)
            .collect();

        for conn in expired {
            if let Some(entry) = self.conns.remove(&conn) {
                entry.shutdown.store(true, Ordering::Relaxed);
            }
            if let Some(session) = self.sessions.remove_by_conn(conn) {
                tracing::info!(
                    user = %session.username,
                    %conn,
                    "user did not log out but the last heartbeat is long past; presumed dead"
                );
            } else {
                tracing::debug!(%conn, "idle connection pruned");
            }
        }
    }

    fn next_prune_deadline(&self) -> Option<Instant> {
        let deadline = self.limits.idle_timeout();
        self.conns
            .values()
            .map(|entry| entry.last_activity + deadline)
            .min()
    }

    /// Flag every live connection for close; called on shutdown.
    fn begin_shutdown(&mut self) {
        for entry in self.conns.values() {
            entry.shutdown.store(true, Ordering::Relaxed);
        }
        self.conns.clear();
    }
}

/// Run the state thread loop.
///
/// This is THE serialization point: every store mutation and journal commit
/// happens here, in arrival order. The tick arm fires the pruner when the
/// oldest connection crosses the idle deadline.
pub fn run_state_loop(mut state: ServerState, req_rx: Receiver<StateMessage>) {
    loop {
        let tick = match state.next_prune_deadline() {
            Some(deadline) => {
                crossbeam::channel::after(deadline.saturating_duration_since(Instant::now()))
            }
            None => crossbeam::channel::never(),
        };

        crossbeam::select! {
            recv(req_rx) -> msg => {
                match msg {
                    Ok(StateMessage { request, respond }) => {
                        if matches!(request, StateRequest::Shutdown) {
                            state.begin_shutdown();
                            let _ = respond.send(StateReply::ShuttingDown);
                            tracing::info!("state thread stopping");
                            return;
                        }

                        if let Some(reply) = ops::handle(&mut state, request) {
                            let _ = respond.send(reply);
                        }
                        state.prune_idle(Instant::now());
                    }
                    Err(_) => {
                        // Channel closed - time to exit.
                        return;
                    }
                }
            }

            recv(tick) -> _ => {
                state.prune_idle(Instant::now());
            }
        }
    }
}
