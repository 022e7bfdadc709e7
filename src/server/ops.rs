//! Per-opcode handlers, executed on the state thread.
//!
//! Each handler validates, mutates the stores, commits to the journal, and
//! produces the reply the connection thread writes back. Journal commit
//! failures are logged and the in-memory mutation proceeds anyway: a poisoned
//! journal downgrades the server to memory-only until restart, it does not
//! take it down.

use super::state::{ServerState, StateReply, StateRequest};
use super::wire::ResultCode;
use crate::core::{ConnId, Group, Message, Recipient, STATUS_ONLINE, Session, User};
use crate::journal::Record;

pub fn handle(state: &mut ServerState, request: StateRequest) -> Option<StateReply> {
    match request {
        StateRequest::Attach { shutdown } => Some(StateReply::Attached {
            conn: state.attach(shutdown),
        }),
        StateRequest::Detach { conn } => {
            state.detach(conn);
            None
        }
        StateRequest::Heartbeat { conn } => Some(StateReply::Result(state.heartbeat(conn))),
        StateRequest::Authorize { conn, user_id } => {
            Some(StateReply::Result(authorize(state, conn, user_id)))
        }
        StateRequest::Register { conn, username } => {
            Some(StateReply::Result(register(state, conn, username)))
        }
        StateRequest::GroupNameAvailable { name } => Some(StateReply::Result(
            if state.groups.contains(&name) {
                ResultCode::InvalidRequest
            } else {
                ResultCode::Success
            },
        )),
        StateRequest::RegisterGroup {
            conn,
            name,
            members,
        } => Some(StateReply::Result(register_group(
            state, conn, name, members,
        ))),
        StateRequest::Login { conn, username } => Some(login(state, conn, username)),
        StateRequest::Logout { conn, user_id } => {
            Some(StateReply::Result(logout(state, conn, user_id)))
        }
        StateRequest::SetStatus {
            conn,
            user_id,
            status,
        } => Some(StateReply::Result(set_status(state, conn, user_id, status))),
        StateRequest::GetUsers { conn, user_id } => Some(get_users(state, conn, user_id)),
        StateRequest::GetGroups { conn, user_id } => Some(get_groups(state, conn, user_id)),
        StateRequest::SendMessage {
            conn,
            user_id,
            recipient,
            content,
        } => Some(send_message(state, conn, user_id, recipient, content)),
        StateRequest::DeleteMessage {
            conn,
            user_id,
            message_id,
        } => Some(StateReply::Result(delete_message(
            state, conn, user_id, message_id,
        ))),
        StateRequest::GetMessages { conn, user_id } => Some(get_messages(state, conn, user_id)),
        // Handled by the state loop before dispatch.
        StateRequest::Shutdown => Some(StateReply::ShuttingDown),
    }
}

/// Common authorization: the claimed id must resolve to a live session bound
/// to the calling socket. Unknown id is a bad request; a known session on the
/// wrong socket is someone else's.
fn authorize(state: &mut ServerState, conn: ConnId, user_id: i32) -> ResultCode {
    let code = match state.sessions.find_by_id(user_id) {
        None => ResultCode::InvalidRequest,
        Some(session) if session.conn != conn => ResultCode::Unauthorized,
        Some(_) => ResultCode::Success,
    };
    if code.is_success() {
        state.touch(conn);
    }
    code
}

fn register(state: &mut ServerState, conn: ConnId, username: String) -> ResultCode {
    if username.is_empty() || state.users.contains(&username) {
        return ResultCode::InvalidRequest;
    }

    commit_or_warn(state, &Record::NewUser {
        username: username.clone(),
    });
    state.users.push(User::new(username.clone()));
    state.touch(conn);
    tracing::info!(user = %username, "registered user");
    ResultCode::Success
}

fn register_group(
    state: &mut ServerState,
    conn: ConnId,
    name: String,
    members: Vec<String>,
) -> ResultCode {
    // Re-check the name: another connection may have raced the two phases.
    if name.is_empty() || state.groups.contains(&name) {
        return ResultCode::InvalidRequest;
    }
    if members.iter().any(|m| !state.users.contains(m)) {
        return ResultCode::InvalidRequest;
    }

    commit_or_warn(state, &Record::NewGroup {
        name: name.clone(),
        members: members.clone(),
    });
    tracing::info!(group = %name, members = members.len(), "registered group");
    state.groups.push(Group::new(name, members));
    state.touch(conn);
    ResultCode::Success
}

fn login(state: &mut ServerState, conn: ConnId, username: String) -> StateReply {
    if !state.users.contains(&username) || state.sessions.find_by_user(&username).is_some() {
        tracing::info!(user = %username, "login refused: unknown or already logged in");
        return StateReply::Login {
            id: -1,
            result: ResultCode::InvalidRequest,
        };
    }

    // Validation first, then allocation: the failure path never consumes an
    // id, so the journal only runs ahead of live ids through crash windows.
    let id = state.ids.next(&mut state.journal);
    state.sessions.insert(Session {
        id,
        username: username.clone(),
        conn,
        status: STATUS_ONLINE.into(),
    });
    state.touch(conn);
    tracing::info!(user = %username, id, "user logged in");
    StateReply::Login {
        id,
        result: ResultCode::Success,
    }
}

/// LOGOUT is session teardown, not a durable fact: it is never journaled.
fn logout(state: &mut ServerState, conn: ConnId, user_id: i32) -> ResultCode {
    let code = authorize(state, conn, user_id);
    if !code.is_success() {
        return code;
    }

    if let Some(session) = state.sessions.remove_by_id(user_id) {
        tracing::info!(user = %session.username, "user logged out");
    }
    ResultCode::Success
}

fn set_status(state: &mut ServerState, conn: ConnId, user_id: i32, status: String) -> ResultCode {
    let code = authorize(state, conn, user_id);
    if !code.is_success() {
        return code;
    }
    if status.is_empty() || status.len() > state.limits.max_status_bytes {
        return ResultCode::InvalidRequest;
    }

    if let Some(session) = state.sessions.find_by_id_mut(user_id) {
        tracing::info!(user = %session.username, status = %status, "status updated");
        session.status = status;
    }
    ResultCode::Success
}

fn get_users(state: &mut ServerState, conn: ConnId, user_id: i32) -> StateReply {
    let code = authorize(state, conn, user_id);
    if !code.is_success() {
        return StateReply::Result(code);
    }

    let users = state
        .users
        .iter()
        .map(|user| {
            let status = state.sessions.status_for(&user.name).to_string();
            (user.name.clone(), status)
        })
        .collect();
    StateReply::Users { users }
}

fn get_groups(state: &mut ServerState, conn: ConnId, user_id: i32) -> StateReply {
    let code = authorize(state, conn, user_id);
    if !code.is_success() {
        return StateReply::Result(code);
    }

    let groups = state
        .groups
        .iter()
        .map(|group| (group.name.clone(), group.members.clone()))
        .collect();
    StateReply::Groups { groups }
}

fn send_message(
    state: &mut ServerState,
    conn: ConnId,
    user_id: i32,
    recipient: Recipient,
    content: String,
) -> StateReply {
    let code = authorize(state, conn, user_id);
    if !code.is_success() {
        return StateReply::Sent {
            result: code,
            message_id: -1,
        };
    }
    let sender = match state.sessions.find_by_id(user_id) {
        Some(session) => session.username.clone(),
        None => {
            return StateReply::Sent {
                result: ResultCode::InvalidRequest,
                message_id: -1,
            };
        }
    };

    if content.trim().is_empty() || content.len() > state.limits.max_content_bytes {
        return invalid_send();
    }

    // Expand the recipient to its delivery targets.
    let targets: Vec<String> = match &recipient {
        Recipient::User(name) => {
            if !state.users.contains(name) {
                return invalid_send();
            }
            vec![name.clone()]
        }
        Recipient::Group(name) => match state.groups.get(name) {
            Some(group) if !group.members.is_empty() => group.members.clone(),
            _ => return invalid_send(),
        },
    };

    // One id per row, each journaled before use; then the one logical record.
    let ids: Vec<i32> = targets
        .iter()
        .map(|_| state.ids.next(&mut state.journal))
        .collect();
    commit_or_warn(state, &Record::NewMessage {
        sender: sender.clone(),
        recipient_type: recipient.type_code(),
        recipient: recipient.name().to_string(),
        content: content.clone(),
    });

    for (id, target) in ids.iter().zip(&targets) {
        state.messages.push(Message {
            id: *id,
            sender: sender.clone(),
            recipient: target.clone(),
            content: content.clone(),
        });
    }

    let first = ids[0];
    tracing::info!(
        from = %sender,
        to = %recipient.name(),
        copies = ids.len(),
        first_id = first,
        "message stored"
    );
    StateReply::Sent {
        result: ResultCode::Success,
        message_id: first,
    }
}

fn invalid_send() -> StateReply {
    StateReply::Sent {
        result: ResultCode::InvalidRequest,
        message_id: -1,
    }
}

fn delete_message(
    state: &mut ServerState,
    conn: ConnId,
    user_id: i32,
    message_id: i32,
) -> ResultCode {
    let code = authorize(state, conn, user_id);
    if !code.is_success() {
        return code;
    }
    let caller = match state.sessions.find_by_id(user_id) {
        Some(session) => session.username.clone(),
        None => return ResultCode::InvalidRequest,
    };

    // Only the recipient of this row may delete it; a group fanout gives
    // every member their own row.
    let owns_row = match state.messages.get(message_id) {
        None => return ResultCode::InvalidRequest,
        Some(message) => message.recipient == caller,
    };
    if !owns_row {
        return ResultCode::Unauthorized;
    }

    commit_or_warn(state, &Record::DeleteMessage { id: message_id });
    state.messages.remove(message_id);
    tracing::info!(user = %caller, id = message_id, "message deleted");
    ResultCode::Success
}

fn get_messages(state: &mut ServerState, conn: ConnId, user_id: i32) -> StateReply {
    let code = authorize(state, conn, user_id);
    if !code.is_success() {
        return StateReply::Result(code);
    }
    let caller = match state.sessions.find_by_id(user_id) {
        Some(session) => session.username.clone(),
        None => return StateReply::Result(ResultCode::InvalidRequest),
    };

    let messages = state
        .messages
        .iter()
        .filter(|m| m.recipient == caller)
        .map(|m| (m.id, m.sender.clone(), m.content.clone()))
        .collect();
    StateReply::Messages { messages }
}

fn commit_or_warn(state: &mut ServerState, record: &Record) {
    if let Err(e) = state.journal.commit(record) {
        tracing::warn!(error = %e, "journal commit failed; change is memory-only");
    }
}
