//! Per-connection handler thread.
//!
//! Reads opcodes off one socket and runs the matching wire conversation,
//! bouncing every state touch off the state thread. Connections are
//! multi-request: the loop runs until GOODBYE, end-of-stream, a socket error,
//! a mid-request stall, or the pruner flags the connection for close.
//!
//! Three payloads are *unframed*: REGISTER and LOGIN usernames and the
//! SET_STATUS body arrive as raw bytes with no length prefix, read until the
//! sender stalls or the buffer cap is hit. Everything else is
//! length-prefixed.

use std::io::Read;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::Sender;
use thiserror::Error;

use super::state::{StateMessage, StateReply, StateRequest};
use super::wire::{Opcode, ResultCode, WireError, WireReader, WireWriter};
use crate::core::{ConnId, Limits, Recipient};

#[derive(Debug, Error)]
enum ConnError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("state thread unavailable")]
    StateGone,
}

impl From<std::io::Error> for ConnError {
    fn from(e: std::io::Error) -> Self {
        ConnError::Wire(WireError::Io(e))
    }
}

enum Flow {
    Continue,
    Close,
}

/// Handle one client connection until it goes away.
pub fn handle_client(stream: TcpStream, req_tx: Sender<StateMessage>, limits: Limits) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    if stream.set_read_timeout(Some(limits.read_timeout())).is_err() {
        return;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let conn = match call(&req_tx, StateRequest::Attach {
        shutdown: Arc::clone(&shutdown),
    }) {
        Ok(StateReply::Attached { conn }) => conn,
        _ => return,
    };
    tracing::debug!(%conn, %peer, "client connected");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::debug!(%conn, %peer, "connection closed by pruner");
            break;
        }

        // Wait for the next opcode. A timeout here is just an idle client;
        // anything else ends the connection.
        let mut opcode_byte = [0u8; 1];
        match (&stream).read_exact(&mut opcode_byte) {
            Ok(()) => {}
            Err(e) if is_timeout(&e) => continue,
            Err(_) => {
                cast(&req_tx, StateRequest::Detach { conn });
                break;
            }
        }

        match dispatch(opcode_byte[0], &stream, &req_tx, conn, &limits) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Close) => break,
            Err(e) => {
                // Mid-request stalls and socket errors both drop the client.
                tracing::debug!(%conn, %peer, error = %e, "client dropped");
                cast(&req_tx, StateRequest::Detach { conn });
                break;
            }
        }
    }
}

fn dispatch(
    opcode_byte: u8,
    stream: &TcpStream,
    req_tx: &Sender<StateMessage>,
    conn: ConnId,
    limits: &Limits,
) -> Result<Flow, ConnError> {
    let mut reader = WireReader::new(stream);
    let mut writer = WireWriter::new(stream);

    let Some(opcode) = Opcode::from_u8(opcode_byte) else {
        tracing::warn!(%conn, opcode = opcode_byte, "unknown opcode");
        writer.write_result(ResultCode::InvalidRequest)?;
        return Ok(Flow::Continue);
    };

    match opcode {
        Opcode::Register => {
            let username = read_unframed_string(stream, limits)?;
            let code = result_of(call(req_tx, StateRequest::Register { conn, username })?);
            writer.write_result(code)?;
        }

        Opcode::Login => {
            let username = read_unframed_string(stream, limits)?;
            match call(req_tx, StateRequest::Login { conn, username })? {
                StateReply::Login { id, result } => {
                    writer.write_i32(id)?;
                    writer.write_result(result)?;
                }
                _ => {
                    writer.write_i32(-1)?;
                    writer.write_result(ResultCode::InvalidRequest)?;
                }
            }
        }

        Opcode::Logout => {
            let user_id = reader.read_i32()?;
            let code = result_of(call(req_tx, StateRequest::Logout { conn, user_id })?);
            writer.write_result(code)?;
        }

        Opcode::SetStatus => {
            let user_id = reader.read_i32()?;
            let code = result_of(call(req_tx, StateRequest::Authorize { conn, user_id })?);
            writer.write_result(code)?;
            if !code.is_success() {
                return Ok(Flow::Continue);
            }

            let status = read_unframed_string(stream, limits)?;
            let code = result_of(call(req_tx, StateRequest::SetStatus {
                conn,
                user_id,
                status,
            })?);
            writer.write_result(code)?;
        }

        Opcode::GetUsers => {
            let user_id = reader.read_i32()?;
            match call(req_tx, StateRequest::GetUsers { conn, user_id })? {
                StateReply::Users { users } => {
                    writer.write_result(ResultCode::Success)?;
                    writer.write_u32(users.len() as u32)?;
                    for (name, status) in &users {
                        writer.write_string(name)?;
                        writer.write_string(status)?;
                    }
                    writer.write_result(ResultCode::Success)?;
                }
                reply => writer.write_result(result_of(reply))?,
            }
        }

        Opcode::GetGroups => {
            let user_id = reader.read_i32()?;
            match call(req_tx, StateRequest::GetGroups { conn, user_id })? {
                StateReply::Groups { groups } => {
                    writer.write_result(ResultCode::Success)?;
                    writer.write_u32(groups.len() as u32)?;
                    for (name, members) in &groups {
                        writer.write_string(name)?;
                        writer.write_u32(members.len() as u32)?;
                        for member in members {
                            writer.write_string(member)?;
                        }
                    }
                    writer.write_result(ResultCode::Success)?;
                }
                reply => writer.write_result(result_of(reply))?,
            }
        }

        Opcode::GetMessages => {
            let user_id = reader.read_i32()?;
            match call(req_tx, StateRequest::GetMessages { conn, user_id })? {
                StateReply::Messages { messages } => {
                    writer.write_result(ResultCode::Success)?;
                    writer.write_u32(messages.len() as u32)?;
                    for (id, sender, content) in &messages {
                        writer.write_i32(*id)?;
                        writer.write_string(sender)?;
                        writer.write_string(content)?;
                    }
                    writer.write_result(ResultCode::Success)?;
                }
                reply => writer.write_result(result_of(reply))?,
            }
        }

        Opcode::SendMessage => {
            let user_id = reader.read_i32()?;
            let code = result_of(call(req_tx, StateRequest::Authorize { conn, user_id })?);
            writer.write_result(code)?;
            if !code.is_success() {
                return Ok(Flow::Continue);
            }

            let recipient_type = reader.read_u8()?;
            let recipient_name = reader.read_string(limits.max_string_bytes)?;
            let content = reader.read_string(limits.max_string_bytes)?;

            let Some(recipient) = Recipient::from_wire(recipient_type, recipient_name) else {
                writer.write_result(ResultCode::InvalidRequest)?;
                return Ok(Flow::Continue);
            };

            match call(req_tx, StateRequest::SendMessage {
                conn,
                user_id,
                recipient,
                content,
            })? {
                StateReply::Sent { result, message_id } => {
                    writer.write_result(result)?;
                    if result.is_success() {
                        writer.write_i32(message_id)?;
                    }
                }
                reply => writer.write_result(result_of(reply))?,
            }
        }

        Opcode::DeleteMessage => {
            let user_id = reader.read_i32()?;
            let code = result_of(call(req_tx, StateRequest::Authorize { conn, user_id })?);
            writer.write_result(code)?;
            if !code.is_success() {
                return Ok(Flow::Continue);
            }

            let message_id = reader.read_i32()?;
            let code = result_of(call(req_tx, StateRequest::DeleteMessage {
                conn,
                user_id,
                message_id,
            })?);
            writer.write_result(code)?;
        }

        Opcode::RegisterGroup => {
            let name = reader.read_string(limits.max_string_bytes)?;
            let code = result_of(call(req_tx, StateRequest::GroupNameAvailable {
                name: name.clone(),
            })?);
            writer.write_result(code)?;
            if !code.is_success() {
                return Ok(Flow::Continue);
            }

            let count = reader.read_u32()? as usize;
            if count > limits.max_group_members {
                writer.write_result(ResultCode::InvalidRequest)?;
                return Ok(Flow::Continue);
            }
            let mut members = Vec::with_capacity(count);
            for _ in 0..count {
                members.push(reader.read_string(limits.max_string_bytes)?);
            }

            let code = result_of(call(req_tx, StateRequest::RegisterGroup {
                conn,
                name,
                members,
            })?);
            writer.write_result(code)?;
        }

        Opcode::Heartbeat => {
            let code = result_of(call(req_tx, StateRequest::Heartbeat { conn })?);
            writer.write_result(code)?;
        }

        Opcode::Goodbye => {
            // No reply; drop the liveness slot and close.
            cast(req_tx, StateRequest::Detach { conn });
            return Ok(Flow::Close);
        }
    }

    Ok(Flow::Continue)
}

/// Send a request and wait for the reply.
fn call(req_tx: &Sender<StateMessage>, request: StateRequest) -> Result<StateReply, ConnError> {
    let (respond, reply_rx) = crossbeam::channel::bounded(1);
    req_tx
        .send(StateMessage { request, respond })
        .map_err(|_| ConnError::StateGone)?;
    reply_rx.recv().map_err(|_| ConnError::StateGone)
}

/// Send a request nobody answers (Detach).
fn cast(req_tx: &Sender<StateMessage>, request: StateRequest) {
    let (respond, _) = crossbeam::channel::bounded(1);
    let _ = req_tx.send(StateMessage { request, respond });
}

fn result_of(reply: StateReply) -> ResultCode {
    match reply {
        StateReply::Result(code) => code,
        StateReply::Login { result, .. } | StateReply::Sent { result, .. } => result,
        StateReply::Users { .. } | StateReply::Groups { .. } | StateReply::Messages { .. } => {
            ResultCode::Success
        }
        StateReply::Attached { .. } | StateReply::ShuttingDown => ResultCode::InvalidRequest,
    }
}

/// Read an unframed payload: block for the first bytes under the normal
/// receive timeout, then keep reading with the short stall timeout until the
/// sender pauses, the stream ends, or the cap fills.
fn read_unframed(stream: &TcpStream, limits: &Limits) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; limits.max_unframed_bytes];
    let mut reader = stream;

    let mut filled = reader.read(&mut buf)?;
    if filled == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "stream closed before payload",
        ));
    }

    stream.set_read_timeout(Some(limits.stall_timeout()))?;
    let outcome = loop {
        if filled == buf.len() {
            break Ok(());
        }
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break Ok(()),
            Ok(n) => filled += n,
            Err(e) if is_timeout(&e) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    stream.set_read_timeout(Some(limits.read_timeout()))?;
    outcome?;

    buf.truncate(filled);
    Ok(buf)
}

fn read_unframed_string(stream: &TcpStream, limits: &Limits) -> Result<String, ConnError> {
    let bytes = read_unframed(stream, limits)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
