//! Test fixture: an in-process server on an ephemeral port, and a scripted
//! client speaking the wire protocol byte-for-byte.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::time::Duration;

use parlor::config::Config;
use parlor::core::Limits;
use parlor::server::ServerHandle;

pub const SUCCESS: u8 = 0;
pub const INVALID_REQUEST: u8 = 1;
pub const UNAUTHORIZED: u8 = 2;

pub const OP_SEND_MESSAGE: u8 = 0;
pub const OP_DELETE_MESSAGE: u8 = 1;
pub const OP_GET_MESSAGES: u8 = 2;
pub const OP_GET_USERS: u8 = 3;
pub const OP_SET_STATUS: u8 = 4;
pub const OP_LOGIN: u8 = 5;
pub const OP_LOGOUT: u8 = 6;
pub const OP_REGISTER: u8 = 7;
pub const OP_GOODBYE: u8 = 8;
pub const OP_HEARTBEAT: u8 = 9;
pub const OP_REGISTER_GROUP: u8 = 10;
pub const OP_GET_GROUPS: u8 = 11;

pub const RECIPIENT_USER: u8 = 0;
pub const RECIPIENT_GROUP: u8 = 1;

/// Limits tuned so tests run fast; protocol caps stay at their real values.
pub fn test_limits() -> Limits {
    Limits {
        accept_poll_ms: 10,
        ..Limits::default()
    }
}

pub struct TestServer {
    handle: Option<ServerHandle>,
    config: Config,
    _dir: tempfile::TempDir,
}

impl TestServer {
    pub fn start() -> Self {
        Self::start_with_limits(test_limits())
    }

    pub fn start_with_limits(limits: Limits) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            listen_addr: "127.0.0.1:0".to_string(),
            journal_path: dir.path().join("test.chatjournal"),
            limits,
        };
        let handle = parlor::server::start(config.clone()).expect("start server");
        Self {
            handle: Some(handle),
            config,
            _dir: dir,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.as_ref().expect("server running").local_addr()
    }

    pub fn journal_path(&self) -> PathBuf {
        self.config.journal_path.clone()
    }

    pub fn journal_text(&self) -> String {
        std::fs::read_to_string(&self.config.journal_path).unwrap_or_default()
    }

    /// Stop the server and start a fresh one over the same journal.
    pub fn restart(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
        self.handle = Some(parlor::server::start(self.config.clone()).expect("restart server"));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("read timeout");
        stream.set_nodelay(true).expect("nodelay");
        Self { stream }
    }

    // --- wire primitives ---

    fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes)
    }

    fn send_u32(&mut self, value: u32) -> std::io::Result<()> {
        self.send(&value.to_le_bytes())
    }

    fn send_i32(&mut self, value: i32) -> std::io::Result<()> {
        self.send(&value.to_le_bytes())
    }

    fn send_str(&mut self, value: &str) -> std::io::Result<()> {
        self.send_u32(value.len() as u32)?;
        self.send(value.as_bytes())
    }

    fn recv_u8(&mut self) -> std::io::Result<u8> {
        let mut buf = [0u8; 1];
        self.stream.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn recv_u32(&mut self) -> std::io::Result<u32> {
        let mut buf = [0u8; 4];
        self.stream.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn recv_i32(&mut self) -> std::io::Result<i32> {
        let mut buf = [0u8; 4];
        self.stream.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn recv_str(&mut self) -> std::io::Result<String> {
        let len = self.recv_u32()? as usize;
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    // --- opcodes ---

    pub fn register(&mut self, username: &str) -> std::io::Result<u8> {
        self.send(&[OP_REGISTER])?;
        self.send(username.as_bytes())?;
        self.recv_u8()
    }

    pub fn login(&mut self, username: &str) -> std::io::Result<(i32, u8)> {
        self.send(&[OP_LOGIN])?;
        self.send(username.as_bytes())?;
        let id = self.recv_i32()?;
        let result = self.recv_u8()?;
        Ok((id, result))
    }

    pub fn logout(&mut self, id: i32) -> std::io::Result<u8> {
        self.send(&[OP_LOGOUT])?;
        self.send_i32(id)?;
        self.recv_u8()
    }

    pub fn set_status(&mut self, id: i32, status: &str) -> std::io::Result<u8> {
        self.send(&[OP_SET_STATUS])?;
        self.send_i32(id)?;
        let ack = self.recv_u8()?;
        if ack != SUCCESS {
            return Ok(ack);
        }
        self.send(status.as_bytes())?;
        self.recv_u8()
    }

    pub fn get_users(&mut self, id: i32) -> std::io::Result<(u8, Vec<(String, String)>)> {
        self.send(&[OP_GET_USERS])?;
        self.send_i32(id)?;
        let ack = self.recv_u8()?;
        if ack != SUCCESS {
            return Ok((ack, Vec::new()));
        }
        let count = self.recv_u32()?;
        let mut users = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = self.recv_str()?;
            let status = self.recv_str()?;
            users.push((name, status));
        }
        let result = self.recv_u8()?;
        Ok((result, users))
    }

    pub fn get_groups(&mut self, id: i32) -> std::io::Result<(u8, Vec<(String, Vec<String>)>)> {
        self.send(&[OP_GET_GROUPS])?;
        self.send_i32(id)?;
        let ack = self.recv_u8()?;
        if ack != SUCCESS {
            return Ok((ack, Vec::new()));
        }
        let count = self.recv_u32()?;
        let mut groups = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = self.recv_str()?;
            let member_count = self.recv_u32()?;
            let mut members = Vec::with_capacity(member_count as usize);
            for _ in 0..member_count {
                members.push(self.recv_str()?);
            }
            groups.push((name, members));
        }
        let result = self.recv_u8()?;
        Ok((result, groups))
    }

    pub fn get_messages(&mut self, id: i32) -> std::io::Result<(u8, Vec<(i32, String, String)>)> {
        self.send(&[OP_GET_MESSAGES])?;
        self.send_i32(id)?;
        let ack = self.recv_u8()?;
        if ack != SUCCESS {
            return Ok((ack, Vec::new()));
        }
        let count = self.recv_u32()?;
        let mut messages = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let message_id = self.recv_i32()?;
            let sender = self.recv_str()?;
            let content = self.recv_str()?;
            messages.push((message_id, sender, content));
        }
        let result = self.recv_u8()?;
        Ok((result, messages))
    }

    /// Returns (result, first allocated message id); the id is -1 unless the
    /// result is SUCCESS.
    pub fn send_message(
        &mut self,
        id: i32,
        recipient_type: u8,
        recipient: &str,
        content: &str,
    ) -> std::io::Result<(u8, i32)> {
        self.send(&[OP_SEND_MESSAGE])?;
        self.send_i32(id)?;
        let ack = self.recv_u8()?;
        if ack != SUCCESS {
            return Ok((ack, -1));
        }
        self.send(&[recipient_type])?;
        self.send_str(recipient)?;
        self.send_str(content)?;
        let result = self.recv_u8()?;
        if result != SUCCESS {
            return Ok((result, -1));
        }
        let message_id = self.recv_i32()?;
        Ok((result, message_id))
    }

    pub fn delete_message(&mut self, id: i32, message_id: i32) -> std::io::Result<u8> {
        self.send(&[OP_DELETE_MESSAGE])?;
        self.send_i32(id)?;
        let ack = self.recv_u8()?;
        if ack != SUCCESS {
            return Ok(ack);
        }
        self.send_i32(message_id)?;
        self.recv_u8()
    }

    pub fn register_group(&mut self, name: &str, members: &[&str]) -> std::io::Result<u8> {
        self.send(&[OP_REGISTER_GROUP])?;
        self.send_str(name)?;
        let ack = self.recv_u8()?;
        if ack != SUCCESS {
            return Ok(ack);
        }
        self.send_u32(members.len() as u32)?;
        for member in members {
            self.send_str(member)?;
        }
        self.recv_u8()
    }

    pub fn heartbeat(&mut self) -> std::io::Result<u8> {
        self.send(&[OP_HEARTBEAT])?;
        self.recv_u8()
    }

    pub fn goodbye(&mut self) -> std::io::Result<()> {
        self.send(&[OP_GOODBYE])
    }

    pub fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.send(bytes)
    }

    pub fn recv_result(&mut self) -> std::io::Result<u8> {
        self.recv_u8()
    }
}
