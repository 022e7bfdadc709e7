//! Wire framing primitives.
//!
//! Everything on the wire is little-endian: fixed-width integers, one-byte
//! opcodes and result codes, and length-prefixed byte strings (`u32` length,
//! then the payload, no terminator). Payload bytes are treated as opaque;
//! clients send UTF-8 but nothing enforces it.

use std::io::{Read, Write};

use thiserror::Error;

/// Request opcodes, one byte each. Values are the protocol, not an artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    SendMessage = 0,
    DeleteMessage = 1,
    GetMessages = 2,
    GetUsers = 3,
    SetStatus = 4,
    Login = 5,
    Logout = 6,
    Register = 7,
    Goodbye = 8,
    Heartbeat = 9,
    RegisterGroup = 10,
    GetGroups = 11,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Opcode::SendMessage,
            1 => Opcode::DeleteMessage,
            2 => Opcode::GetMessages,
            3 => Opcode::GetUsers,
            4 => Opcode::SetStatus,
            5 => Opcode::Login,
            6 => Opcode::Logout,
            7 => Opcode::Register,
            8 => Opcode::Goodbye,
            9 => Opcode::Heartbeat,
            10 => Opcode::RegisterGroup,
            11 => Opcode::GetGroups,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One-byte result code closing (or gating) every exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ResultCode {
    Success = 0,
    InvalidRequest = 1,
    Unauthorized = 2,
}

impl ResultCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => ResultCode::Success,
            1 => ResultCode::InvalidRequest,
            2 => ResultCode::Unauthorized,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("string length {got} exceeds cap {max}")]
    StringTooLong { max: usize, got: usize },
}

/// Decode primitives over any byte stream.
pub struct WireReader<R> {
    inner: R,
}

impl<R: Read> WireReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// Read a length-prefixed string. The payload is decoded lossily; the
    /// server never rejects on encoding.
    pub fn read_string(&mut self, max: usize) -> Result<String, WireError> {
        let len = self.read_u32()? as usize;
        if len > max {
            return Err(WireError::StringTooLong { max, got: len });
        }
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Encode primitives over any byte stream.
pub struct WireWriter<W> {
    inner: W,
}

impl<W: Write> WireWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), WireError> {
        self.inner.write_all(&[value])?;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), WireError> {
        self.inner.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<(), WireError> {
        self.inner.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    pub fn write_result(&mut self, code: ResultCode) -> Result<(), WireError> {
        self.write_u8(code.as_u8())
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), WireError> {
        self.write_u32(value.len() as u32)?;
        self.inner.write_all(value.as_bytes())?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), WireError> {
        self.inner.flush()?;
        Ok(())
    }
}
