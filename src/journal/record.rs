//! Journal record grammar.
//!
//! One record per line on write; on read the grammar is a token stream:
//! whitespace between tokens is insignificant and quoted strings may span
//! lines. Strings are delimited by double quotes; `\"` and `\\` escape a
//! quote and a backslash inside them.
//!
//! ```text
//! NEW_USER "<username>"
//! NEW_GROUP "<name>" <member_count> "<user1>" "<user2>" ...
//! NEW_MESSAGE "<sender>" <recipient_type> "<recipient_name>" "<content>"
//! DELETE_MESSAGE <message_id>
//! UPDATE_ID <new_id>
//! ```

use thiserror::Error;

use crate::core::message::{RECIPIENT_TYPE_GROUP, RECIPIENT_TYPE_USER};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("journal record truncated")]
    Truncated,

    #[error("unknown journal operation: {0}")]
    UnknownOperation(String),

    #[error("malformed journal record: {0}")]
    Malformed(String),
}

/// One durable fact. Everything the stores need to recover is one of these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    NewUser {
        username: String,
    },
    NewGroup {
        name: String,
        members: Vec<String>,
    },
    NewMessage {
        sender: String,
        recipient_type: u8,
        recipient: String,
        content: String,
    },
    DeleteMessage {
        id: i32,
    },
    UpdateId {
        id: i32,
    },
}

impl Record {
    /// Render the record as a single journal line (no trailing newline).
    pub fn format(&self) -> String {
        match self {
            Record::NewUser { username } => format!("NEW_USER {}", quote(username)),
            Record::NewGroup { name, members } => {
                let mut out = format!("NEW_GROUP {} {}", quote(name), members.len());
                for member in members {
                    out.push(' ');
                    out.push_str(&quote(member));
                }
                out
            }
            Record::NewMessage {
                sender,
                recipient_type,
                recipient,
                content,
            } => format!(
                "NEW_MESSAGE {} {} {} {}",
                quote(sender),
                recipient_type,
                quote(recipient),
                quote(content)
            ),
            Record::DeleteMessage { id } => format!("DELETE_MESSAGE {id}"),
            Record::UpdateId { id } => format!("UPDATE_ID {id}"),
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// True iff any non-whitespace byte remains at or after `pos`.
pub fn has_more(input: &str, pos: usize) -> bool {
    input.as_bytes()[pos.min(input.len())..]
        .iter()
        .any(|b| !b.is_ascii_whitespace())
}

/// Parse the next record starting at `pos`, advancing it past the record.
pub fn parse_next(input: &str, pos: &mut usize) -> Result<Record, RecordError> {
    let mut cursor = Cursor { input, pos: *pos };
    let record = cursor.record()?;
    *pos = cursor.pos;
    Ok(record)
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl Cursor<'_> {
    fn record(&mut self) -> Result<Record, RecordError> {
        let op = self.token()?;
        match op.as_str() {
            "NEW_USER" => Ok(Record::NewUser {
                username: self.quoted()?,
            }),
            "NEW_GROUP" => {
                let name = self.quoted()?;
                let count = self.number()?;
                let mut members = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    members.push(self.quoted()?);
                }
                Ok(Record::NewGroup { name, members })
            }
            "NEW_MESSAGE" => {
                let sender = self.quoted()?;
                let recipient_type = match self.number()? {
                    t if t == u32::from(RECIPIENT_TYPE_USER) => RECIPIENT_TYPE_USER,
                    t if t == u32::from(RECIPIENT_TYPE_GROUP) => RECIPIENT_TYPE_GROUP,
                    other => {
                        return Err(RecordError::Malformed(format!(
                            "recipient type {other} is not 0 or 1"
                        )));
                    }
                };
                let recipient = self.quoted()?;
                let content = self.quoted()?;
                Ok(Record::NewMessage {
                    sender,
                    recipient_type,
                    recipient,
                    content,
                })
            }
            "DELETE_MESSAGE" => Ok(Record::DeleteMessage { id: self.id()? }),
            "UPDATE_ID" => Ok(Record::UpdateId { id: self.id()? }),
            other => Err(RecordError::UnknownOperation(other.to_string())),
        }
    }

    fn bytes(&self) -> &[u8] {
        self.input.as_bytes()
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.bytes().get(self.pos) {
            if !b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
    }

    /// Read a bare token up to the next whitespace byte.
    fn token(&mut self) -> Result<String, RecordError> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(b) = self.bytes().get(self.pos) {
            if b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(RecordError::Truncated);
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn number(&mut self) -> Result<u32, RecordError> {
        let token = self.token()?;
        token
            .parse::<u32>()
            .map_err(|_| RecordError::Malformed(format!("expected a number, got {token:?}")))
    }

    fn id(&mut self) -> Result<i32, RecordError> {
        let value = self.number()?;
        i32::try_from(value).map_err(|_| RecordError::Malformed(format!("id {value} out of range")))
    }

    /// Read a quoted string, decoding `\"` and `\\` escapes. The closing quote
    /// may be on a later line.
    fn quoted(&mut self) -> Result<String, RecordError> {
        self.skip_whitespace();
        match self.bytes().get(self.pos) {
            Some(b'"') => self.pos += 1,
            Some(_) => {
                return Err(RecordError::Malformed(
                    "expected '\"' to begin string".to_string(),
                ));
            }
            None => return Err(RecordError::Truncated),
        }

        let mut out = Vec::new();
        loop {
            match self.bytes().get(self.pos) {
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(String::from_utf8_lossy(&out).into_owned());
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.bytes().get(self.pos) {
                        Some(b @ (b'"' | b'\\')) => {
                            out.push(*b);
                            self.pos += 1;
                        }
                        Some(other) => {
                            return Err(RecordError::Malformed(format!(
                                "unknown escape \\{}",
                                char::from(*other)
                            )));
                        }
                        None => return Err(RecordError::Truncated),
                    }
                }
                Some(b) => {
                    out.push(*b);
                    self.pos += 1;
                }
                None => return Err(RecordError::Truncated),
            }
        }
    }
}
