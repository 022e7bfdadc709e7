//! Messages and delivery targets.

/// Wire and journal tag for a single-user recipient.
pub const RECIPIENT_TYPE_USER: u8 = 0;
/// Wire and journal tag for a group recipient.
pub const RECIPIENT_TYPE_GROUP: u8 = 1;

/// The logical addressee of a send request, resolved at use.
///
/// A group recipient is expanded to its member list when the message is
/// created; stored rows always point at a single user so that an inbox scan
/// and a delete authorization check need no group lookups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    User(String),
    Group(String),
}

impl Recipient {
    pub fn from_wire(type_code: u8, name: String) -> Option<Self> {
        match type_code {
            RECIPIENT_TYPE_USER => Some(Recipient::User(name)),
            RECIPIENT_TYPE_GROUP => Some(Recipient::Group(name)),
            _ => None,
        }
    }

    pub fn type_code(&self) -> u8 {
        match self {
            Recipient::User(_) => RECIPIENT_TYPE_USER,
            Recipient::Group(_) => RECIPIENT_TYPE_GROUP,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Recipient::User(name) | Recipient::Group(name) => name,
        }
    }
}

/// One stored message row.
///
/// `recipient` is the username this row was delivered to. A group send
/// produces one row per member, all sharing sender and content but each with
/// its own id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: i32,
    pub sender: String,
    pub recipient: String,
    pub content: String,
}
