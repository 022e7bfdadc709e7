//! Journal replay: rebuild the stores before the listener opens.
//!
//! Replay is defensive. A record that does not parse poisons the journal
//! (handled inside [`Journal`]); a record that parses but contradicts the
//! stores (unknown user or group, missing preceding UPDATE_ID, duplicate id)
//! is logged and skipped, and replay continues. Session state is never
//! journaled, so after replay every user is logged out with the default
//! status.

use crate::core::message::{RECIPIENT_TYPE_GROUP, RECIPIENT_TYPE_USER};
use crate::core::{Group, GroupStore, Message, MessageStore, User, UserStore};
use crate::journal::{Journal, Record};

pub struct Replayed {
    pub users: UserStore,
    pub groups: GroupStore,
    pub messages: MessageStore,
    /// Seed for the id allocator: the last UPDATE_ID applied, or 0.
    pub last_id: i32,
    pub skipped: usize,
}

pub fn replay(journal: &mut Journal) -> Replayed {
    let mut out = Replayed {
        users: UserStore::default(),
        groups: GroupStore::default(),
        messages: MessageStore::default(),
        last_id: 0,
        skipped: 0,
    };
    // UPDATE_IDs seen since the last record that consumed them. A message
    // record may only spend ids that were journaled ahead of it.
    let mut pending_ids: usize = 0;

    while journal.has_more() {
        let record = match journal.next() {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(error = %e, "replay stopped on malformed record");
                break;
            }
        };
        if let Err(reason) = apply(&mut out, &mut pending_ids, record) {
            tracing::warn!(reason, "skipping inconsistent journal record");
            out.skipped += 1;
        }
    }

    tracing::info!(
        users = out.users.len(),
        groups = out.groups.len(),
        messages = out.messages.len(),
        last_id = out.last_id,
        skipped = out.skipped,
        "journal replayed"
    );
    out
}

fn apply(out: &mut Replayed, pending_ids: &mut usize, record: Record) -> Result<(), &'static str> {
    match record {
        Record::NewUser { username } => {
            if username.is_empty() || out.users.contains(&username) {
                return Err("duplicate or empty username");
            }
            out.users.push(User::new(username));
        }

        Record::NewGroup { name, members } => {
            if name.is_empty() || out.groups.contains(&name) {
                return Err("duplicate or empty group name");
            }
            if members.iter().any(|m| !out.users.contains(m)) {
                return Err("group member does not resolve to a user");
            }
            out.groups.push(Group::new(name, members));
        }

        Record::UpdateId { id } => {
            if id < out.last_id {
                tracing::warn!(id, last_id = out.last_id, "UPDATE_ID went backwards");
            }
            out.last_id = id;
            *pending_ids += 1;
        }

        Record::NewMessage {
            sender,
            recipient_type,
            recipient,
            content,
        } => {
            if !out.users.contains(&sender) {
                return Err("message sender does not resolve to a user");
            }
            match recipient_type {
                RECIPIENT_TYPE_USER => {
                    if !out.users.contains(&recipient) {
                        return Err("message recipient does not resolve to a user");
                    }
                    if *pending_ids < 1 {
                        return Err("message with no preceding UPDATE_ID");
                    }
                    let id = out.last_id;
                    if out.messages.contains(id) {
                        return Err("message id already in use");
                    }
                    out.messages.push(Message {
                        id,
                        sender,
                        recipient,
                        content,
                    });
                    *pending_ids = 0;
                }
                RECIPIENT_TYPE_GROUP => {
                    let members = match out.groups.get(&recipient) {
                        Some(group) => group.members.clone(),
                        None => return Err("message recipient does not resolve to a group"),
                    };
                    if members.is_empty() {
                        return Err("group message with no members");
                    }
                    if *pending_ids < members.len() {
                        return Err("group message with too few preceding UPDATE_IDs");
                    }
                    // The live server journals one UPDATE_ID per member, then
                    // this one logical record: the rows own the last n ids.
                    let base = out.last_id - (members.len() as i32 - 1);
                    for (i, member) in members.into_iter().enumerate() {
                        let id = base + i as i32;
                        if out.messages.contains(id) {
                            tracing::warn!(id, "skipping group row with duplicate id");
                            continue;
                        }
                        out.messages.push(Message {
                            id,
                            sender: sender.clone(),
                            recipient: member,
                            content: content.clone(),
                        });
                    }
                    *pending_ids = 0;
                }
                _ => return Err("unknown recipient type"),
            }
        }

        Record::DeleteMessage { id } => {
            if out.messages.remove(id).is_none() {
                return Err("deleted message does not exist");
            }
        }
    }
    Ok(())
}
