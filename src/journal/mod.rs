//! Append-only text journal.
//!
//! Every mutating fact the server accepts is committed here before the client
//! hears about it; replaying the file from the top rebuilds the stores. The
//! format is deliberately human-inspectable text, one record per line; the
//! journal is never on a read hot path.
//!
//! A parse failure during replay *poisons* the journal: `has_more` reports
//! false, `commit` refuses to write, and the server keeps running in memory
//! only until it is restarted with a corrected file.

pub mod alloc;
pub mod record;

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use thiserror::Error;

pub use alloc::IdAllocator;
pub use record::{Record, RecordError};

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("journal is poisoned; operating without durability")]
    Poisoned,

    #[error("commit attempted before replay drained the journal")]
    NotDrained,
}

/// The journal file: read-then-append over a single handle.
pub struct Journal {
    file: File,
    /// Full contents at open time; the replay cursor walks this.
    buf: String,
    pos: usize,
    poisoned: bool,
}

impl Journal {
    /// Open (or create) the journal at `path` and load its contents for
    /// replay. Appends go to the same handle once the cursor has drained.
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let buf = String::from_utf8_lossy(&bytes).into_owned();
        tracing::info!(path = %path.display(), size = buf.len(), "journal opened");

        Ok(Self {
            file,
            buf,
            pos: 0,
            poisoned: false,
        })
    }

    /// True iff un-replayed records remain. Always false once poisoned.
    pub fn has_more(&self) -> bool {
        !self.poisoned && record::has_more(&self.buf, self.pos)
    }

    /// Parse the next record and advance the cursor. Any parse error poisons
    /// the journal.
    pub fn next(&mut self) -> Result<Record, JournalError> {
        if self.poisoned {
            return Err(JournalError::Poisoned);
        }
        match record::parse_next(&self.buf, &mut self.pos) {
            Ok(record) => Ok(record),
            Err(e) => {
                self.poisoned = true;
                tracing::error!(error = %e, offset = self.pos, "journal parse failed, poisoning");
                Err(e.into())
            }
        }
    }

    /// Append a record and flush it to the OS.
    ///
    /// Only legal once replay has drained the file; refuses when poisoned.
    pub fn commit(&mut self, record: &Record) -> Result<(), JournalError> {
        if self.poisoned {
            return Err(JournalError::Poisoned);
        }
        if self.has_more() {
            return Err(JournalError::NotDrained);
        }

        let mut line = record.format();
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn journal_in(dir: &tempfile::TempDir) -> Journal {
        Journal::open(&dir.path().join("test.chatjournal")).unwrap()
    }

    #[test]
    fn open_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal_in(&dir);
        assert!(!journal.has_more());
        assert!(dir.path().join("test.chatjournal").exists());
    }

    #[test]
    fn commit_then_reopen_replays_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.chatjournal");

        let records = vec![
            Record::NewUser {
                username: "alice".into(),
            },
            Record::UpdateId { id: 1 },
            Record::NewMessage {
                sender: "alice".into(),
                recipient_type: 0,
                recipient: "alice".into(),
                content: "hi".into(),
            },
            Record::DeleteMessage { id: 1 },
        ];

        {
            let mut journal = Journal::open(&path).unwrap();
            for record in &records {
                journal.commit(record).unwrap();
            }
        }

        let mut journal = Journal::open(&path).unwrap();
        for expected in &records {
            assert!(journal.has_more());
            assert_eq!(&journal.next().unwrap(), expected);
        }
        assert!(!journal.has_more());
    }

    #[test]
    fn commit_refused_before_drain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.chatjournal");

        {
            let mut journal = Journal::open(&path).unwrap();
            journal
                .commit(&Record::NewUser {
                    username: "alice".into(),
                })
                .unwrap();
        }

        let mut journal = Journal::open(&path).unwrap();
        let err = journal.commit(&Record::UpdateId { id: 1 }).unwrap_err();
        assert!(matches!(err, JournalError::NotDrained));

        journal.next().unwrap();
        journal.commit(&Record::UpdateId { id: 1 }).unwrap();
    }

    #[test]
    fn parse_failure_poisons() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.chatjournal");
        std::fs::write(&path, "NEW_USER \"alice\"\nEXPLODE 12\n").unwrap();

        let mut journal = Journal::open(&path).unwrap();
        journal.next().unwrap();
        assert!(journal.has_more());
        assert!(journal.next().is_err());

        // Poisoned: replay is over and commits are refused.
        assert!(journal.is_poisoned());
        assert!(!journal.has_more());
        assert!(matches!(
            journal.commit(&Record::UpdateId { id: 9 }),
            Err(JournalError::Poisoned)
        ));

        // Nothing was appended to the file.
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("UPDATE_ID"));
    }
}
