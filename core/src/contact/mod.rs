// Contacts: one directory and one property set per peer and direction
//
// <contacts>/outbound/<mailsite key>/{props, outbox/}
// <contacts>/inbound/<mailsite key>/{props, log}

pub mod inbound;
pub mod outbound;
pub mod state;

pub use inbound::{FetchReport, InboundContact, RtsOutcome, VerifiedRts};
pub use outbound::{CommReport, HandshakeProgress, OutboundContact};
pub use state::{HandshakeState, OutboundState};

use crate::clock::Clock;
use crate::identity::Account;
use crate::message::CodecError;
use crate::network::{NetworkClient, NetworkError};
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub const OUTBOUND_DIR: &str = "outbound";
pub const INBOUND_DIR: &str = "inbound";
pub const PROPS_FILE: &str = "props";
pub const OUTBOX_DIR: &str = "outbox";

const HOUR_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum ContactError {
    /// The contact cannot make progress without a human
    #[error("Fatal: {0}")]
    Fatal(String),
    /// Local state is unusable; logged and skipped
    #[error("Corrupt contact state: {0}")]
    Corrupt(String),
    /// Worth retrying on the next cycle
    #[error("Transient network failure: {0}")]
    Transient(#[from] NetworkError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl ContactError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ContactError::Fatal(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ContactError::Transient(_))
    }
}

/// Protocol timers and scan width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactPolicy {
    /// How long to wait for a CTS before resending the RTS
    pub cts_wait_ms: u64,
    /// How long to wait for an ack before inserting on a fresh slot
    pub retransmit_delay_ms: u64,
    /// How long after the first insert to give up on a message
    pub fail_delay_ms: u64,
    /// Slots to look past the last occupied one
    pub poll_ahead: usize,
}

impl Default for ContactPolicy {
    fn default() -> Self {
        Self {
            cts_wait_ms: 26 * HOUR_MS,
            retransmit_delay_ms: 26 * HOUR_MS,
            fail_delay_ms: 5 * 24 * HOUR_MS,
            poll_ahead: 6,
        }
    }
}

/// What every contact needs from its surroundings
#[derive(Clone)]
pub struct ContactContext {
    pub network: Arc<dyn NetworkClient>,
    pub clock: Arc<dyn Clock>,
    pub account: Arc<Account>,
    pub policy: ContactPolicy,
}

/// Directory for one contact, created if needed
pub(crate) fn contact_dir(
    contacts_root: &Path,
    direction: &str,
    mailsite_key: &str,
) -> Result<PathBuf, ContactError> {
    if mailsite_key.is_empty() || mailsite_key.contains(['/', '\\', '.']) {
        return Err(ContactError::Corrupt(format!(
            "{:?} is not a usable mailsite key",
            mailsite_key
        )));
    }
    let dir = contacts_root.join(direction).join(mailsite_key);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Mailsite keys of every contact directory under `<contacts_root>/<direction>`
pub fn list_contacts(contacts_root: &Path, direction: &str) -> io::Result<Vec<String>> {
    let dir = contacts_root.join(direction);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut keys = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            keys.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    keys.sort();
    Ok(keys)
}

/// `yyyy-MM-dd` (UTC) for the RTS keyword
pub(crate) fn date_string(now_millis: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(now_millis as i64)
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}
