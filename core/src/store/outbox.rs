// Outbox: durable per-contact send queue
//
// One payload file per uid plus a shared `_index` property file holding
// `{uid}.slot`, `{uid}.first_send_time` and `{uid}.last_send_time`.
// The index is the source of truth for whether a uid is pending: payloads
// are written before their record and deleted after it.

use super::backend::{PropertyStore, PropsFile, StoreError};
use crate::slots::Slot;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the index property file inside the outbox directory
pub const INDEX_FILE: &str = "_index";

/// Stored in place of a missing timestamp
const UNSET: &str = "-1";

/// A queued outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Per-contact unique id, also carried in the `id` header
    pub uid: u64,
    /// Slot the payload is (or will be) inserted under
    pub slot: Slot,
    /// First successful insertion (unix millis)
    pub first_send_time: Option<u64>,
    /// Most recent successful insertion; `None` forces re-insertion
    pub last_send_time: Option<u64>,
}

impl QueuedMessage {
    pub fn new(uid: u64, slot: Slot) -> Self {
        Self {
            uid,
            slot,
            first_send_time: None,
            last_send_time: None,
        }
    }
}

fn io_err(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn record_keys(uid: u64) -> [String; 3] {
    [
        format!("{}.slot", uid),
        format!("{}.first_send_time", uid),
        format!("{}.last_send_time", uid),
    ]
}

fn format_time(t: Option<u64>) -> String {
    t.map(|v| v.to_string()).unwrap_or_else(|| UNSET.to_string())
}

fn parse_time(v: Option<String>) -> Option<u64> {
    // Negative values are the legacy "unset" marker
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

/// Outbound message queue for one contact
pub struct OutboxQueue {
    dir: PathBuf,
    index: PropsFile,
}

impl OutboxQueue {
    /// Open (creating if needed) the outbox directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        let index = PropsFile::new(dir.join(INDEX_FILE));
        Ok(Self { dir, index })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn payload_path(&self, uid: u64) -> PathBuf {
        self.dir.join(uid.to_string())
    }

    /// Write the payload for `uid`. Goes through a temp file so a partial
    /// write never shows up under the uid name.
    pub fn store_payload(&self, uid: u64, payload: &[u8]) -> Result<(), StoreError> {
        let tmp = self.dir.join(format!(".{}.tmp", uid));
        fs::write(&tmp, payload).map_err(|e| io_err(&tmp, e))?;
        let dest = self.payload_path(uid);
        fs::rename(&tmp, &dest).map_err(|e| io_err(&dest, e))
    }

    pub fn read_payload(&self, uid: u64) -> Result<Vec<u8>, StoreError> {
        let path = self.payload_path(uid);
        fs::read(&path).map_err(|e| io_err(&path, e))
    }

    /// Load one record from the index
    pub fn get(&self, uid: u64) -> Result<Option<QueuedMessage>, StoreError> {
        let [slot_key, first_key, last_key] = record_keys(uid);
        let Some(slot) = self.index.get(&slot_key)? else {
            return Ok(None);
        };
        let slot = match Slot::parse(&slot) {
            Ok(slot) => slot,
            Err(e) => {
                warn!("Outbox record {} has an unreadable slot ({}), ignoring it", uid, e);
                return Ok(None);
            }
        };
        Ok(Some(QueuedMessage {
            uid,
            slot,
            first_send_time: parse_time(self.index.get(&first_key)?),
            last_send_time: parse_time(self.index.get(&last_key)?),
        }))
    }

    /// Persist a record (all three fields in one write)
    pub fn save(&self, msg: &QueuedMessage) -> Result<(), StoreError> {
        let [slot, first, last] = record_keys(msg.uid);
        self.index.update(
            &[
                (slot.as_str(), msg.slot.to_string()),
                (first.as_str(), format_time(msg.first_send_time)),
                (last.as_str(), format_time(msg.last_send_time)),
            ],
            &[],
        )
    }

    /// Remove a record, then its payload
    pub fn delete(&self, uid: u64) -> Result<(), StoreError> {
        let [slot, first, last] = record_keys(uid);
        self.index
            .update(&[], &[slot.as_str(), first.as_str(), last.as_str()])?;
        let path = self.payload_path(uid);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    /// Every pending record, ordered by uid.
    ///
    /// Files that are neither a uid nor the index are deleted, as are payloads
    /// whose record is gone (a crash between the two deletes in `delete`).
    pub fn list(&self) -> Result<Vec<QueuedMessage>, StoreError> {
        let mut uids: Vec<u64> = self
            .index
            .keys()?
            .iter()
            .filter_map(|k| k.strip_suffix(".slot"))
            .filter_map(|uid| uid.parse().ok())
            .collect();
        uids.sort_unstable();

        let entries = fs::read_dir(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == INDEX_FILE {
                continue;
            }
            let keep = name
                .parse::<u64>()
                .map(|uid| uids.binary_search(&uid).is_ok())
                .unwrap_or(false);
            if !keep {
                debug!("Found spurious file {:?} in send queue - deleting", name);
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!("Could not delete {:?}: {}", entry.path(), e);
                }
            }
        }

        let mut records = Vec::with_capacity(uids.len());
        for uid in uids {
            if let Some(record) = self.get(uid)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}
