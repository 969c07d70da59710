// Inbox: where accepted inbound messages end up
//
// Mail formatting and presentation live elsewhere; this is the hand-off
// point. Inbound contacts only append the id to their dedup log once the
// sink reports success.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone)]
pub enum MailboxError {
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// A delivered message record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    /// Mailsite key of the sending contact
    pub contact: String,
    /// Sender-assigned id from the `id` header
    pub message_id: u64,
    /// Body bytes following the header block
    pub body: Vec<u8>,
    /// When this was stored (unix millis)
    pub received_at: u64,
}

/// Destination for accepted inbound mail
pub trait MailSink: Send + Sync {
    fn store(&self, msg: ReceivedMessage) -> Result<(), MailboxError>;
}

/// In-memory mailbox for tests and dry runs
#[derive(Clone, Default)]
pub struct MemoryMailbox {
    messages: Arc<RwLock<Vec<ReceivedMessage>>>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<ReceivedMessage> {
        self.messages.read().clone()
    }

    pub fn messages_from(&self, contact: &str) -> Vec<ReceivedMessage> {
        self.messages
            .read()
            .iter()
            .filter(|m| m.contact == contact)
            .cloned()
            .collect()
    }

    pub fn total_count(&self) -> usize {
        self.messages.read().len()
    }
}

impl MailSink for MemoryMailbox {
    fn store(&self, msg: ReceivedMessage) -> Result<(), MailboxError> {
        self.messages.write().push(msg);
        Ok(())
    }
}

/// Persistent sled-backed mailbox
pub struct SledMailbox {
    #[allow(dead_code)] // Keeps sled::Db alive (RAII)
    db: sled::Db,
    messages_tree: sled::Tree,
}

impl SledMailbox {
    /// Create or open a persistent mailbox
    pub fn new(db: sled::Db) -> Result<Self, MailboxError> {
        let messages_tree = db
            .open_tree("mailbox_messages")
            .map_err(|e| MailboxError::StorageError(e.to_string()))?;
        Ok(Self { db, messages_tree })
    }

    /// Open a mailbox database at `path`
    pub fn open(path: &str) -> Result<Self, MailboxError> {
        let db = sled::open(path).map_err(|e| MailboxError::StorageError(e.to_string()))?;
        Self::new(db)
    }

    fn make_key(contact: &str, message_id: u64) -> Vec<u8> {
        // Zero-padded so a prefix scan returns a contact's mail in id order
        format!("{}:{:020}", contact, message_id).into_bytes()
    }

    /// Messages from one contact, ordered by id
    pub fn messages_from(&self, contact: &str) -> Result<Vec<ReceivedMessage>, MailboxError> {
        let prefix = format!("{}:", contact);
        let mut out = Vec::new();
        for item in self.messages_tree.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item.map_err(|e| MailboxError::StorageError(e.to_string()))?;
            let msg = bincode::deserialize(&value)
                .map_err(|e| MailboxError::SerializationError(e.to_string()))?;
            out.push(msg);
        }
        Ok(out)
    }

    /// Every stored message
    pub fn all_messages(&self) -> Result<Vec<ReceivedMessage>, MailboxError> {
        let mut out = Vec::new();
        for item in self.messages_tree.iter() {
            let (_, value) = item.map_err(|e| MailboxError::StorageError(e.to_string()))?;
            let msg = bincode::deserialize(&value)
                .map_err(|e| MailboxError::SerializationError(e.to_string()))?;
            out.push(msg);
        }
        Ok(out)
    }

    pub fn total_count(&self) -> usize {
        self.messages_tree.len()
    }
}

impl MailSink for SledMailbox {
    fn store(&self, msg: ReceivedMessage) -> Result<(), MailboxError> {
        let mut key = Self::make_key(&msg.contact, msg.message_id);
        // Ids start over when a sender sets up a new channel; keep both
        if self
            .messages_tree
            .contains_key(&key)
            .map_err(|e| MailboxError::StorageError(e.to_string()))?
        {
            key.extend_from_slice(format!(":{:020}", msg.received_at).as_bytes());
        }
        let value =
            bincode::serialize(&msg).map_err(|e| MailboxError::SerializationError(e.to_string()))?;
        self.messages_tree
            .insert(key, value)
            .map_err(|e| MailboxError::StorageError(e.to_string()))?;
        self.messages_tree
            .flush()
            .map_err(|e| MailboxError::StorageError(e.to_string()))?;
        debug!("Stored message {} from {}", msg.message_id, msg.contact);
        Ok(())
    }
}
