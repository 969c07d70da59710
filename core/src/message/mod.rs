// Message module: wire header, handshake envelope, mailsite document

pub mod header;
pub mod mailsite;
pub mod rts;

pub use header::{split_message, wrap_message, Header, HeaderError, MAX_LINE_LENGTH};
pub use mailsite::{key_body, mailpage_key, Mailsite, MailsiteError, MAILPAGE, MAILSITE_SUFFIX};
pub use rts::{RtsMessage, SignedRts};

use crate::crypto::CryptoError;
use crate::slots::SlotError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Header error: {0}")]
    Header(#[from] HeaderError),
    #[error("Bad slot: {0}")]
    Slot(#[from] SlotError),
    #[error("Payload carries no signature")]
    MissingSignature,
    #[error("Signature does not verify")]
    BadSignature,
    #[error("Missing field {0}")]
    MissingField(&'static str),
    #[error("Unexpected message type {0:?}")]
    WrongMessageType(String),
    #[error("Addressed to {actual}, expected {expected}")]
    WrongRecipient { expected: String, actual: String },
}
