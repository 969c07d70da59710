// Mailsite document: what a sender needs to start a handshake with us
//
// Published as a property block at `USK@{mailsite key}/mailsite/1/mailpage`.

use crate::crypto::validate_ed25519_public_key;
use crate::network::{PUBLIC_PREFIX, UPDATABLE_PREFIX};
use crate::store::PropsFile;
use thiserror::Error;

pub const MAILSITE_SUFFIX: &str = "mailsite";
pub const MAILPAGE: &str = "mailpage";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MailsiteError {
    #[error("Mailsite is missing {0}")]
    MissingField(&'static str),
    #[error("Mailsite carries an unusable public key")]
    InvalidKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailsite {
    /// Keyword base for RTS inserts
    pub rtsksk: String,
    /// Ed25519 public key that RTS payloads are sealed to and signed against
    pub public_key: [u8; 32],
}

impl Mailsite {
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "rtsksk={}\r\nasymkey.pubkey={}\r\n",
            self.rtsksk,
            hex::encode(self.public_key)
        )
        .into_bytes()
    }

    /// Parse a fetched mailsite. Anything missing or malformed means the
    /// contact cannot be reached at all.
    pub fn parse(bytes: &[u8]) -> Result<Self, MailsiteError> {
        let props = PropsFile::parse(&String::from_utf8_lossy(bytes));
        let rtsksk = props
            .get("rtsksk")
            .filter(|v| !v.is_empty())
            .ok_or(MailsiteError::MissingField("rtsksk"))?
            .clone();
        let key_hex = props
            .get("asymkey.pubkey")
            .ok_or(MailsiteError::MissingField("asymkey.pubkey"))?;
        let raw = hex::decode(key_hex.trim()).map_err(|_| MailsiteError::InvalidKey)?;
        let public_key = validate_ed25519_public_key(&raw).map_err(|_| MailsiteError::InvalidKey)?;
        Ok(Self { rtsksk, public_key })
    }
}

/// Strip a mailsite URI (`SSK@body/`, `USK@body/...`) down to its key body
pub fn key_body(uri: &str) -> &str {
    let rest = uri
        .strip_prefix(PUBLIC_PREFIX)
        .or_else(|| uri.strip_prefix(UPDATABLE_PREFIX))
        .unwrap_or(uri);
    rest.split('/').next().unwrap_or(rest)
}

/// Where the mailsite for `mailsite_key` (a key body) is published
pub fn mailpage_key(mailsite_key: &str) -> String {
    format!(
        "{}{}/{}/1/{}",
        UPDATABLE_PREFIX, mailsite_key, MAILSITE_SUFFIX, MAILPAGE
    )
}
