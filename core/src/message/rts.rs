// Request-to-send: the sealed handshake that opens a channel to a contact
//
// Plaintext is a CRLF header block ending in a blank line. The SHA-256
// digest of that block is signed with the sender's identity key and the
// signature appended; the result is encrypted to the recipient's identity
// key with the chained block cipher.

use super::header::read_header;
use super::CodecError;
use crate::crypto::{chained, BlockOpener, BlockSealer};
use crate::identity::{IdentityKeys, SIGNATURE_LEN};
use crate::slots::Slot;
use std::io::Cursor;

pub const MESSAGE_TYPE: &str = "rts";

const HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtsMessage {
    /// Public half of the channel messages are inserted under
    pub commssk: String,
    /// Private half of the key the recipient acknowledges through
    pub ackssk: String,
    /// First slot of the shared sequence
    pub initial_slot: Slot,
    /// Recipient's mailsite key
    pub to: String,
    /// Sender's mailsite URI
    pub mailsite: String,
}

impl RtsMessage {
    /// The unsigned header block
    pub fn to_plaintext(&self) -> Vec<u8> {
        format!(
            "commssk={}\r\nackssk={}\r\ninitialslot={}\r\nmessagetype={}\r\nto={}\r\nmailsite={}\r\n\r\n",
            self.commssk, self.ackssk, self.initial_slot, MESSAGE_TYPE, self.to, self.mailsite
        )
        .into_bytes()
    }

    /// Sign with `sender` and encrypt to `recipient_public_key`
    pub fn seal(
        &self,
        sender: &IdentityKeys,
        recipient_public_key: &[u8; 32],
    ) -> Result<Vec<u8>, CodecError> {
        let mut payload = self.to_plaintext();
        let signature = sender.sign_digest(&payload);
        payload.extend_from_slice(&signature);

        let sealer = BlockSealer::new(recipient_public_key)?;
        Ok(chained::encrypt(&sealer, &payload)?)
    }

    /// Decrypt an RTS addressed to `recipient`. The signature is checked
    /// separately once the sender's mailsite is known.
    pub fn open(ciphertext: &[u8], recipient: &IdentityKeys) -> Result<SignedRts, CodecError> {
        let opener = BlockOpener::new(&recipient.signing_key);
        let plaintext = chained::decrypt(&opener, ciphertext)?;

        let end = plaintext
            .windows(HEADER_END.len())
            .position(|w| w == HEADER_END)
            .map(|i| i + HEADER_END.len())
            .ok_or(CodecError::MissingSignature)?;
        let (payload, signature) = plaintext.split_at(end);
        if signature.len() != SIGNATURE_LEN {
            return Err(CodecError::MissingSignature);
        }

        let message = Self::parse(payload)?;
        Ok(SignedRts {
            message,
            signature: signature.to_vec(),
            payload: payload.to_vec(),
        })
    }

    fn parse(payload: &[u8]) -> Result<Self, CodecError> {
        let header = read_header(&mut Cursor::new(payload))?;
        let field = |name: &'static str| {
            header
                .get(name)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(CodecError::MissingField(name))
        };

        let messagetype = field("messagetype")?;
        if messagetype != MESSAGE_TYPE {
            return Err(CodecError::WrongMessageType(messagetype));
        }

        Ok(Self {
            commssk: field("commssk")?,
            ackssk: field("ackssk")?,
            initial_slot: Slot::parse(&field("initialslot")?)?,
            to: field("to")?,
            mailsite: field("mailsite")?,
        })
    }
}

/// A decrypted RTS whose signature has not been checked yet
#[derive(Debug, Clone)]
pub struct SignedRts {
    pub message: RtsMessage,
    signature: Vec<u8>,
    payload: Vec<u8>,
}

impl SignedRts {
    /// Check the signature against the sender's key and the recipient field
    /// against our own mailsite key
    pub fn verify(
        self,
        sender_public_key: &[u8; 32],
        own_mailsite_key: &str,
    ) -> Result<RtsMessage, CodecError> {
        let valid = IdentityKeys::verify_digest(&self.payload, &self.signature, sender_public_key)
            .map_err(|_| CodecError::BadSignature)?;
        if !valid {
            return Err(CodecError::BadSignature);
        }
        if self.message.to != own_mailsite_key {
            return Err(CodecError::WrongRecipient {
                expected: own_mailsite_key.to_string(),
                actual: self.message.to,
            });
        }
        Ok(self.message)
    }
}
