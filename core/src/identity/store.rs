// Identity storage in the account property file

use super::IdentityKeys;
use crate::network::SskKeyPair;
use crate::store::PropertyStore;
use anyhow::{Context, Result};
use std::sync::Arc;
use zeroize::Zeroizing;

const IDENTITY_KEY: &str = "identity.secret";
const MAILSITE_PUBKEY: &str = "mailsite.pubkey";
const MAILSITE_PRIVKEY: &str = "mailsite.privkey";
const RTSKSK_KEY: &str = "rtsksk";

/// Account-level secrets: identity key, own mailsite key pair, RTS keyword
pub struct IdentityStore {
    props: Arc<dyn PropertyStore>,
}

impl IdentityStore {
    pub fn new(props: Arc<dyn PropertyStore>) -> Self {
        Self { props }
    }

    /// Save keys to storage
    pub fn save_keys(&self, keys: &IdentityKeys) -> Result<()> {
        let secret = Zeroizing::new(hex::encode(keys.to_bytes().as_slice()));
        self.props
            .put(IDENTITY_KEY, &secret)
            .context("Failed to save identity key")
    }

    /// Load keys from storage
    pub fn load_keys(&self) -> Result<Option<IdentityKeys>> {
        let Some(secret) = self.props.get(IDENTITY_KEY)? else {
            return Ok(None);
        };
        let bytes = Zeroizing::new(hex::decode(secret.trim()).context("Identity key is not hex")?);
        Ok(Some(IdentityKeys::from_bytes(&bytes)?))
    }

    pub fn save_mailsite(&self, mailsite: &SskKeyPair, rtsksk: &str) -> Result<()> {
        self.props
            .update(
                &[
                    (MAILSITE_PUBKEY, mailsite.pubkey.clone()),
                    (MAILSITE_PRIVKEY, mailsite.privkey.clone()),
                    (RTSKSK_KEY, rtsksk.to_string()),
                ],
                &[],
            )
            .context("Failed to save mailsite keys")
    }

    /// Own mailsite key pair and RTS keyword, if all three are recorded
    pub fn load_mailsite(&self) -> Result<Option<(SskKeyPair, String)>> {
        let pubkey = self.props.get(MAILSITE_PUBKEY)?;
        let privkey = self.props.get(MAILSITE_PRIVKEY)?;
        let rtsksk = self.props.get(RTSKSK_KEY)?;
        Ok(match (pubkey, privkey, rtsksk) {
            (Some(pubkey), Some(privkey), Some(rtsksk)) => {
                Some((SskKeyPair { pubkey, privkey }, rtsksk))
            }
            _ => None,
        })
    }

    /// Clear stored keys
    pub fn clear(&self) -> Result<()> {
        self.props.update(
            &[],
            &[IDENTITY_KEY, MAILSITE_PUBKEY, MAILSITE_PRIVKEY, RTSKSK_KEY],
        )?;
        Ok(())
    }
}
