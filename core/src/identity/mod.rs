// Identity: the local account's long-term keys and published mailsite

mod keys;
mod store;

pub use keys::{IdentityKeys, SIGNATURE_LEN};
pub use store::IdentityStore;

use crate::message::{Mailsite, MAILPAGE, MAILSITE_SUFFIX};
use crate::network::{NetworkClient, SskKeyPair};
use crate::slots::Slot;
use anyhow::{Context, Result};

/// The local account: identity key plus the mailsite peers reach it through
pub struct Account {
    keys: IdentityKeys,
    mailsite: SskKeyPair,
    rtsksk: String,
}

impl Account {
    /// Load the account from `store`, generating whatever is missing
    pub fn load_or_create(store: &IdentityStore, network: &dyn NetworkClient) -> Result<Self> {
        let keys = match store.load_keys()? {
            Some(keys) => {
                tracing::info!("🔑 Loaded existing identity");
                keys
            }
            None => {
                tracing::info!("🔑 Generating new identity");
                let keys = IdentityKeys::generate();
                store.save_keys(&keys)?;
                keys
            }
        };

        let (mailsite, rtsksk) = match store.load_mailsite()? {
            Some(found) => found,
            None => {
                let mailsite = network
                    .generate_key_pair()
                    .context("Failed to generate mailsite key pair")?;
                // Random keyword so RTS inserts can't be predicted from the mailsite key
                let rtsksk = Slot::random().to_string().to_lowercase();
                store.save_mailsite(&mailsite, &rtsksk)?;
                (mailsite, rtsksk)
            }
        };

        Ok(Self {
            keys,
            mailsite,
            rtsksk,
        })
    }

    pub fn keys(&self) -> &IdentityKeys {
        &self.keys
    }

    /// Public mailsite URI, as carried in the `mailsite` field of an RTS
    pub fn mailsite_uri(&self) -> &str {
        &self.mailsite.pubkey
    }

    /// Mailsite key body: the address peers know this account by
    pub fn mailsite_key(&self) -> &str {
        self.mailsite.public_body()
    }

    pub fn rtsksk(&self) -> &str {
        &self.rtsksk
    }

    pub fn mailsite_document(&self) -> Mailsite {
        Mailsite {
            rtsksk: self.rtsksk.clone(),
            public_key: self.keys.public_key(),
        }
    }

    /// Insert the mailsite document. Re-publishing identical content is a no-op.
    pub fn publish_mailsite(&self, network: &dyn NetworkClient) -> Result<()> {
        let key = format!(
            "{}{}/1/{}",
            self.mailsite.privkey, MAILSITE_SUFFIX, MAILPAGE
        );
        network
            .insert(&self.mailsite_document().to_bytes(), &key, 1, "")
            .context("Failed to publish mailsite")?;
        tracing::info!("Published mailsite for {}", self.mailsite_key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::mailpage_key;
    use crate::network::MemoryNetwork;
    use crate::store::{MemoryProps, PropsFile};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_account_creation() {
        let network = MemoryNetwork::new();
        let store = IdentityStore::new(Arc::new(MemoryProps::new()));
        let account = Account::load_or_create(&store, &network).unwrap();

        assert!(account.mailsite_uri().starts_with("SSK@"));
        assert!(!account.mailsite_key().contains('/'));
        assert!(!account.rtsksk().is_empty());
    }

    #[test]
    fn test_account_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("accprops");
        let network = MemoryNetwork::new();

        let first = Account::load_or_create(
            &IdentityStore::new(Arc::new(PropsFile::new(&path))),
            &network,
        )
        .unwrap();
        let second = Account::load_or_create(
            &IdentityStore::new(Arc::new(PropsFile::new(&path))),
            &network,
        )
        .unwrap();

        assert_eq!(first.keys().public_key(), second.keys().public_key());
        assert_eq!(first.mailsite_key(), second.mailsite_key());
        assert_eq!(first.rtsksk(), second.rtsksk());
    }

    #[test]
    fn test_publish_mailsite() {
        let network = MemoryNetwork::new();
        let store = IdentityStore::new(Arc::new(MemoryProps::new()));
        let account = Account::load_or_create(&store, &network).unwrap();

        account.publish_mailsite(&network).unwrap();
        // Publishing twice is fine
        account.publish_mailsite(&network).unwrap();

        let fetched = network
            .fetch(&mailpage_key(account.mailsite_key()))
            .unwrap()
            .unwrap();
        let site = Mailsite::parse(&fetched).unwrap();
        assert_eq!(site.public_key, account.keys().public_key());
        assert_eq!(site.rtsksk, account.rtsksk());
    }
}
