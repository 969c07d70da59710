// Slotpost core: store-and-forward mail over a storage network that can't push
//
// A sender inserts under keys the receiver can predict; the receiver polls
// for them. Everything else here exists to make that reliable.

pub mod clock;
pub mod contact;
pub mod crypto;
pub mod driver;
pub mod identity;
pub mod message;
pub mod network;
pub mod slots;
pub mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use contact::{
    ContactContext, ContactError, ContactPolicy, HandshakeState, InboundContact, OutboundContact,
};
pub use driver::{CycleSummary, DeliveryDelegate, DeliveryEvent, Postman};
pub use identity::{Account, IdentityKeys, IdentityStore};
pub use network::{DirectoryNetwork, MemoryNetwork, NetworkClient, NetworkError, SskKeyPair};
pub use slots::Slot;
pub use store::{MailSink, MemoryMailbox, ReceivedMessage, SledMailbox};

/// Account property file inside the data directory
pub const ACCOUNT_PROPS: &str = "accprops";
pub const CONTACTS_DIR: &str = "contacts";
pub const MAILBOX_DIR: &str = "mailbox";

#[derive(Debug, Error)]
pub enum SlotpostError {
    #[error("Identity error: {0}")]
    Identity(String),
    #[error("Contact error: {0}")]
    Contact(#[from] ContactError),
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] store::MailboxError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<anyhow::Error> for SlotpostError {
    fn from(err: anyhow::Error) -> Self {
        SlotpostError::Identity(format!("{:#}", err))
    }
}

/// One local account on disk:
/// `<data>/accprops`, `<data>/contacts/`, `<data>/mailbox/`
pub struct Slotpost {
    data_dir: PathBuf,
    postman: Arc<Postman>,
    mailbox: Arc<SledMailbox>,
}

impl Slotpost {
    /// Open (creating if needed) the account in `data_dir`
    pub fn open(
        data_dir: impl Into<PathBuf>,
        network: Arc<dyn NetworkClient>,
        clock: Arc<dyn Clock>,
        policy: ContactPolicy,
    ) -> Result<Self, SlotpostError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;

        let identity = IdentityStore::new(Arc::new(store::PropsFile::new(
            data_dir.join(ACCOUNT_PROPS),
        )));
        let account = Account::load_or_create(&identity, network.as_ref())?;

        let mailbox_path = data_dir.join(MAILBOX_DIR);
        let mailbox = Arc::new(SledMailbox::open(&mailbox_path.to_string_lossy())?);

        let ctx = ContactContext {
            network,
            clock,
            account: Arc::new(account),
            policy,
        };
        let postman = Postman::new(ctx, data_dir.join(CONTACTS_DIR), mailbox.clone())?;

        Ok(Self {
            data_dir,
            postman: Arc::new(postman),
            mailbox,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn postman(&self) -> &Arc<Postman> {
        &self.postman
    }

    pub fn account(&self) -> &Account {
        self.postman.account()
    }

    pub fn mailbox(&self) -> &SledMailbox {
        &self.mailbox
    }

    /// Publish the mailsite so others can start handshakes with us
    pub fn publish_mailsite(&self, network: &dyn NetworkClient) -> Result<(), SlotpostError> {
        Ok(self.account().publish_mailsite(network)?)
    }
}
