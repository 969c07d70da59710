// Store module: contact properties, send queue, received log and mailbox

pub mod backend;
pub mod inbox;
pub mod log;
pub mod outbox;

pub use backend::{MemoryProps, PropertyStore, PropsFile, StoreError};
pub use inbox::{MailSink, MailboxError, MemoryMailbox, ReceivedMessage, SledMailbox};
pub use log::MessageLog;
pub use outbox::{OutboxQueue, QueuedMessage};
