// Periodic driver: walks every contact once per cycle
//
// Outbound: handshake check, then insert-and-poll-acks. Inbound: poll-ahead
// fetch. Each contact sits behind its own mutex so two cycles never overlap
// on one contact; a busy contact is skipped rather than waited for.

use crate::contact::{
    date_string, list_contacts, ContactContext, ContactError, HandshakeProgress, InboundContact,
    OutboundContact, RtsOutcome, VerifiedRts, INBOUND_DIR, OUTBOUND_DIR,
};
use crate::identity::Account;
use crate::network::KEYWORD_PREFIX;
use crate::store::MailSink;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Something the user may want to hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// Inbound message handed to the mailbox
    Delivered { contact: String, message_id: u64 },
    /// Outbound message acknowledged by the peer
    Acknowledged { contact: String, uid: u64 },
    /// Outbound message given up on
    Undeliverable { contact: String, uid: u64 },
    /// Handshake with an outbound contact completed
    CtsReceived { contact: String },
    /// A new inbound contact introduced itself
    ContactAccepted { contact: String },
    /// The contact is parked until someone clears the marker
    NeedsAttention { contact: String, reason: String },
}

/// Callback interface for delivery events (bounce notices, UI updates)
pub trait DeliveryDelegate: Send + Sync {
    fn on_event(&self, event: DeliveryEvent);
}

/// Counters for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub outbound: usize,
    pub inbound: usize,
    pub skipped: usize,
    pub errors: usize,
    pub rts_accepted: usize,
}

pub struct Postman {
    ctx: ContactContext,
    contacts_root: PathBuf,
    mailbox: Arc<dyn MailSink>,
    outbound: RwLock<BTreeMap<String, Arc<Mutex<OutboundContact>>>>,
    inbound: RwLock<BTreeMap<String, Arc<Mutex<InboundContact>>>>,
    delegate: RwLock<Option<Arc<dyn DeliveryDelegate>>>,
    /// Digests of RTS blobs under the current keywords already handled
    seen_rts: Mutex<HashSet<[u8; 32]>>,
}

impl Postman {
    /// Open every contact found under `contacts_root`
    pub fn new(
        ctx: ContactContext,
        contacts_root: impl Into<PathBuf>,
        mailbox: Arc<dyn MailSink>,
    ) -> Result<Self, ContactError> {
        let contacts_root = contacts_root.into();
        let mut outbound = BTreeMap::new();
        for key in list_contacts(&contacts_root, OUTBOUND_DIR)? {
            let contact = OutboundContact::open(ctx.clone(), &contacts_root, &key)?;
            outbound.insert(key, Arc::new(Mutex::new(contact)));
        }
        let mut inbound = BTreeMap::new();
        for key in list_contacts(&contacts_root, INBOUND_DIR)? {
            let contact = InboundContact::open(ctx.clone(), &contacts_root, &key)?;
            inbound.insert(key, Arc::new(Mutex::new(contact)));
        }
        info!(
            "Loaded {} outbound and {} inbound contacts",
            outbound.len(),
            inbound.len()
        );

        Ok(Self {
            ctx,
            contacts_root,
            mailbox,
            outbound: RwLock::new(outbound),
            inbound: RwLock::new(inbound),
            delegate: RwLock::new(None),
            seen_rts: Mutex::new(HashSet::new()),
        })
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn DeliveryDelegate>>) {
        *self.delegate.write() = delegate;
    }

    pub fn account(&self) -> &Account {
        &self.ctx.account
    }

    pub fn contacts_root(&self) -> &Path {
        &self.contacts_root
    }

    fn emit(&self, event: DeliveryEvent) {
        if let Some(delegate) = self.delegate.read().as_ref() {
            delegate.on_event(event);
        }
    }

    pub fn outbound_keys(&self) -> Vec<String> {
        self.outbound.read().keys().cloned().collect()
    }

    pub fn inbound_keys(&self) -> Vec<String> {
        self.inbound.read().keys().cloned().collect()
    }

    pub fn outbound(&self, mailsite_key: &str) -> Option<Arc<Mutex<OutboundContact>>> {
        self.outbound.read().get(mailsite_key).cloned()
    }

    pub fn inbound(&self, mailsite_key: &str) -> Option<Arc<Mutex<InboundContact>>> {
        self.inbound.read().get(mailsite_key).cloned()
    }

    /// Get or create the outbound contact for `mailsite_key`
    pub fn add_outbound(
        &self,
        mailsite_key: &str,
    ) -> Result<Arc<Mutex<OutboundContact>>, ContactError> {
        if let Some(existing) = self.outbound(mailsite_key) {
            return Ok(existing);
        }
        let contact =
            OutboundContact::open(self.ctx.clone(), &self.contacts_root, mailsite_key)?;
        let mut map = self.outbound.write();
        Ok(map
            .entry(mailsite_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(contact)))
            .clone())
    }

    /// Queue a message, starting the handshake first if needed
    pub fn send(&self, mailsite_key: &str, body: &[u8]) -> Result<u64, ContactError> {
        let handle = self.add_outbound(mailsite_key)?;
        let contact = handle.lock();
        if let Some(reason) = contact.needs_attention()? {
            return Err(ContactError::Fatal(reason));
        }
        if !contact.ready()? {
            if let Err(e) = contact.init() {
                self.note_failure(mailsite_key, &e, |reason| contact.mark_needs_attention(reason));
                return Err(e);
            }
        }
        contact.send_message(body)
    }

    /// Clear the needs-attention marker on both sides of a contact
    pub fn clear_attention(&self, mailsite_key: &str) -> Result<(), ContactError> {
        if let Some(contact) = self.outbound(mailsite_key) {
            contact.lock().clear_needs_attention()?;
        }
        if let Some(contact) = self.inbound(mailsite_key) {
            contact.lock().clear_needs_attention()?;
        }
        Ok(())
    }

    /// Log a contact error; fatal ones park the contact
    fn note_failure(
        &self,
        contact: &str,
        err: &ContactError,
        mark: impl FnOnce(&str) -> Result<(), ContactError>,
    ) {
        if !err.is_fatal() {
            warn!("Contact {}: {}", contact, err);
            return;
        }
        error!("Contact {} needs attention: {}", contact, err);
        let reason = err.to_string();
        if let Err(e) = mark(&reason) {
            error!("Could not mark {} as needing attention: {}", contact, e);
        }
        self.emit(DeliveryEvent::NeedsAttention {
            contact: contact.to_string(),
            reason,
        });
    }

    /// Look for RTS messages addressed to us under yesterday's and today's
    /// keyword. Yesterday goes first so a newer channel is applied last.
    pub fn poll_rts(&self) -> usize {
        let now = self.ctx.clock.now_millis();
        let mut accepted = 0;
        let mut current = HashSet::new();
        for when in [now.saturating_sub(DAY_MS), now] {
            let date = date_string(when);
            let key = format!("{}{}-{}", KEYWORD_PREFIX, self.ctx.account.rtsksk(), date);
            let sealed = match self.ctx.network.fetch(&key) {
                Ok(Some(sealed)) => sealed,
                Ok(None) => continue,
                Err(e) => {
                    debug!("RTS fetch failed: {}", e);
                    continue;
                }
            };
            let digest = *blake3::hash(&sealed).as_bytes();
            current.insert(digest);
            if self.seen_rts.lock().contains(&digest) {
                continue;
            }

            match self.take_rts(&sealed, &date) {
                Ok(Some(outcome)) => {
                    self.seen_rts.lock().insert(digest);
                    if outcome == RtsOutcome::NewChannel {
                        accepted += 1;
                    }
                }
                Ok(None) => {}
                Err(e @ (ContactError::Codec(_) | ContactError::Fatal(_))) => {
                    // Not for us, or not from anyone we can verify
                    warn!("Ignoring RTS: {}", e);
                    self.seen_rts.lock().insert(digest);
                }
                Err(e) if e.is_transient() => {
                    debug!("Could not take RTS yet: {}", e);
                }
                Err(e) => {
                    warn!("Could not apply RTS, will retry: {}", e);
                }
            }
        }
        // Nothing older than these two keywords is ever fetched again
        self.seen_rts.lock().retain(|digest| current.contains(digest));
        accepted
    }

    /// Apply one RTS through the live contact, creating it on first contact.
    /// `None` when the contact is busy and the RTS should be retried.
    fn take_rts(&self, sealed: &[u8], date: &str) -> Result<Option<RtsOutcome>, ContactError> {
        let rts = VerifiedRts::open(&self.ctx, sealed, date)?;

        if let Some(handle) = self.inbound(&rts.sender) {
            let Some(contact) = handle.try_lock() else {
                debug!("{} is busy, leaving its RTS for the next cycle", rts.sender);
                return Ok(None);
            };
            return contact.apply_rts(&rts).map(Some);
        }

        let (contact, outcome) =
            InboundContact::accept_rts(self.ctx.clone(), &self.contacts_root, &rts)?;
        self.inbound
            .write()
            .entry(rts.sender.clone())
            .or_insert_with(|| Arc::new(Mutex::new(contact)));
        self.emit(DeliveryEvent::ContactAccepted {
            contact: rts.sender,
        });
        Ok(Some(outcome))
    }

    fn run_outbound(&self, contact: &OutboundContact, summary: &mut CycleSummary) {
        let key = contact.mailsite_key();
        match contact.needs_attention() {
            Ok(Some(reason)) => {
                debug!("Skipping {} until cleared: {}", key, reason);
                summary.skipped += 1;
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Contact {}: {}", key, e);
                summary.errors += 1;
                return;
            }
        }
        summary.outbound += 1;

        match contact.check_cts() {
            Ok(HandshakeProgress::CtsReceived) => self.emit(DeliveryEvent::CtsReceived {
                contact: key.to_string(),
            }),
            Ok(_) => {}
            Err(e) => {
                summary.errors += 1;
                let fatal = e.is_fatal();
                self.note_failure(key, &e, |reason| contact.mark_needs_attention(reason));
                if fatal {
                    return;
                }
            }
        }

        match contact.do_comm() {
            Ok(report) => {
                if report.cts_received {
                    self.emit(DeliveryEvent::CtsReceived {
                        contact: key.to_string(),
                    });
                }
                for uid in report.acknowledged {
                    self.emit(DeliveryEvent::Acknowledged {
                        contact: key.to_string(),
                        uid,
                    });
                }
                for uid in report.abandoned {
                    self.emit(DeliveryEvent::Undeliverable {
                        contact: key.to_string(),
                        uid,
                    });
                }
            }
            Err(e) => {
                summary.errors += 1;
                self.note_failure(key, &e, |reason| contact.mark_needs_attention(reason));
            }
        }
    }

    fn run_inbound(&self, contact: &InboundContact, summary: &mut CycleSummary) {
        let key = contact.mailsite_key();
        match contact.needs_attention() {
            Ok(Some(_)) => {
                summary.skipped += 1;
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Contact {}: {}", key, e);
                summary.errors += 1;
                return;
            }
        }
        summary.inbound += 1;

        match contact.fetch(self.mailbox.as_ref()) {
            Ok(report) => {
                for message_id in report.delivered {
                    self.emit(DeliveryEvent::Delivered {
                        contact: key.to_string(),
                        message_id,
                    });
                }
            }
            Err(e) => {
                summary.errors += 1;
                self.note_failure(key, &e, |reason| contact.mark_needs_attention(reason));
            }
        }
    }

    /// One pass over every contact
    pub fn run_cycle(&self) -> CycleSummary {
        let mut summary = CycleSummary {
            rts_accepted: self.poll_rts(),
            ..Default::default()
        };

        let outbound: Vec<_> = self.outbound.read().values().cloned().collect();
        for handle in outbound {
            match handle.try_lock() {
                Some(contact) => self.run_outbound(&contact, &mut summary),
                None => summary.skipped += 1,
            }
        }

        let inbound: Vec<_> = self.inbound.read().values().cloned().collect();
        for handle in inbound {
            match handle.try_lock() {
                Some(contact) => self.run_inbound(&contact, &mut summary),
                None => summary.skipped += 1,
            }
        }

        debug!("Cycle done: {:?}", summary);
        summary
    }

    /// Run cycles every `interval` until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Postman running every {:?}", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let postman = self.clone();
                    // Network calls block; keep them off the async workers
                    match tokio::task::spawn_blocking(move || postman.run_cycle()).await {
                        Ok(summary) => debug!("Cycle summary: {:?}", summary),
                        Err(e) => error!("Postman cycle panicked: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Postman stopping");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::test_support::{peer, Peer};
    use crate::network::{MemoryNetwork, NetworkClient, SskKeyPair};
    use crate::store::MemoryMailbox;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<DeliveryEvent>>,
    }

    impl DeliveryDelegate for Recorder {
        fn on_event(&self, event: DeliveryEvent) {
            self.events.lock().push(event);
        }
    }

    fn postman(p: &Peer, mailbox: &MemoryMailbox) -> Arc<Postman> {
        Arc::new(Postman::new(p.ctx.clone(), p.root.path(), Arc::new(mailbox.clone())).unwrap())
    }

    #[test]
    fn test_send_inits_and_queues() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let alice_post = postman(&alice, &MemoryMailbox::new());

        let uid = alice_post.send(&bob.mailsite_key(), b"hi bob").unwrap();
        assert_eq!(uid, 1);
        let contact = alice_post.outbound(&bob.mailsite_key()).unwrap();
        assert!(contact.lock().ready().unwrap());
        assert_eq!(contact.lock().pending().unwrap().len(), 1);
    }

    #[test]
    fn test_full_exchange_with_events() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let bob_mail = MemoryMailbox::new();
        let alice_post = postman(&alice, &MemoryMailbox::new());
        let bob_post = postman(&bob, &bob_mail);
        let alice_events = Arc::new(Recorder::default());
        let bob_events = Arc::new(Recorder::default());
        alice_post.set_delegate(Some(alice_events.clone()));
        bob_post.set_delegate(Some(bob_events.clone()));

        alice_post.send(&bob.mailsite_key(), b"hello").unwrap();
        alice_post.run_cycle(); // inserts message 1
        let summary = bob_post.run_cycle(); // accepts RTS, fetches, acks
        assert_eq!(summary.rts_accepted, 1);
        alice_post.run_cycle(); // sees CTS and ack

        assert_eq!(bob_mail.messages_from(&alice.mailsite_key()).len(), 1);
        let bob_seen = bob_events.events.lock().clone();
        assert!(bob_seen.contains(&DeliveryEvent::ContactAccepted {
            contact: alice.mailsite_key()
        }));
        assert!(bob_seen.contains(&DeliveryEvent::Delivered {
            contact: alice.mailsite_key(),
            message_id: 1
        }));
        let alice_seen = alice_events.events.lock().clone();
        assert!(alice_seen.contains(&DeliveryEvent::CtsReceived {
            contact: bob.mailsite_key()
        }));
        assert!(alice_seen.contains(&DeliveryEvent::Acknowledged {
            contact: bob.mailsite_key(),
            uid: 1
        }));
    }

    #[test]
    fn test_fatal_contact_is_parked() {
        let network = MemoryNetwork::new();
        let alice = peer(&network);
        let broken = SskKeyPair::generate();
        network
            .insert(b"nothing useful\n", &format!("{}mailsite/1/mailpage", broken.privkey), 1, "")
            .unwrap();

        let alice_post = postman(&alice, &MemoryMailbox::new());
        let events = Arc::new(Recorder::default());
        alice_post.set_delegate(Some(events.clone()));

        assert!(alice_post.send(broken.public_body(), b"x").unwrap_err().is_fatal());
        assert!(matches!(
            events.events.lock().last(),
            Some(DeliveryEvent::NeedsAttention { .. })
        ));

        let summary = alice_post.run_cycle();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.outbound, 0);

        alice_post.clear_attention(broken.public_body()).unwrap();
        let summary = alice_post.run_cycle();
        assert_eq!(summary.outbound, 1);
    }

    #[test]
    fn test_sender_rekey_followed_live_and_after_restart() {
        use crate::contact::inbound::COMMSSK;

        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let (alice_key, bob_key) = (alice.mailsite_key(), bob.mailsite_key());
        let bob_mail = MemoryMailbox::new();
        let alice_post = postman(&alice, &MemoryMailbox::new());
        let bob_post = postman(&bob, &bob_mail);

        alice_post.send(&bob_key, b"old channel").unwrap();
        alice_post.run_cycle();
        assert_eq!(bob_post.run_cycle().rts_accepted, 1);
        assert_eq!(bob_mail.messages_from(&alice_key).len(), 1);

        // Next day Alice starts over from empty contact state: new keys, uids from 1
        let day = Duration::from_secs(24 * 3600);
        alice.clock.advance(day);
        bob.clock.advance(day);
        let fresh_root = tempfile::tempdir().unwrap();
        let alice_again =
            Postman::new(alice.ctx.clone(), fresh_root.path(), Arc::new(MemoryMailbox::new()))
                .unwrap();
        alice_again.send(&bob_key, b"new one").unwrap();
        alice_again.send(&bob_key, b"new two").unwrap();
        alice_again.run_cycle();
        let new_comm = alice_again
            .outbound(&bob_key)
            .unwrap()
            .lock()
            .state()
            .unwrap()
            .commssk
            .unwrap()
            .pubkey;

        // The running postman moves its live contact over
        assert_eq!(bob_post.run_cycle().rts_accepted, 1);
        let live = bob_post.inbound(&alice_key).unwrap();
        assert_eq!(live.lock().get_prop(COMMSSK).unwrap(), Some(new_comm.clone()));
        let bodies: Vec<Vec<u8>> = bob_mail
            .messages_from(&alice_key)
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(bodies, vec![b"old channel".to_vec(), b"new one".to_vec(), b"new two".to_vec()]);

        // A restart sees yesterday's RTS again and must not go back to it
        let bob_restarted = postman(&bob, &bob_mail);
        assert_eq!(bob_restarted.run_cycle().rts_accepted, 0);
        let contact = bob_restarted.inbound(&alice_key).unwrap();
        assert_eq!(contact.lock().get_prop(COMMSSK).unwrap(), Some(new_comm));

        alice_again.send(&bob_key, b"new three").unwrap();
        alice_again.run_cycle();
        bob_restarted.run_cycle();
        assert_eq!(bob_mail.messages_from(&alice_key).len(), 4);
    }

    #[test]
    fn test_seen_rts_pruned_to_current_keywords() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let alice_post = postman(&alice, &MemoryMailbox::new());
        let bob_post = postman(&bob, &MemoryMailbox::new());

        alice_post.send(&bob.mailsite_key(), b"x").unwrap();
        bob_post.poll_rts();
        assert_eq!(bob_post.seen_rts.lock().len(), 1);

        // Still under yesterday's keyword
        bob.clock.advance(Duration::from_secs(24 * 3600));
        bob_post.poll_rts();
        assert_eq!(bob_post.seen_rts.lock().len(), 1);

        bob.clock.advance(Duration::from_secs(24 * 3600));
        bob_post.poll_rts();
        assert!(bob_post.seen_rts.lock().is_empty());
    }

    #[test]
    fn test_contacts_rediscovered_on_restart() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        postman(&alice, &MemoryMailbox::new())
            .send(&bob.mailsite_key(), b"x")
            .unwrap();

        let reopened = postman(&alice, &MemoryMailbox::new());
        assert_eq!(reopened.outbound_keys(), vec![bob.mailsite_key()]);
    }

    #[test]
    fn test_busy_contact_skipped() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let alice_post = postman(&alice, &MemoryMailbox::new());
        alice_post.send(&bob.mailsite_key(), b"x").unwrap();

        let handle = alice_post.outbound(&bob.mailsite_key()).unwrap();
        let _held = handle.lock();
        assert_eq!(alice_post.run_cycle().skipped, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let network = MemoryNetwork::new();
        let alice = peer(&network);
        let alice_post = postman(&alice, &MemoryMailbox::new());
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(alice_post.run(Duration::from_millis(10), rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
