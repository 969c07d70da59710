// Outbound contact: handshake with a peer, then queue, insert and retry
//
// Every decision is persisted before the next network call, so a crash can
// only repeat an insert, never lose a message or reuse a uid or slot.

use super::state::{
    ack_action, cts_timed_out, handshake_action, AckAction, HandshakeAction, HandshakeState,
    OutboundState, NEEDS_ATTENTION,
};
use super::{
    contact_dir, date_string, ContactContext, ContactError, OUTBOUND_DIR, OUTBOX_DIR, PROPS_FILE,
};
use crate::message::{mailpage_key, wrap_message, Mailsite, RtsMessage};
use crate::network::{NetworkError, KEYWORD_PREFIX};
use crate::slots::Slot;
use crate::store::{OutboxQueue, PropertyStore, PropsFile, QueuedMessage};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const RTS_PRIORITY: u8 = 1;
pub const MESSAGE_PRIORITY: u8 = 2;

/// Suffix of the ack key that doubles as the CTS
const CTS_SUFFIX: &str = "ack";

/// Result of one `check_cts` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeProgress {
    /// CTS had already been received
    Confirmed,
    /// CTS found during this call
    CtsReceived,
    /// RTS out, still inside the wait window
    AwaitingCts,
    /// RTS (re)sent during this call
    RtsSent,
}

/// What one `do_comm` pass did, by uid
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommReport {
    pub inserted: Vec<u64>,
    pub acknowledged: Vec<u64>,
    pub retransmitting: Vec<u64>,
    pub abandoned: Vec<u64>,
    /// An ack moved the handshake to `CtsReceived`
    pub cts_received: bool,
}

pub struct OutboundContact {
    mailsite_key: String,
    dir: PathBuf,
    props: PropsFile,
    outbox: OutboxQueue,
    ctx: ContactContext,
}

impl OutboundContact {
    /// Open (creating if needed) the outbound contact for `mailsite_key`
    pub fn open(
        ctx: ContactContext,
        contacts_root: &Path,
        mailsite_key: &str,
    ) -> Result<Self, ContactError> {
        let dir = contact_dir(contacts_root, OUTBOUND_DIR, mailsite_key)?;
        let outbox = OutboxQueue::open(dir.join(OUTBOX_DIR))?;
        Ok(Self {
            mailsite_key: mailsite_key.to_string(),
            props: PropsFile::new(dir.join(PROPS_FILE)),
            dir,
            outbox,
            ctx,
        })
    }

    pub fn mailsite_key(&self) -> &str {
        &self.mailsite_key
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state(&self) -> Result<OutboundState, ContactError> {
        OutboundState::load(&self.props)
    }

    /// Messages still waiting for an ack
    pub fn pending(&self) -> Result<Vec<QueuedMessage>, ContactError> {
        Ok(self.outbox.list()?)
    }

    pub fn needs_attention(&self) -> Result<Option<String>, ContactError> {
        Ok(self.props.get(NEEDS_ATTENTION)?)
    }

    pub fn mark_needs_attention(&self, reason: &str) -> Result<(), ContactError> {
        self.props
            .put(NEEDS_ATTENTION, &reason.replace(['\r', '\n'], " "))?;
        Ok(())
    }

    pub fn clear_needs_attention(&self) -> Result<(), ContactError> {
        self.props.remove(NEEDS_ATTENTION)?;
        Ok(())
    }

    /// Whether messages may be queued: an RTS has gone out at least once
    pub fn ready(&self) -> Result<bool, ContactError> {
        Ok(self.state()?.ready())
    }

    /// Drive the handshake one step
    pub fn check_cts(&self) -> Result<HandshakeProgress, ContactError> {
        let mut state = self.state()?;
        let ack_pubkey = match (handshake_action(&state), &state.ackssk) {
            (HandshakeAction::Nothing, _) => return Ok(HandshakeProgress::Confirmed),
            (HandshakeAction::PollCts, Some(ack)) => ack.pubkey.clone(),
            _ => {
                self.init()?;
                return Ok(HandshakeProgress::RtsSent);
            }
        };

        let cts_key = format!("{}{}", ack_pubkey, CTS_SUFFIX);
        let found = match self.ctx.network.fetch(&cts_key) {
            Ok(found) => found.is_some(),
            Err(e) => {
                debug!("CTS fetch for {} failed: {}", self.mailsite_key, e);
                false
            }
        };

        if found {
            info!("Successfully received CTS for {}", self.mailsite_key);
            state.mark_cts_received();
            state.save(&self.props)?;
            return Ok(HandshakeProgress::CtsReceived);
        }

        let now = self.ctx.clock.now_millis();
        if cts_timed_out(state.rts_sent_at, now, &self.ctx.policy) {
            info!("No CTS from {} yet, sending another RTS", self.mailsite_key);
            self.init()?;
            return Ok(HandshakeProgress::RtsSent);
        }
        Ok(HandshakeProgress::AwaitingCts)
    }

    /// Set up the channel and post an RTS. Existing key material is reused.
    pub fn init(&self) -> Result<(), ContactError> {
        let mut state = self.state()?;
        let network = &self.ctx.network;

        if state.commssk.is_none() {
            debug!("Generating communication keys for {}", self.mailsite_key);
            state.commssk = Some(network.generate_key_pair()?);
            // The peer cannot know a key we just made
            state.status = Some(HandshakeState::Unsent);
        }
        if state.ackssk.is_none() {
            state.ackssk = Some(network.generate_key_pair()?);
        }
        if state.rtsksk.is_none() || state.peer_public_key.is_none() {
            self.fetch_mailsite(&mut state)?;
        }
        if state.initial_slot.is_none() {
            state.initial_slot = Some(Slot::random());
            // A new seed restarts the chain
            state.next_slot = None;
        }
        // Keys hit the disk before anything that depends on them leaves the machine
        state.save(&self.props)?;

        let (Some(comm), Some(ack), Some(initial_slot), Some(rtsksk), Some(peer_key)) = (
            &state.commssk,
            &state.ackssk,
            &state.initial_slot,
            &state.rtsksk,
            &state.peer_public_key,
        ) else {
            return Err(ContactError::Corrupt(
                "handshake material missing after setup".to_string(),
            ));
        };

        let rts = RtsMessage {
            commssk: comm.pubkey.clone(),
            ackssk: ack.privkey.clone(),
            initial_slot: initial_slot.clone(),
            to: self.mailsite_key.clone(),
            mailsite: self.ctx.account.mailsite_uri().to_string(),
        };
        let sealed = rts.seal(self.ctx.account.keys(), peer_key)?;

        let now = self.ctx.clock.now_millis();
        let key = format!("{}{}-{}", KEYWORD_PREFIX, rtsksk, date_string(now));
        if let Err(e) = network.insert(&sealed, &key, RTS_PRIORITY, "") {
            warn!("Failed to insert RTS for {}: {}", self.mailsite_key, e);
            return Err(e.into());
        }

        state.status = Some(HandshakeState::RtsSent);
        state.rts_sent_at = Some(now);
        state.save(&self.props)?;
        info!("RTS sent to {}", self.mailsite_key);
        Ok(())
    }

    fn fetch_mailsite(&self, state: &mut OutboundState) -> Result<(), ContactError> {
        let key = mailpage_key(&self.mailsite_key);
        debug!("Attempting to fetch {}", key);
        let Some(data) = self.ctx.network.fetch(&key)? else {
            warn!("Failed to retrieve mailsite for {}", self.mailsite_key);
            return Err(NetworkError::Unavailable(format!("mailsite {} not found", key)).into());
        };

        let site = Mailsite::parse(&data).map_err(|e| {
            error!("Mailsite for {} is unusable: {}", self.mailsite_key, e);
            ContactError::Fatal(format!("Mailsite for {} is unusable: {}", self.mailsite_key, e))
        })?;
        state.rtsksk = Some(site.rtsksk);
        state.peer_public_key = Some(site.public_key);
        Ok(())
    }

    /// Queue `body` for delivery. No network I/O; returns the uid.
    pub fn send_message(&self, body: &[u8]) -> Result<u64, ContactError> {
        let mut state = self.state()?;
        let uid = state.pop_next_uid();
        let slot = state.pop_next_slot()?;
        // Counters first: a crash past here wastes a uid, never reuses one
        state.save(&self.props)?;

        self.outbox.store_payload(uid, &wrap_message(uid, body))?;
        self.outbox.save(&QueuedMessage::new(uid, slot))?;
        debug!("Queued message {} for {}", uid, self.mailsite_key);
        Ok(uid)
    }

    /// Insert whatever needs inserting, then look for acks
    pub fn do_comm(&self) -> Result<CommReport, ContactError> {
        let mut report = CommReport::default();
        self.send_queued(&mut report)?;
        self.poll_acks(&mut report)?;
        Ok(report)
    }

    fn send_queued(&self, report: &mut CommReport) -> Result<(), ContactError> {
        let unsent: Vec<QueuedMessage> = self
            .outbox
            .list()?
            .into_iter()
            .filter(|m| m.last_send_time.is_none())
            .collect();
        if unsent.is_empty() {
            return Ok(());
        }

        let Some(comm) = self.state()?.commssk else {
            warn!(
                "Contact {} has no private communication key; its directory appears to be corrupt",
                self.mailsite_key
            );
            return Ok(());
        };

        for mut msg in unsent {
            let payload = match self.outbox.read_payload(msg.uid) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Could not read queued message {}: {}", msg.uid, e);
                    continue;
                }
            };

            let key = format!("{}{}", comm.privkey, msg.slot);
            debug!("Inserting message {} to slot {}", msg.uid, msg.slot);
            match self.ctx.network.insert(&payload, &key, MESSAGE_PRIORITY, "") {
                Ok(()) => {
                    let now = self.ctx.clock.now_millis();
                    msg.last_send_time = Some(now);
                    if msg.first_send_time.is_none() {
                        msg.first_send_time = Some(now);
                    }
                    self.outbox.save(&msg)?;
                    info!("Inserted message {} for {}", msg.uid, self.mailsite_key);
                    report.inserted.push(msg.uid);
                }
                Err(e) => {
                    warn!(
                        "Failed to insert message {} for {}: {}. Will try again soon",
                        msg.uid, self.mailsite_key, e
                    );
                }
            }
        }
        Ok(())
    }

    fn poll_acks(&self, report: &mut CommReport) -> Result<(), ContactError> {
        let sent: Vec<QueuedMessage> = self
            .outbox
            .list()?
            .into_iter()
            .filter(|m| m.first_send_time.is_some())
            .collect();
        if sent.is_empty() {
            return Ok(());
        }

        let mut state = self.state()?;
        let Some(ack_pubkey) = state.ackssk.as_ref().map(|k| k.pubkey.clone()) else {
            warn!(
                "Contact {} has no public ack key; its directory appears to be corrupt",
                self.mailsite_key
            );
            return Ok(());
        };
        let now = self.ctx.clock.now_millis();

        for mut msg in sent {
            let key = format!("{}{}", ack_pubkey, msg.uid);
            let acked = match self.ctx.network.fetch(&key) {
                Ok(found) => found.is_some(),
                Err(e) => {
                    debug!("Ack fetch for message {} failed: {}", msg.uid, e);
                    false
                }
            };

            if acked {
                info!("Ack received for message {} on contact {}", msg.uid, self.mailsite_key);
                self.outbox.delete(msg.uid)?;
                report.acknowledged.push(msg.uid);
                // An ack proves the peer holds the channel keys: treat it as a CTS
                if state.status != Some(HandshakeState::CtsReceived) || state.initial_slot.is_some() {
                    report.cts_received |= state.status != Some(HandshakeState::CtsReceived);
                    state.mark_cts_received();
                    state.save(&self.props)?;
                }
                continue;
            }

            match ack_action(&msg, now, &self.ctx.policy) {
                AckAction::Wait => {}
                AckAction::Abandon => {
                    warn!(
                        "Giving up on message {} to {}: no ack after {} ms",
                        msg.uid, self.mailsite_key, self.ctx.policy.fail_delay_ms
                    );
                    self.outbox.delete(msg.uid)?;
                    report.abandoned.push(msg.uid);
                }
                AckAction::Retransmit => {
                    msg.slot = state.pop_next_slot()?;
                    state.save(&self.props)?;
                    msg.last_send_time = None;
                    self.outbox.save(&msg)?;
                    info!(
                        "No ack for message {} yet, will retransmit on slot {}",
                        msg.uid, msg.slot
                    );
                    report.retransmitting.push(msg.uid);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::contact::test_support::{peer, Peer};
    use crate::network::{MemoryNetwork, NetworkClient, SskKeyPair};
    use std::time::Duration;

    fn outbound(from: &Peer, to: &Peer) -> OutboundContact {
        OutboundContact::open(from.ctx.clone(), from.root.path(), &to.mailsite_key()).unwrap()
    }

    fn rts_key(from: &Peer, to: &Peer) -> String {
        format!(
            "KSK@{}-{}",
            to.ctx.account.rtsksk(),
            date_string(from.clock.now_millis())
        )
    }

    /// Insert what the peer would post to acknowledge `suffix`
    fn post_ack(network: &MemoryNetwork, ack: &SskKeyPair, suffix: &str) {
        network
            .insert(b"ack", &format!("{}{}", ack.privkey, suffix), 1, "")
            .unwrap();
    }

    #[test]
    fn test_first_check_sends_rts() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let contact = outbound(&alice, &bob);

        assert!(!contact.ready().unwrap());
        assert_eq!(contact.check_cts().unwrap(), HandshakeProgress::RtsSent);
        assert!(contact.ready().unwrap());
        assert!(network.contains(&rts_key(&alice, &bob)));

        let state = contact.state().unwrap();
        assert_eq!(state.status, Some(HandshakeState::RtsSent));
        assert_eq!(state.rts_sent_at, Some(alice.clock.now_millis()));
        assert!(state.initial_slot.is_some());
        assert!(state.commssk.is_some() && state.ackssk.is_some());
    }

    #[test]
    fn test_rts_is_readable_by_peer_only() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let contact = outbound(&alice, &bob);
        contact.init().unwrap();

        let sealed = network.fetch(&rts_key(&alice, &bob)).unwrap().unwrap();
        let rts = RtsMessage::open(&sealed, bob.ctx.account.keys())
            .unwrap()
            .verify(&alice.ctx.account.keys().public_key(), &bob.mailsite_key())
            .unwrap();
        let state = contact.state().unwrap();
        assert_eq!(Some(rts.initial_slot), state.initial_slot);
        assert_eq!(rts.ackssk, state.ackssk.unwrap().privkey);
        assert_eq!(rts.mailsite, alice.ctx.account.mailsite_uri());
    }

    #[test]
    fn test_cts_erases_initial_slot() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let contact = outbound(&alice, &bob);
        contact.check_cts().unwrap();

        let ack = contact.state().unwrap().ackssk.unwrap();
        post_ack(&network, &ack, "ack");

        assert_eq!(contact.check_cts().unwrap(), HandshakeProgress::CtsReceived);
        let state = contact.state().unwrap();
        assert_eq!(state.status, Some(HandshakeState::CtsReceived));
        assert_eq!(state.initial_slot, None);
        assert_eq!(contact.check_cts().unwrap(), HandshakeProgress::Confirmed);
    }

    #[test]
    fn test_rts_resent_after_wait_with_same_keys() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let contact = outbound(&alice, &bob);
        contact.check_cts().unwrap();
        let before = contact.state().unwrap();

        alice.clock.advance(Duration::from_millis(500));
        assert_eq!(contact.check_cts().unwrap(), HandshakeProgress::AwaitingCts);
        assert_eq!(contact.state().unwrap(), before);

        // Past the wait, and onto a new day so the RTS keyword is fresh
        alice.clock.advance(Duration::from_secs(24 * 3600));
        assert_eq!(contact.check_cts().unwrap(), HandshakeProgress::RtsSent);
        let after = contact.state().unwrap();
        assert_eq!(after.commssk, before.commssk);
        assert_eq!(after.ackssk, before.ackssk);
        assert_eq!(after.initial_slot, before.initial_slot);
        assert!(after.rts_sent_at > before.rts_sent_at);
    }

    #[test]
    fn test_rts_insert_failure_changes_nothing() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let contact = outbound(&alice, &bob);

        network.set_fail_inserts(true);
        let err = contact.init().unwrap_err();
        assert!(err.is_transient());
        assert_ne!(contact.state().unwrap().status, Some(HandshakeState::RtsSent));
        assert!(!contact.ready().unwrap());
    }

    #[test]
    fn test_incomplete_mailsite_is_fatal() {
        let network = MemoryNetwork::new();
        let alice = peer(&network);
        let site = SskKeyPair::generate();
        network
            .insert(b"rtsksk=only\r\n", &format!("{}mailsite/1/mailpage", site.privkey), 1, "")
            .unwrap();

        let contact =
            OutboundContact::open(alice.ctx.clone(), alice.root.path(), site.public_body())
                .unwrap();
        assert!(contact.init().unwrap_err().is_fatal());
    }

    #[test]
    fn test_missing_mailsite_is_transient() {
        let network = MemoryNetwork::new();
        let alice = peer(&network);
        let nobody = SskKeyPair::generate();
        let contact =
            OutboundContact::open(alice.ctx.clone(), alice.root.path(), nobody.public_body())
                .unwrap();
        assert!(contact.init().unwrap_err().is_transient());
    }

    #[test]
    fn test_uids_and_slots_never_reused() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let contact = outbound(&alice, &bob);
        contact.init().unwrap();
        let seed = contact.state().unwrap().initial_slot.unwrap();

        assert_eq!(contact.send_message(b"one").unwrap(), 1);
        assert_eq!(contact.send_message(b"two").unwrap(), 2);

        let pending = contact.pending().unwrap();
        assert_eq!(pending[0].slot, seed);
        assert_eq!(pending[1].slot, seed.advance());

        // Acked messages leave the queue but their uid stays used
        contact.outbox.delete(2).unwrap();
        assert_eq!(contact.send_message(b"three").unwrap(), 3);
    }

    #[test]
    fn test_send_queued_stamps_times_once() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let contact = outbound(&alice, &bob);
        contact.init().unwrap();
        contact.send_message(b"hello").unwrap();

        let report = contact.do_comm().unwrap();
        assert_eq!(report.inserted, vec![1]);
        let msg = &contact.pending().unwrap()[0];
        let sent_at = alice.clock.now_millis();
        assert_eq!(msg.first_send_time, Some(sent_at));
        assert_eq!(msg.last_send_time, Some(sent_at));

        // Nothing to insert on the next pass
        let inserts = network.insert_count();
        alice.clock.advance(Duration::from_millis(10));
        assert!(contact.do_comm().unwrap().inserted.is_empty());
        assert_eq!(network.insert_count(), inserts);
    }

    #[test]
    fn test_failed_insert_leaves_record_untouched() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let contact = outbound(&alice, &bob);
        contact.init().unwrap();
        contact.send_message(b"hello").unwrap();
        let before = contact.pending().unwrap();

        network.set_fail_inserts(true);
        assert!(contact.do_comm().unwrap().inserted.is_empty());
        assert_eq!(contact.pending().unwrap(), before);
    }

    #[test]
    fn test_ack_removes_message_and_counts_as_cts() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let contact = outbound(&alice, &bob);
        contact.init().unwrap();
        contact.send_message(b"hello").unwrap();
        contact.do_comm().unwrap();

        let ack = contact.state().unwrap().ackssk.unwrap();
        post_ack(&network, &ack, "1");

        let report = contact.do_comm().unwrap();
        assert_eq!(report.acknowledged, vec![1]);
        assert!(report.cts_received);
        assert!(contact.pending().unwrap().is_empty());
        assert!(!contact.outbox.dir().join("1").exists());

        let state = contact.state().unwrap();
        assert_eq!(state.status, Some(HandshakeState::CtsReceived));
        assert_eq!(state.initial_slot, None);

        // Seeing the same ack again does nothing
        assert_eq!(contact.do_comm().unwrap(), CommReport::default());
    }

    #[test]
    fn test_retransmit_moves_to_fresh_slot() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let contact = outbound(&alice, &bob);
        contact.init().unwrap();
        contact.send_message(b"hello").unwrap();
        contact.do_comm().unwrap();
        let first = contact.pending().unwrap()[0].clone();

        alice.clock.advance(Duration::from_millis(1_001));
        let report = contact.do_comm().unwrap();
        assert_eq!(report.retransmitting, vec![1]);
        let queued = contact.pending().unwrap()[0].clone();
        assert_ne!(queued.slot, first.slot);
        assert_eq!(queued.last_send_time, None);
        assert_eq!(queued.first_send_time, first.first_send_time);

        let report = contact.do_comm().unwrap();
        assert_eq!(report.inserted, vec![1]);
        let resent = contact.pending().unwrap()[0].clone();
        assert!(resent.last_send_time > first.last_send_time);
        assert_eq!(resent.first_send_time, first.first_send_time);
    }

    #[test]
    fn test_message_abandoned_after_fail_delay() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let contact = outbound(&alice, &bob);
        contact.init().unwrap();
        contact.send_message(b"hello").unwrap();
        contact.do_comm().unwrap();

        // Keep retransmitting until the deadline passes
        let mut abandoned = Vec::new();
        for _ in 0..12 {
            alice.clock.advance(Duration::from_millis(600));
            abandoned.extend(contact.do_comm().unwrap().abandoned);
        }
        assert_eq!(abandoned, vec![1]);
        assert!(contact.pending().unwrap().is_empty());
    }

    #[test]
    fn test_needs_attention_marker() {
        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let contact = outbound(&alice, &bob);
        assert_eq!(contact.needs_attention().unwrap(), None);
        contact.mark_needs_attention("bad\nmailsite").unwrap();
        assert_eq!(contact.needs_attention().unwrap().as_deref(), Some("bad mailsite"));
        contact.clear_needs_attention().unwrap();
        assert_eq!(contact.needs_attention().unwrap(), None);
    }

    #[test]
    fn test_rejected_rts_insert_keeps_keys() {
        use crate::contact::ContactContext;
        use crate::network::MockNetworkClient;
        use std::sync::Arc;

        let network = MemoryNetwork::new();
        let (alice, bob) = (peer(&network), peer(&network));
        let site = bob.ctx.account.mailsite_document().to_bytes();

        let mut mock = MockNetworkClient::new();
        mock.expect_generate_key_pair()
            .times(2)
            .returning(|| Ok(SskKeyPair::generate()));
        mock.expect_fetch()
            .times(1)
            .returning(move |_| Ok(Some(site.clone())));
        mock.expect_insert()
            .withf(|_data: &[u8], key: &str, priority: &u8, _extra: &str| {
                key.starts_with("KSK@") && *priority == RTS_PRIORITY
            })
            .times(1)
            .returning(|_, key, _, _| Err(NetworkError::Collision(key.to_string())));

        let ctx = ContactContext {
            network: Arc::new(mock),
            ..alice.ctx.clone()
        };
        let contact = OutboundContact::open(ctx, alice.root.path(), &bob.mailsite_key()).unwrap();
        assert!(contact.init().unwrap_err().is_transient());

        // Everything up to the insert is kept for the next attempt
        let state = contact.state().unwrap();
        assert_eq!(state.status, Some(HandshakeState::Unsent));
        assert!(state.commssk.is_some());
        assert!(state.initial_slot.is_some());
        assert!(state.peer_public_key.is_some());
    }
}
