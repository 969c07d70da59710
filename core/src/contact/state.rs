// Typed outbound contact state and the pure decisions made on it
//
// `OutboundState` is loaded from and saved to the contact's `props` file in
// one piece. The decision functions below never touch storage or network.

use super::{ContactError, ContactPolicy};
use crate::crypto::validate_ed25519_public_key;
use crate::network::SskKeyPair;
use crate::slots::Slot;
use crate::store::{PropertyStore, QueuedMessage};

pub const STATUS: &str = "status";
pub const RTS_SENT_AT: &str = "rts-sent-at";
pub const COMMSSK_PUBKEY: &str = "commssk.pubkey";
pub const COMMSSK_PRIVKEY: &str = "commssk.privkey";
pub const ACKSSK_PUBKEY: &str = "ackssk.pubkey";
pub const ACKSSK_PRIVKEY: &str = "ackssk.privkey";
pub const INITIAL_SLOT: &str = "initialslot";
pub const NEXT_SLOT: &str = "nextslot";
pub const NEXT_UID: &str = "nextuid";
pub const RTSKSK: &str = "rtsksk";
pub const PEER_PUBKEY: &str = "asymkey.pubkey";
pub const NEEDS_ATTENTION: &str = "needs-attention";

/// Outbound handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Unsent,
    RtsSent,
    CtsReceived,
}

impl HandshakeState {
    pub fn as_prop(self) -> &'static str {
        match self {
            HandshakeState::Unsent => "notsent",
            HandshakeState::RtsSent => "rts-sent",
            HandshakeState::CtsReceived => "cts-received",
        }
    }

    /// `None` for anything unrecognised
    pub fn from_prop(value: &str) -> Option<Self> {
        match value {
            "notsent" => Some(HandshakeState::Unsent),
            "rts-sent" => Some(HandshakeState::RtsSent),
            "cts-received" => Some(HandshakeState::CtsReceived),
            _ => None,
        }
    }
}

/// Everything an outbound contact persists besides its queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundState {
    /// `None` when nothing (or something unrecognised) is recorded
    pub status: Option<HandshakeState>,
    pub rts_sent_at: Option<u64>,
    pub commssk: Option<SskKeyPair>,
    pub ackssk: Option<SskKeyPair>,
    pub initial_slot: Option<Slot>,
    pub next_slot: Option<Slot>,
    pub next_uid: u64,
    pub rtsksk: Option<String>,
    pub peer_public_key: Option<[u8; 32]>,
    pub needs_attention: Option<String>,
}

impl Default for OutboundState {
    fn default() -> Self {
        Self {
            status: None,
            rts_sent_at: None,
            commssk: None,
            ackssk: None,
            initial_slot: None,
            next_slot: None,
            next_uid: 1,
            rtsksk: None,
            peer_public_key: None,
            needs_attention: None,
        }
    }
}

fn key_pair(
    props: &dyn PropertyStore,
    pub_key: &str,
    priv_key: &str,
) -> Result<Option<SskKeyPair>, ContactError> {
    match (props.get(pub_key)?, props.get(priv_key)?) {
        (Some(pubkey), Some(privkey)) => Ok(Some(SskKeyPair { pubkey, privkey })),
        _ => Ok(None),
    }
}

fn slot(props: &dyn PropertyStore, key: &str) -> Result<Option<Slot>, ContactError> {
    props
        .get(key)?
        .map(|s| Slot::parse(&s).map_err(|e| ContactError::Corrupt(format!("{}: {}", key, e))))
        .transpose()
}

impl OutboundState {
    pub fn load(props: &dyn PropertyStore) -> Result<Self, ContactError> {
        let rts_sent_at = props
            .get(RTS_SENT_AT)?
            .and_then(|v| v.trim().parse().ok());
        let next_uid = match props.get(NEXT_UID)? {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| ContactError::Corrupt(format!("{}: {:?}", NEXT_UID, v)))?,
            None => 1,
        };
        let peer_public_key = props
            .get(PEER_PUBKEY)?
            .map(|v| {
                hex::decode(v.trim())
                    .ok()
                    .and_then(|raw| validate_ed25519_public_key(&raw).ok())
                    .ok_or_else(|| ContactError::Corrupt(format!("{} is unusable", PEER_PUBKEY)))
            })
            .transpose()?;

        Ok(Self {
            status: props
                .get(STATUS)?
                .and_then(|v| HandshakeState::from_prop(&v)),
            rts_sent_at,
            commssk: key_pair(props, COMMSSK_PUBKEY, COMMSSK_PRIVKEY)?,
            ackssk: key_pair(props, ACKSSK_PUBKEY, ACKSSK_PRIVKEY)?,
            initial_slot: slot(props, INITIAL_SLOT)?,
            next_slot: slot(props, NEXT_SLOT)?,
            next_uid,
            rtsksk: props.get(RTSKSK)?,
            peer_public_key,
            needs_attention: props.get(NEEDS_ATTENTION)?,
        })
    }

    /// Write every field in one update; `None` fields are removed
    pub fn save(&self, props: &dyn PropertyStore) -> Result<(), ContactError> {
        let mut puts: Vec<(&str, String)> = vec![(NEXT_UID, self.next_uid.to_string())];
        let mut removes: Vec<&str> = Vec::new();

        let mut set = |key: &'static str, value: Option<String>| match value {
            Some(v) => puts.push((key, v)),
            None => removes.push(key),
        };
        set(STATUS, self.status.map(|s| s.as_prop().to_string()));
        set(RTS_SENT_AT, self.rts_sent_at.map(|t| t.to_string()));
        set(COMMSSK_PUBKEY, self.commssk.as_ref().map(|k| k.pubkey.clone()));
        set(COMMSSK_PRIVKEY, self.commssk.as_ref().map(|k| k.privkey.clone()));
        set(ACKSSK_PUBKEY, self.ackssk.as_ref().map(|k| k.pubkey.clone()));
        set(ACKSSK_PRIVKEY, self.ackssk.as_ref().map(|k| k.privkey.clone()));
        set(INITIAL_SLOT, self.initial_slot.as_ref().map(Slot::to_string));
        set(NEXT_SLOT, self.next_slot.as_ref().map(Slot::to_string));
        set(RTSKSK, self.rtsksk.clone());
        set(PEER_PUBKEY, self.peer_public_key.map(hex::encode));
        set(NEEDS_ATTENTION, self.needs_attention.clone());

        props.update(&puts, &removes)?;
        Ok(())
    }

    pub fn ready(&self) -> bool {
        matches!(
            self.status,
            Some(HandshakeState::RtsSent) | Some(HandshakeState::CtsReceived)
        )
    }

    /// CTS (or any ack) seen: the seed is no longer needed by anyone
    pub fn mark_cts_received(&mut self) {
        self.status = Some(HandshakeState::CtsReceived);
        self.initial_slot = None;
    }

    /// Hand out the next unused uid
    pub fn pop_next_uid(&mut self) -> u64 {
        let uid = self.next_uid;
        self.next_uid += 1;
        uid
    }

    /// Hand out the next unused slot, seeding from the initial slot
    pub fn pop_next_slot(&mut self) -> Result<Slot, ContactError> {
        let slot = self
            .next_slot
            .take()
            .or_else(|| self.initial_slot.clone())
            .ok_or_else(|| ContactError::Corrupt("no initial slot to start from".to_string()))?;
        self.next_slot = Some(slot.advance());
        Ok(slot)
    }
}

/// What `check_cts` should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAction {
    /// (Re)send the RTS
    Init,
    /// Look for the CTS at the ack key
    PollCts,
    Nothing,
}

pub fn handshake_action(state: &OutboundState) -> HandshakeAction {
    match state.status {
        Some(HandshakeState::CtsReceived) => HandshakeAction::Nothing,
        Some(HandshakeState::RtsSent) if state.ackssk.is_some() => HandshakeAction::PollCts,
        _ => HandshakeAction::Init,
    }
}

/// No CTS yet: resend once the wait is over, or if the send time was lost
pub fn cts_timed_out(rts_sent_at: Option<u64>, now: u64, policy: &ContactPolicy) -> bool {
    match rts_sent_at {
        Some(sent) => now > sent.saturating_add(policy.cts_wait_ms),
        None => true,
    }
}

/// What to do with a sent message whose ack has not shown up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    Wait,
    Retransmit,
    Abandon,
}

pub fn ack_action(msg: &QueuedMessage, now: u64, policy: &ContactPolicy) -> AckAction {
    let Some(first) = msg.first_send_time else {
        return AckAction::Wait;
    };
    if now > first.saturating_add(policy.fail_delay_ms) {
        return AckAction::Abandon;
    }
    match msg.last_send_time {
        Some(last) if now > last.saturating_add(policy.retransmit_delay_ms) => {
            AckAction::Retransmit
        }
        _ => AckAction::Wait,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryProps;

    fn policy() -> ContactPolicy {
        ContactPolicy {
            cts_wait_ms: 100,
            retransmit_delay_ms: 100,
            fail_delay_ms: 500,
            poll_ahead: 6,
        }
    }

    #[test]
    fn test_status_props() {
        for state in [
            HandshakeState::Unsent,
            HandshakeState::RtsSent,
            HandshakeState::CtsReceived,
        ] {
            assert_eq!(HandshakeState::from_prop(state.as_prop()), Some(state));
        }
        assert_eq!(HandshakeState::from_prop("bogus"), None);
    }

    #[test]
    fn test_save_and_load() {
        let props = MemoryProps::new();
        let mut state = OutboundState {
            status: Some(HandshakeState::RtsSent),
            rts_sent_at: Some(1234),
            commssk: Some(SskKeyPair::generate()),
            initial_slot: Some(Slot::random()),
            rtsksk: Some("bob-rts".to_string()),
            ..Default::default()
        };
        state.save(&props).unwrap();
        assert_eq!(props.get(STATUS).unwrap().as_deref(), Some("rts-sent"));
        assert_eq!(OutboundState::load(&props).unwrap(), state);

        state.mark_cts_received();
        state.save(&props).unwrap();
        assert_eq!(props.get(INITIAL_SLOT).unwrap(), None);
        assert_eq!(OutboundState::load(&props).unwrap(), state);
    }

    #[test]
    fn test_unrecognised_status_loads_as_none() {
        let props = MemoryProps::new();
        props.put(STATUS, "confused").unwrap();
        let state = OutboundState::load(&props).unwrap();
        assert_eq!(state.status, None);
        assert_eq!(handshake_action(&state), HandshakeAction::Init);
    }

    #[test]
    fn test_corrupt_slot_is_reported() {
        let props = MemoryProps::new();
        props.put(NEXT_SLOT, "!!!").unwrap();
        assert!(matches!(
            OutboundState::load(&props),
            Err(ContactError::Corrupt(_))
        ));
    }

    #[test]
    fn test_slot_popping() {
        let seed = Slot::random();
        let mut state = OutboundState {
            initial_slot: Some(seed.clone()),
            ..Default::default()
        };
        assert_eq!(state.pop_next_slot().unwrap(), seed);
        assert_eq!(state.pop_next_slot().unwrap(), seed.advance());
        assert_eq!(state.next_slot, Some(seed.advance_by(2)));

        // Erasing the seed does not disturb the watermark
        state.mark_cts_received();
        assert_eq!(state.pop_next_slot().unwrap(), seed.advance_by(2));

        let mut empty = OutboundState::default();
        assert!(empty.pop_next_slot().is_err());
    }

    #[test]
    fn test_uid_popping() {
        let mut state = OutboundState::default();
        assert_eq!(state.pop_next_uid(), 1);
        assert_eq!(state.pop_next_uid(), 2);
        assert_eq!(state.next_uid, 3);
    }

    #[test]
    fn test_handshake_actions() {
        let mut state = OutboundState::default();
        assert_eq!(handshake_action(&state), HandshakeAction::Init);

        state.status = Some(HandshakeState::RtsSent);
        assert_eq!(handshake_action(&state), HandshakeAction::Init);
        state.ackssk = Some(SskKeyPair::generate());
        assert_eq!(handshake_action(&state), HandshakeAction::PollCts);

        state.status = Some(HandshakeState::CtsReceived);
        assert_eq!(handshake_action(&state), HandshakeAction::Nothing);
    }

    #[test]
    fn test_cts_timeout() {
        let policy = policy();
        assert!(cts_timed_out(None, 0, &policy));
        assert!(!cts_timed_out(Some(1000), 1100, &policy));
        assert!(cts_timed_out(Some(1000), 1101, &policy));
    }

    #[test]
    fn test_ack_actions() {
        let policy = policy();
        let mut msg = QueuedMessage::new(1, Slot::random());
        assert_eq!(ack_action(&msg, 10_000, &policy), AckAction::Wait);

        msg.first_send_time = Some(1000);
        msg.last_send_time = Some(1000);
        assert_eq!(ack_action(&msg, 1050, &policy), AckAction::Wait);
        assert_eq!(ack_action(&msg, 1101, &policy), AckAction::Retransmit);
        assert_eq!(ack_action(&msg, 1501, &policy), AckAction::Abandon);

        // Waiting for re-insertion
        msg.last_send_time = None;
        assert_eq!(ack_action(&msg, 1200, &policy), AckAction::Wait);
    }
}
