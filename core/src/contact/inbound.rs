// Inbound contact: scan ahead along the shared slot chain for new mail
//
// Only the last occupied slot is persisted (`slots`). Each fetch looks at it
// and up to `poll_ahead` slots past the latest hit, so gaps left by lost or
// retransmitted inserts are stepped over. The message on the watermark slot
// itself was taken in on an earlier pass and is passed over quietly.

use super::state::NEEDS_ATTENTION;
use super::{contact_dir, ContactContext, ContactError, INBOUND_DIR, PROPS_FILE};
use crate::message::{key_body, mailpage_key, split_message, Mailsite, RtsMessage};
use crate::network::NetworkError;
use crate::slots::Slot;
use crate::store::{MailSink, MessageLog, PropertyStore, PropsFile, ReceivedMessage};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const SLOTS: &str = "slots";
pub const COMMSSK: &str = "commssk";
pub const ACKSSK: &str = "ackssk";
/// Keyword date of the RTS the current channel came from
pub const RTS_DATE: &str = "rtsdate";

/// Body of every ack and CTS
pub const ACK_CONTENT: &[u8] = b"ack";
const ACK_PRIORITY: u8 = 1;

/// What one `fetch` pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub delivered: Vec<u64>,
    pub duplicates: Vec<u64>,
    /// Blobs thrown away for a bad header
    pub discarded: usize,
    /// Hits left for the next pass
    pub deferred: usize,
    /// Persisted watermark after the pass
    pub watermark: Option<Slot>,
}

/// An RTS that decrypted and verified against the sender's mailsite
#[derive(Debug, Clone)]
pub struct VerifiedRts {
    /// Sender's mailsite key
    pub sender: String,
    pub message: RtsMessage,
    /// `yyyy-MM-dd` of the keyword it was found under
    pub date: String,
}

impl VerifiedRts {
    pub fn open(ctx: &ContactContext, sealed: &[u8], date: &str) -> Result<Self, ContactError> {
        let signed = RtsMessage::open(sealed, ctx.account.keys())?;
        let sender = key_body(&signed.message.mailsite).to_string();

        let site_key = mailpage_key(&sender);
        let Some(site) = ctx.network.fetch(&site_key)? else {
            return Err(NetworkError::Unavailable(format!("mailsite {} not found", site_key)).into());
        };
        let site = Mailsite::parse(&site).map_err(|e| {
            ContactError::Fatal(format!("Mailsite for {} is unusable: {}", sender, e))
        })?;
        let message = signed.verify(&site.public_key, ctx.account.mailsite_key())?;
        Ok(Self {
            sender,
            message,
            date: date.to_string(),
        })
    }
}

/// What applying an RTS did to the inbound contact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtsOutcome {
    /// First channel from this sender, or a newer one replacing it
    NewChannel,
    /// The channel already in use
    Repeated,
    /// Older than the RTS the current channel came from
    Stale,
}

/// Outcome of taking in one fetched blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intake {
    Delivered(u64),
    Duplicate(u64),
    /// Already taken in from the watermark slot on an earlier pass
    Consumed,
    Discarded,
    Deferred,
}

pub struct InboundContact {
    mailsite_key: String,
    dir: PathBuf,
    props: PropsFile,
    log: MessageLog,
    ctx: ContactContext,
}

impl InboundContact {
    pub fn open(
        ctx: ContactContext,
        contacts_root: &Path,
        mailsite_key: &str,
    ) -> Result<Self, ContactError> {
        let dir = contact_dir(contacts_root, INBOUND_DIR, mailsite_key)?;
        Ok(Self {
            mailsite_key: mailsite_key.to_string(),
            props: PropsFile::new(dir.join(PROPS_FILE)),
            log: MessageLog::new(&dir),
            dir,
            ctx,
        })
    }

    /// Open the contact an RTS came from and set up its channel
    pub fn accept_rts(
        ctx: ContactContext,
        contacts_root: &Path,
        rts: &VerifiedRts,
    ) -> Result<(Self, RtsOutcome), ContactError> {
        let contact = Self::open(ctx, contacts_root, &rts.sender)?;
        let outcome = contact.apply_rts(rts)?;
        Ok((contact, outcome))
    }

    /// Point this contact at the channel an RTS describes. A repeat of the
    /// current channel leaves the watermark alone, and an RTS older than the
    /// one the current channel came from is ignored. The CTS is posted unless
    /// the RTS was stale.
    pub fn apply_rts(&self, rts: &VerifiedRts) -> Result<RtsOutcome, ContactError> {
        let current = self.props.get(COMMSSK)?;
        let outcome = if current.as_deref() == Some(rts.message.commssk.as_str()) {
            debug!("Repeated RTS from {}", self.mailsite_key);
            RtsOutcome::Repeated
        } else if self.props.get(RTS_DATE)?.is_some_and(|date| rts.date < date) {
            info!(
                "Ignoring RTS from {} dated {}: the current channel is newer",
                self.mailsite_key, rts.date
            );
            return Ok(RtsOutcome::Stale);
        } else {
            if current.is_some() {
                // Ids restart at 1 on a new channel
                info!("{} started a new channel", self.mailsite_key);
                self.log.clear()?;
            } else {
                info!("Accepted RTS from {}", self.mailsite_key);
            }
            self.props.update(
                &[
                    (SLOTS, rts.message.initial_slot.to_string()),
                    (COMMSSK, rts.message.commssk.clone()),
                    (ACKSSK, rts.message.ackssk.clone()),
                    (RTS_DATE, rts.date.clone()),
                ],
                &[],
            )?;
            RtsOutcome::NewChannel
        };

        if let Err(e) = self.send_cts() {
            warn!("Failed to post CTS for {}: {}", self.mailsite_key, e);
        }
        Ok(outcome)
    }

    pub fn mailsite_key(&self) -> &str {
        &self.mailsite_key
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get_prop(&self, key: &str) -> Result<Option<String>, ContactError> {
        Ok(self.props.get(key)?)
    }

    pub fn set_prop(&self, key: &str, value: &str) -> Result<(), ContactError> {
        Ok(self.props.put(key, value)?)
    }

    pub fn needs_attention(&self) -> Result<Option<String>, ContactError> {
        self.get_prop(NEEDS_ATTENTION)
    }

    pub fn mark_needs_attention(&self, reason: &str) -> Result<(), ContactError> {
        self.set_prop(NEEDS_ATTENTION, &reason.replace(['\r', '\n'], " "))
    }

    pub fn clear_needs_attention(&self) -> Result<(), ContactError> {
        Ok(self.props.remove(NEEDS_ATTENTION)?)
    }

    /// Tell the sender its RTS arrived
    pub fn send_cts(&self) -> Result<(), ContactError> {
        let ackssk = self
            .props
            .get(ACKSSK)?
            .ok_or_else(|| ContactError::Corrupt(format!("{} has no ack key", self.mailsite_key)))?;
        self.ctx
            .network
            .insert(ACK_CONTENT, &format!("{}ack", ackssk), ACK_PRIORITY, "")?;
        debug!("Posted CTS for {}", self.mailsite_key);
        Ok(())
    }

    /// Poll the slot chain and hand new messages to `mailbox`
    pub fn fetch(&self, mailbox: &dyn MailSink) -> Result<FetchReport, ContactError> {
        let Some(slots) = self.props.get(SLOTS)? else {
            warn!("Contact {} is corrupt - no 'slots' entry", self.mailsite_key);
            return Err(ContactError::Corrupt(format!("{} has no slots entry", self.mailsite_key)));
        };
        let start = Slot::parse(&slots)
            .map_err(|e| ContactError::Corrupt(format!("{}: bad slots entry: {}", self.mailsite_key, e)))?;
        let Some(commssk) = self.props.get(COMMSSK)? else {
            warn!("Contact {} is corrupt - no 'commssk' entry", self.mailsite_key);
            return Err(ContactError::Corrupt(format!("{} has no commssk entry", self.mailsite_key)));
        };
        let ackssk = self.props.get(ACKSSK)?;
        if ackssk.is_none() {
            warn!("Contact {} has no ack key; messages will not be acknowledged", self.mailsite_key);
        }

        let poll_ahead = self.ctx.policy.poll_ahead;
        let mut report = FetchReport::default();
        let mut watermark = start.clone();
        let mut frozen = false;
        let mut candidate = start.clone();
        let mut remaining = poll_ahead + 1;

        while remaining > 0 {
            remaining -= 1;
            let key = format!("{}{}", commssk, candidate);
            debug!("Attempting to fetch mail on slot {}", candidate);
            let data = match self.ctx.network.fetch(&key) {
                Ok(Some(data)) => data,
                Ok(None) => {
                    debug!("No mail there");
                    candidate = candidate.advance();
                    continue;
                }
                Err(e) => {
                    debug!("Fetch on slot {} failed: {}", candidate, e);
                    candidate = candidate.advance();
                    continue;
                }
            };

            let at_watermark = candidate == start;
            match self.take_in(&data, mailbox, ackssk.as_deref(), at_watermark) {
                Intake::Deferred => {
                    report.deferred += 1;
                    frozen = true;
                }
                outcome => {
                    match outcome {
                        Intake::Delivered(id) => report.delivered.push(id),
                        Intake::Duplicate(id) => report.duplicates.push(id),
                        Intake::Discarded => report.discarded += 1,
                        Intake::Consumed | Intake::Deferred => {}
                    }
                    if !frozen {
                        watermark = candidate.clone();
                        remaining = poll_ahead;
                    }
                }
            }
            candidate = candidate.advance();
        }

        if watermark != start {
            debug!("Putting {} into slots for {}", watermark, self.mailsite_key);
            self.props.put(SLOTS, watermark.as_str())?;
        }
        report.watermark = Some(watermark);
        Ok(report)
    }

    fn take_in(
        &self,
        data: &[u8],
        mailbox: &dyn MailSink,
        ackssk: Option<&str>,
        at_watermark: bool,
    ) -> Intake {
        let (header, body) = match split_message(data) {
            Ok(parts) => parts,
            Err(e) if e.is_io() => {
                warn!("Could not read fetched message ({}). Leaving it to try later", e);
                return Intake::Deferred;
            }
            Err(e) => {
                warn!("Got a message with an invalid header ({}). Discarding", e);
                return Intake::Discarded;
            }
        };
        let Some(id) = header.id() else {
            warn!("Got a message with a missing or non-integer id. Discarding");
            return Intake::Discarded;
        };

        match self.log.is_present(id) {
            Err(e) => {
                warn!(
                    "Couldn't read log for {} ({}), so can't tell if message {} is a duplicate. Leaving it to try later",
                    self.mailsite_key, e, id
                );
                return Intake::Deferred;
            }
            Ok(true) if at_watermark => {
                debug!("Message {} is the last one taken in", id);
                return Intake::Consumed;
            }
            Ok(true) => {
                info!("Message {} from {} already received. Discarding", id, self.mailsite_key);
                self.send_ack(ackssk, id);
                return Intake::Duplicate(id);
            }
            Ok(false) => {}
        }

        let msg = ReceivedMessage {
            contact: self.mailsite_key.clone(),
            message_id: id,
            body: body.to_vec(),
            received_at: self.ctx.clock.now_millis(),
        };
        if let Err(e) = mailbox.store(msg) {
            warn!("Could not store message {} from {}: {}. Will try again soon", id, self.mailsite_key, e);
            return Intake::Deferred;
        }
        if let Err(e) = self.log.add(id) {
            warn!("Delivered message {} but could not log it: {}", id, e);
        }
        info!("You've got mail! Message {} from {}", id, self.mailsite_key);
        self.send_ack(ackssk, id);
        Intake::Delivered(id)
    }

    fn send_ack(&self, ackssk: Option<&str>, id: u64) {
        let Some(ackssk) = ackssk else {
            return;
        };
        let key = format!("{}{}", ackssk, id);
        if let Err(e) = self.ctx.network.insert(ACK_CONTENT, &key, ACK_PRIORITY, "") {
            warn!("Failed to post ack for message {} to {}: {}", id, self.mailsite_key, e);
        }
    }
}
