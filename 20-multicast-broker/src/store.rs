//! Offline message store.
//!
//! Messages sent while some known participants were Inactive are buffered here
//! until every such recipient has reconnected and received them, or until they
//! age past the retention timeout. The store does no I/O and reads no clock:
//! callers pass `now`, which keeps eviction deterministic under test.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use tokio::time::Instant;
use tracing::debug;

use crate::registry::ParticipantId;

/// Orders entries by send time; `seq` breaks ties between messages recorded
/// at the same instant so keys stay unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MessageKey {
    pub sent_at: Instant,
    seq: u64,
}

#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub payload: Arc<str>,
    pub pending_recipients: BTreeSet<ParticipantId>,
}

#[derive(Debug)]
pub struct MessageStore {
    entries: BTreeMap<MessageKey, PendingMessage>,
    retention: Duration,
    next_seq: u64,
}

impl MessageStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            retention,
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &MessageKey) -> Option<&PendingMessage> {
        self.entries.get(key)
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (&MessageKey, &PendingMessage)> {
        self.entries.iter()
    }

    /// Buffers `payload` for `recipients`. Nothing is stored when there is
    /// nobody to deliver to later.
    pub fn record(
        &mut self,
        payload: impl Into<Arc<str>>,
        recipients: BTreeSet<ParticipantId>,
        now: Instant,
    ) -> Option<MessageKey> {
        if recipients.is_empty() {
            return None;
        }

        let key = MessageKey {
            sent_at: now,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(
            key,
            PendingMessage {
                payload: payload.into(),
                pending_recipients: recipients,
            },
        );
        Some(key)
    }

    fn is_expired(&self, key: &MessageKey, now: Instant) -> bool {
        now.saturating_duration_since(key.sent_at) > self.retention
    }

    /// Removes every entry older than the retention timeout, recipients or
    /// not. Returns how many entries were dropped.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let retention = self.retention;
        self.entries
            .retain(|key, _| now.saturating_duration_since(key.sent_at) <= retention);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.entries.len(), "evicted expired messages");
        }
        evicted
    }

    /// Keys of live entries still waiting on `id`, oldest first.
    pub fn pending_for(&self, id: ParticipantId, now: Instant) -> Vec<MessageKey> {
        self.entries
            .iter()
            .filter(|(key, message)| {
                !self.is_expired(key, now) && message.pending_recipients.contains(&id)
            })
            .map(|(key, _)| *key)
            .collect()
    }

    /// Records that `id` received the entry; the entry goes away once nobody
    /// is left waiting for it.
    pub fn acknowledge(&mut self, key: &MessageKey, id: ParticipantId) {
        let Some(message) = self.entries.get_mut(key) else {
            return;
        };
        message.pending_recipients.remove(&id);
        if message.pending_recipients.is_empty() {
            self.entries.remove(key);
        }
    }

    /// Forgets `id` everywhere, dropping entries that become empty.
    pub fn discard_recipient(&mut self, id: ParticipantId) {
        self.entries.retain(|_, message| {
            message.pending_recipients.remove(&id);
            !message.pending_recipients.is_empty()
        });
    }
}
