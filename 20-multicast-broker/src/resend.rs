use std::{sync::Arc, time::Duration};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    error::BrokerError,
    registry::{ParticipantId, Registry},
    store::MessageStore,
};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResendReport {
    pub delivered: usize,
    /// Entries still waiting on the participant because a write failed.
    pub remaining: usize,
    pub evicted: usize,
}

/// Drains the buffered messages waiting on `id` over its fresh connection,
/// oldest first. Expired entries are purged before anything is sent.
///
/// A failed write stops the pass: that entry and every later one keep `id`
/// as a pending recipient. Nothing is retried here.
pub async fn resend(
    registry: &mut Registry,
    store: &mut MessageStore,
    id: ParticipantId,
    now: Instant,
    send_timeout: Duration,
) -> Result<ResendReport, BrokerError> {
    let evicted = store.sweep(now);
    let Some(link) = registry.link_mut(id) else {
        return Err(BrokerError::InternalConsistency(format!(
            "resend to participant {id} without a live connection"
        )));
    };

    let mut report = ResendReport {
        evicted,
        ..ResendReport::default()
    };
    let keys = store.pending_for(id, now);
    for (index, key) in keys.iter().enumerate() {
        let Some(payload) = store.get(key).map(|message| Arc::clone(&message.payload)) else {
            continue;
        };
        if let Err(error) = link.deliver(&payload, send_timeout).await {
            warn!(participant = id, %error, "resend interrupted");
            report.remaining = keys.len() - index;
            break;
        }
        store.acknowledge(key, id);
        report.delivered += 1;
    }

    debug!(participant = id, delivered = report.delivered, evicted, "resend complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::{
        frame::{frame_reader, read_frame},
        registry::{CallbackAddress, DeliveryLink},
    };

    const SEND_TIMEOUT: Duration = Duration::from_millis(200);

    fn reconnect(registry: &mut Registry, id: ParticipantId) -> tokio::io::DuplexStream {
        let (writer, reader) = tokio::io::duplex(4096);
        registry.activate(
            id,
            CallbackAddress::new("127.0.0.1", 7000),
            DeliveryLink::new("p", writer),
        );
        reader
    }

    #[tokio::test]
    async fn drains_pending_messages_oldest_first() {
        let mut registry = Registry::new();
        let mut store = MessageStore::new(Duration::from_secs(5));
        let t0 = Instant::now();
        store.record("first", BTreeSet::from([2]), t0);
        store.record("second", BTreeSet::from([2, 3]), t0 + Duration::from_secs(1));
        store.record("not for 2", BTreeSet::from([3]), t0 + Duration::from_secs(2));
        let reader = reconnect(&mut registry, 2);

        let report = resend(&mut registry, &mut store, 2, t0 + Duration::from_secs(2), SEND_TIMEOUT)
            .await
            .unwrap();

        assert_eq!(report.delivered, 2);
        let mut frames = frame_reader(reader);
        assert_eq!(read_frame(&mut frames).await.unwrap().as_deref(), Some("first"));
        assert_eq!(read_frame(&mut frames).await.unwrap().as_deref(), Some("second"));

        // "first" is gone; "second" still waits on 3; "not for 2" is untouched.
        let left: Vec<_> = store
            .iter()
            .map(|(_, m)| (m.payload.to_string(), m.pending_recipients.clone()))
            .collect();
        assert_eq!(
            left,
            vec![
                ("second".to_string(), BTreeSet::from([3])),
                ("not for 2".to_string(), BTreeSet::from([3])),
            ]
        );
    }

    #[tokio::test]
    async fn expired_entries_are_purged_not_delivered() {
        let mut registry = Registry::new();
        let mut store = MessageStore::new(Duration::from_secs(5));
        let t0 = Instant::now();
        store.record("hello", BTreeSet::from([2]), t0);
        let reader = reconnect(&mut registry, 2);

        let report = resend(&mut registry, &mut store, 2, t0 + Duration::from_secs(6), SEND_TIMEOUT)
            .await
            .unwrap();

        assert_eq!(report.evicted, 1);
        assert_eq!(report.delivered, 0);
        assert!(store.is_empty());

        drop(registry);
        let mut frames = frame_reader(reader);
        assert_eq!(read_frame(&mut frames).await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_write_keeps_remaining_entries_pending() {
        let mut registry = Registry::new();
        let mut store = MessageStore::new(Duration::from_secs(5));
        let now = Instant::now();
        store.record("one", BTreeSet::from([2]), now);
        store.record("two", BTreeSet::from([2]), now);
        drop(reconnect(&mut registry, 2));

        let report = resend(&mut registry, &mut store, 2, now, SEND_TIMEOUT)
            .await
            .unwrap();

        assert_eq!(report.delivered, 0);
        assert_eq!(report.remaining, 2);
        assert_eq!(store.pending_for(2, now).len(), 2);
    }

    #[tokio::test]
    async fn resend_requires_a_live_connection() {
        let mut registry = Registry::new();
        let mut store = MessageStore::new(Duration::from_secs(5));
        let _reader = reconnect(&mut registry, 2);
        registry.deactivate(2).unwrap();

        let err = resend(&mut registry, &mut store, 2, Instant::now(), SEND_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InternalConsistency(_)));
    }
}
