use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    registry::{ParticipantId, Registry},
    store::{MessageKey, MessageStore},
};

/// Outcome of one multicast, summarised to the sender as a single reply.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<ParticipantId>,
    pub failed: Vec<ParticipantId>,
    /// Store entry created for participants that were not reachable.
    pub buffered: Option<MessageKey>,
    pub evicted: usize,
}

impl DeliveryReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Pushes `payload` to every Active participant (the sender included, when
/// Active), demotes the ones that could not be reached and buffers a copy for
/// everyone who is now Inactive.
///
/// Writes run concurrently and each is bounded by `send_timeout`, so a stalled
/// participant delays this call by at most one timeout.
pub async fn multicast(
    registry: &mut Registry,
    store: &mut MessageStore,
    payload: &str,
    now: Instant,
    send_timeout: Duration,
) -> DeliveryReport {
    let attempts = registry.active_links_mut().map(|(id, link)| async move {
        let outcome = link.deliver(payload, send_timeout).await;
        (id, outcome)
    });
    let outcomes = join_all(attempts).await;

    let mut report = DeliveryReport::default();
    for (id, outcome) in outcomes {
        match outcome {
            Ok(()) => report.delivered.push(id),
            Err(error) => {
                warn!(participant = id, %error, "delivery failed");
                report.failed.push(id);
            }
        }
    }

    for &id in &report.failed {
        // Dropping the link closes the socket.
        if let Ok(Some(link)) = registry.deactivate(id) {
            info!(participant = id, peer = link.peer(), "participant demoted to inactive");
        }
    }

    report.buffered = store.record(payload, registry.inactive_ids(), now);
    report.evicted = store.sweep(now);

    debug!(
        delivered = report.delivered.len(),
        failed = report.failed.len(),
        buffered = report.buffered.is_some(),
        "multicast complete"
    );
    report
}
