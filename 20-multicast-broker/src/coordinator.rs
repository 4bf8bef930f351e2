//! The coordinator owns the membership registry and the offline message store
//! behind a single lock and exposes them only as whole operations.
//!
//! Every compound step ("check then register", "fan out then demote", "sweep
//! then resend") runs while holding the lock, so concurrent handlers observe a
//! total order of operations. The only slow step done outside the lock is
//! opening a participant's callback connection; the state is re-checked before
//! the new connection is committed.

use std::{collections::BTreeSet, time::Duration};

use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info};

use crate::{
    config::CoordinatorConfig,
    delivery::{self, DeliveryReport},
    error::{BrokerError, RegistrationError},
    registry::{CallbackAddress, DeliveryLink, ParticipantId, Registry},
    resend::{self, ResendReport},
    store::MessageStore,
};

struct CoordinatorState {
    registry: Registry,
    store: MessageStore,
}

pub struct Coordinator {
    state: Mutex<CoordinatorState>,
    connect_timeout: Duration,
    send_timeout: Duration,
}

/// Read-only copy of the coordinator's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    pub active: Vec<ParticipantId>,
    pub inactive: Vec<ParticipantId>,
    pub pending: Vec<PendingSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSnapshot {
    pub payload: String,
    pub pending_recipients: BTreeSet<ParticipantId>,
}

impl Coordinator {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                registry: Registry::new(),
                store: MessageStore::new(config.retention),
            }),
            connect_timeout: config.connect_timeout,
            send_timeout: config.send_timeout,
        }
    }

    pub async fn register(
        &self,
        id: ParticipantId,
        address: CallbackAddress,
    ) -> Result<(), BrokerError> {
        if self.state.lock().await.registry.is_active(id) {
            return Err(RegistrationError::AlreadyRegistered(id).into());
        }

        let link = DeliveryLink::connect(&address, self.connect_timeout).await?;

        let mut state = self.state.lock().await;
        if state.registry.is_active(id) {
            drop(state);
            link.close(self.send_timeout).await;
            return Err(RegistrationError::AlreadyRegistered(id).into());
        }
        state.registry.activate(id, address.clone(), link);
        info!(participant = id, %address, "participant registered");
        Ok(())
    }

    pub async fn deregister(&self, id: ParticipantId) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let record = state.registry.remove(id)?;
        state.store.discard_recipient(id);
        drop(state);

        if let Some(link) = record.into_link() {
            link.close(self.send_timeout).await;
        }
        info!(participant = id, "participant deregistered");
        Ok(())
    }

    pub async fn disconnect(&self, id: ParticipantId) -> Result<(), BrokerError> {
        let link = self.state.lock().await.registry.deactivate(id)?;
        if let Some(link) = link {
            link.close(self.send_timeout).await;
        }
        info!(participant = id, "participant disconnected");
        Ok(())
    }

    /// Re-activates a known, Inactive participant on `address` and drains its
    /// buffered messages.
    pub async fn reconnect(
        &self,
        id: ParticipantId,
        address: CallbackAddress,
    ) -> Result<ResendReport, BrokerError> {
        if !Self::can_reconnect(&self.state.lock().await.registry, id) {
            return Err(RegistrationError::AlreadyConnectedOrNotFound(id).into());
        }

        let link = DeliveryLink::connect(&address, self.connect_timeout).await?;

        let mut state = self.state.lock().await;
        if !Self::can_reconnect(&state.registry, id) {
            drop(state);
            link.close(self.send_timeout).await;
            return Err(RegistrationError::AlreadyConnectedOrNotFound(id).into());
        }

        let CoordinatorState { registry, store } = &mut *state;
        registry.activate(id, address.clone(), link);
        info!(participant = id, %address, "participant reconnected");

        let report = resend::resend(registry, store, id, Instant::now(), self.send_timeout).await?;
        if report.delivered > 0 || report.remaining > 0 {
            info!(
                participant = id,
                delivered = report.delivered,
                remaining = report.remaining,
                "resent buffered messages"
            );
        }
        Ok(report)
    }

    fn can_reconnect(registry: &Registry, id: ParticipantId) -> bool {
        registry.contains(id) && !registry.is_active(id)
    }

    pub async fn multicast(&self, sender: ParticipantId, payload: &str) -> DeliveryReport {
        let mut state = self.state.lock().await;
        let CoordinatorState { registry, store } = &mut *state;
        let report =
            delivery::multicast(registry, store, payload, Instant::now(), self.send_timeout).await;
        debug!(
            sender,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "message multicast"
        );
        report
    }

    /// Purges expired buffered messages without any other side effect.
    pub async fn sweep_expired(&self) -> usize {
        self.state.lock().await.store.sweep(Instant::now())
    }

    pub async fn snapshot(&self) -> CoordinatorSnapshot {
        let state = self.state.lock().await;
        CoordinatorSnapshot {
            active: state.registry.active_ids(),
            inactive: state.registry.inactive_ids().into_iter().collect(),
            pending: state
                .store
                .iter()
                .map(|(_, message)| PendingSnapshot {
                    payload: message.payload.to_string(),
                    pending_recipients: message.pending_recipients.clone(),
                })
                .collect(),
        }
    }
}
