//! Membership registry: which participants exist and which of them currently
//! hold a live delivery connection.
//!
//! The record owns its [`DeliveryLink`] directly, so "Active" and "has an open
//! handle" cannot drift apart: a participant is Active exactly when its link is
//! present, and every path that makes it Inactive takes the link out.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    pin::Pin,
    time::Duration,
};

use bytes::Bytes;
use futures::SinkExt;
use tokio::{io::AsyncWrite, net::TcpStream, time::timeout};
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};
use tracing::debug;

use crate::{
    error::{ConnectivityError, RegistrationError},
    frame::{frame_writer, write_frame},
};

pub type ParticipantId = u64;

/// Host and port a participant listens on for deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallbackAddress {
    pub host: String,
    pub port: u16,
}

impl CallbackAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for CallbackAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Long-lived outbound connection used to push messages to one participant.
pub struct DeliveryLink {
    peer: String,
    frames: FramedWrite<BoxedWriter, LengthDelimitedCodec>,
}

impl DeliveryLink {
    pub fn new<W>(peer: impl Into<String>, writer: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        let writer: BoxedWriter = Box::pin(writer);
        Self {
            peer: peer.into(),
            frames: frame_writer(writer),
        }
    }

    pub async fn connect(
        address: &CallbackAddress,
        limit: Duration,
    ) -> Result<Self, ConnectivityError> {
        let addr = address.to_string();
        let stream = match timeout(
            limit,
            TcpStream::connect((address.host.as_str(), address.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ConnectivityError::Connect { addr, source }),
            Err(_) => return Err(ConnectivityError::ConnectTimeout { addr }),
        };
        if let Err(error) = stream.set_nodelay(true) {
            debug!(peer = %addr, %error, "failed to disable nagle on delivery link");
        }
        Ok(Self::new(addr, stream))
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Pushes one payload as a single frame, giving up after `limit`.
    pub async fn deliver(&mut self, payload: &str, limit: Duration) -> Result<(), ConnectivityError> {
        match timeout(limit, write_frame(&mut self.frames, payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(ConnectivityError::Send {
                peer: self.peer.clone(),
                source,
            }),
            Err(_) => Err(ConnectivityError::SendTimeout {
                peer: self.peer.clone(),
            }),
        }
    }

    /// Best-effort flush and shutdown; the socket is dropped either way.
    pub async fn close(mut self, limit: Duration) {
        let _ = timeout(limit, SinkExt::<Bytes>::close(&mut self.frames)).await;
    }
}

impl fmt::Debug for DeliveryLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryLink")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantStatus {
    Active,
    Inactive,
}

#[derive(Debug)]
pub struct ParticipantRecord {
    pub id: ParticipantId,
    pub address: CallbackAddress,
    link: Option<DeliveryLink>,
}

impl ParticipantRecord {
    pub fn status(&self) -> ParticipantStatus {
        if self.link.is_some() {
            ParticipantStatus::Active
        } else {
            ParticipantStatus::Inactive
        }
    }

    pub fn is_active(&self) -> bool {
        self.link.is_some()
    }

    pub fn into_link(self) -> Option<DeliveryLink> {
        self.link
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    records: BTreeMap<ParticipantId, ParticipantRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ParticipantId) -> Option<&ParticipantRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn is_active(&self, id: ParticipantId) -> bool {
        self.records.get(&id).is_some_and(ParticipantRecord::is_active)
    }

    pub fn status(&self, id: ParticipantId) -> Option<ParticipantStatus> {
        self.records.get(&id).map(ParticipantRecord::status)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Creates or overwrites the record as Active. Returns the link it
    /// replaced, which the caller is expected to close.
    pub fn activate(
        &mut self,
        id: ParticipantId,
        address: CallbackAddress,
        link: DeliveryLink,
    ) -> Option<DeliveryLink> {
        let previous = self.records.insert(
            id,
            ParticipantRecord {
                id,
                address,
                link: Some(link),
            },
        );
        previous.and_then(|record| record.link)
    }

    /// Drops the record entirely, whatever its status.
    pub fn remove(&mut self, id: ParticipantId) -> Result<ParticipantRecord, RegistrationError> {
        self.records
            .remove(&id)
            .ok_or(RegistrationError::NotFound(id))
    }

    /// Marks the participant Inactive and hands back its link, if it had one.
    /// The record stays so the participant keeps receiving buffered messages.
    pub fn deactivate(
        &mut self,
        id: ParticipantId,
    ) -> Result<Option<DeliveryLink>, RegistrationError> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(RegistrationError::NotFound(id))?;
        Ok(record.link.take())
    }

    pub fn active_ids(&self) -> Vec<ParticipantId> {
        self.records
            .values()
            .filter(|record| record.is_active())
            .map(|record| record.id)
            .collect()
    }

    pub fn inactive_ids(&self) -> BTreeSet<ParticipantId> {
        self.records
            .values()
            .filter(|record| !record.is_active())
            .map(|record| record.id)
            .collect()
    }

    pub fn active_links_mut(&mut self) -> impl Iterator<Item = (ParticipantId, &mut DeliveryLink)> {
        self.records
            .iter_mut()
            .filter_map(|(id, record)| record.link.as_mut().map(|link| (*id, link)))
    }

    pub fn link_mut(&mut self, id: ParticipantId) -> Option<&mut DeliveryLink> {
        self.records
            .get_mut(&id)
            .and_then(|record| record.link.as_mut())
    }
}
