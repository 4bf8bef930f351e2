//! Inbound listener the coordinator delivers messages to.
//!
//! Lifecycle: `Starting → Bound → Listening → ShuttingDown → Stopped`.
//! [`InboundListener::start`] returns only once the socket is bound, so a
//! caller can rely on the port being reachable before it advertises it.
//! Shutdown is an explicit signal; [`InboundListener::stop`] waits for the
//! task to reach `Stopped` and release the port.

use std::{io, net::SocketAddr};

use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::{oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::log::MessageLog;
use crate::frame::{frame_reader, read_frame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Starting,
    Bound,
    Listening,
    ShuttingDown,
    Stopped,
}

pub struct InboundListener {
    local_addr: SocketAddr,
    state: watch::Receiver<ListenerState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl InboundListener {
    pub async fn start(addr: SocketAddr, log: MessageLog) -> io::Result<Self> {
        let (state_tx, state_rx) = watch::channel(ListenerState::Starting);

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        state_tx.send_replace(ListenerState::Bound);
        info!(%local_addr, "listening for deliveries");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, log, state_tx, shutdown_rx));

        Ok(Self {
            local_addr,
            state: state_rx,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ListenerState> {
        self.state.clone()
    }

    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(err) = (&mut self.task).await {
            warn!(error = ?err, "listener task failed");
        }
        debug!(local_addr = %self.local_addr, "listener stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    log: MessageLog,
    state: watch::Sender<ListenerState>,
    mut shutdown: oneshot::Receiver<()>,
) {
    state.send_replace(ListenerState::Listening);

    loop {
        select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "delivery connection opened");
                    if receive(stream, &log, &mut shutdown).await {
                        break;
                    }
                }
                Err(err) => warn!(error = ?err, "failed to accept delivery connection"),
            },
        }
    }

    state.send_replace(ListenerState::ShuttingDown);
    drop(listener);
    state.send_replace(ListenerState::Stopped);
}

/// Appends every delivered payload to the log until the coordinator closes
/// the connection. Returns `true` when shutdown was requested meanwhile.
async fn receive(
    stream: TcpStream,
    log: &MessageLog,
    shutdown: &mut oneshot::Receiver<()>,
) -> bool {
    let mut frames = frame_reader(stream);
    loop {
        select! {
            _ = &mut *shutdown => return true,
            frame = read_frame(&mut frames) => match frame {
                Ok(Some(message)) => {
                    info!(%message, "received message");
                    if let Err(err) = log.append(&message).await {
                        warn!(error = ?err, path = %log.path().display(), "failed to append to log");
                    }
                }
                Ok(None) => {
                    debug!("delivery connection closed");
                    return false;
                }
                Err(err) => {
                    warn!(error = ?err, "delivery connection failed");
                    return false;
                }
            },
        }
    }
}
