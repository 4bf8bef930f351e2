use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::{self, MissedTickBehavior, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    config::{CoordinatorConfig, MAX_SWEEP_INTERVAL, MIN_SWEEP_INTERVAL},
    coordinator::Coordinator,
    error::{BrokerError, ProtocolError, RegistrationError},
    frame::{framed, read_frame, write_frame},
    protocol::{Reply, Request},
};

/// Accepts one-shot request connections and serves each on its own task.
pub struct Server {
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    settings: HandlerSettings,
    sweep_interval: Duration,
}

#[derive(Debug, Clone, Copy)]
struct HandlerSettings {
    request_timeout: Duration,
    close_grace: Duration,
}

impl Server {
    pub fn new(listener: TcpListener, config: &CoordinatorConfig) -> Self {
        Self {
            listener,
            coordinator: Arc::new(Coordinator::new(config)),
            settings: HandlerSettings {
                request_timeout: config.request_timeout,
                close_grace: config.close_grace,
            },
            sweep_interval: config
                .sweep_interval
                .clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        Arc::clone(&self.coordinator)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            coordinator,
            settings,
            sweep_interval,
        } = self;
        tokio::pin!(shutdown);

        let mut sweep = time::interval_at(time::Instant::now() + sweep_interval, sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("coordinator shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &coordinator, settings);
                }
                _ = sweep.tick() => {
                    spawn_sweep(&coordinator);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    coordinator: &Arc<Coordinator>,
    settings: HandlerSettings,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, coordinator, settings),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(
    stream: TcpStream,
    peer: SocketAddr,
    coordinator: &Arc<Coordinator>,
    settings: HandlerSettings,
) {
    let coordinator = Arc::clone(coordinator);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, &coordinator, settings).await {
            warn!(peer = %peer, error = ?err, "request connection closed with error");
        }
    });
}

// Runs off the accept loop so a long multicast holding the lock cannot stall
// accepting.
fn spawn_sweep(coordinator: &Arc<Coordinator>) {
    let coordinator = Arc::clone(coordinator);
    tokio::spawn(async move {
        let evicted = coordinator.sweep_expired().await;
        if evicted > 0 {
            debug!(evicted, "periodic sweep evicted expired messages");
        }
    });
}

/// One request frame in, one reply frame out, then close.
async fn handle_connection(
    stream: TcpStream,
    coordinator: &Coordinator,
    settings: HandlerSettings,
) -> Result<()> {
    let mut frames = framed(stream);

    let reply = match timeout(settings.request_timeout, read_frame(&mut frames)).await {
        Ok(Ok(Some(input))) => {
            debug!(%input, "received request");
            dispatch(coordinator, &input).await
        }
        Ok(Ok(None)) => {
            debug!("connection closed before a request arrived");
            return Ok(());
        }
        Ok(Err(err)) => {
            let err = ProtocolError::Frame(err);
            warn!(error = %err, "unreadable request");
            Reply::ProcessingError(err.to_string())
        }
        Err(_) => Reply::ProcessingError("timed out waiting for request".to_string()),
    };

    write_frame(&mut frames, &reply.to_string()).await?;
    time::sleep(settings.close_grace).await;
    Ok(())
}

/// Parses a raw request and runs it against the coordinator.
pub async fn dispatch(coordinator: &Coordinator, input: &str) -> Reply {
    match Request::parse(input) {
        Ok(request) => {
            debug!(
                participant = request.participant(),
                command = request.command(),
                "dispatching request"
            );
            execute(coordinator, request).await
        }
        Err(ProtocolError::Empty | ProtocolError::UnknownCommand(_)) => {
            warn!(%input, "invalid command");
            Reply::InvalidCommand
        }
        Err(err) => {
            warn!(%input, error = %err, "malformed request");
            Reply::Malformed(err.to_string())
        }
    }
}

pub async fn execute(coordinator: &Coordinator, request: Request) -> Reply {
    match request {
        Request::Register { id, address } => match coordinator.register(id, address).await {
            Ok(()) => Reply::Registered,
            Err(BrokerError::Registration(RegistrationError::AlreadyRegistered(_))) => {
                Reply::AlreadyRegistered
            }
            Err(err) => {
                warn!(participant = id, error = %err, "registration failed");
                Reply::RegistrationFailed(err.to_string())
            }
        },
        Request::Deregister { id } => match coordinator.deregister(id).await {
            Ok(()) => Reply::Deregistered,
            Err(BrokerError::Registration(RegistrationError::NotFound(_))) => Reply::NotFound,
            Err(err) => Reply::ProcessingError(err.to_string()),
        },
        Request::Reconnect { id, address } => match coordinator.reconnect(id, address).await {
            Ok(_) => Reply::Reconnected,
            Err(BrokerError::Registration(RegistrationError::AlreadyConnectedOrNotFound(_))) => {
                Reply::AlreadyConnectedOrNotFound
            }
            Err(BrokerError::Connectivity(err)) => {
                warn!(participant = id, error = %err, "reconnect failed");
                Reply::ReconnectFailed(err.to_string())
            }
            Err(err) => Reply::ProcessingError(err.to_string()),
        },
        Request::Disconnect { id } => match coordinator.disconnect(id).await {
            Ok(()) => Reply::Disconnected,
            Err(BrokerError::Registration(RegistrationError::NotFound(_))) => Reply::NotFound,
            Err(err) => Reply::ProcessingError(err.to_string()),
        },
        Request::Multicast { id, message } => {
            if coordinator.multicast(id, &message).await.all_delivered() {
                Reply::Acknowledged
            } else {
                Reply::PartialDelivery
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> Coordinator {
        Coordinator::new(&CoordinatorConfig::new(0, Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn unknown_and_empty_commands_are_invalid() {
        let coordinator = coordinator();
        assert_eq!(dispatch(&coordinator, "publish#1#x").await, Reply::InvalidCommand);
        assert_eq!(dispatch(&coordinator, "").await, Reply::InvalidCommand);
    }

    #[tokio::test]
    async fn malformed_known_commands_explain_why() {
        let coordinator = coordinator();
        assert_eq!(
            dispatch(&coordinator, "register#x#127.0.0.1#1").await,
            Reply::Malformed("invalid participant id `x`".into())
        );
    }

    #[tokio::test]
    async fn registry_errors_map_to_fixed_replies() {
        let coordinator = coordinator();
        assert_eq!(dispatch(&coordinator, "deregister#1").await, Reply::NotFound);
        assert_eq!(dispatch(&coordinator, "disconnect#1").await, Reply::NotFound);
        assert_eq!(
            dispatch(&coordinator, "reconnect#1#127.0.0.1#1").await,
            Reply::AlreadyConnectedOrNotFound
        );
    }

    #[tokio::test]
    async fn multicast_with_nobody_registered_is_acknowledged() {
        let coordinator = coordinator();
        assert_eq!(dispatch(&coordinator, "msend#1#hi").await, Reply::Acknowledged);
        assert!(coordinator.snapshot().await.pending.is_empty());
    }

    #[tokio::test]
    async fn connect_failure_is_reported_with_its_cause() {
        let coordinator = coordinator();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let reply = dispatch(&coordinator, &format!("register#1#127.0.0.1#{port}")).await;
        assert!(matches!(reply, Reply::RegistrationFailed(_)), "{reply:?}");
        assert!(reply.to_string().starts_with("Registration failed: "));
    }

    #[tokio::test]
    async fn out_of_range_sweep_interval_does_not_panic() {
        for sweep_interval in [Duration::ZERO, Duration::MAX] {
            let mut config = CoordinatorConfig::new(0, Duration::from_secs(5));
            config.sweep_interval = sweep_interval;
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let server = Server::new(listener, &config);

            tokio::time::timeout(
                Duration::from_secs(1),
                server.run_until(tokio::time::sleep(Duration::from_millis(20))),
            )
            .await
            .expect("server stops on shutdown")
            .unwrap();
        }
    }
}
