use std::{
    io::IsTerminal,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use anyhow::{Context, Result, anyhow, bail};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use super::{
    connection::ConnectionManager,
    listener::InboundListener,
    log::MessageLog,
};
use crate::{
    config::ParticipantConfig,
    protocol::{Reply, Request},
    registry::{CallbackAddress, ParticipantId},
};

/// Commands an operator can type at the participant prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum ShellCommand {
    Register { port: u16 },
    Deregister,
    Disconnect,
    Reconnect { port: u16 },
    Msend { message: String },
    Quit,
}

impl ShellCommand {
    /// Parses one line of input. The command word is case-insensitive; the
    /// rest of the line is the argument, taken verbatim for `msend`.
    pub fn parse(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            bail!("empty command");
        }

        let (word, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim_start()),
            None => (trimmed, ""),
        };

        match word.to_lowercase().as_str() {
            "register" => Ok(ShellCommand::Register {
                port: parse_port("register", rest)?,
            }),
            "reconnect" => Ok(ShellCommand::Reconnect {
                port: parse_port("reconnect", rest)?,
            }),
            "deregister" => Ok(ShellCommand::Deregister),
            "disconnect" => Ok(ShellCommand::Disconnect),
            "msend" if rest.is_empty() => Err(anyhow!("Usage: msend [message]")),
            "msend" => Ok(ShellCommand::Msend {
                message: rest.to_string(),
            }),
            "quit" => Ok(ShellCommand::Quit),
            _ => Err(anyhow!("Invalid command")),
        }
    }
}

fn parse_port(command: &str, raw: &str) -> Result<u16> {
    if raw.is_empty() {
        bail!("Usage: {command} [port]");
    }
    raw.parse()
        .with_context(|| format!("invalid port `{raw}`"))
}

/// Participant-side state: who we are, how to reach the coordinator and the
/// listener currently receiving our deliveries.
pub struct Participant {
    id: ParticipantId,
    connection: ConnectionManager,
    log: MessageLog,
    bind_ip: IpAddr,
    listener: Option<InboundListener>,
}

impl Participant {
    pub fn new(config: &ParticipantConfig) -> Self {
        Self {
            id: config.id,
            connection: ConnectionManager::new(
                config.coordinator_host.clone(),
                config.coordinator_port,
            ),
            log: MessageLog::new(config.log_path.clone()),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listener: None,
        }
    }

    /// Binds listeners on `ip` instead of every interface.
    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    pub fn listener(&self) -> Option<&InboundListener> {
        self.listener.as_ref()
    }

    pub async fn execute(&mut self, command: ShellCommand) -> Result<Reply> {
        let id = self.id;
        match command {
            ShellCommand::Register { port } => {
                self.switch_listener(port, Reply::Registered, |address| Request::Register {
                    id,
                    address,
                })
                .await
            }
            ShellCommand::Reconnect { port } => {
                self.switch_listener(port, Reply::Reconnected, |address| {
                    Request::Reconnect { id, address }
                })
                .await
            }
            ShellCommand::Deregister => {
                let reply = self.connection.request(&Request::Deregister { id }).await?;
                if reply == Reply::Deregistered {
                    self.stop_listener().await;
                }
                Ok(reply)
            }
            ShellCommand::Disconnect => {
                let reply = self.connection.request(&Request::Disconnect { id }).await?;
                if reply == Reply::Disconnected {
                    self.stop_listener().await;
                }
                Ok(reply)
            }
            ShellCommand::Msend { message } => {
                self.connection
                    .request(&Request::Multicast { id, message })
                    .await
            }
            ShellCommand::Quit => Err(anyhow!("quit is handled by the shell loop")),
        }
    }

    /// Starts a listener on `port`, advertises it, and only swaps it in for
    /// the current one when the coordinator answers `success`.
    async fn switch_listener<F>(&mut self, port: u16, success: Reply, request: F) -> Result<Reply>
    where
        F: FnOnce(CallbackAddress) -> Request,
    {
        let candidate = InboundListener::start(SocketAddr::new(self.bind_ip, port), self.log.clone())
            .await
            .with_context(|| format!("failed to listen on port {port}"))?;

        let outcome = async {
            let session = self.connection.open().await?;
            let address =
                CallbackAddress::new(session.local_ip().to_string(), candidate.local_addr().port());
            session.exchange(&request(address)).await
        }
        .await;

        match outcome {
            Ok(reply) if reply == success => {
                if let Some(previous) = self.listener.replace(candidate) {
                    previous.stop().await;
                }
                Ok(reply)
            }
            Ok(reply) => {
                candidate.stop().await;
                Ok(reply)
            }
            Err(err) => {
                candidate.stop().await;
                Err(err)
            }
        }
    }

    async fn stop_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.stop().await;
        }
    }

    pub async fn shutdown(&mut self) {
        self.stop_listener().await;
    }
}

/// Reads operator commands from stdin until `quit` or end of input.
pub async fn run(config: ParticipantConfig) -> Result<()> {
    let mut participant = Participant::new(&config);
    let interactive = std::io::stdin().is_terminal();
    let mut lines = BufReader::new(io::stdin()).lines();

    info!(participant = config.id, "participant ready");
    loop {
        if interactive {
            write_prompt().await?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match ShellCommand::parse(&line) {
            Ok(ShellCommand::Quit) => break,
            Ok(command) => match participant.execute(command).await {
                Ok(reply) => write_stdout(&reply.to_string()).await?,
                Err(err) => write_stdout(&format!("Error: {err:#}")).await?,
            },
            Err(err) => write_stdout(&err.to_string()).await?,
        }
    }

    participant.shutdown().await;
    Ok(())
}

async fn write_prompt() -> std::io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(b"input> ").await?;
    stdout.flush().await
}

async fn write_stdout(line: &str) -> std::io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
