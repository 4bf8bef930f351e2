//! Request grammar and reply strings exchanged with the coordinator.
//!
//! A request is one frame of the form `command#participantID#arg1#arg2...`.
//! For `msend` everything after the second `#` is the payload, verbatim, so
//! messages may contain `#` themselves. A reply is one frame holding one of the
//! fixed human-readable strings produced by [`Reply`].

use std::fmt;

use crate::{
    error::ProtocolError,
    registry::{CallbackAddress, ParticipantId},
};

const DELIMITER: char = '#';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Register {
        id: ParticipantId,
        address: CallbackAddress,
    },
    Deregister {
        id: ParticipantId,
    },
    Reconnect {
        id: ParticipantId,
        address: CallbackAddress,
    },
    Disconnect {
        id: ParticipantId,
    },
    Multicast {
        id: ParticipantId,
        message: String,
    },
}

impl Request {
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        if input.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let command = input.split(DELIMITER).next().unwrap_or_default();
        match command {
            "register" => {
                let [_, id, host, port] = fields::<4>("register", input)?;
                Ok(Request::Register {
                    id: parse_id(id)?,
                    address: parse_address(host, port)?,
                })
            }
            "deregister" => {
                let [_, id] = fields::<2>("deregister", input)?;
                Ok(Request::Deregister { id: parse_id(id)? })
            }
            "reconnect" => {
                let [_, id, host, port] = fields::<4>("reconnect", input)?;
                Ok(Request::Reconnect {
                    id: parse_id(id)?,
                    address: parse_address(host, port)?,
                })
            }
            "disconnect" => {
                let [_, id] = fields::<2>("disconnect", input)?;
                Ok(Request::Disconnect { id: parse_id(id)? })
            }
            "msend" => {
                let mut parts = input.splitn(3, DELIMITER);
                let _ = parts.next();
                let (Some(id), Some(message)) = (parts.next(), parts.next()) else {
                    return Err(ProtocolError::FieldCount {
                        command: "msend",
                        expected: 3,
                        actual: input.split(DELIMITER).count(),
                    });
                };
                Ok(Request::Multicast {
                    id: parse_id(id)?,
                    message: message.to_string(),
                })
            }
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    pub fn participant(&self) -> ParticipantId {
        match self {
            Request::Register { id, .. }
            | Request::Deregister { id }
            | Request::Reconnect { id, .. }
            | Request::Disconnect { id }
            | Request::Multicast { id, .. } => *id,
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            Request::Register { .. } => "register",
            Request::Deregister { .. } => "deregister",
            Request::Reconnect { .. } => "reconnect",
            Request::Disconnect { .. } => "disconnect",
            Request::Multicast { .. } => "msend",
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let command = self.command();
        match self {
            Request::Register { id, address } | Request::Reconnect { id, address } => write!(
                f,
                "{command}#{id}#{host}#{port}",
                host = address.host,
                port = address.port
            ),
            Request::Deregister { id } | Request::Disconnect { id } => {
                write!(f, "{command}#{id}")
            }
            Request::Multicast { id, message } => write!(f, "{command}#{id}#{message}"),
        }
    }
}

fn fields<'a, const N: usize>(
    command: &'static str,
    input: &'a str,
) -> Result<[&'a str; N], ProtocolError> {
    let parts: Vec<&str> = input.split(DELIMITER).collect();
    let actual = parts.len();
    parts.try_into().map_err(|_| ProtocolError::FieldCount {
        command,
        expected: N,
        actual,
    })
}

fn parse_id(raw: &str) -> Result<ParticipantId, ProtocolError> {
    raw.trim()
        .parse()
        .map_err(|_| ProtocolError::InvalidId(raw.to_string()))
}

fn parse_address(host: &str, port: &str) -> Result<CallbackAddress, ProtocolError> {
    let port = port
        .trim()
        .parse()
        .map_err(|_| ProtocolError::InvalidPort(port.to_string()))?;
    Ok(CallbackAddress::new(host.trim(), port))
}

/// Every reply the coordinator can send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Registered,
    AlreadyRegistered,
    RegistrationFailed(String),
    Deregistered,
    NotFound,
    Reconnected,
    AlreadyConnectedOrNotFound,
    ReconnectFailed(String),
    Disconnected,
    Acknowledged,
    PartialDelivery,
    InvalidCommand,
    Malformed(String),
    ProcessingError(String),
    /// Anything a participant receives that it does not recognise.
    Other(String),
}

const REGISTRATION_FAILED: &str = "Registration failed: ";
const RECONNECT_FAILED: &str = "Reconnect failed: ";
const MALFORMED: &str = "Invalid command: ";
const PROCESSING_ERROR: &str = "Error processing request: ";

impl Reply {
    pub fn parse(text: &str) -> Self {
        match text {
            "Participant registered" => Reply::Registered,
            "Participant already registered" => Reply::AlreadyRegistered,
            "Participant deregistered" => Reply::Deregistered,
            "Participant not found" => Reply::NotFound,
            "Participant reconnected" => Reply::Reconnected,
            "Participant is already connected or not found" => Reply::AlreadyConnectedOrNotFound,
            "Participant disconnected" => Reply::Disconnected,
            "Message Acknowledged" => Reply::Acknowledged,
            "Message delivery failed to some participants" => Reply::PartialDelivery,
            "Invalid command" => Reply::InvalidCommand,
            _ => {
                if let Some(cause) = text.strip_prefix(REGISTRATION_FAILED) {
                    Reply::RegistrationFailed(cause.to_string())
                } else if let Some(cause) = text.strip_prefix(RECONNECT_FAILED) {
                    Reply::ReconnectFailed(cause.to_string())
                } else if let Some(reason) = text.strip_prefix(MALFORMED) {
                    Reply::Malformed(reason.to_string())
                } else if let Some(cause) = text.strip_prefix(PROCESSING_ERROR) {
                    Reply::ProcessingError(cause.to_string())
                } else {
                    Reply::Other(text.to_string())
                }
            }
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Registered => f.write_str("Participant registered"),
            Reply::AlreadyRegistered => f.write_str("Participant already registered"),
            Reply::RegistrationFailed(cause) => write!(f, "{REGISTRATION_FAILED}{cause}"),
            Reply::Deregistered => f.write_str("Participant deregistered"),
            Reply::NotFound => f.write_str("Participant not found"),
            Reply::Reconnected => f.write_str("Participant reconnected"),
            Reply::AlreadyConnectedOrNotFound => {
                f.write_str("Participant is already connected or not found")
            }
            Reply::ReconnectFailed(cause) => write!(f, "{RECONNECT_FAILED}{cause}"),
            Reply::Disconnected => f.write_str("Participant disconnected"),
            Reply::Acknowledged => f.write_str("Message Acknowledged"),
            Reply::PartialDelivery => f.write_str("Message delivery failed to some participants"),
            Reply::InvalidCommand => f.write_str("Invalid command"),
            Reply::Malformed(reason) => write!(f, "{MALFORMED}{reason}"),
            Reply::ProcessingError(cause) => write!(f, "{PROCESSING_ERROR}{cause}"),
            Reply::Other(text) => f.write_str(text),
        }
    }
}
