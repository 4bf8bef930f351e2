use std::io;

use crate::registry::ParticipantId;

/// A request that could not be turned into a command.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty request")]
    Empty,

    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    #[error("`{command}` expects {expected} fields, got {actual}")]
    FieldCount {
        command: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid participant id `{0}`")]
    InvalidId(String),

    #[error("invalid port `{0}`")]
    InvalidPort(String),

    #[error("malformed frame: {0}")]
    Frame(#[source] io::Error),
}

/// Membership state machine violations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("participant {0} already registered")]
    AlreadyRegistered(ParticipantId),

    #[error("participant {0} not found")]
    NotFound(ParticipantId),

    #[error("participant {0} is already connected or not found")]
    AlreadyConnectedOrNotFound(ParticipantId),
}

/// Failures talking to a participant's callback address.
#[derive(Debug, thiserror::Error)]
pub enum ConnectivityError {
    #[error("{source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connection to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("send to {peer} failed: {source}")]
    Send {
        peer: String,
        #[source]
        source: io::Error,
    },

    #[error("send to {peer} timed out")]
    SendTimeout { peer: String },
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    #[error("internal consistency error: {0}")]
    InternalConsistency(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_displays_underlying_cause() {
        let err = ConnectivityError::Connect {
            addr: "127.0.0.1:9".into(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "Connection refused"),
        };
        assert_eq!(err.to_string(), "Connection refused");
    }

    #[test]
    fn broker_error_is_transparent_over_registration() {
        let err: BrokerError = RegistrationError::NotFound(7).into();
        assert_eq!(err.to_string(), "participant 7 not found");
    }

    #[test]
    fn field_count_names_command() {
        let err = ProtocolError::FieldCount {
            command: "register",
            expected: 4,
            actual: 2,
        };
        assert_eq!(err.to_string(), "`register` expects 4 fields, got 2");
    }
}
