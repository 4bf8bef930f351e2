//! Line-oriented config files for both processes.
//!
//! Coordinator:
//! ```text
//! 5000        listen port
//! 30          retention timeout in seconds
//! ```
//!
//! Participant:
//! ```text
//! 1                   participant id
//! messages.log        file received messages are appended to
//! 127.0.0.1 5000      coordinator address and port
//! ```

use std::{
    path::{Path, PathBuf},
    str::Lines,
    time::Duration,
};

use anyhow::{Context, Result, ensure};

use crate::registry::ParticipantId;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CLOSE_GRACE: Duration = Duration::from_millis(100);
/// Bounds applied to the background sweep period.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// One year.
const MAX_RETENTION_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub port: u16,
    /// Maximum age of a buffered message.
    pub retention: Duration,
    /// Bound on opening a participant's callback connection.
    pub connect_timeout: Duration,
    /// Bound on pushing one message to one participant.
    pub send_timeout: Duration,
    /// How long a client has to send its request frame.
    pub request_timeout: Duration,
    /// Pause between writing a reply and closing the connection.
    pub close_grace: Duration,
    /// Period of the background eviction sweep.
    pub sweep_interval: Duration,
}

impl CoordinatorConfig {
    pub fn new(port: u16, retention: Duration) -> Self {
        Self {
            port,
            retention,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            close_grace: DEFAULT_CLOSE_GRACE,
            sweep_interval: retention.clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let port = next_line(&mut lines, 1, "listen port")?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("line 1: invalid listen port `{port}`"))?;
        let retention = next_line(&mut lines, 2, "retention timeout")?;
        let retention: u64 = retention
            .parse()
            .with_context(|| format!("line 2: invalid retention timeout `{retention}`"))?;
        ensure!(
            retention <= MAX_RETENTION_SECS,
            "line 2: retention timeout {retention}s exceeds the maximum of {MAX_RETENTION_SECS}s"
        );
        Ok(Self::new(port, Duration::from_secs(retention)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config file {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantConfig {
    pub id: ParticipantId,
    pub log_path: PathBuf,
    pub coordinator_host: String,
    pub coordinator_port: u16,
}

impl ParticipantConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let id = next_line(&mut lines, 1, "participant id")?;
        let id: ParticipantId = id
            .parse()
            .with_context(|| format!("line 1: invalid participant id `{id}`"))?;
        let log_path = PathBuf::from(next_line(&mut lines, 2, "log file path")?);
        let coordinator = next_line(&mut lines, 3, "coordinator address")?;
        let parts: Vec<&str> = coordinator.split_whitespace().collect();
        ensure!(
            parts.len() == 2,
            "line 3: expected `<coordinator-ip> <coordinator-port>`, got `{coordinator}`"
        );
        let coordinator_port: u16 = parts[1]
            .parse()
            .with_context(|| format!("line 3: invalid coordinator port `{}`", parts[1]))?;

        Ok(Self {
            id,
            log_path,
            coordinator_host: parts[0].to_string(),
            coordinator_port,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config file {}", path.display()))
    }
}

fn next_line<'a>(lines: &mut Lines<'a>, number: usize, what: &str) -> Result<&'a str> {
    let line = lines
        .next()
        .with_context(|| format!("line {number}: missing {what}"))?
        .trim();
    ensure!(!line.is_empty(), "line {number}: missing {what}");
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_coordinator_config() {
        let config = CoordinatorConfig::parse("5000\n30\n").unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.retention, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.close_grace, Duration::from_millis(100));
    }

    #[test]
    fn zero_retention_still_gets_a_positive_sweep_interval() {
        let config = CoordinatorConfig::parse(" 0 \n 0 ").unwrap();
        assert_eq!(config.retention, Duration::ZERO);
        assert!(config.sweep_interval > Duration::ZERO);
    }

    #[test]
    fn oversized_retention_is_rejected() {
        let err = CoordinatorConfig::parse("0\n18446744073709551615\n").unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");

        let config = CoordinatorConfig::parse(&format!("0\n{MAX_RETENTION_SECS}\n")).unwrap();
        assert_eq!(config.sweep_interval, MAX_SWEEP_INTERVAL);
    }

    #[test]
    fn sweep_interval_is_capped_for_long_retention() {
        let config = CoordinatorConfig::new(0, Duration::MAX);
        assert_eq!(config.sweep_interval, MAX_SWEEP_INTERVAL);
    }

    #[test]
    fn coordinator_config_errors_name_the_line() {
        let err = CoordinatorConfig::parse("5000\n").unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");

        let err = CoordinatorConfig::parse("not-a-port\n5").unwrap_err();
        assert!(err.to_string().contains("line 1"), "{err}");
    }

    #[test]
    fn parses_participant_config() {
        let config = ParticipantConfig::parse("3\n/tmp/p3.log\n127.0.0.1 5000\n").unwrap();
        assert_eq!(
            config,
            ParticipantConfig {
                id: 3,
                log_path: PathBuf::from("/tmp/p3.log"),
                coordinator_host: "127.0.0.1".into(),
                coordinator_port: 5000,
            }
        );
    }

    #[test]
    fn participant_config_needs_host_and_port() {
        let err = ParticipantConfig::parse("3\nlog\n127.0.0.1\n").unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = CoordinatorConfig::load(Path::new("/definitely/not/here.cfg")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"), "{err}");
    }
}
