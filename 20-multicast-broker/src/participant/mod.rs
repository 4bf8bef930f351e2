//! The participant process: issues commands to the coordinator and receives
//! its deliveries.
//!
//! The two halves are independent. [`ConnectionManager`] does one
//! request/reply exchange per command; [`InboundListener`] runs its own accept
//! loop and is started and stopped only through explicit signals.

mod connection;
mod listener;
mod log;
mod shell;

pub use connection::{ConnectionManager, CoordinatorSession};
pub use listener::{InboundListener, ListenerState};
pub use log::MessageLog;
pub use shell::{Participant, ShellCommand, run};
