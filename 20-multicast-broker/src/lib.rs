//! Multicast message broker with offline buffering.
//!
//! A central coordinator keeps track of participants that register a callback
//! address, fans each multicast out to every participant that is currently
//! connected, and buffers a copy for those that are not. When a participant
//! reconnects it receives, oldest first, everything that was sent while it was
//! away and has not yet outlived the retention timeout.
//!
//! - [`server`] accepts request connections and dispatches one command per
//!   connection.
//! - [`coordinator`] owns all shared state behind a single lock and exposes it
//!   as whole operations.
//! - [`registry`] tracks participants and their delivery connections.
//! - [`delivery`] and [`resend`] push messages out; [`store`] holds what could
//!   not be delivered yet.
//! - [`protocol`] and [`frame`] define the wire format.
//! - [`participant`] is the client side: command issuer plus inbound listener.

pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod error;
pub mod frame;
pub mod participant;
pub mod protocol;
pub mod registry;
pub mod resend;
pub mod server;
pub mod store;
