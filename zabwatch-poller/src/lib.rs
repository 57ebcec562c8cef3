//! Non-blocking alert poller.
//!
//! This crate hosts the poll-fetch state machine that keeps an alert
//! snapshot current against a Zabbix-style feed endpoint. The machine is
//! driven by a single cooperative tick loop and never blocks: network
//! requests run behind the [`transport::Transport`] abstraction and are
//! observed one phase at a time, with a per-phase deadline standing in for
//! the transport's own timeouts.
//!
//! Layout:
//! - [`config`] - construction-time knobs (cadence, caps, endpoint).
//! - [`transport`] - pollable HTTP requests over reqwest.
//! - [`machine`] - the state machine itself.
//! - [`change`] - snapshot comparison for change reporting.

pub mod change;
pub mod config;
pub mod machine;
pub mod transport;

pub use change::snapshots_equal;
pub use config::PollerConfig;
pub use machine::{PollState, PollStateMachine};
pub use transport::{
    HttpTransport, Transport, TransportHandle, TransportPhase, TransportRequest, TransportStatus,
};
