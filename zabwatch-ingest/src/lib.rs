//! # zabwatch-ingest
//!
//! Ingestion strategies that turn a raw transport payload into a list of
//! [`AlertRecord`]s.
//!
//! Two alternative strategies exist, reflecting two generations of the
//! server-side API:
//!
//! - [`TextAlertParser`]: parses the compact delimited feed
//!   (`clock;severity;suppressed;host_id;host_name;message` per line)
//!   produced by the CSV wrapper endpoint. This is the production path
//!   driven by the poll state machine.
//! - [`ZabbixJsonRpc`]: performs the two-call `problem.get` / `trigger.get`
//!   round-trip against the native JSON-RPC API and joins the results,
//!   resolving a display-ready host name per trigger.
//!
//! The strategies are mutually exclusive: a deployment picks one at
//! startup, never both at runtime.
//!
//! ## Example
//!
//! ```rust
//! use zabwatch_ingest::{AlertParser, TextAlertParser};
//!
//! let parser = TextAlertParser::new();
//! let alerts = parser.parse("1733896822;5;0;12847;node1.example.com;CPU busy\n");
//!
//! assert_eq!(alerts.len(), 1);
//! assert_eq!(alerts[0].severity, 5);
//! ```

use std::fmt::Debug;

use zabwatch_types::AlertRecord;

mod error;
mod jsonrpc;
mod text;

pub use error::IngestError;
pub use jsonrpc::{ZabbixJsonRpc, ZabbixJsonRpcBuilder};
pub use text::{MalformedRowPolicy, TextAlertParser, MAX_FEED_ROWS};

/// Trait for turning a completed transport payload into alert records.
///
/// Implementations must be infallible at this level: malformed input
/// degrades per the implementation's documented policy rather than
/// surfacing an error, because by the time a payload reaches a parser the
/// transport outcome has already been classified.
pub trait AlertParser: Send + Debug {
    /// Parse a raw payload into an ordered sequence of alert records.
    fn parse(&self, payload: &str) -> Vec<AlertRecord>;
}
