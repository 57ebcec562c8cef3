//! # zabwatch-types
//!
//! Core alert types for zabwatch. This crate defines the canonical parsed
//! alert unit shared by both ingestion strategies (the delimited text feed
//! and the JSON-RPC problem/trigger correlator) and consumed by the poller.
//!
//! ## Design Goals
//!
//! - **Zero required dependencies**: the types work without any
//!   serialization framework
//! - **Optional serialization**: enable the `serde` feature as needed
//! - **One host identity per record**: [`HostRef`] makes the two ingestion
//!   variants (numeric host id vs. resolved host name) mutually exclusive
//!   at the type level
//!
//! ## Example
//!
//! ```rust
//! use zabwatch_types::{AlertRecord, HostRef};
//!
//! let alert = AlertRecord::new(1733896822, HostRef::Id(12847), 5, false);
//!
//! assert_eq!(alert.severity, 5);
//! assert!(!alert.is_placeholder());
//! ```

mod alert;

pub use alert::*;
