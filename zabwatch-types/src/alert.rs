//! The canonical parsed alert unit.

/// Severity occupies 7 bits in the host-facing representation.
pub const SEVERITY_MASK: u8 = 0x7f;

/// Identity of the host an alert originated from.
///
/// The text feed carries a numeric host id foreign key; the JSON-RPC
/// correlator resolves a display-ready host name instead. A record carries
/// exactly one of the two, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HostRef {
    /// Numeric host id, as delivered by the text feed.
    Id(u32),
    /// Resolved host name, as delivered by the trigger/host join.
    Name(String),
}

impl Default for HostRef {
    fn default() -> Self {
        HostRef::Id(0)
    }
}

impl std::fmt::Display for HostRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostRef::Id(id) => write!(f, "#{id}"),
            HostRef::Name(name) => f.write_str(name),
        }
    }
}

/// A single active alert, as parsed from one of the ingestion strategies.
///
/// Records are created only by a parser, live only as long as the current
/// snapshot, and are replaced wholesale on the next successful fetch.
///
/// Equality compares `(timestamp, host, severity, suppressed)` and ignores
/// `description`, which is cosmetic. This is the comparison the change
/// detector uses to decide whether a snapshot differs from its predecessor.
#[derive(Debug, Clone, Default, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlertRecord {
    /// Seconds since epoch at which the alert fired.
    pub timestamp: u64,
    /// Origin of the alert.
    pub host: HostRef,
    /// Source-defined ordinal, higher is worse. Capped to 7 bits.
    pub severity: u8,
    /// A suppressed alert must never be treated as equal-priority to a
    /// live one.
    pub suppressed: bool,
    /// Free text, only populated by the JSON-RPC correlator.
    pub description: Option<String>,
}

impl AlertRecord {
    /// Create a record, capping severity to its 7-bit wire width.
    pub fn new(timestamp: u64, host: HostRef, severity: u8, suppressed: bool) -> Self {
        Self {
            timestamp,
            host,
            severity: severity & SEVERITY_MASK,
            suppressed,
            description: None,
        }
    }

    /// Attach a description (JSON-join variant only).
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The all-default record produced when a malformed text row cannot
    /// be parsed.
    pub fn placeholder() -> Self {
        Self::default()
    }

    /// Whether this record is the malformed-row placeholder. Display code
    /// may want to special-case these before rendering.
    pub fn is_placeholder(&self) -> bool {
        self.timestamp == 0
            && self.host == HostRef::Id(0)
            && self.severity == 0
            && !self.suppressed
    }
}

impl PartialEq for AlertRecord {
    fn eq(&self, other: &Self) -> bool {
        // Description is excluded: it never participates in change
        // detection.
        self.timestamp == other.timestamp
            && self.host == other.host
            && self.severity == other.severity
            && self.suppressed == other.suppressed
    }
}
