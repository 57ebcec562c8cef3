//! Delimited text feed parser.
//!
//! The compact feed exists because the native JSON-RPC API needs multiple
//! calls per refresh; the server-side wrapper collapses those into a single
//! GET returning one alert per line:
//!
//! ```text
//! clock;severity;suppressed;hostid;host;name
//! 1733896822;5;0;12847;node1.example.com;CPU 25+% busy
//! ```
//!
//! The first line of the real feed is a header naming the columns; a
//! header-less feed parses its first row as data. Fields are split on `;`
//! with no escaping, so a `;` inside the trailing message mis-splits the
//! row (documented limitation - such rows degrade per the malformed-row
//! policy).

use zabwatch_types::{AlertRecord, HostRef};

use crate::AlertParser;

/// Hard cap on parsed rows. 225 alerts form 15x15 blocks, the most the
/// downstream fixed-size renderer can show; parsing stops at the cap so
/// unbounded input cannot grow the snapshot.
pub const MAX_FEED_ROWS: usize = 225;

/// Number of `;`-separated fields in a well-formed row.
const FIELD_COUNT: usize = 6;

/// What to do with a row that does not split into exactly six fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedRowPolicy {
    /// Emit an all-default placeholder record. Keeps the row count visible
    /// to the renderer, which may show it as an unknown incident.
    #[default]
    Placeholder,
    /// Drop the row entirely.
    Skip,
}

/// Parser for the delimited alert feed.
///
/// # Example
///
/// ```rust
/// use zabwatch_ingest::{AlertParser, MalformedRowPolicy, TextAlertParser};
///
/// let parser = TextAlertParser::new().malformed_rows(MalformedRowPolicy::Skip);
/// let alerts = parser.parse("clock;severity;suppressed;hostid;host;name\nbroken row\n");
///
/// assert!(alerts.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct TextAlertParser {
    max_rows: usize,
    on_malformed: MalformedRowPolicy,
}

impl Default for TextAlertParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TextAlertParser {
    /// Create a parser with the default row cap and placeholder policy.
    pub fn new() -> Self {
        Self {
            max_rows: MAX_FEED_ROWS,
            on_malformed: MalformedRowPolicy::default(),
        }
    }

    /// Set the malformed-row policy.
    pub fn malformed_rows(mut self, policy: MalformedRowPolicy) -> Self {
        self.on_malformed = policy;
        self
    }

    /// Override the row cap (mainly for tests; the default protects the
    /// fixed-size renderer).
    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    fn parse_row(line: &str) -> Option<AlertRecord> {
        let fields: Vec<&str> = line.split(';').collect();
        if fields.len() != FIELD_COUNT {
            return None;
        }
        // Numeric fields wider than their wire width are truncated to it,
        // not rejected: clock and hostid to 32 bits, severity to 7,
        // suppressed to 1. A field that fails to parse degrades to zero.
        let clock = parse_num(fields[0]) as u32;
        let severity = (parse_num(fields[1]) & 0x7f) as u8;
        let suppressed = parse_num(fields[2]) & 1 != 0;
        let host_id = parse_num(fields[3]) as u32;
        // fields[4] (host) and fields[5] (message) are carried by the feed
        // but intentionally blanked server-side; the numeric host id is the
        // identity in this variant.
        Some(AlertRecord::new(
            u64::from(clock),
            HostRef::Id(host_id),
            severity,
            suppressed,
        ))
    }
}

impl AlertParser for TextAlertParser {
    fn parse(&self, payload: &str) -> Vec<AlertRecord> {
        let mut records = Vec::new();
        for (row, line) in payload.split('\n').enumerate() {
            if records.len() >= self.max_rows {
                break;
            }
            // A trailing newline yields one empty trailing "line"; never
            // emit a phantom record for it.
            if line.is_empty() {
                continue;
            }
            if row == 0 && looks_like_header(line) {
                continue;
            }
            match Self::parse_row(line) {
                Some(record) => records.push(record),
                None => match self.on_malformed {
                    MalformedRowPolicy::Placeholder => records.push(AlertRecord::placeholder()),
                    MalformedRowPolicy::Skip => {}
                },
            }
        }
        records
    }
}

fn parse_num(field: &str) -> u64 {
    field.parse::<u64>().unwrap_or(0)
}

/// The real feed starts with a `clock;severity;...` column header. Only
/// the leading field is inspected so a data row is never mistaken for one.
fn looks_like_header(line: &str) -> bool {
    line.split(';')
        .next()
        .is_some_and(|field| field.parse::<u64>().is_err())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "clock;severity;suppressed;hostid;host;name";

    #[test]
    fn test_single_row_without_header() {
        let alerts = TextAlertParser::new().parse("1;5;0;10;host;msg\n");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].timestamp, 1);
        assert_eq!(alerts[0].host, HostRef::Id(10));
        assert_eq!(alerts[0].severity, 5);
        assert!(!alerts[0].suppressed);
    }

    #[test]
    fn test_header_row_is_skipped() {
        let payload = format!("{HEADER}\n1733896822;5;0;12847;node1.example.com;CPU 25+% busy\n");
        let alerts = TextAlertParser::new().parse(&payload);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].timestamp, 1733896822);
        assert_eq!(alerts[0].host, HostRef::Id(12847));
    }

    #[test]
    fn test_header_detection_only_applies_to_first_row() {
        // A non-numeric row further down is malformed data, not a header.
        let payload = "1;5;0;10;a;b\nclock;severity;suppressed;hostid;host;name\n";
        let alerts = TextAlertParser::new().parse(payload);
        assert_eq!(alerts.len(), 2);
        assert!(alerts[1].is_placeholder());
    }

    #[test]
    fn test_empty_payload_and_trailing_newlines() {
        let parser = TextAlertParser::new();
        assert!(parser.parse("").is_empty());
        assert!(parser.parse("\n").is_empty());
        assert_eq!(parser.parse("1;5;0;10;a;b").len(), 1);
        assert_eq!(parser.parse("1;5;0;10;a;b\n\n").len(), 1);
    }

    #[test]
    fn test_short_row_yields_placeholder() {
        let alerts = TextAlertParser::new().parse("1;5;0;10;host\n2;4;0;11;h;m\n");
        assert_eq!(alerts.len(), 2);
        assert!(alerts[0].is_placeholder());
        assert_eq!(alerts[1].host, HostRef::Id(11));
    }

    #[test]
    fn test_semicolon_in_message_missplits() {
        // No escaping on the wire: seven fields is malformed by contract.
        let alerts = TextAlertParser::new().parse("1;5;0;10;host;disk; almost full\n");
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].is_placeholder());
    }

    #[test]
    fn test_skip_policy_drops_malformed_rows() {
        let parser = TextAlertParser::new().malformed_rows(MalformedRowPolicy::Skip);
        let alerts = parser.parse("broken\n1;5;0;10;h;m\n");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].host, HostRef::Id(10));
    }

    #[test]
    fn test_row_cap_stops_parsing() {
        let mut payload = format!("{HEADER}\n");
        for i in 0..300 {
            payload.push_str(&format!("{i};5;0;{i};host;msg\n"));
        }
        let alerts = TextAlertParser::new().parse(&payload);
        assert_eq!(alerts.len(), MAX_FEED_ROWS);
        // Rows past the cap are never reached.
        assert_eq!(alerts.last().unwrap().timestamp, 224);
    }

    #[test]
    fn test_numeric_truncation_to_field_widths() {
        // clock and hostid wrap at 32 bits, severity at 7, suppressed at 1.
        let payload = "4294967297;130;2;4294967298;host;msg\n";
        let alerts = TextAlertParser::new().parse(payload);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].timestamp, 1);
        assert_eq!(alerts[0].severity, 130 & 0x7f);
        assert!(!alerts[0].suppressed);
        assert_eq!(alerts[0].host, HostRef::Id(2));
    }

    #[test]
    fn test_unparseable_numeric_field_degrades_to_zero() {
        let alerts = TextAlertParser::new().parse("1;bogus;1;10;host;msg\n");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, 0);
        assert!(alerts[0].suppressed);
    }

    #[test]
    fn test_idempotent_parse() {
        let payload = format!("{HEADER}\n100;5;0;1;a;b\n200;3;1;2;c;d\n");
        let parser = TextAlertParser::new();
        assert_eq!(parser.parse(&payload), parser.parse(&payload));
    }
}
