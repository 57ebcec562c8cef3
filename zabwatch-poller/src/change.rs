//! Snapshot comparison.

use zabwatch_types::AlertRecord;

/// Whether two alert snapshots are identical as ordered sequences under
/// record equality (description excluded).
///
/// The comparison is length-sensitive: a shorter snapshot that is a prefix
/// of the previous one still counts as a change. The result is used for
/// observability only - snapshot replacement happens unconditionally on
/// every successful fetch, whatever this returns.
pub fn snapshots_equal(previous: &[AlertRecord], current: &[AlertRecord]) -> bool {
    previous == current
}
