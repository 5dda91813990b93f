pub mod entry;
pub mod group;

use chrono::Utc;

/// Current time as nanoseconds since the epoch, the clock resolution every
/// timestamp in the catalogue uses.
pub(crate) fn now_nanos() -> i64 {
	Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
