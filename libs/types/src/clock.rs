//! Unix-nanosecond wall clock helper
//!
//! The single place wall-clock time is read. Components take timestamps as
//! parameters so tests stay deterministic.

/// Current wall-clock time in Unix nanoseconds.
pub fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
