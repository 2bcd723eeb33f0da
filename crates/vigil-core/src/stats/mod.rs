//! Statistics derived from the attendance ledger.
//!
//! Everything here is a pure function over a slice of records, so reads can
//! run concurrently against any ledger replica without coordination.

mod coverage;
mod streak;

pub use coverage::{compute_coverage, lookback_start, percent, CoverageSnapshot};
pub use streak::{compute_best_streak, compute_monthly_sessions, compute_streak, UserProgress};
