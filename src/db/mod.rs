//! Store access layer.
//!
//! All reads against the JRA-VAN-derived relations go through this module.
//! Queries are built as dynamic SQL (the schema lives outside this crate) and
//! are always either a single join-on-VALUES table or a single GROUP BY —
//! never N+1 round trips.

pub mod bias_queries;
pub mod calibration_store;
pub mod code_master;
pub mod condition_queries;
pub mod horse_queries;
pub mod jockey_queries;
pub mod odds_queries;
pub mod payout_queries;
pub mod pool;
pub mod prediction_store;
pub mod race_queries;

use sqlx::postgres::PgRow;
use sqlx::Row;

/// Read a text column defensively: NULL and missing both become "".
pub(crate) fn text(row: &PgRow, col: &str) -> String {
    row.try_get::<Option<String>, _>(col)
        .ok()
        .flatten()
        .unwrap_or_default()
}

/// Read a numeric aggregate column that may come back as NULL.
pub(crate) fn opt_f64(row: &PgRow, col: &str) -> Option<f64> {
    row.try_get::<Option<f64>, _>(col).ok().flatten()
}

pub(crate) fn opt_i64(row: &PgRow, col: &str) -> Option<i64> {
    row.try_get::<Option<i64>, _>(col).ok().flatten()
}

/// `$n` placeholder list for an IN clause, starting at `start` (1-based).
pub(crate) fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(",")
}
