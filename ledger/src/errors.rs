//! Ledger-specific error types.

/// Errors raised by [`crate::store::StateStore`] that callers may want to match on,
/// as opposed to the opaque `anyhow::Error` used for ordinary I/O/Diesel failures.
#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    /// `status` did not match one of STAGED / COMMITTED / FAILED on read-back.
    #[error("unrecognized partition status {status:?} for {symbol}/{day}/{hour:02}")]
    UnknownStatus {
        /// Symbol of the offending row.
        symbol: String,
        /// Day of the offending row.
        day: String,
        /// Hour of the offending row.
        hour: i32,
        /// Raw status string read from the database.
        status: String,
    },
}
