//! Domain errors and the non-fatal warning accumulator

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised while reconstructing a balance history.
///
/// `UnknownDenom`, `MalformedTransaction`, `MalformedEntry` and `CacheUnavailable`
/// are non-fatal: they are collected into [`Warnings`] and the run continues.
/// The remaining variants abort the run and no report is produced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("unknown denom '{denom}' (showing raw id)")]
    UnknownDenom { denom: String },

    #[error("malformed transaction {tx_id}: {reason}")]
    MalformedTransaction { tx_id: String, reason: String },

    #[error("malformed entry in transaction {tx_id}: {reason}")]
    MalformedEntry { tx_id: String, reason: String },

    #[error("cache unavailable: {reason}")]
    CacheUnavailable { reason: String },

    #[error("failed to fetch {what} after {attempts} attempt(s): {reason}")]
    UpstreamFetch { what: String, attempts: u32, reason: String },

    #[error("seed balance for {wallet} before {before} unavailable: {reason}")]
    SeedBalanceUnavailable {
        wallet: String,
        before: DateTime<Utc>,
        reason: String,
    },

    #[error("{count} transactions in range exceeds the configured limit of {limit}")]
    TooManyTransactions { count: usize, limit: usize },
}

impl HistoryError {
    /// Whether the run can continue after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HistoryError::UpstreamFetch { .. }
                | HistoryError::SeedBalanceUnavailable { .. }
                | HistoryError::TooManyTransactions { .. }
        )
    }
}

pub type HistoryResult<T> = Result<T, HistoryError>;

/// Non-fatal problems collected during a run and reported next to the output
#[derive(Debug, Default, Clone)]
pub struct Warnings {
    items: Vec<HistoryError>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: HistoryError) {
        tracing::warn!("{}", error);
        self.items.push(error);
    }

    pub fn extend(&mut self, other: Warnings) {
        self.items.extend(other.items);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryError> {
        self.items.iter()
    }

    /// Number of warnings matching a predicate (used by the summary)
    pub fn count_where(&self, pred: impl Fn(&HistoryError) -> bool) -> usize {
        self.items.iter().filter(|e| pred(e)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(!HistoryError::UnknownDenom { denom: "x".into() }.is_fatal());
        assert!(
            HistoryError::UpstreamFetch {
                what: "page".into(),
                attempts: 4,
                reason: "503".into()
            }
            .is_fatal()
        );
        assert!(HistoryError::TooManyTransactions { count: 10, limit: 5 }.is_fatal());
    }

    #[test]
    fn test_warnings_accumulate() {
        let mut warnings = Warnings::new();
        warnings.push(HistoryError::UnknownDenom { denom: "ibc/ABC".into() });
        warnings.push(HistoryError::MalformedEntry {
            tx_id: "AB12".into(),
            reason: "missing amount".into(),
        });

        assert_eq!(warnings.len(), 2);
        assert_eq!(
            warnings.count_where(|e| matches!(e, HistoryError::UnknownDenom { .. })),
            1
        );
    }
}
