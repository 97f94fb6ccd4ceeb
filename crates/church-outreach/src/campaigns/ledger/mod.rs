//! Campaign ledger: durable history of batches and their per-recipient outcomes.

mod file;
mod memory;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{Batch, BatchId, BatchStatus, DeliveryOutcome, DeliveryStatus};

pub use file::FileLedger;
pub use memory::InMemoryLedger;

/// Storage contract used by the dispatcher (writes) and the export facade (reads).
///
/// Outcome rows are append-only; the batch summary is written once at open and once at
/// completion. Delivery reports are the only later change to an outcome.
pub trait CampaignLedger: Send + Sync {
    fn append_batch(&self, batch: &Batch) -> Result<(), LedgerError>;
    fn complete_batch(&self, batch: &Batch) -> Result<(), LedgerError>;
    fn append_outcome(
        &self,
        batch_id: &BatchId,
        outcome: &DeliveryOutcome,
    ) -> Result<(), LedgerError>;
    fn batch(&self, batch_id: &BatchId) -> Result<Option<Batch>, LedgerError>;
    /// Batches sent within the range, newest first.
    fn query_batches(&self, query: &BatchQuery) -> Result<Vec<Batch>, LedgerError>;
    /// Outcomes of one batch, newest first.
    fn query_outcomes(
        &self,
        batch_id: &BatchId,
        query: &OutcomeQuery,
    ) -> Result<Vec<DeliveryOutcome>, LedgerError>;
    /// Apply a carrier delivery report. Returns `false` when no accepted outcome matched.
    fn mark_delivered(
        &self,
        batch_id: &BatchId,
        phone: &str,
        delivered_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("batch '{0}' already exists")]
    Conflict(BatchId),
    #[error("batch '{0}' not found")]
    NotFound(BatchId),
    #[error("batch '{0}' is already completed")]
    Immutable(BatchId),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("ledger journal io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ledger journal line {line} is corrupt: {source}")]
    Corrupt {
        line: usize,
        source: serde_json::Error,
    },
    #[error("failed to encode ledger entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Inclusive range of send dates (UTC). Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let date = at.date_naive();
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchQuery {
    pub range: DateRange,
    pub status: Option<BatchStatus>,
}

impl BatchQuery {
    pub fn matches(&self, batch: &Batch) -> bool {
        self.range.contains(batch.sent_at) && self.status.map_or(true, |s| batch.status == s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeQuery {
    pub range: DateRange,
    pub status: Option<DeliveryStatus>,
}

impl OutcomeQuery {
    pub fn matches(&self, outcome: &DeliveryOutcome) -> bool {
        self.range.contains(outcome.sent_at) && self.status.map_or(true, |s| outcome.status == s)
    }
}
