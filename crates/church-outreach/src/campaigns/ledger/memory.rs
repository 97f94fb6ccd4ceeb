use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BatchQuery, CampaignLedger, LedgerError, OutcomeQuery};
use crate::campaigns::domain::{Batch, BatchId, DeliveryOutcome, DeliveryStatus};

/// One ledger mutation. The file ledger persists these verbatim, one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(super) enum LedgerEntry {
    BatchOpened {
        batch: Batch,
    },
    OutcomeRecorded {
        batch_id: BatchId,
        outcome: DeliveryOutcome,
    },
    BatchCompleted {
        batch: Batch,
    },
    OutcomeDelivered {
        batch_id: BatchId,
        phone: String,
        delivered_at: DateTime<Utc>,
    },
}

#[derive(Debug)]
struct BatchEntry {
    sequence: u64,
    batch: Batch,
    outcomes: Vec<DeliveryOutcome>,
}

/// Ledger contents shared by the in-memory and journal-backed ledgers.
#[derive(Debug, Default)]
pub(super) struct LedgerState {
    batches: HashMap<BatchId, BatchEntry>,
    next_sequence: u64,
}

impl LedgerState {
    /// Validate an entry without applying it. `Ok(false)` means it would not change anything.
    pub(super) fn check(&self, entry: &LedgerEntry) -> Result<bool, LedgerError> {
        match entry {
            LedgerEntry::BatchOpened { batch } => {
                if self.batches.contains_key(&batch.batch_id) {
                    Err(LedgerError::Conflict(batch.batch_id.clone()))
                } else {
                    Ok(true)
                }
            }
            LedgerEntry::OutcomeRecorded { batch_id, .. } => {
                self.open_entry(batch_id).map(|_| true)
            }
            LedgerEntry::BatchCompleted { batch } => {
                self.open_entry(&batch.batch_id).map(|_| true)
            }
            LedgerEntry::OutcomeDelivered {
                batch_id, phone, ..
            } => {
                let entry = self
                    .batches
                    .get(batch_id)
                    .ok_or_else(|| LedgerError::NotFound(batch_id.clone()))?;
                Ok(entry
                    .outcomes
                    .iter()
                    .any(|outcome| is_deliverable(outcome, phone)))
            }
        }
    }

    pub(super) fn apply(&mut self, entry: LedgerEntry) -> Result<bool, LedgerError> {
        if !self.check(&entry)? {
            return Ok(false);
        }

        match entry {
            LedgerEntry::BatchOpened { batch } => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                self.batches.insert(
                    batch.batch_id.clone(),
                    BatchEntry {
                        sequence,
                        batch,
                        outcomes: Vec::new(),
                    },
                );
            }
            LedgerEntry::OutcomeRecorded { batch_id, outcome } => {
                if let Some(entry) = self.batches.get_mut(&batch_id) {
                    entry.outcomes.push(outcome);
                }
            }
            LedgerEntry::BatchCompleted { batch } => {
                if let Some(entry) = self.batches.get_mut(&batch.batch_id) {
                    entry.batch = batch;
                }
            }
            LedgerEntry::OutcomeDelivered {
                batch_id,
                phone,
                delivered_at,
            } => {
                if let Some(outcome) = self.batches.get_mut(&batch_id).and_then(|entry| {
                    entry
                        .outcomes
                        .iter_mut()
                        .find(|outcome| is_deliverable(outcome, &phone))
                }) {
                    outcome.status = DeliveryStatus::Delivered;
                    outcome.delivered_at = Some(delivered_at);
                }
            }
        }

        Ok(true)
    }

    fn open_entry(&self, batch_id: &BatchId) -> Result<&BatchEntry, LedgerError> {
        let entry = self
            .batches
            .get(batch_id)
            .ok_or_else(|| LedgerError::NotFound(batch_id.clone()))?;
        if entry.batch.completed_at.is_some() {
            return Err(LedgerError::Immutable(batch_id.clone()));
        }
        Ok(entry)
    }

    pub(super) fn batch(&self, batch_id: &BatchId) -> Option<Batch> {
        self.batches.get(batch_id).map(|entry| entry.batch.clone())
    }

    pub(super) fn query_batches(&self, query: &BatchQuery) -> Vec<Batch> {
        let mut matches: Vec<&BatchEntry> = self
            .batches
            .values()
            .filter(|entry| query.matches(&entry.batch))
            .collect();
        matches.sort_by_key(|entry| Reverse((entry.batch.sent_at, entry.sequence)));
        matches.into_iter().map(|entry| entry.batch.clone()).collect()
    }

    pub(super) fn query_outcomes(
        &self,
        batch_id: &BatchId,
        query: &OutcomeQuery,
    ) -> Result<Vec<DeliveryOutcome>, LedgerError> {
        let entry = self
            .batches
            .get(batch_id)
            .ok_or_else(|| LedgerError::NotFound(batch_id.clone()))?;
        let mut matches: Vec<(usize, &DeliveryOutcome)> = entry
            .outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| query.matches(outcome))
            .collect();
        matches.sort_by_key(|(index, outcome)| Reverse((outcome.sent_at, *index)));
        Ok(matches
            .into_iter()
            .map(|(_, outcome)| outcome.clone())
            .collect())
    }
}

fn is_deliverable(outcome: &DeliveryOutcome, phone: &str) -> bool {
    outcome.recipient.phone == phone && outcome.status == DeliveryStatus::Sent
}

/// Process-local ledger. History is lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    fn apply(&self, entry: LedgerEntry) -> Result<bool, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger mutex poisoned".to_string()))?
            .apply(entry)
    }

    fn read<T>(&self, f: impl FnOnce(&LedgerState) -> T) -> Result<T, LedgerError> {
        let guard = self
            .state
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger mutex poisoned".to_string()))?;
        Ok(f(&guard))
    }
}

impl CampaignLedger for InMemoryLedger {
    fn append_batch(&self, batch: &Batch) -> Result<(), LedgerError> {
        self.apply(LedgerEntry::BatchOpened {
            batch: batch.clone(),
        })
        .map(|_| ())
    }

    fn complete_batch(&self, batch: &Batch) -> Result<(), LedgerError> {
        self.apply(LedgerEntry::BatchCompleted {
            batch: batch.clone(),
        })
        .map(|_| ())
    }

    fn append_outcome(
        &self,
        batch_id: &BatchId,
        outcome: &DeliveryOutcome,
    ) -> Result<(), LedgerError> {
        self.apply(LedgerEntry::OutcomeRecorded {
            batch_id: batch_id.clone(),
            outcome: outcome.clone(),
        })
        .map(|_| ())
    }

    fn batch(&self, batch_id: &BatchId) -> Result<Option<Batch>, LedgerError> {
        self.read(|state| state.batch(batch_id))
    }

    fn query_batches(&self, query: &BatchQuery) -> Result<Vec<Batch>, LedgerError> {
        self.read(|state| state.query_batches(query))
    }

    fn query_outcomes(
        &self,
        batch_id: &BatchId,
        query: &OutcomeQuery,
    ) -> Result<Vec<DeliveryOutcome>, LedgerError> {
        self.read(|state| state.query_outcomes(batch_id, query))?
    }

    fn mark_delivered(
        &self,
        batch_id: &BatchId,
        phone: &str,
        delivered_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        self.apply(LedgerEntry::OutcomeDelivered {
            batch_id: batch_id.clone(),
            phone: phone.to_string(),
            delivered_at,
        })
    }
}
