use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::memory::{LedgerEntry, LedgerState};
use super::{BatchQuery, CampaignLedger, LedgerError, OutcomeQuery};
use crate::campaigns::domain::{Batch, BatchId, DeliveryOutcome};

/// Ledger backed by an append-only JSON-lines journal.
///
/// Every mutation is validated, written and flushed to the journal before it becomes visible
/// to readers. Opening an existing journal replays it, so history survives restarts and a crash
/// mid-batch keeps every outcome recorded up to that point. A final line left incomplete by such
/// a crash is dropped with a warning; damage anywhere else is reported as [`LedgerError::Corrupt`].
///
/// Appends are synchronous: each mutation blocks the calling thread on `write_all` and
/// `sync_data` while holding the journal lock. Async callers should run them on the blocking
/// pool, as the dispatcher does.
pub struct FileLedger {
    path: PathBuf,
    inner: Mutex<Journal>,
}

struct Journal {
    state: LedgerState,
    file: File,
}

impl FileLedger {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut state = LedgerState::default();
        let mut replayed = 0usize;
        let mut torn_tail = None;
        let mut unterminated = false;
        if path.exists() {
            let contents = std::fs::read(&path)?;
            let mut offset = 0usize;
            for (index, line) in contents.split_inclusive(|byte| *byte == b'\n').enumerate() {
                let start = offset;
                offset += line.len();
                let terminated = line.ends_with(b"\n");
                let text = String::from_utf8_lossy(line);
                if text.trim().is_empty() {
                    continue;
                }
                let entry: LedgerEntry = match serde_json::from_str(text.trim_end()) {
                    Ok(entry) => entry,
                    // an unterminated final line is a write cut short by a crash
                    Err(source) if !terminated => {
                        warn!(
                            path = %path.display(),
                            line = index + 1,
                            error = %source,
                            "dropping torn final journal line"
                        );
                        torn_tail = Some(start);
                        break;
                    }
                    Err(source) => {
                        return Err(LedgerError::Corrupt {
                            line: index + 1,
                            source,
                        })
                    }
                };
                state.apply(entry)?;
                replayed += 1;
            }
            unterminated = torn_tail.is_none() && !contents.is_empty() && !contents.ends_with(b"\n");
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if let Some(length) = torn_tail {
            file.set_len(length as u64)?;
            file.sync_data()?;
        } else if unterminated {
            file.write_all(b"\n")?;
            file.sync_data()?;
        }
        info!(path = %path.display(), entries = replayed, "campaign ledger journal opened");

        Ok(Self {
            path,
            inner: Mutex::new(Journal { state, file }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn journal(&self) -> Result<MutexGuard<'_, Journal>, LedgerError> {
        self.inner
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger mutex poisoned".to_string()))
    }

    fn record(&self, entry: LedgerEntry) -> Result<bool, LedgerError> {
        let mut journal = self.journal()?;
        if !journal.state.check(&entry)? {
            return Ok(false);
        }

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        journal.file.write_all(line.as_bytes())?;
        journal.file.flush()?;
        journal.file.sync_data()?;

        journal.state.apply(entry)
    }
}

impl CampaignLedger for FileLedger {
    fn append_batch(&self, batch: &Batch) -> Result<(), LedgerError> {
        self.record(LedgerEntry::BatchOpened {
            batch: batch.clone(),
        })
        .map(|_| ())
    }

    fn complete_batch(&self, batch: &Batch) -> Result<(), LedgerError> {
        self.record(LedgerEntry::BatchCompleted {
            batch: batch.clone(),
        })
        .map(|_| ())
    }

    fn append_outcome(
        &self,
        batch_id: &BatchId,
        outcome: &DeliveryOutcome,
    ) -> Result<(), LedgerError> {
        self.record(LedgerEntry::OutcomeRecorded {
            batch_id: batch_id.clone(),
            outcome: outcome.clone(),
        })
        .map(|_| ())
    }

    fn batch(&self, batch_id: &BatchId) -> Result<Option<Batch>, LedgerError> {
        Ok(self.journal()?.state.batch(batch_id))
    }

    fn query_batches(&self, query: &BatchQuery) -> Result<Vec<Batch>, LedgerError> {
        Ok(self.journal()?.state.query_batches(query))
    }

    fn query_outcomes(
        &self,
        batch_id: &BatchId,
        query: &OutcomeQuery,
    ) -> Result<Vec<DeliveryOutcome>, LedgerError> {
        self.journal()?.state.query_outcomes(batch_id, query)
    }

    fn mark_delivered(
        &self,
        batch_id: &BatchId,
        phone: &str,
        delivered_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        self.record(LedgerEntry::OutcomeDelivered {
            batch_id: batch_id.clone(),
            phone: phone.to_string(),
            delivered_at,
        })
    }
}
