use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::BatchId;

pub const ACTION_CAMPAIGN_COMPLETED: &str = "campaign.completed";
pub const ACTION_TEST_SEND: &str = "campaign.test_send";

/// Structured audit record emitted for every finished batch and every test send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub batch_id: BatchId,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Writes audit entries to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

impl AuditSink for TracingAuditLog {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        tracing::info!(
            target: "audit",
            actor = %entry.actor,
            action = %entry.action,
            batch_id = %entry.batch_id,
            payload = %entry.payload,
            "audit"
        );
        Ok(())
    }
}

/// Keeps entries in memory; handy for the service's recent-activity view and for tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAuditLog {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl InMemoryAuditLog {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .map_err(|_| AuditError::Unavailable("audit mutex poisoned".to_string()))?
            .push(entry);
        Ok(())
    }
}
