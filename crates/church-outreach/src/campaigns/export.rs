use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{Batch, BatchId, DeliveryOutcome};
use super::ledger::{BatchQuery, CampaignLedger, LedgerError, OutcomeQuery};

pub const BATCH_COLUMNS: [&str; 9] = [
    "Batch ID",
    "Recipient Type",
    "Total Recipients",
    "Sent",
    "Failed",
    "Cost",
    "Status",
    "Sent At",
    "Completed At",
];

pub const OUTCOME_COLUMNS: [&str; 7] = [
    "Recipient Phone",
    "Recipient Name",
    "Message",
    "Status",
    "Sent At",
    "Delivered At",
    "Cost",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("failed to write csv export: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to flush csv export: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize)]
struct BatchExportRow<'a> {
    batch_id: &'a str,
    recipient_type: &'static str,
    total_recipients: usize,
    sent: usize,
    failed: usize,
    cost: String,
    status: &'static str,
    sent_at: String,
    completed_at: String,
}

impl<'a> From<&'a Batch> for BatchExportRow<'a> {
    fn from(batch: &'a Batch) -> Self {
        Self {
            batch_id: &batch.batch_id.0,
            recipient_type: batch.recipient_type.label(),
            total_recipients: batch.total_recipients,
            sent: batch.sent_count,
            failed: batch.failed_count,
            cost: batch.cost.to_string(),
            status: batch.status.label(),
            sent_at: timestamp(Some(batch.sent_at)),
            completed_at: timestamp(batch.completed_at),
        }
    }
}

#[derive(Debug, Serialize)]
struct OutcomeExportRow<'a> {
    phone: &'a str,
    name: &'a str,
    message: &'a str,
    status: &'static str,
    sent_at: String,
    delivered_at: String,
    cost: String,
}

impl<'a> From<&'a DeliveryOutcome> for OutcomeExportRow<'a> {
    fn from(outcome: &'a DeliveryOutcome) -> Self {
        Self {
            phone: &outcome.recipient.phone,
            name: &outcome.recipient.display_name,
            message: &outcome.body,
            status: outcome.status.label(),
            sent_at: timestamp(Some(outcome.sent_at)),
            delivered_at: timestamp(outcome.delivered_at),
            cost: outcome.cost.to_string(),
        }
    }
}

fn timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map(|at| at.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

/// Read-only view over the campaign ledger for history screens and spreadsheet exports.
#[derive(Clone)]
pub struct CampaignExporter {
    ledger: Arc<dyn CampaignLedger>,
}

impl CampaignExporter {
    pub fn new(ledger: Arc<dyn CampaignLedger>) -> Self {
        Self { ledger }
    }

    pub fn batches(&self, query: &BatchQuery) -> Result<Vec<Batch>, ExportError> {
        Ok(self.ledger.query_batches(query)?)
    }

    pub fn outcomes(
        &self,
        batch_id: &BatchId,
        query: &OutcomeQuery,
    ) -> Result<Vec<DeliveryOutcome>, ExportError> {
        Ok(self.ledger.query_outcomes(batch_id, query)?)
    }

    /// Batch history, one row per batch, newest first.
    pub fn write_batches_csv<W: Write>(
        &self,
        query: &BatchQuery,
        writer: W,
    ) -> Result<usize, ExportError> {
        let batches = self.batches(query)?;
        write_rows(writer, &BATCH_COLUMNS, batches.iter().map(BatchExportRow::from))
    }

    /// Detailed per-recipient export of one batch.
    pub fn write_outcomes_csv<W: Write>(
        &self,
        batch_id: &BatchId,
        query: &OutcomeQuery,
        writer: W,
    ) -> Result<usize, ExportError> {
        let outcomes = self.outcomes(batch_id, query)?;
        write_rows(
            writer,
            &OUTCOME_COLUMNS,
            outcomes.iter().map(OutcomeExportRow::from),
        )
    }

    pub fn batches_csv(&self, query: &BatchQuery) -> Result<String, ExportError> {
        let mut buffer = Vec::new();
        self.write_batches_csv(query, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn outcomes_csv(
        &self,
        batch_id: &BatchId,
        query: &OutcomeQuery,
    ) -> Result<String, ExportError> {
        let mut buffer = Vec::new();
        self.write_outcomes_csv(batch_id, query, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn write_rows<W, T, I>(writer: W, header: &[&str], rows: I) -> Result<usize, ExportError>
where
    W: Write,
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    // headers are written by hand so an empty export still carries them
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv_writer.write_record(header)?;

    let mut written = 0;
    for row in rows {
        csv_writer.serialize(row)?;
        written += 1;
    }
    csv_writer.flush()?;
    Ok(written)
}
