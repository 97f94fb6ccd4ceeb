use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a member record in the church directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DepartmentId(pub String);

/// Saved recipient group (e.g. "choir", "ushers").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

/// Unique campaign identifier, assigned before the first message leaves the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(pub String);

impl BatchId {
    pub fn generate() -> Self {
        Self(format!("batch-{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport family a campaign is delivered over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "sms")]
    Sms,
    #[serde(rename = "whatsapp")]
    WhatsApp,
}

impl Channel {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sms => "SMS",
            Self::WhatsApp => "WhatsApp",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Addressable recipient after targeting has been resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: Option<MemberId>,
    pub display_name: String,
    pub first_name: String,
    pub last_name: String,
    /// E.164 when the source number could be normalized, otherwise the cleaned input.
    pub phone: String,
    /// Extra placeholder values such as the member's department.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

/// Message body rendered for a single recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub recipient: Recipient,
    pub body: String,
    pub channel: Channel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Queued,
    Sent,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Sent => "Sent",
            Self::Delivered => "Delivered",
            Self::Failed => "Failed",
        }
    }
}

/// Error recorded on outcomes that were never attempted because the batch was aborted.
pub const CANCELLED_REASON: &str = "cancelled";

/// Per-recipient result of a send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub recipient: Recipient,
    pub channel: Channel,
    pub body: String,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cost: Decimal,
    #[serde(default)]
    pub segments: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    pub sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl DeliveryOutcome {
    pub fn queued(message: &RenderedMessage) -> Self {
        Self {
            recipient: message.recipient.clone(),
            channel: message.channel,
            body: message.body.clone(),
            status: DeliveryStatus::Queued,
            error: None,
            cost: Decimal::ZERO,
            segments: 0,
            provider_message_id: None,
            sent_at: Utc::now(),
            delivered_at: None,
        }
    }

    pub fn sent(
        message: &RenderedMessage,
        cost: Decimal,
        segments: u32,
        provider_message_id: Option<String>,
    ) -> Self {
        Self {
            status: DeliveryStatus::Sent,
            cost,
            segments,
            provider_message_id,
            ..Self::queued(message)
        }
    }

    pub fn failed(message: &RenderedMessage, error: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            error: Some(error.into()),
            ..Self::queued(message)
        }
    }

    pub fn cancelled(message: &RenderedMessage) -> Self {
        Self::failed(message, CANCELLED_REASON)
    }

    /// Accepted by the carrier, whether or not a delivery report has arrived yet.
    pub fn is_sent(&self) -> bool {
        matches!(self.status, DeliveryStatus::Sent | DeliveryStatus::Delivered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    InProgress,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl BatchStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::CompletedWithErrors => "Completed With Errors",
            Self::Failed => "Failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Kind of targeting spec a batch was created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    AllActive,
    Department,
    Group,
    Members,
    Custom,
    Test,
}

impl RecipientType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::AllActive => "All Active Members",
            Self::Department => "Department",
            Self::Group => "Group",
            Self::Members => "Selected Members",
            Self::Custom => "Custom List",
            Self::Test => "Test Send",
        }
    }
}

/// Campaign-level record. Only the summary fields change after creation, and only once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: BatchId,
    pub channel: Channel,
    pub actor: String,
    pub recipient_type: RecipientType,
    pub message: String,
    pub total_recipients: usize,
    pub sent_count: usize,
    pub failed_count: usize,
    pub cost: Decimal,
    pub status: BatchStatus,
    pub sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when a ledger write failed mid-run and the counts must be checked by hand.
    #[serde(default)]
    pub needs_reconciliation: bool,
}

impl Batch {
    pub fn open(
        batch_id: BatchId,
        channel: Channel,
        actor: impl Into<String>,
        recipient_type: RecipientType,
        message: impl Into<String>,
        total_recipients: usize,
    ) -> Self {
        Self {
            batch_id,
            channel,
            actor: actor.into(),
            recipient_type,
            message: message.into(),
            total_recipients,
            sent_count: 0,
            failed_count: 0,
            cost: Decimal::ZERO,
            status: BatchStatus::InProgress,
            sent_at: Utc::now(),
            completed_at: None,
            needs_reconciliation: false,
        }
    }

    /// Copy the tally into the summary fields and stamp the batch as finished.
    pub fn close(&mut self, tally: &BatchTally, cancelled: bool) {
        self.sent_count = tally.sent;
        self.failed_count = tally.failed;
        self.cost = tally.cost;
        self.status = tally.status(cancelled);
        self.completed_at = Some(Utc::now());
    }

    pub fn summary(&self, warnings: Vec<String>) -> BatchSummary {
        BatchSummary {
            batch_id: self.batch_id.clone(),
            total_recipients: self.total_recipients,
            sent_count: self.sent_count,
            failed_count: self.failed_count,
            cost: self.cost,
            status: self.status,
            warnings,
        }
    }
}

/// Running counters owned by the dispatch loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchTally {
    pub sent: usize,
    pub failed: usize,
    pub cost: Decimal,
}

impl BatchTally {
    pub fn record(&mut self, outcome: &DeliveryOutcome) {
        if outcome.is_sent() {
            self.sent += 1;
        } else {
            self.failed += 1;
        }
        self.cost += outcome.cost;
    }

    pub fn attempted(&self) -> usize {
        self.sent + self.failed
    }

    pub fn status(&self, cancelled: bool) -> BatchStatus {
        if cancelled {
            BatchStatus::CompletedWithErrors
        } else if self.failed == 0 {
            BatchStatus::Completed
        } else if self.sent == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::CompletedWithErrors
        }
    }
}

/// Response returned to whoever triggered the campaign, including on partial failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub total_recipients: usize,
    pub sent_count: usize,
    pub failed_count: usize,
    pub cost: Decimal,
    pub status: BatchStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
