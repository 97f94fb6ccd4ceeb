use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::audit::{AuditEntry, AuditSink, ACTION_CAMPAIGN_COMPLETED, ACTION_TEST_SEND};
use super::domain::{
    Batch, BatchId, BatchSummary, BatchTally, Channel, DeliveryOutcome, Recipient, RecipientType,
    RenderedMessage,
};
use super::ledger::{CampaignLedger, LedgerError};
use super::phone;
use super::recipients::{
    AdHocRecipient, DirectoryError, RecipientResolver, ResolveError, TargetingSpec,
};
use super::sender::{ChannelSender, SenderRegistry, TransportError};
use super::template::{MessageSource, TemplateEngine, TemplateError};
use crate::config::DispatchConfig;

/// Inbound campaign trigger, already authenticated and authorized by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub actor: String,
    pub targeting: TargetingSpec,
    pub message: MessageSource,
    pub channel: Channel,
}

/// Administrator self-test: one number, same adapter path as a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSendRequest {
    pub actor: String,
    pub phone: String,
    #[serde(default)]
    pub name: Option<String>,
    pub message: MessageSource,
    pub channel: Channel,
}

/// Carrier confirmation that an accepted message reached the handset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub batch_id: BatchId,
    pub phone: String,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Failures that reject a campaign before any message is sent.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("targeting spec resolved to no recipients")]
    NoRecipients,
    #[error("template '{0}' not found")]
    TemplateNotFound(String),
    #[error("template store unavailable: {0}")]
    TemplateUnavailable(String),
    #[error("no sender configured for channel {0}")]
    ChannelUnavailable(Channel),
    #[error(transparent)]
    Directory(DirectoryError),
    #[error("campaign ledger write failed: {0}")]
    Persistence(#[from] LedgerError),
}

impl From<ResolveError> for DispatchError {
    fn from(value: ResolveError) -> Self {
        match value {
            ResolveError::InvalidTarget(detail) => Self::InvalidTarget(detail),
            ResolveError::Directory(err) => Self::Directory(err),
        }
    }
}

impl From<TemplateError> for DispatchError {
    fn from(value: TemplateError) -> Self {
        match value {
            TemplateError::NotFound(id) => Self::TemplateNotFound(id),
            TemplateError::Unavailable(detail) => Self::TemplateUnavailable(detail),
        }
    }
}

/// Drives one campaign from targeting spec to closed batch.
///
/// The dispatch loop is the only writer for a batch: outcomes flow back to it in resolver order,
/// are appended to the ledger one by one and folded into the batch tally, so no counter is ever
/// shared between concurrent sends.
pub struct BatchDispatcher {
    resolver: RecipientResolver,
    templates: TemplateEngine,
    senders: SenderRegistry,
    ledger: Arc<dyn CampaignLedger>,
    audit: Arc<dyn AuditSink>,
    config: DispatchConfig,
    active: Mutex<HashMap<BatchId, CancellationToken>>,
}

struct ActiveBatch<'a> {
    registry: &'a Mutex<HashMap<BatchId, CancellationToken>>,
    batch_id: BatchId,
}

impl Drop for ActiveBatch<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.registry.lock() {
            active.remove(&self.batch_id);
        }
    }
}

struct RunContext<'a> {
    actor: String,
    recipient_type: RecipientType,
    recipients: Vec<Recipient>,
    message: &'a MessageSource,
    channel: Channel,
    action: &'static str,
    token: CancellationToken,
}

impl BatchDispatcher {
    pub fn new(
        resolver: RecipientResolver,
        templates: TemplateEngine,
        senders: SenderRegistry,
        ledger: Arc<dyn CampaignLedger>,
        audit: Arc<dyn AuditSink>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            resolver,
            templates,
            senders,
            ledger,
            audit,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn CampaignLedger> {
        &self.ledger
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.senders.channels()
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> Result<BatchSummary, DispatchError> {
        self.dispatch_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Dispatch with a caller-owned token; cancelling it stops the run between recipients.
    pub async fn dispatch_with_cancellation(
        &self,
        request: DispatchRequest,
        token: CancellationToken,
    ) -> Result<BatchSummary, DispatchError> {
        let recipients = self.resolver.resolve(&request.targeting)?;
        self.run(RunContext {
            actor: request.actor,
            recipient_type: request.targeting.recipient_type(),
            recipients,
            message: &request.message,
            channel: request.channel,
            action: ACTION_CAMPAIGN_COMPLETED,
            token,
        })
        .await
    }

    pub async fn test_send(&self, request: TestSendRequest) -> Result<BatchSummary, DispatchError> {
        let targeting = TargetingSpec::Custom {
            recipients: vec![AdHocRecipient {
                phone: request.phone,
                name: request.name,
            }],
        };
        let recipients = self.resolver.resolve(&targeting)?;
        self.run(RunContext {
            actor: request.actor,
            recipient_type: RecipientType::Test,
            recipients,
            message: &request.message,
            channel: request.channel,
            action: ACTION_TEST_SEND,
            token: CancellationToken::new(),
        })
        .await
    }

    /// Request an operator abort. Returns `false` when the batch is not currently running.
    pub fn cancel(&self, batch_id: &BatchId) -> bool {
        let active = match self.active.lock() {
            Ok(active) => active,
            Err(_) => return false,
        };
        match active.get(batch_id) {
            Some(token) => {
                token.cancel();
                info!(%batch_id, "campaign cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn active_batches(&self) -> Vec<BatchId> {
        self.active
            .lock()
            .map(|active| active.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Record a carrier delivery report against the matching outcome.
    pub fn reconcile_delivery(&self, report: &DeliveryReport) -> Result<bool, LedgerError> {
        let phone = phone::normalize(&report.phone, &self.config.default_country_code)
            .unwrap_or_else(|| phone::clean(&report.phone));
        let delivered_at = report.delivered_at.unwrap_or_else(Utc::now);
        let matched = self
            .ledger
            .mark_delivered(&report.batch_id, &phone, delivered_at)?;
        if !matched {
            warn!(batch_id = %report.batch_id, %phone, "delivery report matched no sent outcome");
        }
        Ok(matched)
    }

    async fn run(&self, context: RunContext<'_>) -> Result<BatchSummary, DispatchError> {
        let RunContext {
            actor,
            recipient_type,
            recipients,
            message,
            channel,
            action,
            token,
        } = context;

        if recipients.is_empty() {
            return Err(DispatchError::NoRecipients);
        }
        let sender = self
            .senders
            .get(channel)
            .ok_or(DispatchError::ChannelUnavailable(channel))?;
        let template = self.templates.resolve(message)?;

        let mut batch = Batch::open(
            BatchId::generate(),
            channel,
            actor,
            recipient_type,
            template.clone(),
            recipients.len(),
        );
        let opened = batch.clone();
        self.persist(move |ledger| ledger.append_batch(&opened)).await?;
        let batch_id = batch.batch_id.clone();
        let _active = self.register(&batch_id, &token);

        info!(
            %batch_id,
            %channel,
            recipients = recipients.len(),
            actor = %batch.actor,
            "campaign dispatch started"
        );

        let chunk_size = if sender.supports_bulk() {
            self.config.chunk_size.min(sender.max_batch_size())
        } else {
            self.config.chunk_size
        }
        .max(1);

        let mut tally = BatchTally::default();
        let mut warnings = Vec::new();
        let mut cancelled = 0usize;

        for chunk in recipients.chunks(chunk_size) {
            let messages: Vec<RenderedMessage> = chunk
                .iter()
                .map(|recipient| RenderedMessage {
                    recipient: recipient.clone(),
                    body: TemplateEngine::render(&template, recipient),
                    channel,
                })
                .collect();

            if sender.supports_bulk() && messages.len() > 1 {
                let outcomes = if token.is_cancelled() {
                    cancelled += messages.len();
                    messages.iter().map(DeliveryOutcome::cancelled).collect()
                } else {
                    send_chunk(sender.as_ref(), &messages, self.config.send_timeout).await
                };
                for outcome in outcomes {
                    self.record(&batch_id, outcome, &mut tally, &mut warnings).await;
                }
                continue;
            }

            // Sends refill as soon as any finishes; rows are still recorded in resolver order.
            let mut pending: Vec<Option<(DeliveryOutcome, bool)>> =
                (0..messages.len()).map(|_| None).collect();
            let mut next = 0;
            let mut outcomes = stream::iter(messages.into_iter().enumerate())
                .map(|(index, message)| {
                    let sender = Arc::clone(&sender);
                    let token = token.clone();
                    let timeout = self.config.send_timeout;
                    async move {
                        let result = if token.is_cancelled() {
                            (DeliveryOutcome::cancelled(&message), true)
                        } else {
                            (send_one(sender.as_ref(), &message, timeout).await, false)
                        };
                        (index, result)
                    }
                })
                .buffer_unordered(self.config.max_concurrency.max(1));

            while let Some((index, result)) = outcomes.next().await {
                pending[index] = Some(result);
                while let Some((outcome, skipped)) = pending.get_mut(next).and_then(Option::take) {
                    next += 1;
                    if skipped {
                        cancelled += 1;
                    }
                    self.record(&batch_id, outcome, &mut tally, &mut warnings).await;
                }
            }
        }

        batch.close(&tally, cancelled > 0);
        if !warnings.is_empty() {
            batch.needs_reconciliation = true;
        }
        let closed = batch.clone();
        if let Err(err) = self
            .persist(move |ledger| ledger.complete_batch(&closed))
            .await
        {
            error!(%batch_id, error = %err, "failed to persist batch summary");
            batch.needs_reconciliation = true;
            warnings.push(format!(
                "batch summary was not persisted ({err}); counts need manual reconciliation"
            ));
        }

        let mut payload = json!({
            "channel": channel,
            "recipient_type": recipient_type,
            "total_recipients": batch.total_recipients,
            "sent_count": batch.sent_count,
            "failed_count": batch.failed_count,
            "cost": batch.cost.to_string(),
            "status": batch.status,
            "cancelled": cancelled,
        });
        if recipient_type == RecipientType::Test {
            payload["phone"] = json!(recipients[0].phone);
        }
        let entry = AuditEntry {
            actor: batch.actor.clone(),
            action: action.to_string(),
            batch_id: batch_id.clone(),
            payload,
            recorded_at: Utc::now(),
        };
        if let Err(err) = self.audit.record(entry) {
            warn!(%batch_id, error = %err, "audit entry not recorded");
            warnings.push(format!("audit entry not recorded: {err}"));
        }

        info!(
            %batch_id,
            status = ?batch.status,
            sent = batch.sent_count,
            failed = batch.failed_count,
            cancelled,
            cost = %batch.cost,
            "campaign dispatch finished"
        );

        Ok(batch.summary(warnings))
    }

    fn register<'a>(&'a self, batch_id: &BatchId, token: &CancellationToken) -> ActiveBatch<'a> {
        if let Ok(mut active) = self.active.lock() {
            active.insert(batch_id.clone(), token.clone());
        }
        ActiveBatch {
            registry: &self.active,
            batch_id: batch_id.clone(),
        }
    }

    /// Run a journal write on the blocking pool so file-backed fsyncs stay off runtime workers.
    async fn persist<F>(&self, write: F) -> Result<(), LedgerError>
    where
        F: FnOnce(&dyn CampaignLedger) -> Result<(), LedgerError> + Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        tokio::task::spawn_blocking(move || write(ledger.as_ref()))
            .await
            .map_err(|err| LedgerError::Unavailable(format!("ledger write task failed: {err}")))?
    }

    async fn record(
        &self,
        batch_id: &BatchId,
        outcome: DeliveryOutcome,
        tally: &mut BatchTally,
        warnings: &mut Vec<String>,
    ) {
        tally.record(&outcome);
        let phone = outcome.recipient.phone.clone();
        let id = batch_id.clone();
        if let Err(err) = self
            .persist(move |ledger| ledger.append_outcome(&id, &outcome))
            .await
        {
            error!(
                %batch_id,
                recipient = %phone,
                error = %err,
                "failed to persist delivery outcome"
            );
            warnings.push(format!("outcome for {phone} was not persisted: {err}"));
        }
    }
}

async fn send_one(
    sender: &dyn ChannelSender,
    message: &RenderedMessage,
    timeout: Duration,
) -> DeliveryOutcome {
    match tokio::time::timeout(timeout, sender.send(message)).await {
        Ok(outcome) => outcome,
        Err(_) => DeliveryOutcome::failed(
            message,
            TransportError::Timeout(timeout.as_millis() as u64).to_string(),
        ),
    }
}

async fn send_chunk(
    sender: &dyn ChannelSender,
    messages: &[RenderedMessage],
    timeout: Duration,
) -> Vec<DeliveryOutcome> {
    match tokio::time::timeout(timeout, sender.send_many(messages)).await {
        Ok(mut outcomes) => {
            if outcomes.len() != messages.len() {
                warn!(
                    expected = messages.len(),
                    received = outcomes.len(),
                    "sender returned a mismatched chunk result"
                );
            }
            outcomes.truncate(messages.len());
            for message in &messages[outcomes.len()..] {
                outcomes.push(DeliveryOutcome::failed(
                    message,
                    "sender returned no outcome for this recipient",
                ));
            }
            outcomes
        }
        Err(_) => {
            let reason = TransportError::Timeout(timeout.as_millis() as u64).to_string();
            messages
                .iter()
                .map(|message| DeliveryOutcome::failed(message, reason.clone()))
                .collect()
        }
    }
}
