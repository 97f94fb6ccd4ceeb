use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::campaigns::audit::InMemoryAuditLog;
use crate::campaigns::dispatcher::{BatchDispatcher, DispatchRequest};
use crate::campaigns::domain::{
    Batch, BatchId, Channel, DeliveryOutcome, DepartmentId, GroupId, MemberId, RenderedMessage,
};
use crate::campaigns::ledger::{
    BatchQuery, CampaignLedger, InMemoryLedger, LedgerError, OutcomeQuery,
};
use crate::campaigns::recipients::{Member, RecipientResolver, TargetingSpec};
use crate::campaigns::roster::MemberRoster;
use crate::campaigns::sender::{
    CarrierRequest, CarrierResponse, CarrierTransport, ChannelSender, SenderRegistry,
    TransportError,
};
use crate::campaigns::template::{InMemoryTemplateStore, MessageSource, TemplateEngine};
use crate::config::DispatchConfig;

pub(super) const WELCOME_TEMPLATE: &str = "sunday-service";

pub(super) fn phone_for(index: usize) -> String {
    format!("+1555010{index:04}")
}

pub(super) fn member(index: usize) -> Member {
    Member {
        id: MemberId(format!("M-{index:03}")),
        first_name: format!("Member{index}"),
        last_name: "Mensah".to_string(),
        phone: phone_for(index),
        active: true,
        department: Some(DepartmentId("choir".to_string())),
        groups: vec![GroupId("ushers".to_string())],
    }
}

/// `count` active choir members numbered from 1.
pub(super) fn roster(count: usize) -> MemberRoster {
    MemberRoster::new((1..=count).map(member).collect())
}

pub(super) fn dispatch_config() -> DispatchConfig {
    DispatchConfig {
        max_concurrency: 4,
        chunk_size: 100,
        send_timeout: Duration::from_millis(200),
        default_country_code: "1".to_string(),
    }
}

pub(super) fn templates() -> InMemoryTemplateStore {
    InMemoryTemplateStore::default().with_template(
        WELCOME_TEMPLATE,
        "Hi {first_name}, Sunday service starts at 9am.",
    )
}

pub(super) fn all_active_request(channel: Channel) -> DispatchRequest {
    DispatchRequest {
        actor: "pastor.james".to_string(),
        targeting: TargetingSpec::AllActive,
        message: MessageSource::Template {
            template_id: crate::campaigns::domain::TemplateId(WELCOME_TEMPLATE.to_string()),
        },
        channel,
    }
}

pub(super) struct Harness {
    pub dispatcher: Arc<BatchDispatcher>,
    pub ledger: Arc<dyn CampaignLedger>,
    pub audit: InMemoryAuditLog,
}

pub(super) fn harness(
    roster: MemberRoster,
    sender: Arc<dyn ChannelSender>,
    ledger: Arc<dyn CampaignLedger>,
    config: DispatchConfig,
) -> Harness {
    let audit = InMemoryAuditLog::default();
    let resolver = RecipientResolver::new(Arc::new(roster), config.default_country_code.clone());
    let dispatcher = BatchDispatcher::new(
        resolver,
        TemplateEngine::new(Arc::new(templates())),
        SenderRegistry::default().register(sender),
        Arc::clone(&ledger),
        Arc::new(audit.clone()),
        config,
    );

    Harness {
        dispatcher: Arc::new(dispatcher),
        ledger,
        audit,
    }
}

pub(super) fn default_harness(sender: Arc<dyn ChannelSender>) -> Harness {
    harness(
        roster(10),
        sender,
        Arc::new(InMemoryLedger::default()),
        dispatch_config(),
    )
}

pub(super) fn outcomes(ledger: &dyn CampaignLedger, batch_id: &BatchId) -> Vec<DeliveryOutcome> {
    ledger
        .query_outcomes(batch_id, &OutcomeQuery::default())
        .expect("batch exists")
}

pub(super) fn batch_count(ledger: &dyn CampaignLedger) -> usize {
    ledger
        .query_batches(&BatchQuery::default())
        .expect("query succeeds")
        .len()
}

/// Channel sender with scripted per-number behaviour.
pub(super) struct ScriptedSender {
    channel: Channel,
    cost: Decimal,
    rejected: HashSet<String>,
    stalled: HashSet<String>,
    bulk_size: usize,
    cancel_after: Option<(usize, CancellationToken)>,
    sends: AtomicUsize,
    bulk_calls: AtomicUsize,
    seen: Mutex<Vec<RenderedMessage>>,
}

impl ScriptedSender {
    pub(super) fn new(channel: Channel) -> Self {
        Self {
            channel,
            cost: Decimal::new(5, 2),
            rejected: HashSet::new(),
            stalled: HashSet::new(),
            bulk_size: 1,
            cancel_after: None,
            sends: AtomicUsize::new(0),
            bulk_calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn with_cost(mut self, cost: Decimal) -> Self {
        self.cost = cost;
        self
    }

    pub(super) fn rejecting(mut self, phones: impl IntoIterator<Item = String>) -> Self {
        self.rejected.extend(phones);
        self
    }

    /// Calls for these numbers never complete within any reasonable timeout.
    pub(super) fn stalling(mut self, phones: impl IntoIterator<Item = String>) -> Self {
        self.stalled.extend(phones);
        self
    }

    pub(super) fn with_bulk(mut self, size: usize) -> Self {
        self.bulk_size = size;
        self
    }

    pub(super) fn cancelling_after(mut self, sends: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((sends, token));
        self
    }

    pub(super) fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub(super) fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    pub(super) fn seen(&self) -> Vec<RenderedMessage> {
        self.seen.lock().expect("lock").clone()
    }

    fn outcome(&self, message: &RenderedMessage) -> DeliveryOutcome {
        self.seen.lock().expect("lock").push(message.clone());
        let sent = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if sent >= *after {
                token.cancel();
            }
        }

        if self.rejected.contains(&message.recipient.phone) {
            DeliveryOutcome::failed(message, "carrier rejected message: unreachable")
        } else {
            DeliveryOutcome::sent(message, self.cost, 1, Some(format!("msg-{sent}")))
        }
    }
}

#[async_trait]
impl ChannelSender for ScriptedSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn max_batch_size(&self) -> usize {
        self.bulk_size
    }

    fn supports_bulk(&self) -> bool {
        self.bulk_size > 1
    }

    async fn send(&self, message: &RenderedMessage) -> DeliveryOutcome {
        if self.stalled.contains(&message.recipient.phone) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.outcome(message)
    }

    async fn send_many(&self, messages: &[RenderedMessage]) -> Vec<DeliveryOutcome> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        if messages
            .iter()
            .any(|message| self.stalled.contains(&message.recipient.phone))
        {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        messages.iter().map(|message| self.outcome(message)).collect()
    }
}

/// Where a [`FaultyLedger`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LedgerFault {
    OpenBatch,
    OutcomeNumber(usize),
}

/// In-memory ledger that fails one kind of write.
pub(super) struct FaultyLedger {
    inner: InMemoryLedger,
    fault: LedgerFault,
    outcome_writes: AtomicUsize,
}

impl FaultyLedger {
    pub(super) fn new(fault: LedgerFault) -> Self {
        Self {
            inner: InMemoryLedger::default(),
            fault,
            outcome_writes: AtomicUsize::new(0),
        }
    }
}

impl CampaignLedger for FaultyLedger {
    fn append_batch(&self, batch: &Batch) -> Result<(), LedgerError> {
        if self.fault == LedgerFault::OpenBatch {
            return Err(LedgerError::Unavailable("disk full".to_string()));
        }
        self.inner.append_batch(batch)
    }

    fn complete_batch(&self, batch: &Batch) -> Result<(), LedgerError> {
        self.inner.complete_batch(batch)
    }

    fn append_outcome(
        &self,
        batch_id: &BatchId,
        outcome: &DeliveryOutcome,
    ) -> Result<(), LedgerError> {
        let write = self.outcome_writes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fault == LedgerFault::OutcomeNumber(write) {
            return Err(LedgerError::Unavailable("connection reset".to_string()));
        }
        self.inner.append_outcome(batch_id, outcome)
    }

    fn batch(&self, batch_id: &BatchId) -> Result<Option<Batch>, LedgerError> {
        self.inner.batch(batch_id)
    }

    fn query_batches(&self, query: &BatchQuery) -> Result<Vec<Batch>, LedgerError> {
        self.inner.query_batches(query)
    }

    fn query_outcomes(
        &self,
        batch_id: &BatchId,
        query: &OutcomeQuery,
    ) -> Result<Vec<DeliveryOutcome>, LedgerError> {
        self.inner.query_outcomes(batch_id, query)
    }

    fn mark_delivered(
        &self,
        batch_id: &BatchId,
        phone: &str,
        delivered_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        self.inner.mark_delivered(batch_id, phone, delivered_at)
    }
}

/// Carrier transport that records requests and answers from a script.
#[derive(Default)]
pub(super) struct RecordingTransport {
    requests: Mutex<Vec<CarrierRequest>>,
    replies: Mutex<Vec<Result<CarrierResponse, TransportError>>>,
}

impl RecordingTransport {
    pub(super) fn replying(replies: Vec<Result<CarrierResponse, TransportError>>) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(replies),
        }
    }

    pub(super) fn requests(&self) -> Vec<CarrierRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

#[async_trait]
impl CarrierTransport for RecordingTransport {
    async fn submit(&self, request: &CarrierRequest) -> Result<CarrierResponse, TransportError> {
        self.requests.lock().expect("lock").push(request.clone());
        let mut replies = self.replies.lock().expect("lock");
        if replies.is_empty() {
            return Ok(ok(json!({ "status": "accepted" })));
        }
        replies.remove(0)
    }
}

pub(super) fn ok(body: Value) -> CarrierResponse {
    CarrierResponse { status: 200, body }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("body bytes");
    serde_json::from_slice(&bytes).expect("json body")
}

pub(super) async fn read_text_body(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("body bytes");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

pub(super) fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status code");
}
