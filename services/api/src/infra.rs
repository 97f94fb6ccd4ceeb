use chrono::NaiveDate;
use church_outreach::campaigns::{
    AuditSink, BatchDispatcher, CampaignLedger, ChannelSender, DryRunTransport, FileLedger,
    HttpCarrierTransport, InMemoryLedger, InMemoryTemplateStore, MemberRoster,
    RecipientResolver, SenderRegistry, SmsSender, TemplateEngine, TracingAuditLog,
    WhatsAppSender,
};
use church_outreach::config::{AppConfig, SmsGatewayConfig, WhatsAppConfig};
use church_outreach::error::AppError;
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Sender id used when SMS runs without a gateway.
const DRY_RUN_SMS_SENDER_ID: &str = "DRYRUN";
const DRY_RUN_WHATSAPP_NUMBER_ID: &str = "dry-run";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Wire the dispatcher from configuration: roster, templates, ledger, and one adapter per channel.
pub(crate) fn build_dispatcher(
    config: &AppConfig,
    audit: Arc<dyn AuditSink>,
) -> Result<BatchDispatcher, AppError> {
    let roster = match &config.storage.roster_path {
        Some(path) => {
            let roster = MemberRoster::from_path(path)?;
            info!(path = %path.display(), members = roster.members().len(), "member roster loaded");
            roster
        }
        None => {
            warn!("OUTREACH_ROSTER_PATH not set; only custom recipient lists can be targeted");
            MemberRoster::new(Vec::new())
        }
    };

    let templates = match &config.storage.templates_path {
        Some(path) => InMemoryTemplateStore::from_path(path)?,
        None => InMemoryTemplateStore::default(),
    };

    let senders = SenderRegistry::default()
        .register(sms_sender(config.sms.as_ref(), config))
        .register(whatsapp_sender(config.whatsapp.as_ref(), config));

    Ok(BatchDispatcher::new(
        RecipientResolver::new(Arc::new(roster), config.dispatch.default_country_code.clone()),
        TemplateEngine::new(Arc::new(templates)),
        senders,
        open_ledger(config)?,
        audit,
        config.dispatch.clone(),
    ))
}

/// Journal-backed ledger when a path is configured, otherwise history lives for the process only.
pub(crate) fn open_ledger(config: &AppConfig) -> Result<Arc<dyn CampaignLedger>, AppError> {
    match &config.storage.ledger_path {
        Some(path) => {
            let ledger = FileLedger::open(path)?;
            info!(path = %path.display(), "campaign ledger opened");
            Ok(Arc::new(ledger))
        }
        None => {
            warn!("OUTREACH_LEDGER_PATH not set; campaign history will not survive a restart");
            Ok(Arc::new(InMemoryLedger::default()))
        }
    }
}

pub(crate) fn default_audit_sink() -> Arc<dyn AuditSink> {
    Arc::new(TracingAuditLog)
}

fn sms_sender(gateway: Option<&SmsGatewayConfig>, config: &AppConfig) -> Arc<dyn ChannelSender> {
    match gateway {
        Some(gateway) => Arc::new(SmsSender::new(
            Arc::new(HttpCarrierTransport::new(
                gateway.base_url.clone(),
                gateway.api_key.clone(),
                carrier_timeout(config),
            )),
            gateway.sender_id.clone(),
            gateway.cost_per_segment,
            gateway.max_batch_size,
        )),
        None => {
            info!("SMS_GATEWAY_URL not set; SMS runs in dry-run mode");
            Arc::new(SmsSender::new(
                Arc::new(DryRunTransport::default()),
                DRY_RUN_SMS_SENDER_ID,
                Decimal::ZERO,
                config.dispatch.chunk_size,
            ))
        }
    }
}

fn whatsapp_sender(gateway: Option<&WhatsAppConfig>, config: &AppConfig) -> Arc<dyn ChannelSender> {
    match gateway {
        Some(gateway) => Arc::new(WhatsAppSender::new(
            Arc::new(HttpCarrierTransport::new(
                gateway.base_url.clone(),
                gateway.access_token.clone(),
                carrier_timeout(config),
            )),
            gateway.phone_number_id.clone(),
            gateway.cost_per_message,
        )),
        None => {
            info!("WHATSAPP_API_URL not set; WhatsApp runs in dry-run mode");
            Arc::new(WhatsAppSender::new(
                Arc::new(DryRunTransport::default()),
                DRY_RUN_WHATSAPP_NUMBER_ID,
                Decimal::ZERO,
            ))
        }
    }
}

/// The HTTP client gives up slightly before the dispatcher's own send timeout fires.
fn carrier_timeout(config: &AppConfig) -> Duration {
    config
        .dispatch
        .send_timeout
        .saturating_sub(Duration::from_millis(250))
        .max(Duration::from_millis(250))
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
