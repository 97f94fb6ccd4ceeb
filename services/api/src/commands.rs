use crate::cli::{ChannelArg, StatusArg};
use crate::infra::{build_dispatcher, default_audit_sink, open_ledger, parse_date};
use chrono::NaiveDate;
use church_outreach::campaigns::{
    AdHocRecipient, Batch, BatchId, BatchQuery, BatchSummary, CampaignExporter, DateRange,
    DeliveryOutcome, DepartmentId, DispatchRequest, GroupId, MemberId, MessageSource,
    OutcomeQuery, TargetingSpec, TemplateId,
};
use church_outreach::config::AppConfig;
use church_outreach::error::AppError;
use church_outreach::telemetry;
use clap::Args;
use std::fs::File;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub(crate) struct SendArgs {
    #[command(flatten)]
    pub(crate) target: TargetArgs,
    #[command(flatten)]
    pub(crate) message: MessageArgs,
    /// Delivery channel
    #[arg(long, value_enum, default_value_t = ChannelArg::Sms)]
    pub(crate) channel: ChannelArg,
    /// Name recorded as the sender of the campaign in the audit log
    #[arg(long, default_value = "cli")]
    pub(crate) actor: String,
}

/// Exactly one way of choosing recipients.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub(crate) struct TargetArgs {
    /// Every active member
    #[arg(long)]
    pub(crate) all: bool,
    /// Active members of one department
    #[arg(long)]
    pub(crate) department: Option<String>,
    /// Active members of one group
    #[arg(long)]
    pub(crate) group: Option<String>,
    /// Specific members by id (repeatable)
    #[arg(long = "member", value_name = "MEMBER_ID")]
    pub(crate) members: Vec<String>,
    /// Ad-hoc phone numbers (repeatable)
    #[arg(long = "phone", value_name = "PHONE")]
    pub(crate) phones: Vec<String>,
}

impl TargetArgs {
    fn into_spec(self) -> TargetingSpec {
        if let Some(department) = self.department {
            TargetingSpec::Department {
                department_id: DepartmentId(department),
            }
        } else if let Some(group) = self.group {
            TargetingSpec::Group {
                group_id: GroupId(group),
            }
        } else if !self.members.is_empty() {
            TargetingSpec::Members {
                member_ids: self.members.into_iter().map(MemberId).collect(),
            }
        } else if !self.phones.is_empty() {
            TargetingSpec::Custom {
                recipients: self
                    .phones
                    .into_iter()
                    .map(|phone| AdHocRecipient { phone, name: None })
                    .collect(),
            }
        } else {
            TargetingSpec::AllActive
        }
    }
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub(crate) struct MessageArgs {
    /// Stored template id
    #[arg(long)]
    pub(crate) template: Option<String>,
    /// Message text; `{first_name}` style placeholders are filled per recipient
    #[arg(long)]
    pub(crate) text: Option<String>,
}

impl MessageArgs {
    fn into_source(self) -> MessageSource {
        match (self.template, self.text) {
            (Some(template_id), _) => MessageSource::Template {
                template_id: TemplateId(template_id),
            },
            (None, body) => MessageSource::Text {
                body: body.unwrap_or_default(),
            },
        }
    }
}

impl SendArgs {
    pub(crate) fn into_request(self) -> DispatchRequest {
        DispatchRequest {
            actor: self.actor,
            targeting: self.target.into_spec(),
            message: self.message.into_source(),
            channel: self.channel.into(),
        }
    }
}

#[derive(Args, Debug, Default)]
pub(crate) struct HistoryArgs {
    /// Earliest send date to include (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub(crate) from: Option<NaiveDate>,
    /// Latest send date to include (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub(crate) to: Option<NaiveDate>,
    /// Only campaigns that finished with this status
    #[arg(long, value_enum)]
    pub(crate) status: Option<StatusArg>,
    /// Show the per-recipient outcomes of one campaign instead of the campaign list
    #[arg(long, value_name = "BATCH_ID")]
    pub(crate) batch: Option<String>,
    /// Write the rows as CSV to this file
    #[arg(long)]
    pub(crate) output: Option<PathBuf>,
}

pub(crate) async fn run_send(args: SendArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let dispatcher = build_dispatcher(&config, default_audit_sink())?;
    let token = CancellationToken::new();
    let interrupt = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling remaining sends");
                token.cancel();
            }
        })
    };

    let result = dispatcher
        .dispatch_with_cancellation(args.into_request(), token)
        .await;
    interrupt.abort();

    let summary = result?;
    print_summary(&summary);
    Ok(())
}

pub(crate) fn run_history(args: HistoryArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let exporter = CampaignExporter::new(open_ledger(&config)?);
    let HistoryArgs {
        from,
        to,
        status,
        batch,
        output,
    } = args;

    match batch {
        Some(batch_id) => {
            let batch_id = BatchId(batch_id);
            let query = OutcomeQuery::default();
            match output {
                Some(path) => {
                    let written = exporter.write_outcomes_csv(&batch_id, &query, File::create(&path)?)?;
                    info!(%batch_id, rows = written, path = %path.display(), "outcome export written");
                }
                None => print_outcomes(&exporter.outcomes(&batch_id, &query)?),
            }
        }
        None => {
            let query = BatchQuery {
                range: DateRange::new(from, to),
                status: status.map(Into::into),
            };
            match output {
                Some(path) => {
                    let written = exporter.write_batches_csv(&query, File::create(&path)?)?;
                    info!(rows = written, path = %path.display(), "campaign history export written");
                }
                None => print_batches(&exporter.batches(&query)?),
            }
        }
    }

    Ok(())
}

pub(crate) fn print_summary(summary: &BatchSummary) {
    println!("Campaign {}", summary.batch_id);
    println!(
        "- {} recipients | {} sent | {} failed | cost {}",
        summary.total_recipients, summary.sent_count, summary.failed_count, summary.cost
    );
    println!("- Status: {}", summary.status.label());
    for warning in &summary.warnings {
        println!("- Warning: {}", warning);
    }
}

fn print_batches(batches: &[Batch]) {
    if batches.is_empty() {
        println!("No campaigns match the given filters");
        return;
    }

    println!("{} campaign(s), newest first", batches.len());
    for batch in batches {
        println!(
            "- {} | {} | {} | {} | {}/{} sent | cost {} | {}",
            batch.sent_at.format("%Y-%m-%d %H:%M"),
            batch.batch_id,
            batch.channel,
            batch.recipient_type.label(),
            batch.sent_count,
            batch.total_recipients,
            batch.cost,
            batch.status.label()
        );
        if batch.needs_reconciliation {
            println!("    counts need reconciliation against the carrier");
        }
    }
}

fn print_outcomes(outcomes: &[DeliveryOutcome]) {
    if outcomes.is_empty() {
        println!("No outcomes recorded for this campaign");
        return;
    }

    for outcome in outcomes {
        let detail = outcome.error.as_deref().unwrap_or("");
        println!(
            "- {} ({}) | {} | cost {} {}",
            outcome.recipient.phone,
            outcome.recipient.display_name,
            outcome.status.label(),
            outcome.cost,
            detail
        );
    }
}
