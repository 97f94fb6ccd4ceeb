use crate::cli::ChannelArg;
use crate::commands::print_summary;
use crate::infra::parse_date;
use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDate};
use church_outreach::campaigns::sender::{
    CarrierRequest, CarrierResponse, CarrierTransport, TransportError,
};
use church_outreach::campaigns::{
    BatchDispatcher, BatchQuery, CampaignExporter, Channel, DepartmentId, DispatchRequest,
    InMemoryAuditLog, InMemoryLedger, InMemoryTemplateStore, MemberRoster, MessageSource,
    OutcomeQuery, RecipientResolver, SenderRegistry, SmsSender, TargetingSpec, TemplateEngine,
    TemplateId, TestSendRequest, WhatsAppSender,
};
use church_outreach::config::DispatchConfig;
use church_outreach::error::AppError;
use clap::Args;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SAMPLE_ROSTER: &str = "\
Member ID,First Name,Last Name,Phone,Department,Status,Groups
M-001,Ama,Mensah,024 412 3401,choir,active,ushers
M-002,Kwame,Owusu,0244123402,choir,active,
M-003,Efua,Asante,0244123403,choir,inactive,ushers
M-004,Yaw,Darko,+233 24 412 3404,media,active,youth
M-005,Akosua,Boateng,0244123405,media,active,youth;ushers
M-006,Kojo,Appiah,0244123406,children,active,
M-007,Abena,Ofori,0244123407,children,active,youth
M-008,Kofi,Annan,123,hospitality,active,
";

const REMINDER_TEMPLATE: &str = "sunday-reminder";

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Channel to run the demo campaign over
    #[arg(long, value_enum, default_value_t = ChannelArg::Sms)]
    pub(crate) channel: ChannelArg,
    /// Restrict the campaign to one department of the sample roster
    #[arg(long)]
    pub(crate) department: Option<String>,
    /// Numbers the simulated carrier refuses (repeatable)
    #[arg(long = "reject", value_name = "PHONE", default_values_t = vec!["+233244123405".to_string()])]
    pub(crate) rejected: Vec<String>,
    /// Country code applied to numbers written in national format
    #[arg(long, default_value = "233")]
    pub(crate) country_code: String,
    /// Service date quoted in the reminder (YYYY-MM-DD). Defaults to the coming Sunday.
    #[arg(long, value_parser = parse_date)]
    pub(crate) service_date: Option<NaiveDate>,
    /// Write the detailed CSV export of the campaign to this file
    #[arg(long)]
    pub(crate) export: Option<PathBuf>,
}

/// In-process carrier that accepts everything except a fixed set of numbers.
#[derive(Debug)]
struct SimulatedCarrier {
    rejected: HashSet<String>,
    latency: Duration,
    sequence: AtomicU64,
}

impl SimulatedCarrier {
    fn new<I: IntoIterator<Item = String>>(rejected: I, latency: Duration) -> Self {
        Self {
            rejected: rejected.into_iter().map(|phone| digits(&phone)).collect(),
            latency,
            sequence: AtomicU64::new(0),
        }
    }

    fn result_for(&self, to: &Value) -> Value {
        let to = to.as_str().map(digits).unwrap_or_default();
        if self.rejected.contains(&to) {
            return json!({ "status": "failed", "error": "subscriber unreachable" });
        }
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("sim-{id:05}");
        json!({ "status": "accepted", "message_id": id, "messages": [{ "id": id }] })
    }
}

fn digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

#[async_trait]
impl CarrierTransport for SimulatedCarrier {
    async fn submit(&self, request: &CarrierRequest) -> Result<CarrierResponse, TransportError> {
        tokio::time::sleep(self.latency).await;

        let body = match request.payload.get("messages").and_then(Value::as_array) {
            Some(messages) => {
                let results: Vec<Value> = messages
                    .iter()
                    .map(|message| self.result_for(&message["to"]))
                    .collect();
                json!({ "results": results })
            }
            None => self.result_for(&request.payload["to"]),
        };
        Ok(CarrierResponse { status: 200, body })
    }
}

/// The Sunday on or after `today`.
fn coming_sunday(today: NaiveDate) -> NaiveDate {
    let days_ahead = (7 - today.weekday().num_days_from_sunday()) % 7;
    today + ChronoDuration::days(i64::from(days_ahead))
}

fn demo_dispatcher(
    args: &DemoArgs,
    service_date: NaiveDate,
    audit: InMemoryAuditLog,
) -> Result<BatchDispatcher, AppError> {
    let roster = MemberRoster::from_reader(Cursor::new(SAMPLE_ROSTER))?;
    let templates = InMemoryTemplateStore::default().with_template(
        REMINDER_TEMPLATE,
        format!(
            "Hi {{first_name}}, we look forward to seeing you at service on {}. God bless!",
            service_date.format("%A %-d %B")
        ),
    );
    let carrier = Arc::new(SimulatedCarrier::new(
        args.rejected.iter().cloned(),
        Duration::from_millis(15),
    ));
    let senders = SenderRegistry::default()
        .register(Arc::new(SmsSender::new(
            carrier.clone(),
            "GRACECHAPEL",
            Decimal::new(5, 2),
            3,
        )))
        .register(Arc::new(WhatsAppSender::new(
            carrier,
            "10987654321",
            Decimal::new(8, 3),
        )));

    Ok(BatchDispatcher::new(
        RecipientResolver::new(Arc::new(roster), args.country_code.clone()),
        TemplateEngine::new(Arc::new(templates)),
        senders,
        Arc::new(InMemoryLedger::default()),
        Arc::new(audit),
        DispatchConfig {
            default_country_code: args.country_code.clone(),
            ..DispatchConfig::default()
        },
    ))
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let service_date = args
        .service_date
        .unwrap_or_else(|| coming_sunday(Local::now().date_naive()));
    let audit = InMemoryAuditLog::default();
    let dispatcher = demo_dispatcher(&args, service_date, audit.clone())?;

    let targeting = match &args.department {
        Some(department) => TargetingSpec::Department {
            department_id: DepartmentId(department.clone()),
        },
        None => TargetingSpec::AllActive,
    };

    println!("Church outreach campaign demo");
    println!(
        "- Channel: {} | simulated carrier rejects {} number(s)",
        Channel::from(args.channel),
        args.rejected.len()
    );

    println!("\nTest send to the campaign coordinator");
    let test = dispatcher
        .test_send(TestSendRequest {
            actor: "demo".to_string(),
            phone: "024 412 3499".to_string(),
            name: Some("Coordinator".to_string()),
            message: MessageSource::Template {
                template_id: TemplateId(REMINDER_TEMPLATE.to_string()),
            },
            channel: args.channel.into(),
        })
        .await?;
    print_summary(&test);

    println!("\nCampaign");
    let summary = dispatcher
        .dispatch(DispatchRequest {
            actor: "demo".to_string(),
            targeting,
            message: MessageSource::Template {
                template_id: TemplateId(REMINDER_TEMPLATE.to_string()),
            },
            channel: args.channel.into(),
        })
        .await?;
    print_summary(&summary);

    let exporter = CampaignExporter::new(dispatcher.ledger().clone());
    println!("\nDelivery outcomes");
    for outcome in exporter.outcomes(&summary.batch_id, &OutcomeQuery::default())? {
        match &outcome.error {
            Some(error) => println!(
                "  - {} ({}): {} ({})",
                outcome.recipient.display_name,
                outcome.recipient.phone,
                outcome.status.label(),
                error
            ),
            None => println!(
                "  - {} ({}): {} | cost {}",
                outcome.recipient.display_name,
                outcome.recipient.phone,
                outcome.status.label(),
                outcome.cost
            ),
        }
    }

    println!("\nAudit trail");
    for entry in audit.entries() {
        println!(
            "  - {} {} by {}: {}",
            entry.recorded_at.format("%H:%M:%S"),
            entry.action,
            entry.actor,
            entry.payload
        );
    }

    println!("\nCampaign history");
    print!("{}", exporter.batches_csv(&BatchQuery::default())?);

    if let Some(path) = &args.export {
        let written = exporter.write_outcomes_csv(
            &summary.batch_id,
            &OutcomeQuery::default(),
            std::fs::File::create(path)?,
        )?;
        println!("\nWrote {} outcome row(s) to {}", written, path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use church_outreach::campaigns::BatchStatus;

    fn args() -> DemoArgs {
        DemoArgs {
            channel: ChannelArg::Sms,
            department: None,
            rejected: vec!["+233244123405".to_string()],
            country_code: "233".to_string(),
            service_date: None,
            export: None,
        }
    }

    #[test]
    fn coming_sunday_rolls_forward_within_the_week() {
        let wednesday = NaiveDate::from_ymd_opt(2025, 10, 1).expect("valid date");
        let sunday = NaiveDate::from_ymd_opt(2025, 10, 5).expect("valid date");
        assert_eq!(coming_sunday(wednesday), sunday);
        assert_eq!(coming_sunday(sunday), sunday);
        assert_eq!(sunday.weekday(), Weekday::Sun);
    }

    #[tokio::test]
    async fn demo_campaign_reports_carrier_rejections() {
        let audit = InMemoryAuditLog::default();
        let service_date = NaiveDate::from_ymd_opt(2025, 10, 5).expect("valid date");
        let dispatcher = demo_dispatcher(&args(), service_date, audit.clone()).expect("dispatcher");

        let summary = dispatcher
            .dispatch(DispatchRequest {
                actor: "demo".to_string(),
                targeting: TargetingSpec::AllActive,
                message: MessageSource::Template {
                    template_id: TemplateId(REMINDER_TEMPLATE.to_string()),
                },
                channel: Channel::Sms,
            })
            .await
            .expect("campaign runs");

        // seven active members: one rejected by the carrier, one with an unusable number
        assert_eq!(summary.total_recipients, 7);
        assert_eq!(summary.sent_count, 5);
        assert_eq!(summary.failed_count, 2);
        assert_eq!(summary.cost, Decimal::new(25, 2));
        assert_eq!(summary.status, BatchStatus::CompletedWithErrors);
        assert_eq!(audit.entries().len(), 1);
    }

    #[tokio::test]
    async fn simulated_carrier_matches_numbers_by_digits() {
        let carrier = SimulatedCarrier::new(["+233 24 412 3405".to_string()], Duration::ZERO);
        let response = carrier
            .submit(&CarrierRequest {
                path: "10987654321/messages".to_string(),
                payload: json!({ "to": "233244123405", "text": { "body": "hi" } }),
            })
            .await
            .expect("response");
        assert_eq!(response.body["status"], "failed");

        let response = carrier
            .submit(&CarrierRequest {
                path: "messages".to_string(),
                payload: json!({ "to": "+233244123401", "text": "hi" }),
            })
            .await
            .expect("response");
        assert_eq!(response.body["message_id"], "sim-00001");
    }
}
