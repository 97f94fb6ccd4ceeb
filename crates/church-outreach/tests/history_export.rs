use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use church_outreach::campaigns::{
    Batch, BatchId, BatchQuery, BatchStatus, CampaignExporter, CampaignLedger, Channel,
    DateRange, DeliveryOutcome, DeliveryStatus, FileLedger, OutcomeQuery, Recipient,
    RecipientType, RenderedMessage,
};
use church_outreach::campaigns::domain::BatchTally;
use rust_decimal::Decimal;

fn rendered(phone: &str, name: &str) -> RenderedMessage {
    let (first, last) = name.split_once(' ').unwrap_or((name, ""));
    RenderedMessage {
        recipient: Recipient {
            id: None,
            display_name: name.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            phone: phone.to_string(),
            fields: BTreeMap::new(),
        },
        body: format!("Dear {first}, the harvest thanksgiving is on Sunday."),
        channel: Channel::Sms,
    }
}

/// Write a finished batch sent on `day` with the given outcomes.
fn seed_batch(
    ledger: &dyn CampaignLedger,
    id: &str,
    day: NaiveDate,
    outcomes: Vec<DeliveryOutcome>,
) -> Batch {
    let sent_at = Utc.from_utc_datetime(&day.and_hms_opt(9, 0, 0).expect("valid time"));
    let mut batch = Batch::open(
        BatchId(id.to_string()),
        Channel::Sms,
        "secretary",
        RecipientType::AllActive,
        "Dear {first_name}, the harvest thanksgiving is on Sunday.",
        outcomes.len(),
    );
    batch.sent_at = sent_at;
    ledger.append_batch(&batch).expect("open");

    let mut tally = BatchTally::default();
    for mut outcome in outcomes {
        outcome.sent_at = sent_at + Duration::seconds(1);
        tally.record(&outcome);
        ledger.append_outcome(&batch.batch_id, &outcome).expect("append");
    }
    batch.close(&tally, false);
    ledger.complete_batch(&batch).expect("complete");
    batch
}

fn day(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, month, day).expect("valid date")
}

#[test]
fn history_export_filters_by_inclusive_date_range() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger: Arc<dyn CampaignLedger> =
        Arc::new(FileLedger::open(dir.path().join("campaigns.jsonl")).expect("journal"));

    let ok = |phone: &str| {
        DeliveryOutcome::sent(&rendered(phone, "Abena Ofori"), Decimal::new(5, 2), 1, None)
    };
    seed_batch(ledger.as_ref(), "batch-feb", day(2, 28), vec![ok("+15550100001")]);
    seed_batch(
        ledger.as_ref(),
        "batch-mar-1",
        day(3, 1),
        vec![ok("+15550100001"), ok("+15550100002")],
    );
    seed_batch(
        ledger.as_ref(),
        "batch-mar-31",
        day(3, 31),
        vec![DeliveryOutcome::failed(
            &rendered("+15550100003", "Kojo Mensah"),
            "HTTP 400: invalid number",
        )],
    );

    let exporter = CampaignExporter::new(ledger);
    let march = BatchQuery {
        range: DateRange::new(Some(day(3, 1)), Some(day(3, 31))),
        status: None,
    };

    let path = dir.path().join("march.csv");
    let file = std::fs::File::create(&path).expect("create export");
    let written = exporter
        .write_batches_csv(&march, file)
        .expect("export written");
    assert_eq!(written, 2);

    let csv = std::fs::read_to_string(&path).expect("read export");
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1]
        .starts_with("batch-mar-31,All Active Members,1,0,1,0,Failed,2025-03-31 09:00:00,"));
    assert!(lines[2].starts_with("batch-mar-1,All Active Members,2,2,0,0.10,Completed,2025-03-01 09:00:00,"));

    let failed_only = exporter
        .batches(&BatchQuery {
            status: Some(BatchStatus::Failed),
            ..BatchQuery::default()
        })
        .expect("history");
    assert_eq!(failed_only.len(), 1);
    assert_eq!(failed_only[0].batch_id.0, "batch-mar-31");
}

#[test]
fn detailed_export_lists_every_recipient_of_a_batch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger: Arc<dyn CampaignLedger> =
        Arc::new(FileLedger::open(dir.path().join("campaigns.jsonl")).expect("journal"));

    let batch = seed_batch(
        ledger.as_ref(),
        "batch-harvest",
        day(10, 5),
        vec![
            DeliveryOutcome::sent(
                &rendered("+15550100001", "Abena Ofori"),
                Decimal::new(10, 2),
                2,
                Some("gw-1".to_string()),
            ),
            DeliveryOutcome::failed(&rendered("+15550100002", "Kojo Mensah"), "absent subscriber"),
        ],
    );
    let delivered_at = Utc.with_ymd_and_hms(2025, 10, 5, 9, 5, 0).unwrap();
    assert!(ledger
        .mark_delivered(&batch.batch_id, "+15550100001", delivered_at)
        .expect("report applied"));

    let exporter = CampaignExporter::new(ledger);
    let csv = exporter
        .outcomes_csv(&batch.batch_id, &OutcomeQuery::default())
        .expect("export");
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(
        lines[0],
        "Recipient Phone,Recipient Name,Message,Status,Sent At,Delivered At,Cost"
    );
    assert_eq!(lines.len(), 3);
    assert!(lines.contains(
        &"+15550100001,Abena Ofori,\"Dear Abena, the harvest thanksgiving is on Sunday.\",Delivered,2025-10-05 09:00:01,2025-10-05 09:05:00,0.10"
    ));
    assert!(lines.contains(
        &"+15550100002,Kojo Mensah,\"Dear Kojo, the harvest thanksgiving is on Sunday.\",Failed,2025-10-05 09:00:01,,0"
    ));

    let delivered = exporter
        .outcomes(
            &batch.batch_id,
            &OutcomeQuery {
                status: Some(DeliveryStatus::Delivered),
                ..OutcomeQuery::default()
            },
        )
        .expect("outcomes");
    assert_eq!(delivered.len(), 1);
}
