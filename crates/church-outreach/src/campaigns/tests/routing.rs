use super::common::*;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::campaigns::domain::Channel;
use crate::campaigns::ledger::CampaignLedger;
use crate::campaigns::router::{batch_handler, campaign_router, cancel_handler};

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn campaign_payload(targeting: Value) -> Value {
    json!({
        "actor": "pastor.james",
        "targeting": targeting,
        "message": { "kind": "template", "template_id": WELCOME_TEMPLATE },
        "channel": "sms",
    })
}

#[tokio::test]
async fn dispatch_route_returns_the_batch_summary() {
    let sender = Arc::new(ScriptedSender::new(Channel::Sms).rejecting([phone_for(3)]));
    let harness = default_harness(sender);
    let router = campaign_router(harness.dispatcher.clone());

    let response = router
        .oneshot(post_json(
            "/api/v1/campaigns",
            campaign_payload(json!({ "kind": "all_active" })),
        ))
        .await
        .unwrap();

    assert_status(&response, StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["total_recipients"], 10);
    assert_eq!(body["sent_count"], 9);
    assert_eq!(body["failed_count"], 1);
    assert_eq!(body["status"], "completed_with_errors");
    assert_eq!(body["cost"], "0.45");
    assert!(body["batch_id"]
        .as_str()
        .is_some_and(|id| id.starts_with("batch-")));
}

#[tokio::test]
async fn dispatch_route_maps_pre_dispatch_errors_to_client_errors() {
    let harness = default_harness(Arc::new(ScriptedSender::new(Channel::Sms)));

    let response = campaign_router(harness.dispatcher.clone())
        .oneshot(post_json(
            "/api/v1/campaigns",
            campaign_payload(json!({ "kind": "custom", "recipients": [] })),
        ))
        .await
        .unwrap();
    assert_status(&response, StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json_body(response).await;
    assert_eq!(body["error"], "targeting spec resolved to no recipients");

    let response = campaign_router(harness.dispatcher.clone())
        .oneshot(post_json(
            "/api/v1/campaigns",
            campaign_payload(json!({ "kind": "group", "group_id": "deacons" })),
        ))
        .await
        .unwrap();
    assert_status(&response, StatusCode::BAD_REQUEST);

    assert_eq!(batch_count(harness.ledger.as_ref()), 0);
}

#[tokio::test]
async fn test_send_route_reaches_one_number() {
    let sender = Arc::new(ScriptedSender::new(Channel::Sms));
    let harness = default_harness(sender.clone());

    let response = campaign_router(harness.dispatcher.clone())
        .oneshot(post_json(
            "/api/v1/campaigns/test",
            json!({
                "actor": "admin",
                "phone": "555-010-0042",
                "message": { "kind": "text", "body": "Testing 1 2 3" },
                "channel": "sms",
            }),
        ))
        .await
        .unwrap();

    assert_status(&response, StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["total_recipients"], 1);
    assert_eq!(sender.sends(), 1);
}

#[tokio::test]
async fn history_routes_list_and_fetch_batches() {
    let harness = default_harness(Arc::new(ScriptedSender::new(Channel::Sms)));
    let summary = harness
        .dispatcher
        .dispatch(all_active_request(Channel::Sms))
        .await
        .expect("batch runs");

    let response = campaign_router(harness.dispatcher.clone())
        .oneshot(get("/api/v1/campaigns?status=completed"))
        .await
        .unwrap();
    assert_status(&response, StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    assert_eq!(body[0]["batch_id"], summary.batch_id.0.as_str());

    let response = campaign_router(harness.dispatcher.clone())
        .oneshot(get("/api/v1/campaigns?status=failed"))
        .await
        .unwrap();
    let body = read_json_body(response).await;
    assert_eq!(body.as_array().map(Vec::len), Some(0));

    let response = campaign_router(harness.dispatcher.clone())
        .oneshot(get(&format!(
            "/api/v1/campaigns/{}/outcomes?status=sent",
            summary.batch_id
        )))
        .await
        .unwrap();
    assert_status(&response, StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body.as_array().map(Vec::len), Some(10));

    let response = batch_handler(
        State(harness.dispatcher.clone()),
        Path(summary.batch_id.0.clone()),
    )
    .await;
    assert_status(&response, StatusCode::OK);

    let response = batch_handler(State(harness.dispatcher.clone()), Path("nope".to_string())).await;
    assert_status(&response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_history_filters_are_rejected() {
    let harness = default_harness(Arc::new(ScriptedSender::new(Channel::Sms)));
    let response = campaign_router(harness.dispatcher.clone())
        .oneshot(get("/api/v1/campaigns?from=last-week"))
        .await
        .unwrap();
    assert_status(&response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn export_routes_stream_csv() {
    let sender = Arc::new(ScriptedSender::new(Channel::Sms).rejecting([phone_for(1)]));
    let harness = harness(
        roster(2),
        sender,
        Arc::new(crate::campaigns::ledger::InMemoryLedger::default()),
        dispatch_config(),
    );
    let summary = harness
        .dispatcher
        .dispatch(all_active_request(Channel::Sms))
        .await
        .expect("batch runs");

    let response = campaign_router(harness.dispatcher.clone())
        .oneshot(get("/api/v1/campaigns/export.csv"))
        .await
        .unwrap();
    assert_status(&response, StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/csv; charset=utf-8"
    );
    let csv = read_text_body(response).await;
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("Batch ID,Recipient Type,Total Recipients,Sent,Failed,Cost,Status,Sent At,Completed At")
    );
    let row = lines.next().expect("batch row");
    assert!(row.starts_with(&format!(
        "{},All Active Members,2,1,1,0.05,Completed With Errors,",
        summary.batch_id
    )));

    let response = campaign_router(harness.dispatcher.clone())
        .oneshot(get(&format!(
            "/api/v1/campaigns/{}/export.csv?status=failed",
            summary.batch_id
        )))
        .await
        .unwrap();
    assert_status(&response, StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .expect("ascii header")
        .to_string();
    assert!(disposition.contains(&format!("{}.csv", summary.batch_id)));
    let csv = read_text_body(response).await;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(
        lines[0],
        "Recipient Phone,Recipient Name,Message,Status,Sent At,Delivered At,Cost"
    );
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with(&format!(
        "{},Member1 Mensah,\"Hi Member1, Sunday service starts at 9am.\",Failed,",
        phone_for(1)
    )));

    let response = campaign_router(harness.dispatcher.clone())
        .oneshot(get("/api/v1/campaigns/batch-missing/export.csv"))
        .await
        .unwrap();
    assert_status(&response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_handler_distinguishes_unknown_and_finished_batches() {
    let harness = default_harness(Arc::new(ScriptedSender::new(Channel::Sms)));

    let response = cancel_handler(
        State(harness.dispatcher.clone()),
        Path("batch-unknown".to_string()),
    )
    .await;
    assert_status(&response, StatusCode::NOT_FOUND);

    let summary = harness
        .dispatcher
        .dispatch(all_active_request(Channel::Sms))
        .await
        .expect("batch runs");
    let response = cancel_handler(State(harness.dispatcher.clone()), Path(summary.batch_id.0)).await;
    assert_status(&response, StatusCode::CONFLICT);
}

#[tokio::test]
async fn delivery_report_route_marks_outcomes_delivered() {
    let harness = default_harness(Arc::new(ScriptedSender::new(Channel::Sms)));
    let summary = harness
        .dispatcher
        .dispatch(all_active_request(Channel::Sms))
        .await
        .expect("batch runs");

    let response = campaign_router(harness.dispatcher.clone())
        .oneshot(post_json(
            "/api/v1/delivery-reports",
            json!({ "batch_id": summary.batch_id, "phone": phone_for(2) }),
        ))
        .await
        .unwrap();
    assert_status(&response, StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["matched"], true);

    let rows = outcomes(harness.ledger.as_ref(), &summary.batch_id);
    assert!(rows
        .iter()
        .any(|row| row.recipient.phone == phone_for(2) && row.delivered_at.is_some()));

    let response = campaign_router(harness.dispatcher.clone())
        .oneshot(post_json(
            "/api/v1/delivery-reports",
            json!({ "batch_id": "batch-missing", "phone": phone_for(2) }),
        ))
        .await
        .unwrap();
    assert_status(&response, StatusCode::NOT_FOUND);

    let stored = harness
        .ledger
        .batch(&summary.batch_id)
        .expect("read")
        .expect("batch");
    assert_eq!(stored.sent_count, 10);
}
