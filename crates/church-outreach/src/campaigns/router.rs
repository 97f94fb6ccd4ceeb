use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use super::dispatcher::{
    BatchDispatcher, DeliveryReport, DispatchError, DispatchRequest, TestSendRequest,
};
use super::domain::{BatchId, BatchStatus, DeliveryStatus};
use super::export::{CampaignExporter, ExportError};
use super::ledger::{BatchQuery, DateRange, LedgerError, OutcomeQuery};

/// Router builder exposing campaign dispatch, history, export and delivery-report endpoints.
pub fn campaign_router(dispatcher: Arc<BatchDispatcher>) -> Router {
    Router::new()
        .route(
            "/api/v1/campaigns",
            post(dispatch_handler).get(history_handler),
        )
        .route("/api/v1/campaigns/test", post(test_send_handler))
        .route("/api/v1/campaigns/export.csv", get(history_export_handler))
        .route("/api/v1/campaigns/:batch_id", get(batch_handler))
        .route("/api/v1/campaigns/:batch_id/cancel", post(cancel_handler))
        .route("/api/v1/campaigns/:batch_id/outcomes", get(outcomes_handler))
        .route(
            "/api/v1/campaigns/:batch_id/export.csv",
            get(outcomes_export_handler),
        )
        .route("/api/v1/delivery-reports", post(delivery_report_handler))
        .with_state(dispatcher)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct BatchHistoryParams {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    status: Option<BatchStatus>,
}

impl BatchHistoryParams {
    fn query(&self) -> BatchQuery {
        BatchQuery {
            range: DateRange::new(self.from, self.to),
            status: self.status,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct OutcomeParams {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    status: Option<DeliveryStatus>,
}

impl OutcomeParams {
    fn query(&self) -> OutcomeQuery {
        OutcomeQuery {
            range: DateRange::new(self.from, self.to),
            status: self.status,
        }
    }
}

pub(crate) async fn dispatch_handler(
    State(dispatcher): State<Arc<BatchDispatcher>>,
    axum::Json(request): axum::Json<DispatchRequest>,
) -> Response {
    match dispatcher.dispatch(request).await {
        Ok(summary) => (StatusCode::OK, axum::Json(summary)).into_response(),
        Err(err) => dispatch_error_response(err),
    }
}

pub(crate) async fn test_send_handler(
    State(dispatcher): State<Arc<BatchDispatcher>>,
    axum::Json(request): axum::Json<TestSendRequest>,
) -> Response {
    match dispatcher.test_send(request).await {
        Ok(summary) => (StatusCode::OK, axum::Json(summary)).into_response(),
        Err(err) => dispatch_error_response(err),
    }
}

pub(crate) async fn cancel_handler(
    State(dispatcher): State<Arc<BatchDispatcher>>,
    Path(batch_id): Path<String>,
) -> Response {
    let batch_id = BatchId(batch_id);
    if dispatcher.cancel(&batch_id) {
        let payload = json!({
            "batch_id": batch_id,
            "cancellation_requested": true,
        });
        return (StatusCode::ACCEPTED, axum::Json(payload)).into_response();
    }

    match dispatcher.ledger().batch(&batch_id) {
        Ok(Some(_)) => error_response(StatusCode::CONFLICT, "batch is not running"),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "batch not found"),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

pub(crate) async fn history_handler(
    State(dispatcher): State<Arc<BatchDispatcher>>,
    Query(params): Query<BatchHistoryParams>,
) -> Response {
    let exporter = CampaignExporter::new(Arc::clone(dispatcher.ledger()));
    match exporter.batches(&params.query()) {
        Ok(batches) => (StatusCode::OK, axum::Json(batches)).into_response(),
        Err(err) => export_error_response(err),
    }
}

pub(crate) async fn batch_handler(
    State(dispatcher): State<Arc<BatchDispatcher>>,
    Path(batch_id): Path<String>,
) -> Response {
    match dispatcher.ledger().batch(&BatchId(batch_id)) {
        Ok(Some(batch)) => (StatusCode::OK, axum::Json(batch)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "batch not found"),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

pub(crate) async fn outcomes_handler(
    State(dispatcher): State<Arc<BatchDispatcher>>,
    Path(batch_id): Path<String>,
    Query(params): Query<OutcomeParams>,
) -> Response {
    let exporter = CampaignExporter::new(Arc::clone(dispatcher.ledger()));
    match exporter.outcomes(&BatchId(batch_id), &params.query()) {
        Ok(outcomes) => (StatusCode::OK, axum::Json(outcomes)).into_response(),
        Err(err) => export_error_response(err),
    }
}

pub(crate) async fn history_export_handler(
    State(dispatcher): State<Arc<BatchDispatcher>>,
    Query(params): Query<BatchHistoryParams>,
) -> Response {
    let exporter = CampaignExporter::new(Arc::clone(dispatcher.ledger()));
    match exporter.batches_csv(&params.query()) {
        Ok(body) => csv_response("campaign-history.csv", body),
        Err(err) => export_error_response(err),
    }
}

pub(crate) async fn outcomes_export_handler(
    State(dispatcher): State<Arc<BatchDispatcher>>,
    Path(batch_id): Path<String>,
    Query(params): Query<OutcomeParams>,
) -> Response {
    let exporter = CampaignExporter::new(Arc::clone(dispatcher.ledger()));
    let batch_id = BatchId(batch_id);
    match exporter.outcomes_csv(&batch_id, &params.query()) {
        Ok(body) => csv_response(&format!("{batch_id}.csv"), body),
        Err(err) => export_error_response(err),
    }
}

pub(crate) async fn delivery_report_handler(
    State(dispatcher): State<Arc<BatchDispatcher>>,
    axum::Json(report): axum::Json<DeliveryReport>,
) -> Response {
    match dispatcher.reconcile_delivery(&report) {
        Ok(matched) => {
            let payload = json!({
                "batch_id": report.batch_id,
                "phone": report.phone,
                "matched": matched,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(LedgerError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, "batch not found"),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn dispatch_error_response(err: DispatchError) -> Response {
    let status = match &err {
        DispatchError::InvalidTarget(_) | DispatchError::ChannelUnavailable(_) => {
            StatusCode::BAD_REQUEST
        }
        DispatchError::NoRecipients | DispatchError::TemplateNotFound(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        DispatchError::TemplateUnavailable(_) | DispatchError::Directory(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        DispatchError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

fn export_error_response(err: ExportError) -> Response {
    match err {
        ExportError::Ledger(LedgerError::NotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, "batch not found")
        }
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

fn csv_response(filename: &str, body: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let payload = json!({
        "error": message.into(),
    });
    (status, axum::Json(payload)).into_response()
}
