//! Order API handlers.
//!
//! Batches and items are addressed by their own IDs for cancellation and
//! download acknowledgement; everything else goes through the order.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use oseo_core::{
    AuditRecord, BatchReport, CreateOrderRequest, ItemReport, Order, OrderFilter,
    OrderStatusReport, PipelineError, Status, StatusError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::audit::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing orders
#[derive(Debug, Deserialize)]
pub struct ListOrdersParams {
    /// Filter by OSEO status name (e.g. `InProduction`)
    pub status: Option<String>,
    pub user: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Response for listing orders
#[derive(Debug, Serialize)]
pub struct ListOrdersResponse {
    pub orders: Vec<Order>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Query parameters for submission
#[derive(Debug, Default, Deserialize)]
pub struct SubmitParams {
    /// Process in the request instead of the background.
    #[serde(default)]
    pub wait: bool,
}

/// Response for an accepted background submission
#[derive(Debug, Serialize)]
pub struct SubmitAcceptedResponse {
    pub order_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
}

/// Response for the status history of an order
#[derive(Debug, Serialize)]
pub struct OrderHistoryResponse {
    pub order_id: String,
    pub events: Vec<AuditRecord>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct OrderErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<OrderErrorResponse>);

pub(crate) fn error_response(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(OrderErrorResponse {
            error: error.into(),
        }),
    )
}

fn pipeline_error(e: PipelineError) -> ApiError {
    let status = match e {
        PipelineError::NotFound { .. } => StatusCode::NOT_FOUND,
        PipelineError::InvalidTransition(_) => StatusCode::CONFLICT,
        PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

// ============================================================================
// Orders
// ============================================================================

/// Create an order; nothing is processed until it is submitted.
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderStatusReport>), ApiError> {
    let orchestrator = state.orchestrator();
    let order = orchestrator.create_order(body).await.map_err(pipeline_error)?;
    let report = orchestrator
        .get_order_status(&order.id)
        .map_err(pipeline_error)?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// List orders with optional filters
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListOrdersParams>,
) -> Result<Json<ListOrdersResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = OrderFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref raw) = params.status {
        let status: Status = raw
            .parse()
            .map_err(|e: StatusError| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;
        filter = filter.with_status(status);
    }

    if let Some(ref user) = params.user {
        filter = filter.with_user(user);
    }

    let orchestrator = state.orchestrator();
    let orders = orchestrator.list_orders(&filter).map_err(pipeline_error)?;
    let total = orchestrator.count_orders(&filter).map_err(pipeline_error)?;

    Ok(Json(ListOrdersResponse {
        orders,
        total,
        limit,
        offset,
    }))
}

/// Status of an order with its batches and items
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderStatusReport>, ApiError> {
    state
        .orchestrator()
        .get_order_status(&id)
        .map(Json)
        .map_err(pipeline_error)
}

/// Submit an order for processing.
///
/// Runs in the background and answers 202 unless `wait=true` is given.
pub async fn submit_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<SubmitParams>,
) -> Result<Response, ApiError> {
    let orchestrator = state.orchestrator();
    // Unknown orders are reported here rather than in the background task
    orchestrator.get_order_status(&id).map_err(pipeline_error)?;

    if params.wait {
        orchestrator.submit_order(&id).await.map_err(pipeline_error)?;
        let report = orchestrator.get_order_status(&id).map_err(pipeline_error)?;
        return Ok((StatusCode::OK, Json(report)).into_response());
    }

    match orchestrator.process_order_in_background(&id) {
        Some(_) => Ok((
            StatusCode::ACCEPTED,
            Json(SubmitAcceptedResponse {
                order_id: id,
                status: "accepted".to_string(),
            }),
        )
            .into_response()),
        None => Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Shutting down, not accepting orders",
        )),
    }
}

/// Cancel an order
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderStatusReport>, ApiError> {
    let orchestrator = state.orchestrator();
    orchestrator.cancel_order(&id).await.map_err(pipeline_error)?;
    orchestrator
        .get_order_status(&id)
        .map(Json)
        .map_err(pipeline_error)
}

/// Audit trail of one order, oldest first
pub async fn order_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<OrderHistoryResponse>, ApiError> {
    state
        .orchestrator()
        .get_order_status(&id)
        .map_err(pipeline_error)?;

    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let events = state
        .audit_store()
        .order_history(&id, limit)
        .map_err(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to query order history: {}", e),
            )
        })?;

    Ok(Json(OrderHistoryResponse {
        order_id: id,
        events,
    }))
}

// ============================================================================
// Batches and items
// ============================================================================

/// Cancel one batch of an order
pub async fn cancel_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BatchReport>, ApiError> {
    state
        .orchestrator()
        .cancel_batch(&id)
        .await
        .map(Json)
        .map_err(pipeline_error)
}

/// Cancel one item
pub async fn cancel_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ItemReport>, ApiError> {
    state
        .orchestrator()
        .cancel_item(&id)
        .await
        .map(Json)
        .map_err(pipeline_error)
}

/// Acknowledge that a delivered item was downloaded
pub async fn acknowledge_download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ItemReport>, ApiError> {
    state
        .orchestrator()
        .acknowledge_download(&id)
        .await
        .map(Json)
        .map_err(pipeline_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_status_codes() {
        let (status, body) = pipeline_error(PipelineError::order_not_found("o-1"));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.error.contains("o-1"));

        let (status, _) = pipeline_error(PipelineError::InvalidTransition(
            StatusError::InvalidTransition {
                from: Status::Completed,
                to: Status::Cancelled,
            },
        ));
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = pipeline_error(PipelineError::InvalidRequest("no batches".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
