//! Audit trail queries.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use oseo_core::{AuditEvent, AuditFilter, AuditRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::orders::{error_response, ApiError};
use crate::state::AppState;

/// Maximum allowed limit for audit queries
pub(crate) const MAX_LIMIT: i64 = 1000;

/// Default limit for audit queries
pub(crate) const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for the audit endpoint
#[derive(Debug, Default, Deserialize)]
pub struct AuditQueryParams {
    pub order_id: Option<String>,
    pub item_id: Option<String>,
    /// One of the audit event types (e.g. `order_status_changed`)
    pub event_type: Option<String>,
    /// The user that placed the order
    pub user_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditQueryParams {
    /// Turn the parameters into a store filter, without paging.
    fn filter(&self) -> Result<AuditFilter, ApiError> {
        let mut filter = AuditFilter::new();
        if let Some(ref order_id) = self.order_id {
            filter = filter.with_order_id(order_id);
        }
        if let Some(ref item_id) = self.item_id {
            filter = filter.with_item_id(item_id);
        }
        if let Some(ref event_type) = self.event_type {
            if !AuditEvent::is_event_type(event_type) {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    format!(
                        "Unknown event type '{}', expected one of: {}",
                        event_type,
                        AuditEvent::EVENT_TYPES.join(", ")
                    ),
                ));
            }
            filter = filter.with_event_type(event_type);
        }
        if let Some(ref user_id) = self.user_id {
            filter = filter.with_user_id(user_id);
        }
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    "'from' must not be after 'to'",
                ));
            }
        }
        if self.from.is_some() || self.to.is_some() {
            filter = filter.with_time_range(self.from, self.to);
        }
        Ok(filter)
    }
}

/// Response for the audit query endpoint
#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    pub events: Vec<AuditRecord>,
    /// Total number of matching events
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Query the order and item audit trail.
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditQueryResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);
    let filter = params.filter()?;

    let store = state.audit_store();
    let page = AuditFilter {
        limit,
        offset,
        ..filter.clone()
    };
    let events = store.query(&page).map_err(|e| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to query audit events: {}", e),
        )
    })?;
    let total = store.count(&filter).map_err(|e| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to count audit events: {}", e),
        )
    })?;

    Ok(Json(AuditQueryResponse {
        events,
        total,
        limit,
        offset,
    }))
}
