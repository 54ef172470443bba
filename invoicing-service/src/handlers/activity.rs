//! Audit trail and notification reads.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    middleware::TenantContext,
    models::{ActivityEntry, Notification},
    startup::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct ActivityQuery {
    pub invoice_id: Option<Uuid>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    pub limit: Option<i64>,
}

pub async fn list_activity(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityEntry>>, AppError> {
    Ok(Json(
        state
            .invoices
            .list_activity(&tenant, query.invoice_id, query.limit)
            .await?,
    ))
}

pub async fn list_notifications(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<Vec<Notification>>, AppError> {
    Ok(Json(
        state
            .invoices
            .list_notifications(&tenant, query.limit)
            .await?,
    ))
}
