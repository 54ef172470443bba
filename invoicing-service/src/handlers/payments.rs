use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::WithRejection;
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    middleware::TenantContext,
    models::{Payment, PaymentOutcome, RecordPaymentInput},
    startup::AppState,
};

pub async fn record_payment(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
    WithRejection(Json(payload), _): WithRejection<Json<RecordPaymentInput>, AppError>,
) -> Result<(StatusCode, Json<PaymentOutcome>), AppError> {
    let outcome = state
        .payments
        .record_payment(&tenant, invoice_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn list_payments(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Vec<Payment>>, AppError> {
    Ok(Json(
        state.payments.list_payments(&tenant, invoice_id).await?,
    ))
}
