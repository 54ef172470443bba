//! Invoice handlers. Every operation is scoped to the caller's workspace.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use axum_extra::extract::WithRejection;
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    middleware::TenantContext,
    models::{
        Invoice, InvoiceDetail, InvoiceInput, ListInvoicesFilter, SendInvoiceRequest,
        StatusChange, UpdateStatusRequest,
    },
    services::SendOutcome,
    startup::AppState,
};

pub async fn create_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    WithRejection(Json(payload), _): WithRejection<Json<InvoiceInput>, AppError>,
) -> Result<(StatusCode, Json<InvoiceDetail>), AppError> {
    let detail = state.invoices.create_invoice(&tenant, payload).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    tenant: TenantContext,
    Query(filter): Query<ListInvoicesFilter>,
) -> Result<Json<Vec<Invoice>>, AppError> {
    Ok(Json(state.invoices.list_invoices(&tenant, filter).await?))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDetail>, AppError> {
    Ok(Json(state.invoices.get_invoice(&tenant, invoice_id).await?))
}

pub async fn update_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
    WithRejection(Json(payload), _): WithRejection<Json<InvoiceInput>, AppError>,
) -> Result<Json<InvoiceDetail>, AppError> {
    Ok(Json(
        state
            .invoices
            .update_invoice(&tenant, invoice_id, payload)
            .await?,
    ))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.invoices.delete_invoice(&tenant, invoice_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_status(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
    WithRejection(Json(payload), _): WithRejection<Json<UpdateStatusRequest>, AppError>,
) -> Result<Json<StatusChange>, AppError> {
    Ok(Json(
        state
            .invoices
            .update_status(&tenant, invoice_id, payload.status)
            .await?,
    ))
}

pub async fn send_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
    payload: Option<Json<SendInvoiceRequest>>,
) -> Result<Json<SendOutcome>, AppError> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(
        state
            .invoices
            .send_invoice(&tenant, invoice_id, request)
            .await?,
    ))
}

/// Download the rendered invoice.
pub async fn download_invoice(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let document = state.invoices.render_invoice(&tenant, invoice_id).await?;
    let disposition = format!("attachment; filename=\"{}\"", document.file_name);

    Ok((
        [
            (header::CONTENT_TYPE, document.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        document.bytes,
    ))
}
