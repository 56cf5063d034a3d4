//! Invoice endpoints. Every operation is scoped to the businesses the caller
//! belongs to; anything outside that scope is reported as not found.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        DeleteInvoiceResponse, EditInvoiceRequest, InvoiceDetailResponse, InvoiceListResponse,
        InvoiceMutationResponse, InvoiceRequest, InvoiceResponse, SendInvoiceRequest,
        SendInvoiceResponse, ValidateInvoiceResponse,
    },
    middleware::CallerIdentity,
    services::InvoiceOutcome,
    startup::AppState,
    utils::ValidatedJson,
};

async fn scope(state: &AppState, caller: &CallerIdentity) -> Result<Vec<Uuid>, AppError> {
    state.orchestrator.caller_scope(&caller.user_id).await
}

fn mutation_response(outcome: InvoiceOutcome) -> InvoiceMutationResponse {
    InvoiceMutationResponse {
        success: true,
        invoice: InvoiceResponse::with_items(outcome.invoice, outcome.items),
        warning: outcome.warning,
    }
}

/// Create a draft invoice, then render its compliance documents.
pub async fn create_invoice(
    State(state): State<AppState>,
    caller: CallerIdentity,
    ValidatedJson(payload): ValidatedJson<InvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceMutationResponse>), AppError> {
    let scope = scope(&state, &caller).await?;
    let draft = payload.into_draft()?;

    tracing::info!(user_id = %caller.user_id, items = draft.items.len(), "Creating invoice");

    let outcome = state.orchestrator.create(&scope, draft).await?;
    Ok((StatusCode::CREATED, Json(mutation_response(outcome))))
}

/// Replace an invoice's content and items; the invoice returns to draft.
pub async fn edit_invoice(
    State(state): State<AppState>,
    caller: CallerIdentity,
    ValidatedJson(payload): ValidatedJson<EditInvoiceRequest>,
) -> Result<Json<InvoiceMutationResponse>, AppError> {
    let scope = scope(&state, &caller).await?;
    let invoice_id = payload.id;
    let draft = payload.invoice.into_draft()?;

    tracing::info!(user_id = %caller.user_id, invoice_id = %invoice_id, "Editing invoice");

    let outcome = state.orchestrator.edit(&scope, invoice_id, draft).await?;
    Ok(Json(mutation_response(outcome)))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<InvoiceListResponse>, AppError> {
    let scope = scope(&state, &caller).await?;
    let invoices: Vec<InvoiceResponse> = state
        .orchestrator
        .list(&scope)
        .await?
        .into_iter()
        .map(InvoiceResponse::from)
        .collect();

    Ok(Json(InvoiceListResponse {
        success: true,
        count: invoices.len(),
        invoices,
    }))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceDetailResponse>, AppError> {
    let scope = scope(&state, &caller).await?;
    let (invoice, items) = state.orchestrator.get(&scope, invoice_id).await?;

    Ok(Json(InvoiceDetailResponse {
        success: true,
        invoice: InvoiceResponse::with_items(invoice, items),
    }))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<DeleteInvoiceResponse>, AppError> {
    let scope = scope(&state, &caller).await?;
    let deleted = state.orchestrator.delete(&scope, invoice_id).await?;

    Ok(Json(DeleteInvoiceResponse {
        success: true,
        id: deleted.invoice_id,
        invoice_number: deleted.invoice_number,
    }))
}

/// Run the pre-send checklist. The full checklist is returned whether or
/// not the invoice passed.
pub async fn validate_invoice(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<ValidateInvoiceResponse>, AppError> {
    let scope = scope(&state, &caller).await?;
    let outcome = state.orchestrator.validate(&scope, invoice_id).await?;

    Ok(Json(ValidateInvoiceResponse {
        success: true,
        valid: outcome.report.valid,
        status: outcome.status.to_string(),
        checks: outcome.report.checks,
    }))
}

pub async fn send_invoice(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(invoice_id): Path<Uuid>,
    ValidatedJson(payload): ValidatedJson<SendInvoiceRequest>,
) -> Result<Json<SendInvoiceResponse>, AppError> {
    let scope = scope(&state, &caller).await?;
    let outcome = state
        .orchestrator
        .send(&scope, invoice_id, payload.into())
        .await?;

    Ok(Json(SendInvoiceResponse {
        success: true,
        invoice: InvoiceResponse::from(outcome.invoice),
        delivery: outcome.receipt,
    }))
}

fn attachment_disposition(filename: &str) -> String {
    format!("attachment; filename=\"{}\"", filename.replace('"', ""))
}

pub async fn download_pdf(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(invoice_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let scope = scope(&state, &caller).await?;
    let (invoice, bytes) = state.orchestrator.pdf(&scope, invoice_id).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                attachment_disposition(&format!("{}.pdf", invoice.invoice_number)),
            ),
        ],
        bytes,
    )
        .into_response())
}

pub async fn download_xml(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(invoice_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let scope = scope(&state, &caller).await?;
    let (invoice, xml) = state.orchestrator.xml(&scope, invoice_id).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/xml".to_string()),
            (
                header::CONTENT_DISPOSITION,
                attachment_disposition(&format!("{}.xml", invoice.invoice_number)),
            ),
        ],
        xml,
    )
        .into_response())
}
