use crate::db_storage::LeadStorage;
use crate::errors::{AppError, ResultExt};
use crate::extractor::DeepSeekExtractor;
use crate::ghl_sync;
use crate::handlers::AppState;
use crate::models::{InboundEmail, InboundWebhookResponse, NormalizedMessage};
use crate::transport::{self, FilePart, WebhookParts};
use axum::{
    extract::{FromRequest, Multipart, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    Json,
};
use std::sync::Arc;

/// Matches the router's request body limit; `to_bytes` needs its own cap.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// SendGrid Inbound Parse webhook handler.
///
/// Accepts every delivery encoding SendGrid uses: parsed multipart fields
/// (`text`/`html`/`from`/...), the full raw MIME message in the `email` POST
/// field, raw MIME as the entire request body ("Send Raw"), or body content
/// in file parts.
///
/// The response contract is "never cause the sender to retry": once the
/// message itself has been captured, every downstream failure (extraction,
/// field promotion, CRM sync) is logged and swallowed and the handler still
/// returns 200. A 500 is only produced when the message could not even be
/// captured.
pub async fn sendgrid_inbound(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<(StatusCode, Json<InboundWebhookResponse>), AppError> {
    let parts = collect_parts(request).await?;
    let message = transport::normalize(&parts);
    let has_body = message.has_body();

    tracing::info!(
        "Inbound email received from={} to={} subject={} has_body={} fields={:?} files={:?}",
        message.from_address,
        message.to_address,
        message.subject,
        has_body,
        parts.fields.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
        parts.files.iter().map(|f| f.field_name.as_str()).collect::<Vec<_>>(),
    );
    if !has_body {
        tracing::warn!(
            "No text/html in webhook (body_len={}). SendGrid: use parsed fields (text/html) or \
             send raw MIME in POST \"email\" or as the request body.",
            parts.raw_body.len(),
        );
    }

    // Capture the message unconditionally. A failure here is the one case
    // that surfaces as a 500 to the sender.
    let storage = LeadStorage::new(state.db.clone());
    let record = storage
        .insert_message(&message)
        .await
        .context("Failed to capture inbound message")?;
    let record_id = record.id;

    process_inbound_email(&state, &storage, record, &message).await;

    Ok((
        StatusCode::OK,
        Json(InboundWebhookResponse {
            status: "received".to_string(),
            id: Some(record_id),
            has_body,
        }),
    ))
}

/// Collect form fields, file parts, and the raw body from the request,
/// whatever its content type.
async fn collect_parts(request: Request) -> Result<WebhookParts, AppError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &()).await.map_err(|e| {
            AppError::InternalError(format!("Failed to read multipart payload: {}", e))
        })?;
        let mut parts = WebhookParts::default();
        while let Some(field) = multipart.next_field().await.map_err(|e| {
            AppError::InternalError(format!("Failed to read multipart field: {}", e))
        })? {
            let field_name = field.name().unwrap_or("").to_string();
            let file_name = field.file_name().map(str::to_string);
            let part_content_type = field.content_type().map(str::to_string).unwrap_or_default();
            let bytes = field.bytes().await.map_err(|e| {
                AppError::InternalError(format!("Failed to read multipart field bytes: {}", e))
            })?;
            match file_name {
                Some(file_name) => parts.files.push(FilePart {
                    field_name,
                    file_name,
                    content_type: part_content_type,
                    bytes: bytes.to_vec(),
                }),
                None => parts
                    .fields
                    .push((field_name, String::from_utf8_lossy(&bytes).into_owned())),
            }
        }
        return Ok(parts);
    }

    let body = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to read request body: {}", e)))?;

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let fields = url::form_urlencoded::parse(&body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        return Ok(WebhookParts {
            fields,
            ..Default::default()
        });
    }

    Ok(WebhookParts {
        raw_body: body.to_vec(),
        ..Default::default()
    })
}

/// Post-capture pipeline: extraction → field promotion → CRM sync. Each
/// stage is isolated so a failure cannot undo or block what earlier stages
/// already persisted, and nothing here reaches the webhook response.
async fn process_inbound_email(
    state: &Arc<AppState>,
    storage: &LeadStorage,
    record: InboundEmail,
    message: &NormalizedMessage,
) {
    let extractor = DeepSeekExtractor::new(&state.config);
    let Some(lead) = extractor.extract(message).await else {
        return;
    };

    if !lead.is_actionable() {
        tracing::info!(
            "Skipping lead save and GHL sync: no listing_id, listing_name, email, or phone for inbound email id={}",
            record.id,
        );
        return;
    }

    let record = match storage
        .promote_parsed_fields(record.id, &record.subject, &lead)
        .await
    {
        Ok(updated) => updated,
        Err(e) => {
            tracing::error!("Failed to save parsed fields for email id={}: {}", record.id, e);
            return;
        }
    };

    let Some(client) = state.ghl_client.as_ref() else {
        tracing::info!(
            "GHL sync skipped: GHL_API_KEY or GHL_LOCATION_ID not set. email id={}",
            record.id,
        );
        return;
    };

    tracing::info!(
        "Attempting GHL sync for email id={} (listing_id={:?}, phone={:?}, lead_source={:?})",
        record.id,
        record.listing_id,
        record.phone,
        record.lead_source,
    );
    if let Some(contact_id) =
        ghl_sync::sync_contact_to_ghl(client, &state.config.ghl_custom_fields, &record).await
    {
        if let Err(e) = storage.set_ghl_contact_id(record.id, &contact_id).await {
            tracing::error!(
                "Failed to save GHL contact id for email id={}: {}",
                record.id,
                e
            );
        }
    }
}
