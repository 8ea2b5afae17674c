use crate::config::Config;
use crate::db_storage::LeadStorage;
use crate::errors::AppError;
use crate::ghl_client::GhlClient;
use crate::ghl_sync;
use crate::models::{
    InboundEmail, InboundEmailSummary, NdaEntry, NdaFormContext, NdaSaveResponse,
};
use crate::nda::{self, NdaRenderer};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use moka::future::Cache;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Application configuration.
    pub config: Config,
    /// Client for the GHL API (absent when credentials are not configured).
    pub ghl_client: Option<GhlClient>,
    /// Media folder-name -> folder-id cache (folder ids are stable, so a
    /// 24h TTL saves one listing call per NDA upload).
    pub nda_folder_cache: Cache<String, String>,
    /// Renderer behind the NDA fill boundary.
    pub nda_renderer: Arc<dyn NdaRenderer>,
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-inbound-api",
            "version": "0.1.0"
        })),
    )
}

#[derive(Debug, Deserialize)]
pub struct ListEmailsParams {
    pub limit: Option<i64>,
}

/// GET /api/v1/emails: most recent inbound emails, summary form.
pub async fn list_emails(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListEmailsParams>,
) -> Result<Json<Vec<InboundEmailSummary>>, AppError> {
    let limit = params.limit.unwrap_or(100).clamp(1, 100);
    let storage = LeadStorage::new(state.db.clone());
    let emails = storage.list_recent(limit).await?;
    Ok(Json(emails))
}

/// GET /api/v1/emails/:id: full persisted record.
pub async fn get_email(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<InboundEmail>, AppError> {
    let storage = LeadStorage::new(state.db.clone());
    storage
        .get_by_id(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Inbound email {} not found", id)))
}

/// GET /api/v1/nda: contacts eligible for an NDA page, one entry per
/// (contact, listing), most recent email wins.
pub async fn nda_contacts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<NdaEntry>>, AppError> {
    let storage = LeadStorage::new(state.db.clone());
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for record in storage.nda_eligible().await? {
        let key = (record.ghl_contact_id.clone(), record.listing_id.clone());
        if !seen.insert(key) {
            continue;
        }
        entries.push(NdaEntry {
            contact_id: record.ghl_contact_id,
            listing_id: record.listing_id,
            listing_name: record.listing_name,
            created: record.received_at.format("%Y-%m-%d").to_string(),
            name: record.name,
            phone: record.phone,
            email: record.email,
        });
    }
    Ok(Json(entries))
}

/// GET /api/v1/nda/:contact_id: merged NDA form context. Query parameters
/// act as override values for fields the persisted record leaves empty.
pub async fn nda_form(
    State(state): State<Arc<AppState>>,
    Path(contact_id): Path<String>,
    Query(overrides): Query<HashMap<String, String>>,
) -> Result<Json<NdaFormContext>, AppError> {
    let storage = LeadStorage::new(state.db.clone());
    let record = storage.latest_for_contact(&contact_id).await?;
    let fields = nda::build_value_map(&contact_id, record.as_ref(), &overrides);
    let requirements_left = nda::requirements_left(&fields);
    Ok(Json(NdaFormContext {
        contact_id,
        fields,
        requirements_left,
    }))
}

/// POST /api/v1/nda/:contact_id: save fillable field values submitted by
/// the viewer, then render the filled NDA, write it under the signed-NDA
/// directory, and deliver a copy to GHL media storage. Render and upload
/// failures never fail the save.
pub async fn nda_save(
    State(state): State<Arc<AppState>>,
    Path(contact_id): Path<String>,
    Json(data): Json<Value>,
) -> Result<Json<NdaSaveResponse>, AppError> {
    if !data.is_object() {
        return Err(AppError::BadRequest("Invalid JSON".to_string()));
    }

    let storage = LeadStorage::new(state.db.clone());
    let mut record = match storage.latest_for_contact(&contact_id).await? {
        Some(record) => record,
        None => {
            let from = data
                .get("email")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("nda@local");
            storage.create_nda_stub(&contact_id, from).await?
        }
    };

    let received_keys = nda::apply_submission(&mut record, &data);
    storage.save_nda_values(&record).await?;

    save_and_upload_signed_nda(&state, &contact_id, &record).await;

    Ok(Json(NdaSaveResponse {
        ok: true,
        received_keys,
    }))
}

/// Render the filled NDA, persist it locally, and upload the copy to the
/// GHL media store. Best-effort end to end: every failure is logged and
/// leaves the saved field values untouched.
async fn save_and_upload_signed_nda(state: &Arc<AppState>, contact_id: &str, record: &InboundEmail) {
    let values = nda::build_value_map(contact_id, Some(record), &HashMap::new());
    let bytes = match state.nda_renderer.render(&values) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Failed to render NDA for contact {}: {}", contact_id, e);
            return;
        }
    };

    let filename = nda::signed_nda_filename(contact_id, record, Utc::now());
    let dir = std::path::Path::new(&state.config.nda_output_dir);
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        tracing::error!("Failed to create NDA output dir {}: {}", dir.display(), e);
        return;
    }
    let path = dir.join(&filename);
    if let Err(e) = tokio::fs::write(&path, &bytes).await {
        tracing::error!("Failed to write signed NDA to {}: {}", path.display(), e);
        return;
    }
    tracing::info!("Saved signed NDA to {}", path.display());

    match state.ghl_client.as_ref() {
        Some(client) => {
            ghl_sync::upload_signed_nda(
                client,
                &state.config.signed_nda_folder,
                &state.nda_folder_cache,
                &filename,
                bytes,
                contact_id,
            )
            .await;
        }
        None => {
            tracing::info!("GHL media upload skipped: GHL_API_KEY or GHL_LOCATION_ID not set");
        }
    }
}
