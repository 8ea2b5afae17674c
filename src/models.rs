use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for a declared attachment slot. Attachment bytes are never
/// persisted; only name/size/content-type are recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub name: String,
    pub size: usize,
    pub content_type: String,
}

/// Canonical result of transport normalization: one inbound email collapsed
/// from whatever delivery encoding the provider used. Immutable once built.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizedMessage {
    pub from_address: String,
    pub to_address: String,
    pub cc: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    /// SMTP envelope, parsed from the provider's JSON-encoded field.
    /// Defaults to an empty object on parse failure.
    pub envelope: Value,
    pub attachment_info: Vec<AttachmentMeta>,
    /// Message-ID header value (without angle brackets), max 512 chars.
    pub message_id: String,
}

impl NormalizedMessage {
    /// Whether any body content was recovered. Used for observability only;
    /// bodyless messages are still persisted.
    pub fn has_body(&self) -> bool {
        !self.text_body.is_empty() || !self.html_body.is_empty()
    }
}

/// Persisted lead record: canonical message + extracted lead fields + GHL
/// sync status. Mutated only by whole-field overwrites in `LeadStorage`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InboundEmail {
    pub id: Uuid,

    // Transport
    pub from_address: String,
    pub to_address: String,
    pub cc: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub envelope: Value,
    pub attachment_info: Value,
    pub original_email_message_id: String,
    pub received_at: DateTime<Utc>,

    // Extracted lead fields
    pub email_title: String,
    pub lead_source: String,
    pub listing_id: String,
    pub listing_name: String,
    pub listing_profit: Option<BigDecimal>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub purchase_timeframe: String,
    pub amount_to_invest: String,
    pub lead_message: String,
    pub ref_id: String,
    pub raw_parsed: Value,
    pub parsed_at: Option<DateTime<Utc>>,

    // GHL sync
    pub ghl_contact_id: String,
}

/// Summary row for the email list endpoint.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InboundEmailSummary {
    pub id: Uuid,
    pub from_address: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
    pub listing_id: String,
    pub ghl_contact_id: String,
    pub parsed_at: Option<DateTime<Utc>>,
}

/// Response sent back to the inbound webhook sender. The provider only needs
/// a 200; the body is informational.
#[derive(Debug, Serialize)]
pub struct InboundWebhookResponse {
    pub status: String,
    pub id: Option<Uuid>,
    pub has_body: bool,
}

/// One (contact, listing) pair with enough data to serve an NDA page.
#[derive(Debug, Clone, Serialize)]
pub struct NdaEntry {
    pub contact_id: String,
    pub listing_id: String,
    pub listing_name: String,
    pub created: String,
    pub name: String,
    pub phone: String,
    pub email: String,
}

/// Merged NDA form context returned to the viewer.
#[derive(Debug, Serialize)]
pub struct NdaFormContext {
    pub contact_id: String,
    pub fields: std::collections::BTreeMap<String, String>,
    /// How many required NDA fields are still empty.
    pub requirements_left: usize,
}

/// Response for the NDA save endpoint.
#[derive(Debug, Serialize)]
pub struct NdaSaveResponse {
    pub ok: bool,
    pub received_keys: Vec<String>,
}
