use crate::errors::AppError;
use crate::extractor::ExtractedLead;
use crate::models::{InboundEmail, InboundEmailSummary, NormalizedMessage};
use crate::normalize::normalize_phone;
use bigdecimal::BigDecimal;
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

/// Column width limits (the varchar sizes in the migration). Values are
/// truncated here, at write time, so normalization and extraction never
/// have to care.
const MAX_FROM_LEN: usize = 512;
const MAX_SUBJECT_LEN: usize = 1024;
const MAX_MESSAGE_ID_LEN: usize = 512;
const MAX_TITLE_LEN: usize = 512;
const MAX_LEAD_SOURCE_LEN: usize = 128;
const MAX_LISTING_ID_LEN: usize = 255;
const MAX_LISTING_NAME_LEN: usize = 512;
const MAX_NAME_LEN: usize = 255;
const MAX_EMAIL_LEN: usize = 254;
const MAX_PHONE_LEN: usize = 64;
const MAX_TIMEFRAME_LEN: usize = 255;
const MAX_AMOUNT_LEN: usize = 255;
const MAX_LEAD_MESSAGE_LEN: usize = 65535;
const MAX_REF_ID_LEN: usize = 128;
const MAX_CONTACT_ID_LEN: usize = 64;

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Storage service for persisted lead records. The record lifecycle is
/// append-only: created at normalization, overwritten whole-field after
/// extraction and after CRM sync. There is no delete path.
pub struct LeadStorage {
    pool: PgPool,
}

impl LeadStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist a freshly normalized message. Runs unconditionally for every
    /// webhook delivery, bodyless messages included, so records are never
    /// silently dropped.
    pub async fn insert_message(
        &self,
        message: &NormalizedMessage,
    ) -> Result<InboundEmail, AppError> {
        let attachment_info = serde_json::to_value(&message.attachment_info)
            .map_err(|e| AppError::InternalError(format!("Failed to encode attachments: {}", e)))?;

        let record = sqlx::query_as::<_, InboundEmail>(
            r#"
            INSERT INTO inbound_emails (
                from_address, to_address, cc, subject, text_body, html_body,
                envelope, attachment_info, original_email_message_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(truncate(&message.from_address, MAX_FROM_LEN))
        .bind(&message.to_address)
        .bind(&message.cc)
        .bind(truncate(&message.subject, MAX_SUBJECT_LEN))
        .bind(&message.text_body)
        .bind(&message.html_body)
        .bind(&message.envelope)
        .bind(attachment_info)
        .bind(truncate(&message.message_id, MAX_MESSAGE_ID_LEN))
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Stored inbound email id={}", record.id);
        Ok(record)
    }

    /// Promote extracted lead fields onto the persisted record. One whole
    /// overwrite of the parsed columns plus a `parsed_at` stamp; returns the
    /// refreshed record.
    pub async fn promote_parsed_fields(
        &self,
        id: Uuid,
        subject: &str,
        lead: &ExtractedLead,
    ) -> Result<InboundEmail, AppError> {
        let listing_profit = lead
            .listing_profit
            .and_then(|p| BigDecimal::from_str(&p.to_string()).ok());

        // The record keeps the best-effort E.164 form; the raw digits are
        // still recoverable from raw_parsed.
        let phone_e164 = normalize_phone(&lead.phone);
        let phone = if phone_e164.is_empty() {
            lead.phone.trim().to_string()
        } else {
            phone_e164
        };

        let record = sqlx::query_as::<_, InboundEmail>(
            r#"
            UPDATE inbound_emails SET
                email_title = $2,
                lead_source = $3,
                listing_id = $4,
                listing_name = $5,
                listing_profit = $6,
                name = $7,
                email = $8,
                phone = $9,
                purchase_timeframe = $10,
                amount_to_invest = $11,
                lead_message = $12,
                ref_id = $13,
                raw_parsed = $14,
                parsed_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(truncate(subject, MAX_TITLE_LEN))
        .bind(truncate(&lead.lead_source, MAX_LEAD_SOURCE_LEN))
        .bind(truncate(&lead.listing_id, MAX_LISTING_ID_LEN))
        .bind(truncate(&lead.listing_name, MAX_LISTING_NAME_LEN))
        .bind(listing_profit)
        .bind(truncate(&lead.name, MAX_NAME_LEN))
        .bind(truncate(&lead.email, MAX_EMAIL_LEN))
        .bind(truncate(&phone, MAX_PHONE_LEN))
        .bind(truncate(&lead.purchase_timeframe, MAX_TIMEFRAME_LEN))
        .bind(truncate(&lead.amount_to_invest, MAX_AMOUNT_LEN))
        .bind(truncate(&lead.lead_message, MAX_LEAD_MESSAGE_LEN))
        .bind(truncate(&lead.ref_id, MAX_REF_ID_LEN))
        .bind(&lead.raw)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Record the GHL contact id after a successful sync.
    pub async fn set_ghl_contact_id(&self, id: Uuid, contact_id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE inbound_emails SET ghl_contact_id = $2 WHERE id = $1")
            .bind(id)
            .bind(truncate(contact_id, MAX_CONTACT_ID_LEN))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<InboundEmail>, AppError> {
        let record =
            sqlx::query_as::<_, InboundEmail>("SELECT * FROM inbound_emails WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(record)
    }

    pub async fn list_recent(&self, limit: i64) -> Result<Vec<InboundEmailSummary>, AppError> {
        let rows = sqlx::query_as::<_, InboundEmailSummary>(
            r#"
            SELECT id, from_address, subject, received_at, name, email,
                   listing_id, ghl_contact_id, parsed_at
            FROM inbound_emails
            ORDER BY received_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Most recent record for a GHL contact id (the NDA flows operate on the
    /// latest email for a contact).
    pub async fn latest_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Option<InboundEmail>, AppError> {
        let record = sqlx::query_as::<_, InboundEmail>(
            r#"
            SELECT * FROM inbound_emails
            WHERE ghl_contact_id = $1
            ORDER BY received_at DESC
            LIMIT 1
            "#,
        )
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Records with enough data to serve an NDA page: synced contact id,
    /// listing id, and phone all present. Most recent first; the handler
    /// collapses to one entry per (contact, listing).
    pub async fn nda_eligible(&self) -> Result<Vec<InboundEmail>, AppError> {
        let rows = sqlx::query_as::<_, InboundEmail>(
            r#"
            SELECT * FROM inbound_emails
            WHERE ghl_contact_id <> '' AND listing_id <> '' AND phone <> ''
            ORDER BY received_at DESC
            LIMIT 500
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Overwrite the NDA-editable fields of an existing record (whole-field
    /// writes, including the `raw_parsed` extras object).
    pub async fn save_nda_values(&self, record: &InboundEmail) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE inbound_emails SET
                ref_id = $2,
                listing_id = $3,
                listing_name = $4,
                name = $5,
                email = $6,
                phone = $7,
                purchase_timeframe = $8,
                amount_to_invest = $9,
                lead_message = $10,
                raw_parsed = $11
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(truncate(&record.ref_id, MAX_REF_ID_LEN))
        .bind(truncate(&record.listing_id, MAX_LISTING_ID_LEN))
        .bind(truncate(&record.listing_name, MAX_LISTING_NAME_LEN))
        .bind(truncate(&record.name, MAX_NAME_LEN))
        .bind(truncate(&record.email, MAX_EMAIL_LEN))
        .bind(truncate(&record.phone, MAX_PHONE_LEN))
        .bind(truncate(&record.purchase_timeframe, MAX_TIMEFRAME_LEN))
        .bind(truncate(&record.amount_to_invest, MAX_AMOUNT_LEN))
        .bind(truncate(&record.lead_message, MAX_LEAD_MESSAGE_LEN))
        .bind(&record.raw_parsed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Create a minimal record for an NDA submitted against a contact we
    /// have no email for yet.
    pub async fn create_nda_stub(
        &self,
        contact_id: &str,
        from_address: &str,
    ) -> Result<InboundEmail, AppError> {
        let record = sqlx::query_as::<_, InboundEmail>(
            r#"
            INSERT INTO inbound_emails (from_address, subject, ghl_contact_id)
            VALUES ($1, 'NDA', $2)
            RETURNING *
            "#,
        )
        .bind(truncate(from_address, MAX_FROM_LEN))
        .bind(truncate(contact_id, MAX_CONTACT_ID_LEN))
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }
}
