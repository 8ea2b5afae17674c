//! CRM contact reconciliation.
//!
//! Maps a persisted lead record onto a GHL contact without duplicating
//! contacts the location already has. GHL's search API cannot AND a phone
//! filter with a custom-field filter in one call, so the reconciler runs two
//! searches (by phone, by listing id as a generic query), intersects the
//! result sets, and re-verifies both fields on each candidate before
//! accepting it. A verified candidate is updated in place; otherwise a new
//! contact is created.
//!
//! Every remote failure here degrades to "no contact id" with a warning;
//! sync must never block persistence of the lead record itself.

use crate::config::GhlCustomFieldIds;
use crate::ghl_client::GhlClient;
use crate::models::InboundEmail;
use crate::normalize::{normalize_phone, split_name};
use moka::future::Cache;
use serde_json::{json, Value};
use std::collections::HashMap;

/// GHL text areas accept up to 5000 chars.
const MAX_LEAD_MESSAGE_LEN: usize = 5000;
/// Generic search queries are capped server-side.
const MAX_LISTING_QUERY_LEN: usize = 100;

/// Inclusion policy for one custom-field mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inclusion {
    /// Include only when the local value is non-empty.
    NonEmpty,
    /// On update calls include even when empty, so a stale remote value is
    /// intentionally cleared.
    AlwaysOnUpdate,
}

/// Build the `customFields` array from the configured mapping table. Fields
/// without a configured remote id are dropped entirely.
fn build_custom_fields(
    fields: &GhlCustomFieldIds,
    record: &InboundEmail,
    is_update: bool,
) -> Vec<Value> {
    let lead_message: String = record
        .lead_message
        .chars()
        .take(MAX_LEAD_MESSAGE_LEN)
        .collect();

    let mappings: [(Option<&str>, String, Inclusion); 7] = [
        (
            fields.listing_id.as_deref(),
            record.listing_id.clone(),
            Inclusion::NonEmpty,
        ),
        (
            fields.listing_name.as_deref(),
            record.listing_name.clone(),
            Inclusion::NonEmpty,
        ),
        (
            fields.ref_id.as_deref(),
            record.ref_id.trim().to_string(),
            Inclusion::AlwaysOnUpdate,
        ),
        (
            fields.lead_source.as_deref(),
            record.lead_source.clone(),
            Inclusion::NonEmpty,
        ),
        (
            fields.purchase_timeframe.as_deref(),
            record.purchase_timeframe.clone(),
            Inclusion::NonEmpty,
        ),
        (
            fields.amount_to_invest.as_deref(),
            record.amount_to_invest.clone(),
            Inclusion::NonEmpty,
        ),
        (fields.lead_message.as_deref(), lead_message, Inclusion::NonEmpty),
    ];

    mappings
        .into_iter()
        .filter_map(|(remote_id, value, inclusion)| {
            let remote_id = remote_id?;
            let include = match inclusion {
                Inclusion::NonEmpty => !value.is_empty(),
                Inclusion::AlwaysOnUpdate => is_update || !value.is_empty(),
            };
            include.then(|| json!({"id": remote_id, "value": value}))
        })
        .collect()
}

/// Standard contact payload. `location_id` is included on create only (GHL
/// rejects it in update bodies).
fn build_contact_payload(
    record: &InboundEmail,
    location_id: Option<&str>,
    custom_fields: Vec<Value>,
) -> Value {
    let (first_name, last_name) = split_name(&record.name);
    let phone_raw = record.phone.trim();
    let phone_e164 = normalize_phone(phone_raw);
    let phone = if phone_e164.is_empty() {
        phone_raw.to_string()
    } else {
        phone_e164
    };
    let email_addr = record.email.trim();
    let source = record.lead_source.trim();

    let mut payload = serde_json::Map::new();
    if let Some(loc) = location_id {
        payload.insert("locationId".to_string(), json!(loc));
    }
    payload.insert(
        "firstName".to_string(),
        json!(if first_name.is_empty() {
            "Unknown".to_string()
        } else {
            first_name
        }),
    );
    payload.insert("lastName".to_string(), json!(last_name));
    payload.insert(
        "email".to_string(),
        if email_addr.is_empty() {
            Value::Null
        } else {
            json!(email_addr)
        },
    );
    payload.insert(
        "phone".to_string(),
        if phone.is_empty() { Value::Null } else { json!(phone) },
    );
    payload.insert(
        "source".to_string(),
        json!(if source.is_empty() { "Inbound Email" } else { source }),
    );
    if !custom_fields.is_empty() {
        payload.insert("customFields".to_string(), json!(custom_fields));
    }
    Value::Object(payload)
}

async fn run_search(client: &GhlClient, body: Value) -> Vec<Value> {
    match client.search_contacts(body).await {
        Ok(contacts) => contacts,
        Err(e) => {
            tracing::warn!("GHL contact search failed: {}", e);
            Vec::new()
        }
    }
}

fn index_by_id(contacts: Vec<Value>) -> HashMap<String, Value> {
    contacts
        .into_iter()
        .filter_map(|c| {
            let id = c.get("id").and_then(|v| v.as_str())?.to_string();
            Some((id, c))
        })
        .collect()
}

/// Does the contact's stored phone match the expected one? Handles both
/// scalar `phone`/`phoneNumber` and array `phones` representations.
fn contact_matches_phone(contact: &Value, expected: &str) -> bool {
    if expected.is_empty() {
        return true;
    }
    let mut raw = contact
        .get("phone")
        .or_else(|| contact.get("phoneNumber"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if raw.is_empty() {
        if let Some(Value::Array(phones)) = contact.get("phones") {
            for p in phones {
                match p {
                    Value::Object(obj) => {
                        if let Some(number) = obj.get("number").and_then(|v| v.as_str()) {
                            raw = number;
                            break;
                        }
                    }
                    Value::String(s) => {
                        raw = s;
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
    let contact_phone = raw.trim();
    if contact_phone.is_empty() {
        return false;
    }
    let n_contact = normalize_phone(contact_phone);
    let n_expected = if expected.starts_with('+') {
        expected.to_string()
    } else {
        normalize_phone(expected)
    };
    n_contact == n_expected || contact_phone == expected
}

/// Does the contact's configured custom field hold this listing id?
/// Vacuously true when no listing id or no field mapping is configured.
fn contact_has_listing_id(contact: &Value, listing: &str, field_id: Option<&str>) -> bool {
    let Some(field_id) = field_id else {
        return true;
    };
    if listing.is_empty() {
        return true;
    }
    let items: Vec<&Value> = match contact
        .get("customFields")
        .or_else(|| contact.get("customField"))
    {
        Some(Value::Array(a)) => a.iter().collect(),
        Some(Value::Object(o)) => o.values().collect(),
        _ => Vec::new(),
    };
    for cf in items {
        let Some(cf_obj) = cf.as_object() else {
            continue;
        };
        let id_matches = [cf_obj.get("id"), cf_obj.get("field")]
            .into_iter()
            .flatten()
            .any(|v| v.as_str() == Some(field_id));
        if !id_matches {
            continue;
        }
        let value = match cf_obj.get("value") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        if value == listing {
            return true;
        }
    }
    false
}

/// Find an existing contact matching BOTH phone AND listing id.
///
/// Two separate searches are run (by phone, by listing id as a generic
/// query); a contact id qualifies only when it appears in both result sets
/// (when both predicates are present) and both fields re-verify against the
/// contact's stored values. Returns `None` when nothing qualifies, which
/// makes the caller create a new contact.
pub async fn search_matching_contact(
    client: &GhlClient,
    fields: &GhlCustomFieldIds,
    phone: &str,
    listing_id: &str,
) -> Option<String> {
    let query_phone = if phone.is_empty() {
        String::new()
    } else {
        normalize_phone(phone)
    };
    let listing: String = listing_id
        .trim()
        .chars()
        .take(MAX_LISTING_QUERY_LEN)
        .collect();
    if query_phone.is_empty() && listing.is_empty() {
        return None;
    }

    let by_phone = if query_phone.is_empty() {
        HashMap::new()
    } else {
        index_by_id(
            run_search(
                client,
                json!({"locationId": client.location_id(), "phone": query_phone}),
            )
            .await,
        )
    };
    let by_listing = if listing.is_empty() {
        HashMap::new()
    } else {
        index_by_id(
            run_search(
                client,
                json!({"locationId": client.location_id(), "query": listing}),
            )
            .await,
        )
    };

    let common_ids: Vec<String> = if !query_phone.is_empty() && !listing.is_empty() {
        by_phone
            .keys()
            .filter(|id| by_listing.contains_key(*id))
            .cloned()
            .collect()
    } else if !query_phone.is_empty() {
        by_phone.keys().cloned().collect()
    } else {
        by_listing.keys().cloned().collect()
    };

    for id in common_ids {
        let Some(contact) = by_phone.get(&id).or_else(|| by_listing.get(&id)) else {
            continue;
        };
        if !contact_matches_phone(contact, &query_phone) {
            continue;
        }
        if !contact_has_listing_id(contact, &listing, fields.listing_id.as_deref()) {
            continue;
        }
        return Some(id);
    }
    None
}

/// Sync a parsed lead record to GHL.
///
/// Runs only when listing_name, name, phone, and lead_source are all
/// present. A verified existing contact is updated (with the reference-id
/// custom field force-included so it can be cleared remotely); otherwise a
/// new contact is created. Returns the contact id, or `None` when sync was
/// skipped or any remote call failed.
pub async fn sync_contact_to_ghl(
    client: &GhlClient,
    fields: &GhlCustomFieldIds,
    record: &InboundEmail,
) -> Option<String> {
    let listing_name = record.listing_name.trim();
    let name = record.name.trim();
    let phone = record.phone.trim();
    let lead_source = record.lead_source.trim();

    if listing_name.is_empty() || name.is_empty() || phone.is_empty() {
        tracing::info!(
            "GHL sync skipped: need listing_name, name, and phone (got listing_name={:?}, name={:?}, phone={:?}). email id={}",
            listing_name,
            name,
            phone,
            record.id,
        );
        return None;
    }
    if lead_source.is_empty() {
        tracing::info!("GHL sync skipped: lead_source not extracted. email id={}", record.id);
        return None;
    }

    match search_matching_contact(client, fields, phone, &record.listing_id).await {
        Some(contact_id) => {
            let custom = build_custom_fields(fields, record, true);
            let payload = build_contact_payload(record, None, custom);
            match client.update_contact(&contact_id, payload).await {
                Ok(()) => {
                    tracing::info!(
                        "GHL contact updated for inbound email id={}, GHL contact id={}",
                        record.id,
                        contact_id
                    );
                    Some(contact_id)
                }
                Err(e) => {
                    tracing::warn!(
                        "GHL update failed: {}. Check API key scope and locationId.",
                        e
                    );
                    None
                }
            }
        }
        None => {
            let custom = build_custom_fields(fields, record, false);
            let payload = build_contact_payload(record, Some(client.location_id()), custom);
            match client.create_contact(payload).await {
                Ok(contact_id) => {
                    tracing::info!(
                        "GHL contact created for inbound email id={}, GHL contact id={}",
                        record.id,
                        contact_id
                    );
                    Some(contact_id)
                }
                Err(e) => {
                    tracing::warn!(
                        "GHL create failed: {}. Check API key scope and locationId.",
                        e
                    );
                    None
                }
            }
        }
    }
}

/// Upload a signed NDA into the configured GHL media folder. The folder id
/// is cached (folder ids are stable) so repeated uploads skip the listing
/// call. Degrades to a logged no-op on any failure.
pub async fn upload_signed_nda(
    client: &GhlClient,
    folder_name: &str,
    folder_cache: &Cache<String, String>,
    file_name: &str,
    bytes: Vec<u8>,
    contact_id: &str,
) -> Option<String> {
    let folder_id = resolve_nda_folder(client, folder_name, folder_cache).await;
    if folder_id.is_none() {
        tracing::warn!("Could not get/create {} folder; uploading to root", folder_name);
    }

    match client
        .upload_file(file_name, bytes, folder_id.as_deref())
        .await
    {
        Ok(Some(media_id)) => {
            tracing::info!(
                "Uploaded signed NDA to GHL Media ({}): contact={} file={} media_id={}",
                folder_name,
                contact_id,
                file_name,
                media_id
            );
            Some(media_id)
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("GHL media upload failed: {}", e);
            None
        }
    }
}

async fn resolve_nda_folder(
    client: &GhlClient,
    name: &str,
    cache: &Cache<String, String>,
) -> Option<String> {
    if let Some(id) = cache.get(name).await {
        return Some(id);
    }
    let found = match client.find_media_folder(name).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!("GHL media listing failed: {}", e);
            return None;
        }
    };
    let id = match found {
        Some(id) => Some(id),
        None => match client.create_media_folder(name).await {
            Ok(Some(id)) => {
                tracing::info!("Created GHL media folder {}", name);
                Some(id)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("GHL folder creation failed: {}", e);
                None
            }
        },
    };
    if let Some(ref id) = id {
        cache.insert(name.to_string(), id.clone()).await;
    }
    id
}
