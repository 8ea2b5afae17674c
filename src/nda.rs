//! NDA document fill: merge a persisted lead record with request-supplied
//! override values into the flat field map the form renderer consumes.
//!
//! The actual PDF layout/rendering lives behind [`NdaRenderer`]; this module
//! owns only the value-precedence contract: persisted value, else override,
//! else the fixed choice label for enumerated fields, else empty, with every
//! value truncated to the field width before rendering.

use crate::errors::AppError;
use crate::models::InboundEmail;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Form field names on the NDA template, in template order.
pub const NDA_FIELDS: &[&str] = &[
    "ref_id",
    "listing_id",
    "listing_name",
    "name",
    "signature",
    "street_address",
    "city",
    "state",
    "zip",
    "email",
    "cell",
    "will_manage",
    "other_deciders",
    "industry_experience",
    "timeframe",
    "liquid_assets",
    "real_estate",
    "retirement_401k",
    "funds_for_business",
    "partner_name",
    "using",
    "govt_affiliation",
    "govt_explain",
];

/// Dropdown fields on the template; empty values render the picker label.
const CHOICE_FIELDS: &[&str] = &[
    "will_manage",
    "other_deciders",
    "timeframe",
    "funds_for_business",
    "using",
];

const CHOICE_DEFAULT: &str = "Choose an item.";

/// Target field width on the rendered form.
const MAX_FIELD_WIDTH: usize = 255;

/// Fields a lead must fill before the NDA counts as complete.
pub const NDA_REQUIRED_FIELDS: &[&str] = &[
    "name",
    "email",
    "cell",
    "ref_id",
    "listing_id",
    "listing_name",
    "signature",
];

/// Record columns an NDA submission may overwrite directly.
const NDA_CORE_KEYS: &[&str] = &[
    "ref_id",
    "listing_id",
    "listing_name",
    "name",
    "email",
    "phone",
    "purchase_timeframe",
    "amount_to_invest",
    "lead_message",
];

/// Submission keys stored in the record's `raw_parsed` extras object.
const NDA_EXTRA_KEYS: &[&str] = &[
    "signature",
    "street_address",
    "city",
    "state",
    "zip",
    "will_manage",
    "other_deciders",
    "industry_experience",
    "govt_affiliation",
    "govt_explain",
    "liquid_assets",
    "real_estate",
    "retirement_401k",
    "funds_for_business",
    "using",
];

/// Boundary to the excluded PDF form renderer.
pub trait NdaRenderer: Send + Sync {
    fn render(&self, values: &BTreeMap<String, String>) -> Result<Vec<u8>, AppError>;
}

/// Stand-in renderer: serializes the merged value map so completed NDAs are
/// still written to disk and delivered to the CRM media store in
/// deployments without the PDF layout component. Swap a real form-filling
/// renderer into `AppState` to produce actual PDFs.
pub struct ValueSnapshotRenderer;

impl NdaRenderer for ValueSnapshotRenderer {
    fn render(&self, values: &BTreeMap<String, String>) -> Result<Vec<u8>, AppError> {
        serde_json::to_vec_pretty(values)
            .map_err(|e| AppError::InternalError(format!("NDA snapshot encoding failed: {}", e)))
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn extra_value(record: Option<&InboundEmail>, key: &str) -> String {
    record
        .and_then(|r| r.raw_parsed.get(key))
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Persisted value for a template field, mapping template names onto record
/// columns (`cell` is the phone line, `timeframe` the purchase timeframe,
/// `partner_name` shares the lead message) with everything else living in
/// the `raw_parsed` extras.
fn persisted_value(record: Option<&InboundEmail>, field: &str) -> String {
    let Some(r) = record else {
        return String::new();
    };
    match field {
        "ref_id" => r.ref_id.trim().to_string(),
        "listing_id" => r.listing_id.trim().to_string(),
        "listing_name" => r.listing_name.trim().to_string(),
        "name" => r.name.trim().to_string(),
        "email" => r.email.trim().to_string(),
        "cell" => r.phone.trim().to_string(),
        "timeframe" => r.purchase_timeframe.trim().to_string(),
        "funds_for_business" => {
            let extra = extra_value(record, field);
            if extra.is_empty() {
                r.amount_to_invest.trim().to_string()
            } else {
                extra
            }
        }
        "partner_name" => r.lead_message.trim().to_string(),
        _ => extra_value(record, field),
    }
}

/// Merge the record with request-supplied overrides into the flat map handed
/// to the renderer. Precedence per field: persisted value, else override,
/// else the choice label for dropdown fields, else empty string.
pub fn build_value_map(
    contact_id: &str,
    record: Option<&InboundEmail>,
    overrides: &HashMap<String, String>,
) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for field in NDA_FIELDS {
        let mut value = persisted_value(record, field);
        if value.is_empty() {
            value = overrides
                .get(*field)
                .map(|v| v.trim().to_string())
                .unwrap_or_default();
        }
        if value.is_empty() && CHOICE_FIELDS.contains(field) {
            value = CHOICE_DEFAULT.to_string();
        }
        values.insert(field.to_string(), truncate(&value, MAX_FIELD_WIDTH));
    }
    // The contact id doubles as the reference id when nothing else set one.
    let ref_id = values.entry("ref_id".to_string()).or_default();
    if ref_id.is_empty() && !contact_id.is_empty() {
        *ref_id = truncate(contact_id, 50);
    }
    values
}

/// How many required fields are still empty (the viewer's "requirements
/// left" counter). The choice label counts as empty.
pub fn requirements_left(values: &BTreeMap<String, String>) -> usize {
    NDA_REQUIRED_FIELDS
        .iter()
        .filter(|field| {
            values
                .get(**field)
                .map(|v| v.trim().is_empty() || v == CHOICE_DEFAULT)
                .unwrap_or(true)
        })
        .count()
}

fn submitted_string(data: &Value, key: &str) -> String {
    match data.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

/// Apply an NDA form submission onto the record: core keys overwrite their
/// columns, extras merge into `raw_parsed`, and the template aliases
/// (`partner_name`, `cell`, `timeframe`) land on their backing columns.
/// Returns the list of keys the submission carried.
pub fn apply_submission(record: &mut InboundEmail, data: &Value) -> Vec<String> {
    let Some(obj) = data.as_object() else {
        return Vec::new();
    };

    for key in NDA_CORE_KEYS {
        if !obj.contains_key(*key) {
            continue;
        }
        let value = submitted_string(data, key);
        match *key {
            "ref_id" => record.ref_id = value,
            "listing_id" => record.listing_id = value,
            "listing_name" => record.listing_name = value,
            "name" => record.name = value,
            "email" => record.email = value,
            "phone" => record.phone = value,
            "purchase_timeframe" => record.purchase_timeframe = value,
            "amount_to_invest" => record.amount_to_invest = value,
            "lead_message" => record.lead_message = value,
            _ => {}
        }
    }
    if obj.contains_key("partner_name") {
        record.lead_message = submitted_string(data, "partner_name");
    }
    if obj.contains_key("cell") && !obj.contains_key("phone") {
        record.phone = submitted_string(data, "cell");
    }
    if obj.contains_key("timeframe") && !obj.contains_key("purchase_timeframe") {
        record.purchase_timeframe = submitted_string(data, "timeframe");
    }

    let mut extras = match record.raw_parsed.clone() {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    for key in NDA_EXTRA_KEYS {
        if obj.contains_key(*key) {
            extras.insert(key.to_string(), Value::String(submitted_string(data, key)));
        }
    }
    record.raw_parsed = Value::Object(extras);

    obj.keys().cloned().collect()
}

/// File name for a saved signed NDA: sanitized listing + contact id + UTC
/// timestamp.
pub fn signed_nda_filename(contact_id: &str, record: &InboundEmail, now: DateTime<Utc>) -> String {
    let safe_id = sanitize(contact_id, 80);
    let listing_src = if record.listing_id.is_empty() {
        record.listing_name.as_str()
    } else {
        record.listing_id.as_str()
    };
    let listing = sanitize(&truncate(listing_src, 50), 50);
    let ts = now.format("%Y%m%d_%H%M%S");
    if listing.is_empty() {
        format!("nda_signed_{}_{}.pdf", safe_id, ts)
    } else {
        format!("nda_signed_{}_{}_{}.pdf", listing, safe_id, ts)
    }
}

fn sanitize(s: &str, max: usize) -> String {
    s.chars()
        .take(max)
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}
