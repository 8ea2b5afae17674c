//! Lead extraction via the DeepSeek chat completions API.
//!
//! The model is asked for a JSON object with a fixed key set; everything it
//! returns is treated as untrusted and coerced into [`ExtractedLead`]. Any
//! failure along the way (missing credentials, transport error, malformed
//! JSON) degrades to "no fields extracted", and the caller cannot distinguish
//! that from an email that simply contained no lead.

use crate::config::Config;
use crate::models::NormalizedMessage;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Upstream request-size ceiling for the user prompt, in characters.
const MAX_PROMPT_CHARS: usize = 30_000;

const SYSTEM_PROMPT: &str = r#"You are an assistant that extracts structured information from business-for-sale lead emails (e.g. BizBuySell, TangentBrokerage, BusinessesforSale.com).

The LEAD is the person interested in buying the business (the inquiry). The email may be forwarded: the "From" header is the sender (e.g. forwarder), NOT necessarily the lead.

IMPORTANT: Extract the lead's name and email from the BODY when present (e.g. "Name: Test Test", "Email: test123@gmail.com", "Contact Name:", "Lead Name:"). Do NOT use the From header for name/email when the body contains explicit lead fields. Only use From/Reply-To for name or email when the body does not contain them.

Given the email headers (From, Reply-To, Subject), body text, and structured lines like "Name:", "Email:", "Phone:", "Lead For:", "Message:", "Amount to Invest:", "Purchase Timeframe:", "Your Ref ID#:", extract the following into a JSON object.

Output a JSON object with exactly these keys (use empty string "" if not found; use null for listing_profit if not found):
- lead_source: one of "BizBuySell", "TangentBrokerage.com", "BusinessesforSale.com" (infer from From address or domain, e.g. leads@bizbuysell.com -> BizBuySell)
- listing_id: listing or reference number (e.g. "2344916" from "Listing# 2344916")
- listing_name: the full listing name / "Lead For" line (e.g. "$539,384 Profit; 2 new large revenue streams w/recent FDA approval!")
- listing_profit: numeric profit only, no currency (e.g. 539384 from "$539,384 Profit"), or null if not found
- name: full name of the LEAD (person inquiring). Prefer value from body "Name:" or similar; do not use the From header sender name when body has a different name.
- email: email of the LEAD. Prefer value from body "Email:" or similar; do not use From address when body has a different lead email.
- phone: phone number of the lead (from body "Phone:" or similar)
- purchase_timeframe: e.g. "3 to 6 Months", "ASAP"
- amount_to_invest: e.g. "Not disclosed", "$500k", or exact text from email
- lead_message: the full message body / inquiry text (the "Message:" section or main paragraph)
- ref_id: value after "Your Ref ID#:" or similar (e.g. "xray")

Return only valid JSON, no other text."#;

/// Typed lead fields coerced out of the extraction response. Every string
/// key is always present (`""` when absent); only `listing_profit` can be
/// missing. `raw` keeps the unmodified response for forward-compatible
/// storage.
#[derive(Debug, Clone, Default)]
pub struct ExtractedLead {
    pub lead_source: String,
    pub listing_id: String,
    pub listing_name: String,
    pub listing_profit: Option<f64>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub purchase_timeframe: String,
    pub amount_to_invest: String,
    pub lead_message: String,
    pub ref_id: String,
    pub raw: Value,
}

impl ExtractedLead {
    /// Coerce an untrusted JSON object into the fixed field set.
    pub fn from_response(data: Value) -> Self {
        let get = |key: &str| coerce_string(data.get(key));
        Self {
            lead_source: get("lead_source"),
            listing_id: get("listing_id"),
            listing_name: get("listing_name"),
            listing_profit: data.get("listing_profit").and_then(parse_profit),
            name: get("name"),
            email: get("email"),
            phone: get("phone"),
            purchase_timeframe: get("purchase_timeframe"),
            amount_to_invest: get("amount_to_invest"),
            lead_message: get("lead_message"),
            ref_id: get("ref_id"),
            raw: data,
        }
    }

    /// A record with none of listing id, listing name, email, or phone
    /// carries no actionable lead: it must not be promoted onto the
    /// persisted record or synced to the CRM.
    pub fn is_actionable(&self) -> bool {
        !self.listing_id.is_empty()
            || !self.listing_name.is_empty()
            || !self.email.is_empty()
            || !self.phone.is_empty()
    }
}

fn coerce_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

/// Currency-tolerant profit parse: numbers pass through, strings are
/// stripped of `$` and thousands separators. Anything else degrades to
/// `None`. This field never errors.
pub fn parse_profit(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned = s.trim().replace(',', "").replace('$', "");
            if cleaned.is_empty() {
                return None;
            }
            cleaned.parse().ok()
        }
        _ => None,
    }
}

/// Plain text content for the model: prefer the text body, fall back to the
/// HTML body with tags stripped.
fn text_content(message: &NormalizedMessage) -> String {
    let text = message.text_body.trim();
    if !text.is_empty() {
        return text.to_string();
    }
    let html = message.html_body.trim();
    if html.is_empty() {
        return String::new();
    }
    let tag_re = Regex::new(r"<[^>]+>").expect("valid tag regex");
    tag_re
        .replace_all(html, " ")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}

/// DeepSeek-backed structured extraction client.
pub struct DeepSeekExtractor {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl DeepSeekExtractor {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.deepseek_base_url.clone(),
            api_key: config.deepseek_api_key.clone(),
        }
    }

    /// Extract lead fields from a normalized message.
    ///
    /// Returns `None` on any failure or when there is nothing to parse; the
    /// caller treats that identically to "nothing actionable found".
    pub async fn extract(&self, message: &NormalizedMessage) -> Option<ExtractedLead> {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!("DEEPSEEK_API_KEY not set; skipping email parsing");
            return None;
        };

        let text = text_content(message);
        let subject = message.subject.trim();
        if text.is_empty() && subject.is_empty() {
            tracing::info!("No content to parse for inbound email");
            return None;
        }

        let user_content: String = format!(
            "From: {}\nSubject: {}\n\nBody:\n{}",
            message.from_address, subject, text
        )
        .chars()
        .take(MAX_PROMPT_CHARS)
        .collect();

        let body = json!({
            "model": "deepseek-chat",
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_content},
            ],
            "response_format": {"type": "json_object"},
            "temperature": 0.1,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .timeout(Duration::from_secs(30))
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!("DeepSeek request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!("DeepSeek returned status {}: {}", status, error_text);
            return None;
        }

        let completion: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Failed to read DeepSeek response: {}", e);
                return None;
            }
        };

        let content = completion
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or("");

        match serde_json::from_str::<Value>(content) {
            Ok(data) if data.is_object() => Some(ExtractedLead::from_response(data)),
            Ok(_) => {
                tracing::warn!("DeepSeek returned non-object JSON");
                None
            }
            Err(e) => {
                tracing::warn!("DeepSeek returned invalid JSON: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_key_present_even_when_response_is_empty() {
        let lead = ExtractedLead::from_response(json!({}));
        assert_eq!(lead.lead_source, "");
        assert_eq!(lead.listing_id, "");
        assert_eq!(lead.listing_profit, None);
        assert_eq!(lead.ref_id, "");
        assert!(!lead.is_actionable());
    }

    #[test]
    fn null_values_become_empty_strings() {
        let lead = ExtractedLead::from_response(json!({
            "name": null,
            "email": null,
            "listing_profit": null,
        }));
        assert_eq!(lead.name, "");
        assert_eq!(lead.email, "");
        assert_eq!(lead.listing_profit, None);
    }

    #[test]
    fn string_fields_are_trimmed() {
        let lead = ExtractedLead::from_response(json!({
            "name": "  Jane Doe  ",
            "phone": " 555-123-4567\n",
        }));
        assert_eq!(lead.name, "Jane Doe");
        assert_eq!(lead.phone, "555-123-4567");
    }

    #[test]
    fn profit_currency_string() {
        assert_eq!(parse_profit(&json!("$539,384")), Some(539384.0));
    }

    #[test]
    fn profit_unparseable_string() {
        assert_eq!(parse_profit(&json!("n/a")), None);
        assert_eq!(parse_profit(&json!("")), None);
    }

    #[test]
    fn profit_numeric_passthrough() {
        assert_eq!(parse_profit(&json!(539384)), Some(539384.0));
        assert_eq!(parse_profit(&json!(539384.5)), Some(539384.5));
    }

    #[test]
    fn actionable_requires_one_identifying_field() {
        let lead = ExtractedLead::from_response(json!({
            "name": "Jane Doe",
            "lead_message": "hello",
        }));
        assert!(!lead.is_actionable());

        let lead = ExtractedLead::from_response(json!({"phone": "5551234567"}));
        assert!(lead.is_actionable());

        let lead = ExtractedLead::from_response(json!({"listing_id": "42"}));
        assert!(lead.is_actionable());
    }

    #[test]
    fn raw_response_is_retained() {
        let lead = ExtractedLead::from_response(json!({
            "name": "Jane",
            "street_address": "1 Main St",
        }));
        assert_eq!(lead.raw["street_address"], "1 Main St");
    }

    #[test]
    fn html_fallback_strips_tags() {
        let msg = NormalizedMessage {
            html_body: "<p>Name:&nbsp;Jane</p><br><b>Phone: 5551234567</b>".to_string(),
            ..Default::default()
        };
        let text = text_content(&msg);
        assert!(text.contains("Name: Jane"));
        assert!(!text.contains('<'));
    }
}
