//! Email transport normalizer.
//!
//! SendGrid's Inbound Parse webhook delivers the same email in at least four
//! shapes depending on account configuration: parsed form fields
//! (`text`/`html`), the full raw MIME message in an `email` POST field, the
//! raw MIME message as the entire request body ("Send Raw"), or body content
//! tucked into file parts. This module collapses all of them into one
//! canonical [`NormalizedMessage`].
//!
//! The implementation is a prioritized source-selection pipeline: each
//! candidate source produces a partial message, and partials are merged
//! first-non-empty-wins per field. The raw-request-body parser runs last,
//! only when no body was found, and is allowed to overwrite. Normalization
//! never fails: a candidate that cannot be parsed is logged and skipped.

use crate::models::{AttachmentMeta, NormalizedMessage};
use mail_parser::{MessageParser, PartType};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

/// Line-start prefixes that mark a payload as a raw RFC 822 message rather
/// than literal body text.
const MIME_PREFIXES: &[&str] = &[
    "From ",
    "Received:",
    "Content-Type:",
    "Message-ID:",
    "MIME-Version:",
];

/// The raw request body additionally recognizes `Return-Path:`, which some
/// relays put first.
const RAW_BODY_MIME_PREFIXES: &[&str] = &[
    "From ",
    "Received:",
    "Content-Type:",
    "Message-ID:",
    "MIME-Version:",
    "Return-Path:",
];

const MAX_MESSAGE_ID_LEN: usize = 512;

/// One uploaded file part from the webhook's multipart form.
#[derive(Debug, Clone)]
pub struct FilePart {
    /// Form field name the part was posted under (e.g. `attachment1`).
    pub field_name: String,
    /// Client-supplied file name.
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Unordered bag of webhook input: named form fields, named file parts, and
/// the raw request body. Collected by the handler, consumed here.
#[derive(Debug, Default)]
pub struct WebhookParts {
    pub fields: Vec<(String, String)>,
    pub files: Vec<FilePart>,
    pub raw_body: Vec<u8>,
}

impl WebhookParts {
    /// First non-empty value for a form field.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, v)| k == name && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }
}

/// Accumulated normalization state. Fields are `Some` only when non-empty.
#[derive(Debug, Default)]
struct MessagePartial {
    text: Option<String>,
    html: Option<String>,
    from: Option<String>,
    to: Option<String>,
    subject: Option<String>,
    message_id: Option<String>,
}

impl MessagePartial {
    fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.html.is_none()
            && self.from.is_none()
            && self.to.is_none()
            && self.subject.is_none()
            && self.message_id.is_none()
    }

    fn has_body(&self) -> bool {
        self.text.is_some() || self.html.is_some()
    }

    /// Set a field only when non-empty after trimming.
    fn set(slot: &mut Option<String>, value: &str) {
        if slot.is_none() && !value.trim().is_empty() {
            *slot = Some(value.to_string());
        }
    }

    /// First-non-empty-wins merge: fields already present are kept.
    fn merge_missing(&mut self, other: MessagePartial) {
        self.text = self.text.take().or(other.text);
        self.html = self.html.take().or(other.html);
        self.from = self.from.take().or(other.from);
        self.to = self.to.take().or(other.to);
        self.subject = self.subject.take().or(other.subject);
        self.message_id = self.message_id.take().or(other.message_id);
    }

    /// Last-resort merge: fields present in `other` replace ours.
    fn merge_overwrite(&mut self, other: MessagePartial) {
        self.text = other.text.or(self.text.take());
        self.html = other.html.or(self.html.take());
        self.from = other.from.or(self.from.take());
        self.to = other.to.or(self.to.take());
        self.subject = other.subject.or(self.subject.take());
        self.message_id = other.message_id.or(self.message_id.take());
    }
}

type SourceFn = fn(&WebhookParts, &MessagePartial) -> MessagePartial;

/// Candidate sources in strict precedence order.
const SOURCES: &[(&str, SourceFn)] = &[
    ("form-fields", from_primary_fields),
    ("alternate-fields", from_alternate_fields),
    ("email-field", from_email_field),
    ("file-parts", from_file_parts),
];

/// Collapse a webhook request into the canonical message. Infallible.
pub fn normalize(parts: &WebhookParts) -> NormalizedMessage {
    let mut draft = MessagePartial::default();

    for (label, extract) in SOURCES {
        let partial = extract(parts, &draft);
        if !partial.is_empty() {
            tracing::debug!("transport source '{}' contributed fields", label);
            draft.merge_missing(partial);
        }
    }

    // When "Send Raw" is enabled the raw MIME may be the entire request body
    // (not in any form field). Last resort, so overwrite is allowed.
    if !draft.has_body()
        && !parts.raw_body.is_empty()
        && looks_like_raw_mime(&parts.raw_body, RAW_BODY_MIME_PREFIXES)
    {
        let partial = parse_mime(&parts.raw_body);
        if partial.has_body() {
            tracing::info!("extracted body from raw request body");
        }
        draft.merge_overwrite(partial);
    }

    let message_id = draft
        .message_id
        .or_else(|| parts.field("message_id").map(str::to_string))
        .or_else(|| parts.field("headers").and_then(extract_message_id))
        .map(|m| truncate_chars(m.trim(), MAX_MESSAGE_ID_LEN))
        .unwrap_or_default();

    NormalizedMessage {
        from_address: draft.from.unwrap_or_default(),
        to_address: draft.to.unwrap_or_default(),
        cc: parts.field("cc").unwrap_or_default().to_string(),
        subject: draft.subject.unwrap_or_default(),
        text_body: draft.text.map(|t| t.trim().to_string()).unwrap_or_default(),
        html_body: draft.html.map(|h| h.trim().to_string()).unwrap_or_default(),
        envelope: parse_envelope(parts.field("envelope")),
        attachment_info: collect_attachment_info(parts),
        message_id,
    }
}

/// Step 1: SendGrid's parsed form fields.
fn from_primary_fields(parts: &WebhookParts, _current: &MessagePartial) -> MessagePartial {
    let mut partial = MessagePartial::default();
    for (slot, key) in [
        (&mut partial.text, "text"),
        (&mut partial.html, "html"),
        (&mut partial.from, "from"),
        (&mut partial.to, "to"),
        (&mut partial.subject, "subject"),
    ] {
        if let Some(value) = parts.field(key) {
            MessagePartial::set(slot, value);
        }
    }
    partial
}

/// Step 2: alternate body field names some configurations use.
fn from_alternate_fields(parts: &WebhookParts, _current: &MessagePartial) -> MessagePartial {
    let mut partial = MessagePartial::default();
    if let Some(body) = parts.field("body") {
        MessagePartial::set(&mut partial.text, body);
    }
    if let Some(html) = parts.field("html_body") {
        MessagePartial::set(&mut partial.html, html);
    }
    partial
}

/// Step 3: full message in the `email` POST field. Only consulted when no
/// body was found in the plain fields. Content that does not look like raw
/// MIME is treated as literal text.
fn from_email_field(parts: &WebhookParts, current: &MessagePartial) -> MessagePartial {
    if current.has_body() {
        return MessagePartial::default();
    }
    let Some(raw) = parts.field("email") else {
        return MessagePartial::default();
    };
    let raw = raw.trim();
    if looks_like_raw_mime(raw.as_bytes(), MIME_PREFIXES) {
        let partial = parse_mime(raw.as_bytes());
        if !partial.is_empty() {
            if partial.has_body() {
                tracing::info!("extracted body from POST email field (raw MIME)");
            }
            return partial;
        }
        // Unparseable despite looking like MIME: degrade to literal text.
    }
    let mut partial = MessagePartial::default();
    MessagePartial::set(&mut partial.text, raw);
    partial
}

/// Step 4: body content delivered as file parts. Declared attachment slots
/// are skipped here (metadata is collected separately); everything else is
/// either raw MIME or a plain text/html body file.
fn from_file_parts(parts: &WebhookParts, current: &MessagePartial) -> MessagePartial {
    let slots = attachment_slot_names(parts);
    let mut partial = MessagePartial::default();

    for file in &parts.files {
        if slots.contains(file.field_name.as_str()) {
            continue;
        }
        if file.bytes.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        let ct = file.content_type.to_lowercase();

        if ct == "message/rfc822"
            || ct == "text/rfc822"
            || looks_like_raw_mime(&file.bytes, MIME_PREFIXES)
        {
            let parsed = parse_mime(&file.bytes);
            if !parsed.is_empty() {
                tracing::info!("extracted body from raw MIME file part '{}'", file.field_name);
                partial.merge_missing(parsed);
            }
            continue;
        }

        let content = decode_text(&file.bytes);
        if content.trim().is_empty() {
            continue;
        }
        let field = file.field_name.to_lowercase();
        let text_taken = current.text.is_some() || partial.text.is_some();
        let html_taken = current.html.is_some() || partial.html.is_some();

        if matches!(field.as_str(), "text" | "plain" | "body") || ct.contains("text/plain") {
            if !text_taken {
                partial.text = Some(content);
            }
        } else if matches!(field.as_str(), "html" | "html_body") || ct.contains("text/html") {
            if !html_taken {
                partial.html = Some(content);
            }
        } else if ct.starts_with("text/") || ct.is_empty() {
            if !text_taken && !ct.contains("html") {
                partial.text = Some(content);
            } else if !html_taken && ct.contains("html") {
                partial.html = Some(content);
            }
        }
    }
    partial
}

/// Parse raw RFC 822 bytes into a partial message: first `text/plain` and
/// first `text/html` leaf parts plus From/To/Subject/Message-ID headers.
/// Returns an empty partial when the bytes cannot be parsed.
fn parse_mime(raw: &[u8]) -> MessagePartial {
    let mut partial = MessagePartial::default();
    let Some(msg) = MessageParser::default().parse(raw) else {
        tracing::debug!("failed to parse candidate payload as MIME");
        return partial;
    };

    for part in &msg.parts {
        match &part.body {
            PartType::Text(text) => MessagePartial::set(&mut partial.text, text),
            PartType::Html(html) => MessagePartial::set(&mut partial.html, html),
            _ => {}
        }
    }

    if let Some(from) = format_address(msg.from()) {
        partial.from = Some(from);
    }
    if let Some(to) = format_address(msg.to()) {
        partial.to = Some(to);
    }
    if let Some(subject) = msg.subject() {
        MessagePartial::set(&mut partial.subject, subject);
    }
    if let Some(mid) = msg.message_id() {
        MessagePartial::set(&mut partial.message_id, mid);
    }
    partial
}

fn format_address(address: Option<&mail_parser::Address>) -> Option<String> {
    let addr = address?.first()?;
    let email = addr.address.as_deref().unwrap_or("").trim();
    let formatted = match addr.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() && !email.is_empty() => format!("{} <{}>", name, email),
        Some(name) if !name.is_empty() => name.to_string(),
        _ => email.to_string(),
    };
    (!formatted.is_empty()).then_some(formatted)
}

fn looks_like_raw_mime(data: &[u8], prefixes: &[&str]) -> bool {
    let trimmed = trim_ascii_start(data);
    prefixes.iter().any(|p| trimmed.starts_with(p.as_bytes()))
}

fn trim_ascii_start(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    &data[start..]
}

/// Decode file bytes as UTF-8, falling back to Latin-1.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Names of file parts that are declared attachments (`attachment1..N`,
/// count given by the `attachments` form field).
fn attachment_slot_names(parts: &WebhookParts) -> HashSet<String> {
    let count: usize = parts
        .field("attachments")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    (1..=count).map(|i| format!("attachment{}", i)).collect()
}

/// Record declared attachments as metadata only; their bytes are discarded.
fn collect_attachment_info(parts: &WebhookParts) -> Vec<AttachmentMeta> {
    let slots = attachment_slot_names(parts);
    parts
        .files
        .iter()
        .filter(|f| slots.contains(f.field_name.as_str()))
        .map(|f| AttachmentMeta {
            name: f.file_name.clone(),
            size: f.bytes.len(),
            content_type: f.content_type.clone(),
        })
        .collect()
}

/// The provider sends the SMTP envelope as a JSON-encoded string; a parse
/// failure degrades to an empty object.
fn parse_envelope(raw: Option<&str>) -> Value {
    raw.and_then(|v| serde_json::from_str::<Value>(v).ok())
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::Object(Default::default()))
}

/// Pull a Message-ID out of a raw headers blob.
fn extract_message_id(headers: &str) -> Option<String> {
    // Kept in sync with the header form `Message-ID: <abc@example.com>`.
    static PATTERN: &str = r"(?is)Message-ID:\s*<([^>]+)>";
    let re = Regex::new(PATTERN).expect("valid message-id regex");
    re.captures(headers)
        .map(|c| c[1].trim().to_string())
        .filter(|m| !m.is_empty())
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW_MIME: &str = "Received: from mail.bizbuysell.com (mail.bizbuysell.com [10.0.0.1])\r\n\
        \tby mx.example.com with ESMTP id abc123\r\n\
        From: BizBuySell Leads <leads@bizbuysell.com>\r\n\
        To: inbound@parse.example.com\r\n\
        Subject: New Lead for Listing 2344916\r\n\
        Message-ID: <lead-2344916@bizbuysell.com>\r\n\
        MIME-Version: 1.0\r\n\
        Content-Type: multipart/alternative; boundary=\"sep\"\r\n\
        \r\n\
        --sep\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Name: Jane Doe\r\nEmail: jane@x.com\r\nPhone: 555-123-4567\r\n\
        --sep\r\n\
        Content-Type: text/html; charset=utf-8\r\n\
        \r\n\
        <p>Name: Jane Doe</p>\r\n\
        --sep--\r\n";

    fn fields(pairs: &[(&str, &str)]) -> WebhookParts {
        WebhookParts {
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn parsed_form_fields() {
        let parts = fields(&[
            ("from", "BizBuySell Leads <leads@bizbuysell.com>"),
            ("to", "inbound@parse.example.com"),
            ("subject", "New Lead for Listing 2344916"),
            ("text", "Name: Jane Doe\nEmail: jane@x.com\nPhone: 555-123-4567"),
            ("html", "<p>Name: Jane Doe</p>"),
        ]);
        let msg = normalize(&parts);
        assert_eq!(msg.from_address, "BizBuySell Leads <leads@bizbuysell.com>");
        assert_eq!(msg.subject, "New Lead for Listing 2344916");
        assert!(msg.text_body.contains("Jane Doe"));
        assert!(msg.has_body());
    }

    #[test]
    fn raw_mime_in_email_field() {
        let parts = fields(&[("email", RAW_MIME)]);
        let msg = normalize(&parts);
        assert_eq!(msg.from_address, "BizBuySell Leads <leads@bizbuysell.com>");
        assert_eq!(msg.subject, "New Lead for Listing 2344916");
        assert!(msg.text_body.contains("Phone: 555-123-4567"));
        assert!(msg.html_body.contains("<p>"));
        assert_eq!(msg.message_id, "lead-2344916@bizbuysell.com");
    }

    #[test]
    fn raw_mime_as_request_body() {
        let parts = WebhookParts {
            raw_body: RAW_MIME.as_bytes().to_vec(),
            ..Default::default()
        };
        let msg = normalize(&parts);
        assert_eq!(msg.from_address, "BizBuySell Leads <leads@bizbuysell.com>");
        assert!(msg.text_body.contains("jane@x.com"));
    }

    #[test]
    fn raw_mime_in_file_part() {
        let parts = WebhookParts {
            files: vec![FilePart {
                field_name: "message".to_string(),
                file_name: "message.eml".to_string(),
                content_type: "message/rfc822".to_string(),
                bytes: RAW_MIME.as_bytes().to_vec(),
            }],
            ..Default::default()
        };
        let msg = normalize(&parts);
        assert_eq!(msg.from_address, "BizBuySell Leads <leads@bizbuysell.com>");
        assert!(msg.text_body.contains("Name: Jane Doe"));
    }

    #[test]
    fn all_four_encodings_agree() {
        let by_fields = normalize(&fields(&[
            ("from", "BizBuySell Leads <leads@bizbuysell.com>"),
            ("subject", "New Lead for Listing 2344916"),
            (
                "text",
                "Name: Jane Doe\r\nEmail: jane@x.com\r\nPhone: 555-123-4567",
            ),
        ]));
        let by_email_field = normalize(&fields(&[("email", RAW_MIME)]));
        let by_raw_body = normalize(&WebhookParts {
            raw_body: RAW_MIME.as_bytes().to_vec(),
            ..Default::default()
        });
        let by_file = normalize(&WebhookParts {
            files: vec![FilePart {
                field_name: "email".to_string(),
                file_name: "raw".to_string(),
                content_type: "".to_string(),
                bytes: RAW_MIME.as_bytes().to_vec(),
            }],
            ..Default::default()
        });

        for msg in [&by_email_field, &by_raw_body, &by_file] {
            assert_eq!(msg.from_address, by_fields.from_address);
            assert_eq!(msg.subject, by_fields.subject);
            assert_eq!(msg.text_body, by_fields.text_body);
        }
    }

    #[test]
    fn alternate_field_names() {
        let msg = normalize(&fields(&[
            ("body", "plain body"),
            ("html_body", "<p>html body</p>"),
        ]));
        assert_eq!(msg.text_body, "plain body");
        assert_eq!(msg.html_body, "<p>html body</p>");
    }

    #[test]
    fn parsed_fields_beat_email_field() {
        let msg = normalize(&fields(&[("text", "the real body"), ("email", RAW_MIME)]));
        assert_eq!(msg.text_body, "the real body");
    }

    #[test]
    fn non_mime_email_field_is_literal_text() {
        let msg = normalize(&fields(&[("email", "just a plain message")]));
        assert_eq!(msg.text_body, "just a plain message");
    }

    #[test]
    fn plain_file_part_fills_body_by_name() {
        let parts = WebhookParts {
            files: vec![FilePart {
                field_name: "text".to_string(),
                file_name: "body.txt".to_string(),
                content_type: "text/plain".to_string(),
                bytes: b"file body".to_vec(),
            }],
            ..Default::default()
        };
        assert_eq!(normalize(&parts).text_body, "file body");
    }

    #[test]
    fn html_file_part_routed_by_content_type() {
        let parts = WebhookParts {
            files: vec![FilePart {
                field_name: "part1".to_string(),
                file_name: "body.html".to_string(),
                content_type: "text/html; charset=utf-8".to_string(),
                bytes: b"<b>html</b>".to_vec(),
            }],
            ..Default::default()
        };
        let msg = normalize(&parts);
        assert_eq!(msg.html_body, "<b>html</b>");
        assert_eq!(msg.text_body, "");
    }

    #[test]
    fn declared_attachments_become_metadata_only() {
        let parts = WebhookParts {
            fields: vec![
                ("attachments".to_string(), "1".to_string()),
                ("text".to_string(), "body".to_string()),
            ],
            files: vec![FilePart {
                field_name: "attachment1".to_string(),
                file_name: "resume.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                bytes: vec![0x25, 0x50, 0x44, 0x46],
            }],
            ..Default::default()
        };
        let msg = normalize(&parts);
        assert_eq!(msg.attachment_info.len(), 1);
        assert_eq!(msg.attachment_info[0].name, "resume.pdf");
        assert_eq!(msg.attachment_info[0].size, 4);
        assert_eq!(msg.attachment_info[0].content_type, "application/pdf");
        // Attachment bytes never become body content.
        assert_eq!(msg.text_body, "body");
    }

    #[test]
    fn envelope_parse_failure_degrades_to_empty_object() {
        let msg = normalize(&fields(&[("envelope", "not-json")]));
        assert_eq!(msg.envelope, serde_json::json!({}));

        let msg = normalize(&fields(&[(
            "envelope",
            r#"{"from":"leads@bizbuysell.com","to":["inbound@parse.example.com"]}"#,
        )]));
        assert_eq!(msg.envelope["from"], "leads@bizbuysell.com");
    }

    #[test]
    fn message_id_from_headers_field() {
        let msg = normalize(&fields(&[
            ("text", "body"),
            (
                "headers",
                "Received: by mx\r\nMessage-ID: <abc@example.com>\r\nSubject: x",
            ),
        ]));
        assert_eq!(msg.message_id, "abc@example.com");
    }

    #[test]
    fn message_id_truncated() {
        let long_id = format!("<{}@x.com>", "a".repeat(600));
        let msg = normalize(&fields(&[
            ("text", "body"),
            ("headers", &format!("Message-ID: {}", long_id)),
        ]));
        assert_eq!(msg.message_id.chars().count(), 512);
    }

    #[test]
    fn bodyless_message_still_normalizes() {
        let msg = normalize(&fields(&[("from", "a@b.com"), ("subject", "no body")]));
        assert!(!msg.has_body());
        assert_eq!(msg.from_address, "a@b.com");
    }
}
