//! Raw provider message → `InboundMessage`.
//!
//! Body precedence: a direct body on the top-level part, else the first
//! `text/plain` part found depth-first, else the first `text/html` part
//! converted to text. HTML is the last resort because tag stripping can
//! split or merge numeric tokens.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use regex::Regex;
use tracing::debug;

use crate::error::NormalizeError;
use crate::mail::{MessagePart, RawMessage};
use crate::pipeline::types::InboundMessage;

static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap());
static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());
static HTML_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Normalize one raw message.
///
/// `Ok(None)` means the message has no sender and is silently unusable.
/// `Err` means the payload itself is malformed.
pub fn normalize(raw: &RawMessage) -> Result<Option<InboundMessage>, NormalizeError> {
    if let Some(payload) = &raw.payload {
        normalize_structured(raw, payload)
    } else if let Some(blob) = &raw.raw {
        normalize_rfc822(raw, blob)
    } else {
        Err(NormalizeError::Unparseable {
            message_id: raw.id.clone(),
            reason: "message has neither payload nor raw content".into(),
        })
    }
}

fn normalize_structured(
    raw: &RawMessage,
    payload: &MessagePart,
) -> Result<Option<InboundMessage>, NormalizeError> {
    let Some(sender) = payload
        .header("From")
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        debug!(message_id = %raw.id, "Skipping message without sender");
        return Ok(None);
    };

    let subject = payload.header("Subject").unwrap_or_default().trim();

    let received_at = provider_receipt_time(raw)
        .or_else(|| payload.header("Date").and_then(parse_date_header))
        .ok_or_else(|| NormalizeError::MissingTimestamp {
            message_id: raw.id.clone(),
        })?;

    let body_text = extract_body(&raw.id, payload)?;

    Ok(Some(InboundMessage {
        id: raw.id.clone(),
        subject: subject.to_string(),
        sender: sender.to_string(),
        body_text,
        received_at,
    }))
}

fn normalize_rfc822(raw: &RawMessage, blob: &str) -> Result<Option<InboundMessage>, NormalizeError> {
    let bytes = decode_base64url(&raw.id, blob)?;
    let parsed =
        MessageParser::default()
            .parse(bytes.as_slice())
            .ok_or_else(|| NormalizeError::Unparseable {
                message_id: raw.id.clone(),
                reason: "not an RFC 822 message".into(),
            })?;

    let Some(sender) = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        debug!(message_id = %raw.id, "Skipping message without sender");
        return Ok(None);
    };

    let received_at = provider_receipt_time(raw)
        .or_else(|| {
            parsed
                .date()
                .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        })
        .ok_or_else(|| NormalizeError::MissingTimestamp {
            message_id: raw.id.clone(),
        })?;

    let body_text = if let Some(text) = parsed.body_text(0) {
        text.trim().to_string()
    } else if let Some(html) = parsed.body_html(0) {
        html_to_text(html.as_ref())
    } else {
        String::new()
    };

    Ok(Some(InboundMessage {
        id: raw.id.clone(),
        subject: parsed.subject().unwrap_or_default().trim().to_string(),
        sender: sender.to_string(),
        body_text,
        received_at,
    }))
}

/// Provider receipt time from `internalDate` (epoch millis).
fn provider_receipt_time(raw: &RawMessage) -> Option<DateTime<Utc>> {
    let millis = raw.internal_date.as_deref()?.trim().parse::<i64>().ok()?;
    DateTime::from_timestamp_millis(millis)
}

/// Parse an RFC 2822 `Date` header, tolerating a trailing `(UTC)` comment.
fn parse_date_header(value: &str) -> Option<DateTime<Utc>> {
    let value = value.split(" (").next().unwrap_or(value).trim();
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn extract_body(message_id: &str, payload: &MessagePart) -> Result<String, NormalizeError> {
    if let Some(data) = payload.data() {
        let text = decode_text(message_id, data)?;
        return Ok(if payload.is_mime("text/html") {
            html_to_text(&text)
        } else {
            text.trim().to_string()
        });
    }

    if let Some(data) = find_part(payload, "text/plain").and_then(MessagePart::data) {
        return Ok(decode_text(message_id, data)?.trim().to_string());
    }

    if let Some(data) = find_part(payload, "text/html").and_then(MessagePart::data) {
        return Ok(html_to_text(&decode_text(message_id, data)?));
    }

    Ok(String::new())
}

/// Depth-first search for the first descendant of `mime` type with a body.
fn find_part<'a>(part: &'a MessagePart, mime: &str) -> Option<&'a MessagePart> {
    for child in &part.parts {
        if child.is_mime(mime) && child.data().is_some() {
            return Some(child);
        }
        if let Some(found) = find_part(child, mime) {
            return Some(found);
        }
    }
    None
}

fn decode_text(message_id: &str, data: &str) -> Result<String, NormalizeError> {
    let bytes = decode_base64url(message_id, data)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Decode base64url with or without padding; standard alphabet as fallback.
fn decode_base64url(message_id: &str, data: &str) -> Result<Vec<u8>, NormalizeError> {
    let cleaned: String = data
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .trim_end_matches('=')
        .to_string();

    URL_SAFE_NO_PAD
        .decode(&cleaned)
        .or_else(|_| STANDARD_NO_PAD.decode(&cleaned))
        .map_err(|e| NormalizeError::Decode {
            message_id: message_id.to_string(),
            reason: e.to_string(),
        })
}

/// Convert HTML to plain text.
///
/// Drops `<style>`/`<script>` blocks and comments, replaces tags with a
/// space, decodes the common entities and collapses whitespace.
pub fn html_to_text(html: &str) -> String {
    let text = STYLE_BLOCK.replace_all(html, "");
    let text = SCRIPT_BLOCK.replace_all(&text, "");
    let text = HTML_COMMENT.replace_all(&text, "");
    let text = HTML_TAG.replace_all(&text, " ");

    // &amp; last so "&amp;lt;" decodes to "&lt;", not "<".
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
