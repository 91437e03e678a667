// SPDX-FileCopyrightText: 2026 Atende Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider-agnostic payload classification.
//!
//! The ingestion caller flattens whatever the channel delivered into an
//! [`InboundPayload`]; this module owns the total mapping from that shape to
//! the closed [`MessageKind`] set and the human-readable content fallbacks.
//! Wire-format parsing of provider webhooks stays outside the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::MessageKind;

/// Maximum characters of a ticket's last-message preview.
pub const PREVIEW_MAX_CHARS: usize = 280;

/// Media attachment description inside an [`InboundPayload`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMedia {
    /// Raw provider media kind (`"image"`, `"ptt"`, `"sticker"`, ...).
    pub kind: String,
    pub url: Option<String>,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub size_bytes: Option<i64>,
}

/// Normalized envelope of one inbound provider event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundPayload {
    /// Message text, or the caption when the event carries media.
    pub body: Option<String>,
    pub media: Option<InboundMedia>,
    /// Provider timestamp in any of the accepted encodings; see
    /// [`crate::time::parse_event_timestamp`].
    pub timestamp: Option<Value>,
    /// Messaging instance (connection) the event arrived through.
    pub instance_id: Option<String>,
    /// Provider-specific leftovers, merged verbatim into message metadata.
    #[serde(default)]
    pub extra: serde_json::Map<String, Value>,
}

impl InboundPayload {
    fn trimmed_body(&self) -> Option<&str> {
        self.body.as_deref().map(str::trim).filter(|b| !b.is_empty())
    }
}

/// Coarse classification of a payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    Text,
    Media,
    Unknown,
}

/// Classify a payload: media wins when a descriptor with a kind is present,
/// then non-empty text, then unknown.
pub fn classify(payload: &InboundPayload) -> ContentClass {
    if payload
        .media
        .as_ref()
        .is_some_and(|m| !m.kind.trim().is_empty())
    {
        return ContentClass::Media;
    }
    if payload.trimmed_body().is_some() {
        return ContentClass::Text;
    }
    ContentClass::Unknown
}

/// Map a classification plus the raw provider media kind onto the closed
/// storage kind. Unrecognized media kinds collapse to `Document`.
pub fn canonical_kind(class: ContentClass, media_kind: Option<&str>) -> MessageKind {
    match class {
        ContentClass::Text | ContentClass::Unknown => MessageKind::Text,
        ContentClass::Media => match media_kind
            .map(|k| k.trim().to_ascii_lowercase())
            .unwrap_or_default()
            .as_str()
        {
            "image" => MessageKind::Image,
            "video" => MessageKind::Video,
            // ptt is the push-to-talk voice-note kind some providers send.
            "audio" | "voice" | "ptt" => MessageKind::Audio,
            _ => MessageKind::Document,
        },
    }
}

/// Human-readable stand-in used when the payload has no text of its own.
pub fn content_fallback(class: ContentClass, kind: MessageKind) -> String {
    match class {
        ContentClass::Media => format!("[{kind}]"),
        ContentClass::Unknown => "[Unsupported message]".to_string(),
        ContentClass::Text => "[Message]".to_string(),
    }
}

/// Derive the stored `(content, caption)` pair for a payload.
///
/// Text events store the body as content. Media events keep the body as the
/// caption and use it (or the fallback) as content, so previews and search
/// always have something to show.
pub fn resolve_content(payload: &InboundPayload, class: ContentClass, kind: MessageKind) -> (String, Option<String>) {
    let body = payload.trimmed_body().map(str::to_string);
    match class {
        ContentClass::Media => {
            let content = body
                .clone()
                .unwrap_or_else(|| content_fallback(class, kind));
            (content, body)
        }
        _ => {
            let content = body.unwrap_or_else(|| content_fallback(class, kind));
            (content, None)
        }
    }
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
