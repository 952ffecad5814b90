use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn is_zero(n: &u32) -> bool {
    *n == 0
}

fn is_zero_usize(n: &usize) -> bool {
    *n == 0
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One rendered section of a notification, Discord-embed shaped.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// Always `"rich"` for webhook embeds.
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// RFC3339 timestamp of the event.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    /// Color code of the embed.
    #[serde(skip_serializing_if = "is_zero")]
    pub color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

impl Embed {
    pub fn new(title: impl Into<String>, color: u32) -> Self {
        Self {
            title: title.into(),
            kind: "rich".to_owned(),
            color,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    /// Whether this field should display inline.
    #[serde(skip_serializing_if = "is_false")]
    pub inline: bool,
}

impl EmbedField {
    pub fn inline(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline: true,
        }
    }

    pub fn block(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline: false,
        }
    }
}

/// Attachment descriptor.
///
/// With a bucket configured, `url` carries the uploaded file's public
/// address; in the multipart encoding `id` references the matching
/// `files[id]` body part instead.
#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub id: usize,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    #[serde(skip_serializing_if = "is_zero_usize")]
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Wire payload of one webhook post.
///
/// Built once per delivery attempt; mutated only to attach upload URLs
/// after a bucket round completes.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    /// Ask the endpoint to wait for the message to be created before
    /// responding. Rendered as a query parameter, not a body field.
    #[serde(skip)]
    pub wait: bool,
    /// Per-attempt correlation id. Rendered as a query parameter.
    #[serde(skip)]
    pub thread_id: Uuid,
    /// Intro text shown above the embeds.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl WebhookPayload {
    pub fn new(thread_id: Uuid) -> Self {
        Self {
            wait: true,
            thread_id,
            content: String::new(),
            embeds: Vec::new(),
            attachments: Vec::new(),
        }
    }

    /// Serializes the body for both the JSON encoding and the
    /// `payload_json` multipart part.
    pub fn to_json(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// Structured non-2xx response from the webhook endpoint.
#[derive(Debug, Clone)]
pub struct EndpointErrorResponse {
    /// HTTP status of the response.
    pub status: u16,
    /// Endpoint-specific error code, zero when the body carried none.
    pub code: i64,
    /// Endpoint-provided message, or the raw body when unparseable.
    pub message: String,
    /// The unparsed response body.
    pub raw: Bytes,
}

impl EndpointErrorResponse {
    /// Parses a Discord-style `{code, message}` error body. Bodies that
    /// are not JSON degrade to code 0 with the raw text as the message;
    /// parse trouble never masks the status code.
    pub fn parse(status: u16, body: Bytes) -> Self {
        #[derive(Deserialize, Default)]
        struct ErrorBody {
            #[serde(default)]
            code: i64,
            #[serde(default)]
            message: String,
        }

        let parsed: ErrorBody = serde_json::from_slice(&body).unwrap_or_default();
        let message = if parsed.message.is_empty() {
            let text = String::from_utf8_lossy(&body);
            let mut text = text.trim().to_owned();
            if text.len() > 256 {
                let mut cut = 256;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            text
        } else {
            parsed.message
        };

        Self {
            status,
            code: parsed.code,
            message,
            raw: body,
        }
    }
}

impl fmt::Display for EndpointErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "webhook endpoint error: [{}] {} (status {})",
            self.code, self.message, self.status
        )
    }
}

impl std::error::Error for EndpointErrorResponse {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_json_omits_empty_collections() {
        let payload = WebhookPayload::new(Uuid::nil());
        let json: serde_json::Value =
            serde_json::from_slice(&payload.to_json().unwrap()).unwrap();
        assert!(json.get("embeds").is_none());
        assert!(json.get("attachments").is_none());
        assert!(json.get("content").is_none());
        assert!(json.get("wait").is_none());
        assert!(json.get("thread_id").is_none());
    }

    #[test]
    fn payload_json_carries_embeds_and_attachments() {
        let mut payload = WebhookPayload::new(Uuid::nil());
        payload.content = "intro".to_owned();
        payload.embeds.push(Embed::new("Summary", 0x18_8544));
        payload.attachments.push(Attachment {
            id: 0,
            filename: "x.json".to_owned(),
            description: String::new(),
            content_type: "application/json".to_owned(),
            size: 12,
            url: Some("https://cdn.example.com/x.json".to_owned()),
        });

        let json: serde_json::Value =
            serde_json::from_slice(&payload.to_json().unwrap()).unwrap();
        assert_eq!(json["content"], "intro");
        assert_eq!(json["embeds"][0]["title"], "Summary");
        assert_eq!(json["embeds"][0]["type"], "rich");
        assert_eq!(json["attachments"][0]["url"], "https://cdn.example.com/x.json");
    }

    #[test]
    fn parses_structured_error_body() {
        let body = Bytes::from_static(br#"{"code": 50006, "message": "Cannot send an empty message"}"#);
        let response = EndpointErrorResponse::parse(400, body);
        assert_eq!(response.status, 400);
        assert_eq!(response.code, 50_006);
        assert_eq!(response.message, "Cannot send an empty message");
        assert!(response.to_string().contains("50006"));
    }

    #[test]
    fn unparseable_error_body_keeps_status_and_raw() {
        let body = Bytes::from_static(b"<html>bad gateway</html>");
        let response = EndpointErrorResponse::parse(502, body.clone());
        assert_eq!(response.status, 502);
        assert_eq!(response.code, 0);
        assert_eq!(response.message, "<html>bad gateway</html>");
        assert_eq!(response.raw, body);
    }
}
