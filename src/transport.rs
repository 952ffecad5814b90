use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::bucket::Bucket;
use crate::content::ExtraInformation;
use crate::error::{ClientError, DeliveryError, UploadFailures};
use crate::hook::Hook;
use crate::message::MessageContext;
use crate::payload::{Attachment, EndpointErrorResponse, WebhookPayload};

/// One outgoing HTTP POST, fully materialized.
///
/// The body is always a plain byte buffer — multipart bodies are
/// assembled before they reach the client, so mock implementations can
/// inspect exactly what would go on the wire.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub url: String,
    pub content_type: String,
    pub body: Bytes,
}

/// The endpoint's answer, status and raw body.
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Bytes,
}

impl WebhookResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client collaborator.
///
/// [`ReqwestClient`] is the default; tests inject recording or failing
/// implementations.
#[async_trait]
pub trait Client: Send + Sync {
    async fn execute(&self, request: WebhookRequest) -> Result<WebhookResponse, ClientError>;
}

/// Default [`Client`] backed by a pooled [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        Self::default()
    }
}

impl From<reqwest::Client> for ReqwestClient {
    fn from(inner: reqwest::Client) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Client for ReqwestClient {
    async fn execute(&self, request: WebhookRequest) -> Result<WebhookResponse, ClientError> {
        let response = self
            .inner
            .post(&request.url)
            .header("Content-Type", request.content_type)
            .body(request.body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify_reqwest_error)?;
        Ok(WebhookResponse { status, body })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout
    } else {
        ClientError::Network(err.to_string())
    }
}

/// Everything one delivery attempt carries through the transport and the
/// hook protocol.
pub struct WebhookContext {
    pub message: Arc<dyn MessageContext>,
    /// Overflow files produced by the content builder.
    pub files: Vec<crate::bucket::FileAttachment>,
    pub payload: WebhookPayload,
    pub extra: ExtraInformation,
    /// Populated once the endpoint answered, whatever the status.
    pub response: Option<WebhookResponse>,
}

/// Serializes packed content to the wire and interprets the endpoint's
/// answer.
pub(crate) struct Transport {
    webhook_url: String,
    client: Arc<dyn Client>,
    hook: Arc<dyn Hook>,
    bucket: Option<Arc<dyn Bucket>>,
}

impl Transport {
    pub fn new(
        webhook_url: String,
        client: Arc<dyn Client>,
        hook: Arc<dyn Hook>,
        bucket: Option<Arc<dyn Bucket>>,
    ) -> Self {
        Self {
            webhook_url,
            client,
            hook,
            bucket,
        }
    }

    /// Delivers one packed attempt, choosing the encoding:
    ///
    /// - no files → plain JSON;
    /// - files and a bucket → upload first, then JSON with URL-carrying
    ///   attachments (partial upload failure is reported only when the
    ///   post itself succeeded);
    /// - files and no bucket → multipart with a part per file plus
    ///   `payload_json`.
    pub async fn deliver(&self, web: &mut WebhookContext) -> Result<(), DeliveryError> {
        match &self.bucket {
            Some(bucket) if !web.files.is_empty() => {
                let upload_failures = self.bucket_upload(bucket.as_ref(), web).await;
                self.post_json(web).await?;
                match upload_failures {
                    Some(failures) => Err(DeliveryError::Upload(failures)),
                    None => Ok(()),
                }
            }
            None if !web.files.is_empty() => self.post_multipart(web).await,
            _ => self.post_json(web).await,
        }
    }

    async fn bucket_upload(
        &self,
        bucket: &dyn Bucket,
        web: &mut WebhookContext,
    ) -> Option<UploadFailures> {
        self.hook.pre_bucket_upload(web).await;
        let results = bucket.upload(web.files.clone()).await;
        self.hook.post_bucket_upload(web, &results).await;

        let mut errors = Vec::new();
        for (id, result) in results.into_iter().enumerate() {
            if let Some(error) = result.error {
                errors.push(error);
                continue;
            }
            web.payload.attachments.push(Attachment {
                id,
                filename: result.file.filename().to_owned(),
                description: result.file.pretext().to_owned(),
                content_type: result.file.content_type().to_owned(),
                size: result.file.size(),
                url: result.url,
            });
        }
        if errors.is_empty() {
            None
        } else {
            Some(UploadFailures(errors))
        }
    }

    async fn post_json(&self, web: &mut WebhookContext) -> Result<(), DeliveryError> {
        self.hook.pre_message(web).await;
        let result = self.post_json_inner(web).await;
        self.hook.post_message(web, result.as_ref().err()).await;
        result
    }

    async fn post_json_inner(&self, web: &mut WebhookContext) -> Result<(), DeliveryError> {
        let body = web.payload.to_json().map_err(|source| DeliveryError::Encode {
            stage: "encode webhook payload",
            source,
        })?;
        let request = WebhookRequest {
            url: self.request_url(&web.payload),
            content_type: "application/json".to_owned(),
            body,
        };
        self.execute(request, web).await
    }

    async fn post_multipart(&self, web: &mut WebhookContext) -> Result<(), DeliveryError> {
        self.hook.pre_message(web).await;
        let result = self.post_multipart_inner(web).await;
        self.hook.post_message(web, result.as_ref().err()).await;
        result
    }

    async fn post_multipart_inner(&self, web: &mut WebhookContext) -> Result<(), DeliveryError> {
        let boundary = format!("alert-dispatcher-{}", web.extra.thread_id.simple());
        let body = build_multipart_body(web, &boundary)?;
        let request = WebhookRequest {
            url: self.request_url(&web.payload),
            content_type: format!("multipart/form-data; boundary={boundary}"),
            body,
        };
        self.execute(request, web).await
    }

    async fn execute(
        &self,
        request: WebhookRequest,
        web: &mut WebhookContext,
    ) -> Result<(), DeliveryError> {
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|source| DeliveryError::Transport {
                stage: "execute webhook request",
                source,
            })?;
        let status = response.status;
        let body = response.body.clone();
        web.response = Some(response);
        if !(200..300).contains(&status) {
            return Err(DeliveryError::Endpoint(EndpointErrorResponse::parse(
                status, body,
            )));
        }
        Ok(())
    }

    fn request_url(&self, payload: &WebhookPayload) -> String {
        let mut url = self.webhook_url.clone();
        let separator = if url.contains('?') { '&' } else { '?' };
        if payload.wait {
            let _ = write!(url, "{separator}wait=true");
            let _ = write!(url, "&thread_id={}", payload.thread_id.simple());
        } else {
            let _ = write!(url, "{separator}thread_id={}", payload.thread_id.simple());
        }
        url
    }
}

/// Assembles the multipart/form-data body: one `files[i]` part per file,
/// then a `payload_json` part carrying the payload with part-index
/// attachments.
fn build_multipart_body(
    web: &mut WebhookContext,
    boundary: &str,
) -> Result<Bytes, DeliveryError> {
    let mut body: Vec<u8> = Vec::with_capacity(4096);

    for (id, file) in web.files.iter().enumerate() {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files[{id}]\"; filename=\"{}\"\r\n",
                file.filename()
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", file.content_type()).as_bytes());
        body.extend_from_slice(file.content());
        body.extend_from_slice(b"\r\n");

        web.payload.attachments.push(Attachment {
            id,
            filename: file.filename().to_owned(),
            description: file.pretext().to_owned(),
            content_type: file.content_type().to_owned(),
            size: file.size(),
            url: None,
        });
    }

    let payload_json = web.payload.to_json().map_err(|source| DeliveryError::Encode {
        stage: "encode multipart payload_json",
        source,
    })?;
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"payload_json\"\r\n");
    body.extend_from_slice(b"Content-Type: application/json\r\n\r\n");
    body.extend_from_slice(&payload_json);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Ok(Bytes::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::FileAttachment;
    use crate::message::EventMessage;
    use chrono::Utc;

    fn context_with_files(files: Vec<FileAttachment>) -> WebhookContext {
        let thread_id = Uuid::now_v7();
        WebhookContext {
            message: Arc::new(EventMessage::new("m")),
            files,
            payload: WebhookPayload::new(thread_id),
            extra: ExtraInformation {
                iteration: 1,
                cooldown_ends: Utc::now(),
                cache_key: "k".to_owned(),
                thread_id,
                force_send: false,
            },
            response: None,
        }
    }

    #[test]
    fn multipart_body_has_one_part_per_file_plus_payload_json() {
        let files = vec![
            FileAttachment::new("a.json", "application/json", "{}"),
            FileAttachment::new("b.txt", "text/plain; charset=utf-8", "hello"),
        ];
        let mut web = context_with_files(files);
        let body = build_multipart_body(&mut web, "BOUNDARY").unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();

        let parts = text.matches("--BOUNDARY\r\n").count();
        assert_eq!(parts, 3, "two file parts plus payload_json");
        assert!(text.contains("name=\"files[0]\"; filename=\"a.json\""));
        assert!(text.contains("name=\"files[1]\"; filename=\"b.txt\""));
        assert!(text.contains("name=\"payload_json\""));
        assert!(text.ends_with("--BOUNDARY--\r\n"));
    }

    #[test]
    fn multipart_attachments_reference_part_indices() {
        let files = vec![FileAttachment::new("a.json", "application/json", "{}")];
        let mut web = context_with_files(files);
        let _ = build_multipart_body(&mut web, "BOUNDARY").unwrap();
        assert_eq!(web.payload.attachments.len(), 1);
        assert_eq!(web.payload.attachments[0].id, 0);
        assert!(web.payload.attachments[0].url.is_none());
    }

    #[test]
    fn payload_json_part_carries_attachments() {
        let files = vec![FileAttachment::new("a.json", "application/json", "{}")];
        let mut web = context_with_files(files);
        let body = build_multipart_body(&mut web, "BOUNDARY").unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let json_part = text
            .split("name=\"payload_json\"")
            .nth(1)
            .expect("payload_json part");
        assert!(json_part.contains("\"filename\":\"a.json\""));
    }
}
