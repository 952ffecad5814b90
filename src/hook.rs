use async_trait::async_trait;

use crate::bucket::UploadResult;
use crate::error::DeliveryError;
use crate::transport::WebhookContext;

/// Extension points bracketing delivery and bucket uploads.
///
/// All methods default to no-ops. The per-attempt correlation id in
/// [`WebhookContext::extra`] links a pre hook to its matching post hook;
/// every delivery additionally runs inside a tracing span carrying that
/// id, so hook implementations may stash request-scoped state in
/// task-local or span-local storage.
///
/// `post_message` is the designated place to log delivery outcomes: it
/// always fires, with `None` on success and the delivery error otherwise.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn pre_message(&self, _web: &WebhookContext) {}

    async fn post_message(&self, _web: &WebhookContext, _err: Option<&DeliveryError>) {}

    async fn pre_bucket_upload(&self, _web: &WebhookContext) {}

    async fn post_bucket_upload(&self, _web: &WebhookContext, _results: &[UploadResult]) {}
}

/// Default [`Hook`]: does nothing.
pub struct NoopHook;

#[async_trait]
impl Hook for NoopHook {}
