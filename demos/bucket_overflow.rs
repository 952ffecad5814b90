//! Demonstrates overflow-to-attachment with an object-storage bucket:
//! oversized context data is truncated inline and uploaded in full, and
//! the notification links to the uploaded files.

use std::sync::Arc;

use async_trait::async_trait;

use alert_dispatcher::{
    caller, Bucket, Dispatcher, EventMessage, FileAttachment, Service, UploadResult,
};

/// Stand-in for an S3/MinIO backend: pretends every upload succeeded.
struct FakeBucket;

#[async_trait]
impl Bucket for FakeBucket {
    async fn upload(&self, files: Vec<FileAttachment>) -> Vec<UploadResult> {
        files
            .into_iter()
            .map(|file| {
                let url = format!("https://cdn.example.com/alerts/{}", file.filename());
                UploadResult::success(file, url)
            })
            .collect()
    }
}

#[tokio::main]
async fn main() {
    let dispatcher = Dispatcher::builder("https://discord.com/api/webhooks/123/token")
        .with_name("ingest-alerts")
        .with_bucket(Arc::new(FakeBucket))
        .build();

    let giant_payload: Vec<_> = (0..2_000)
        .map(|i| serde_json::json!({ "row": i, "status": "rejected" }))
        .collect();

    let event = EventMessage::new("bulk import rejected rows")
        .with_service(Service::new("ingest").with_environment("staging"))
        .with_caller(caller!())
        .with_context(serde_json::Value::Array(giant_payload));

    dispatcher.send_message(event);

    if let Err(failures) = dispatcher.wait().await {
        eprintln!("some notifications failed: {failures}");
    }
}
