//! Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use alert_dispatcher::{
    Bucket, Client, ClientError, DeliveryError, DispatcherConfig, FileAttachment, Hook, Locker,
    LockerError, UploadResult, WebhookContext, WebhookRequest, WebhookResponse,
};

/// Config with test-friendly timings (the defaults poll at 300ms and hold
/// the global lock for 2s after each post).
pub fn fast_config() -> DispatcherConfig {
    DispatcherConfig {
        poll_interval: Duration::from_millis(5),
        global_lock_ttl: Duration::from_secs(5),
        release_delay: Duration::from_millis(10),
        base_cooldown: Duration::from_millis(100),
        ..DispatcherConfig::default()
    }
}

/// Records every request and answers from a scripted queue (204 empty
/// once the script runs out).
#[derive(Default)]
pub struct RecordingClient {
    pub requests: Mutex<Vec<WebhookRequest>>,
    responses: Mutex<VecDeque<(u16, Bytes)>>,
    delay: Option<Duration>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn respond_with(self, status: u16, body: impl Into<Bytes>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back((status, body.into()));
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Client for RecordingClient {
    async fn execute(&self, request: WebhookRequest) -> Result<WebhookResponse, ClientError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.requests.lock().unwrap().push(request);
        let (status, body) = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((204, Bytes::new()));
        Ok(WebhookResponse { status, body })
    }
}

/// Captures hook callbacks for assertions.
#[derive(Default)]
pub struct RecordingHook {
    /// One entry per `post_message`: the delivery error's display text,
    /// `None` on success.
    pub outcomes: Mutex<Vec<Option<String>>>,
    /// Iteration observed per attempt.
    pub iterations: Mutex<Vec<u32>>,
    pub bucket_uploads: Mutex<usize>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Hook for RecordingHook {
    async fn post_message(&self, web: &WebhookContext, err: Option<&DeliveryError>) {
        self.outcomes
            .lock()
            .unwrap()
            .push(err.map(|e| e.to_string()));
        self.iterations.lock().unwrap().push(web.extra.iteration);
    }

    async fn post_bucket_upload(&self, _web: &WebhookContext, _results: &[UploadResult]) {
        *self.bucket_uploads.lock().unwrap() += 1;
    }
}

/// Uploads everything successfully to a fake public URL.
pub struct StaticBucket {
    pub base_url: String,
}

#[async_trait]
impl Bucket for StaticBucket {
    async fn upload(&self, files: Vec<FileAttachment>) -> Vec<UploadResult> {
        files
            .into_iter()
            .map(|file| {
                let url = format!("{}/{}", self.base_url, file.filename());
                UploadResult::success(file, url)
            })
            .collect()
    }
}

/// Fails the first file of every round, uploads the rest.
pub struct FlakyBucket {
    pub base_url: String,
}

#[async_trait]
impl Bucket for FlakyBucket {
    async fn upload(&self, files: Vec<FileAttachment>) -> Vec<UploadResult> {
        files
            .into_iter()
            .enumerate()
            .map(|(i, file)| {
                if i == 0 {
                    UploadResult::failure(file, "access denied")
                } else {
                    let url = format!("{}/{}", self.base_url, file.filename());
                    UploadResult::success(file, url)
                }
            })
            .collect()
    }
}

/// A store whose every operation fails; the cooldown engine must degrade
/// to "always send".
pub struct BrokenLocker;

#[async_trait]
impl Locker for BrokenLocker {
    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), LockerError> {
        Err(LockerError::Backend("store unreachable".to_owned()))
    }

    async fn get(&self, _key: &str) -> Result<Vec<u8>, LockerError> {
        Err(LockerError::Backend("store unreachable".to_owned()))
    }

    async fn delete(&self, _key: &str) {}

    async fn exist(&self, _key: &str) -> bool {
        false
    }

    fn separator(&self) -> &str {
        "::"
    }
}
