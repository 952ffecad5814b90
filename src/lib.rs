//! A single-process notification dispatcher for structured error/event
//! reports, delivered to a chat-webhook endpoint.
//!
//! This crate provides a **bounded, in-memory, best-effort** dispatch
//! pipeline intended to sit behind a logging/observability layer: the
//! caller hands over one event and immediately gets its thread back.
//!
//! ## Guarantees
//! - Bounded resource usage (fixed queue depth, fixed concurrency width)
//! - The caller's request path never blocks and never observes an error
//! - At most one burst per recurring event, with escalating cooldown
//! - Inline content never exceeds the endpoint's payload ceiling;
//!   overflow is diverted to file attachments
//!
//! ## Non-Guarantees
//! - Durability across restarts
//! - Guaranteed delivery (queue overflow drops, failures are collected,
//!   not retried)
//! - Cross-process suppression, unless a shared [`Locker`] backend is
//!   injected
//!
//! Delivery outcomes are observable through [`Dispatcher::wait`] and the
//! [`Hook`] protocol only — "never let logging break the application."

mod bucket;
mod content;
mod cooldown;
mod dispatcher;
mod error;
mod hook;
mod locker;
mod message;
mod payload;
mod queue;
mod transport;

pub use bucket::{Bucket, FileAttachment, UploadError, UploadResult};
pub use content::{BudgetConfig, ExtraInformation};
pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherConfig};
pub use error::{ClientError, DeliveryError, DeliveryFailures, UploadFailures};
pub use hook::{Hook, NoopHook};
pub use locker::{LocalLocker, Locker, LockerError};
pub use message::{
    chain_message, error_detail_json, Caller, ErrorInfo, EventError, EventMessage, Level,
    MessageContext, NoopTraceCapturer, Service, TraceCapturer, TraceField,
};
pub use payload::{Attachment, Embed, EmbedField, EndpointErrorResponse, WebhookPayload};
pub use queue::BoundedQueue;
pub use transport::{Client, ReqwestClient, WebhookContext, WebhookRequest, WebhookResponse};
