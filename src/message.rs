use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Severity of one loggable event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the service emitting events.
///
/// All fields are optional; empty strings are omitted from key building
/// and from rendered output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Service {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub environment: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub repository: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub branch: String,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

impl fmt::Display for Service {
    /// Renders as `name-version-type-environment`, omitting empty fields.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut written = false;
        for part in [&self.name, &self.version, &self.kind, &self.environment] {
            if part.is_empty() {
                continue;
            }
            if written {
                f.write_str("-")?;
            }
            f.write_str(part)?;
            written = true;
        }
        Ok(())
    }
}

/// Source location an event or error originates from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub file: String,
    pub line: u32,
    pub function: Option<String>,
}

impl Caller {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            function: None,
        }
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    /// Like `to_string`, but safe for use as a cache-key segment: every
    /// rune other than letters, digits, `-` and `.` becomes `_`.
    pub fn format_as_key(&self) -> String {
        let raw = self.to_string();
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Captures the current source location as a [`Caller`].
#[macro_export]
macro_rules! caller {
    () => {
        $crate::Caller::new(file!(), line!())
    };
}

/// A chain-walkable error attached to an event.
///
/// The dispatch core never downcasts; it only reads the message, the
/// origin location and the wrapped cause, iterating until the chain ends.
pub trait EventError: Send + Sync {
    fn message(&self) -> String;
    fn caller(&self) -> Option<&Caller>;
    fn cause(&self) -> Option<&dyn EventError>;
}

/// Joins every message in the chain with `": "`, outermost first.
pub fn chain_message(err: &dyn EventError) -> String {
    let mut out = err.message();
    let mut current = err.cause();
    while let Some(cause) = current {
        out.push_str(": ");
        out.push_str(&cause.message());
        current = cause.cause();
    }
    out
}

/// Renders the whole chain as nested JSON: `{message, caller, cause: …}`.
pub fn error_detail_json(err: &dyn EventError) -> Value {
    let mut detail = serde_json::Map::new();
    detail.insert("message".to_owned(), Value::String(err.message()));
    if let Some(caller) = err.caller() {
        detail.insert("caller".to_owned(), Value::String(caller.to_string()));
    }
    if let Some(cause) = err.cause() {
        detail.insert("cause".to_owned(), error_detail_json(cause));
    }
    Value::Object(detail)
}

/// Default [`EventError`] implementation: a message, an optional origin
/// and an optional wrapped cause.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    message: String,
    caller: Option<Caller>,
    cause: Option<Box<ErrorInfo>>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            caller: None,
            cause: None,
        }
    }

    pub fn with_caller(mut self, caller: Caller) -> Self {
        self.caller = Some(caller);
        self
    }

    /// Wraps `cause` as the next link in the chain.
    pub fn wrap(mut self, cause: ErrorInfo) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Adapts a `std::error::Error` by walking its `source()` chain.
    pub fn from_std(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut messages = Vec::new();
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(e) = current {
            messages.push(e.to_string());
            current = e.source();
        }
        let mut chain: Option<ErrorInfo> = None;
        for message in messages.into_iter().rev() {
            let mut info = ErrorInfo::new(message);
            if let Some(inner) = chain.take() {
                info.cause = Some(Box::new(inner));
            }
            chain = Some(info);
        }
        // messages always has at least one element
        chain.unwrap_or_else(|| ErrorInfo::new("unknown error"))
    }
}

impl EventError for ErrorInfo {
    fn message(&self) -> String {
        self.message.clone()
    }

    fn caller(&self) -> Option<&Caller> {
        self.caller.as_ref()
    }

    fn cause(&self) -> Option<&dyn EventError> {
        self.cause.as_deref().map(|c| c as &dyn EventError)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&chain_message(self))
    }
}

impl std::error::Error for ErrorInfo {}

/// Read-only view of one loggable event.
///
/// Supplied by the embedding application's error/entry subsystem; the
/// dispatch core only reads it. Implementations must be immutable once
/// handed to the dispatcher.
pub trait MessageContext: Send + Sync {
    fn service(&self) -> &Service;
    fn level(&self) -> Level;
    /// Application-defined numeric code (HTTP-like by convention).
    fn code(&self) -> i64;
    fn message(&self) -> &str;
    fn caller(&self) -> &Caller;
    /// The wrapped error, if this event carries one.
    fn err(&self) -> Option<&dyn EventError>;
    /// Arbitrary context payload items attached to the event.
    fn context(&self) -> &[Value];
    /// Explicit dedup key. When absent the caller location is used.
    fn key(&self) -> Option<&str>;
    /// Per-event cooldown override.
    fn cooldown(&self) -> Option<Duration>;
    /// When set, suppression is bypassed for this event.
    fn force_send(&self) -> bool;
    fn time(&self) -> DateTime<Utc>;
}

/// Builder-style [`MessageContext`] implementation for embedders and tests.
#[derive(Clone)]
pub struct EventMessage {
    service: Service,
    level: Level,
    code: i64,
    message: String,
    caller: Caller,
    error: Option<ErrorInfo>,
    context: Vec<Value>,
    key: Option<String>,
    cooldown: Option<Duration>,
    force_send: bool,
    time: DateTime<Utc>,
}

impl EventMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            service: Service::default(),
            level: Level::Error,
            code: 500,
            message: message.into(),
            caller: Caller::new("unknown", 0),
            error: None,
            context: Vec::new(),
            key: None,
            cooldown: None,
            force_send: false,
            time: Utc::now(),
        }
    }

    pub fn with_service(mut self, service: Service) -> Self {
        self.service = service;
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    pub fn with_caller(mut self, caller: Caller) -> Self {
        self.caller = caller;
        self
    }

    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }

    /// Appends one context payload item.
    pub fn with_context(mut self, item: impl Into<Value>) -> Self {
        self.context.push(item.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn with_force_send(mut self, force_send: bool) -> Self {
        self.force_send = force_send;
        self
    }
}

impl MessageContext for EventMessage {
    fn service(&self) -> &Service {
        &self.service
    }

    fn level(&self) -> Level {
        self.level
    }

    fn code(&self) -> i64 {
        self.code
    }

    fn message(&self) -> &str {
        &self.message
    }

    fn caller(&self) -> &Caller {
        &self.caller
    }

    fn err(&self) -> Option<&dyn EventError> {
        self.error.as_ref().map(|e| e as &dyn EventError)
    }

    fn context(&self) -> &[Value] {
        &self.context
    }

    fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    fn cooldown(&self) -> Option<Duration> {
        self.cooldown
    }

    fn force_send(&self) -> bool {
        self.force_send
    }

    fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Contributes extra key/value fields to the metadata section, e.g.
/// request ids pulled from task-local state.
pub trait TraceCapturer: Send + Sync {
    fn capture(&self) -> Vec<TraceField>;
}

#[derive(Debug, Clone)]
pub struct TraceField {
    pub key: String,
    pub value: String,
}

impl TraceField {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

pub struct NoopTraceCapturer;

impl TraceCapturer for NoopTraceCapturer {
    fn capture(&self) -> Vec<TraceField> {
        Vec::new()
    }
}
