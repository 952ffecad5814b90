use std::fmt;

use crate::bucket::UploadError;
use crate::payload::EndpointErrorResponse;

/// Transport-level failure from the [`Client`](crate::Client) collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The request exceeded its deadline.
    Timeout,
    /// DNS, connection or protocol failure.
    Network(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Timeout => write!(f, "request timed out"),
            ClientError::Network(message) => write!(f, "network error: {message}"),
        }
    }
}

impl std::error::Error for ClientError {}

/// Aggregate of per-file upload failures from one bucket round.
///
/// Non-fatal: the message is still sent with whichever attachments did
/// succeed.
#[derive(Debug)]
pub struct UploadFailures(pub Vec<UploadError>);

impl fmt::Display for UploadFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to upload {} file(s) to bucket:", self.0.len())?;
        for error in &self.0 {
            write!(f, " [{error}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for UploadFailures {}

/// Failure of a single delivery attempt.
///
/// Never raised on the caller's enqueue path; observable only through
/// [`Dispatcher::wait`](crate::Dispatcher::wait) and the hook protocol.
#[derive(Debug)]
pub enum DeliveryError {
    /// Payload serialization failed. Fatal to the attempt.
    Encode {
        stage: &'static str,
        source: serde_json::Error,
    },
    /// The HTTP call itself failed. Fatal to the attempt.
    Transport {
        stage: &'static str,
        source: ClientError,
    },
    /// The endpoint answered with a non-2xx status.
    Endpoint(EndpointErrorResponse),
    /// Some overflow files failed to upload; the message was still sent.
    Upload(UploadFailures),
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Encode { stage, source } => {
                write!(f, "failed to {stage}: {source}")
            }
            DeliveryError::Transport { stage, source } => {
                write!(f, "failed to {stage}: {source}")
            }
            DeliveryError::Endpoint(response) => fmt::Display::fmt(response, f),
            DeliveryError::Upload(failures) => fmt::Display::fmt(failures, f),
        }
    }
}

impl std::error::Error for DeliveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeliveryError::Encode { source, .. } => Some(source),
            DeliveryError::Transport { source, .. } => Some(source),
            DeliveryError::Endpoint(response) => Some(response),
            DeliveryError::Upload(failures) => Some(failures),
        }
    }
}

/// Multi-error aggregate returned by [`Dispatcher::wait`](crate::Dispatcher::wait).
///
/// One entry per failed delivery attempt since the previous `wait`.
#[derive(Debug)]
pub struct DeliveryFailures(pub Vec<DeliveryError>);

impl DeliveryFailures {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeliveryFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} delivery attempt(s) failed:", self.0.len())?;
        for error in &self.0 {
            write!(f, " [{error}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for DeliveryFailures {}
