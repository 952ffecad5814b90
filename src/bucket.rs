use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

/// Overflow-file content offered for out-of-band upload.
///
/// The content is an immutable byte buffer; handing a `FileAttachment` to
/// a [`Bucket`] transfers ownership of the buffer, so there is nothing for
/// the caller to close afterwards.
#[derive(Debug, Clone)]
pub struct FileAttachment {
    filename: String,
    content_type: String,
    pretext: String,
    content: Bytes,
}

impl FileAttachment {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            pretext: String::new(),
            content: content.into(),
        }
    }

    /// Short human description carried into the attachment descriptor.
    pub fn with_pretext(mut self, pretext: impl Into<String>) -> Self {
        self.pretext = pretext.into();
        self
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn pretext(&self) -> &str {
        &self.pretext
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// A single file's upload failure.
#[derive(Debug, Clone)]
pub struct UploadError {
    pub filename: String,
    pub message: String,
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to upload {}: {}", self.filename, self.message)
    }
}

impl std::error::Error for UploadError {}

/// Outcome of uploading one file.
#[derive(Debug, Clone)]
pub struct UploadResult {
    /// The file this result belongs to. Its content may have been
    /// consumed by the upload; only the metadata is meaningful here.
    pub file: FileAttachment,
    /// Public URL of the uploaded file on success.
    pub url: Option<String>,
    /// Set when the upload failed.
    pub error: Option<UploadError>,
}

impl UploadResult {
    pub fn success(file: FileAttachment, url: impl Into<String>) -> Self {
        Self {
            file,
            url: Some(url.into()),
            error: None,
        }
    }

    pub fn failure(file: FileAttachment, message: impl Into<String>) -> Self {
        let error = UploadError {
            filename: file.filename().to_owned(),
            message: message.into(),
        };
        Self {
            file,
            url: None,
            error: Some(error),
        }
    }
}

/// Object storage collaborator for overflow files.
///
/// `upload` must return exactly one result per input file, in the same
/// order. Partial failure is expected: each result carries either a
/// public URL or an error.
#[async_trait]
pub trait Bucket: Send + Sync {
    async fn upload(&self, files: Vec<FileAttachment>) -> Vec<UploadResult>;
}
