//! Upload payload conversion with scoped acquire/release.
//!
//! Turning caller input into a streamable payload is delegated to an
//! [`UploadConverter`] collaborator, which hands back an [`UploadLease`]:
//! the payload plus a release hook. Whoever consumes the lease must
//! release it on every exit path, including upload failure.

use bcommon::BoxFuture;

use crate::ProviderError;

/// Caller input for a file upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadInput {
    Text(String),
    Bytes(Vec<u8>),
}

/// A payload ready to stream to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPayload {
    pub file_name: String,
    pub content: Vec<u8>,
}

type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A converted payload plus its release hook.
pub struct UploadLease {
    pub payload: UploadPayload,
    cleanup: Option<CleanupFn>,
}

impl std::fmt::Debug for UploadLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadLease")
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

impl UploadLease {
    pub fn new(payload: UploadPayload) -> Self {
        Self {
            payload,
            cleanup: None,
        }
    }

    pub fn with_cleanup(mut self, cleanup: CleanupFn) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    /// Releases whatever the conversion acquired. Safe to call exactly
    /// once; consuming the lease enforces that.
    pub async fn release(mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup().await;
        }
    }
}

pub trait UploadConverter: Send + Sync {
    fn convert<'a>(
        &'a self,
        input: UploadInput,
        suffix: Option<&'a str>,
    ) -> BoxFuture<'a, Result<UploadLease, ProviderError>>;
}

/// Converts in-memory input without acquiring anything, so the release
/// hook is empty. File-system and URL conversion live with the embedder.
#[derive(Debug, Default, Clone, Copy)]
pub struct BufferConverter;

impl UploadConverter for BufferConverter {
    fn convert<'a>(
        &'a self,
        input: UploadInput,
        suffix: Option<&'a str>,
    ) -> BoxFuture<'a, Result<UploadLease, ProviderError>> {
        Box::pin(async move {
            let content = match input {
                UploadInput::Text(text) => text.into_bytes(),
                UploadInput::Bytes(bytes) => bytes,
            };

            if content.is_empty() {
                return Err(ProviderError::invalid_file("invalid file data"));
            }

            let file_name = match suffix {
                Some(suffix) => format!("upload.{suffix}"),
                None => "upload".to_string(),
            };

            Ok(UploadLease::new(UploadPayload { file_name, content }))
        })
    }
}
