//! Caller-facing error taxonomy.

use std::time::Duration;
use thiserror::Error;

use crate::bucket::transcoder::TranscodeError;
use crate::engine::EngineError;

/// Every failure a bucket operation can surface.
///
/// Errors are `Clone` so a terminal future can hand the same outcome to
/// every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BucketError {
    /// The engine rejected the request before issuing it.
    #[error("request rejected at submission: {0}")]
    Submit(EngineError),

    /// The engine or server reported a failure through the callback.
    #[error(transparent)]
    Engine(EngineError),

    /// The read succeeded but the payload could not be decoded.
    #[error("failed to decode document: {0}")]
    Decode(TranscodeError),

    /// The value could not be encoded before submission.
    #[error("failed to encode document: {0}")]
    Encode(TranscodeError),

    /// The local wait exceeded its bound.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl BucketError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BucketError::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BucketError::Cancelled)
    }

    pub fn is_cas_mismatch(&self) -> bool {
        matches!(self.engine_error(), Some(EngineError::CasMismatch))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.engine_error(), Some(EngineError::KeyNotFound))
    }

    /// The engine error behind a submission or protocol failure.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            BucketError::Submit(e) | BucketError::Engine(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for bucket operations.
pub type BucketResult<T> = Result<T, BucketError>;
