//! Protocol engine capability.
//!
//! # Data Flow
//! ```text
//! Bucket (submitter)
//!     → ProtocolEngine::set_meta / delete_meta / set / get_random
//!     → engine issues the request, returns an OpHandle immediately
//!     → engine worker thread invokes the Callback exactly once
//!       (unless the handle was cancelled before it fired)
//! ```
//!
//! # Design Decisions
//! - The engine is an injected collaborator (`Arc<dyn ProtocolEngine>`),
//!   never ambient global state
//! - Submission never blocks; rejection is reported synchronously
//! - Cancellation is best-effort and client-side only
//!
//! `memory.rs` provides an in-process loopback engine.

use std::sync::Arc;

pub mod memory;
pub mod types;

pub use memory::{MemoryEngine, StoredDocument};
pub use types::{
    Cas, DeleteMetaRequest, EngineError, MutationOutcome, MutationToken, RawDocument,
    SetMetaRequest, StoreRequest,
};

/// Single-shot completion callback handed to the engine.
pub type Callback<T> = Box<dyn FnOnce(Result<T, EngineError>) + Send + 'static>;

/// A request that has been handed to the engine and may still be in flight.
pub trait PendingOp: Send + Sync {
    /// Stop tracking the request.
    ///
    /// Returns `true` if the request was still in flight. Calling it again
    /// has no further effect.
    fn cancel(&self) -> bool;
}

/// Shared handle to an in-flight request.
pub type OpHandle = Arc<dyn PendingOp>;

/// The operations this crate issues against the lower-level client.
pub trait ProtocolEngine: Send + Sync {
    /// Fetch an arbitrary document from the bucket.
    fn get_random(&self, callback: Callback<RawDocument>) -> Result<OpHandle, EngineError>;

    /// Store a document with replication metadata.
    fn set_meta(
        &self,
        request: SetMetaRequest,
        callback: Callback<MutationOutcome>,
    ) -> Result<OpHandle, EngineError>;

    /// Remove a document with replication metadata.
    fn delete_meta(
        &self,
        request: DeleteMetaRequest,
        callback: Callback<MutationOutcome>,
    ) -> Result<OpHandle, EngineError>;

    /// Plain store.
    fn set(
        &self,
        request: StoreRequest,
        callback: Callback<MutationOutcome>,
    ) -> Result<OpHandle, EngineError>;
}
