//! Request, result and error types exchanged with the protocol engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Compare-and-swap token attached to every stored document.
///
/// Zero means "no optimistic-concurrency check" when passed as an input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cas(pub u64);

impl Cas {
    pub const ZERO: Cas = Cas(0);

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for Cas {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Cas> for u64 {
    fn from(cas: Cas) -> Self {
        cas.0
    }
}

impl std::fmt::Display for Cas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Position of a mutation in the replication stream of its partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationToken {
    pub vbucket_id: u16,
    pub vbucket_uuid: u64,
    pub seq_no: u64,
}

/// What the engine reports for every successful mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationOutcome {
    pub cas: Cas,
    pub token: MutationToken,
}

/// A raw document returned by a random read, prior to transcoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub flags: u32,
    pub cas: Cas,
}

/// Store a document together with its replication metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetMetaRequest {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Opaque extended metadata, forwarded untouched.
    pub extra: Vec<u8>,
    pub flags: u32,
    pub expiry: u32,
    pub cas: Cas,
    /// Revision sequence number used for conflict resolution.
    pub rev_seqno: u64,
}

/// Remove a document while carrying its replication metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteMetaRequest {
    pub key: Vec<u8>,
    pub extra: Vec<u8>,
    pub flags: u32,
    pub expiry: u32,
    pub cas: Cas,
    pub rev_seqno: u64,
}

/// Plain store (upsert) of an already-encoded value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreRequest {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub flags: u32,
    pub expiry: u32,
    pub cas: Cas,
}

/// Errors reported by the protocol engine, either when a request is rejected
/// at submission or through the completion callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The document does not exist (or the bucket is empty for random reads).
    #[error("document not found")]
    KeyNotFound,

    /// The supplied CAS does not match the CAS held by the server.
    #[error("CAS mismatch: document was modified concurrently")]
    CasMismatch,

    /// The engine cannot issue requests right now (no connection, shut down).
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The server is temporarily unable to handle the request.
    #[error("temporary failure, try again later")]
    TemporaryFailure,

    /// Any other server-side failure, surfaced verbatim.
    #[error("server error: {0}")]
    Server(String),
}
