//! In-process loopback engine.
//!
//! # Responsibilities
//! - Hold documents in memory and apply CAS rules the way the server does
//! - Deliver callbacks on a dedicated worker thread, never the caller's
//! - Simulate latency, unresponsive servers and submission rejection
//!
//! # Design Decisions
//! - A request is tracked in `inflight` until the worker claims it; whoever
//!   removes the entry first (worker or `cancel`) decides whether the
//!   callback runs
//! - Cancelled callbacks are dropped without being invoked

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::engine::{
    Callback, Cas, DeleteMetaRequest, EngineError, MutationOutcome, MutationToken, OpHandle,
    PendingOp, ProtocolEngine, RawDocument, SetMetaRequest, StoreRequest,
};

/// Number of partitions keys are hashed into for mutation tokens.
const VBUCKET_COUNT: u32 = 1024;

/// A document as held by the loopback engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub value: Vec<u8>,
    pub flags: u32,
    pub cas: Cas,
    pub expiry: u32,
    pub extra: Vec<u8>,
    pub rev_seqno: u64,
}

#[derive(Debug, Clone, Default)]
struct Behavior {
    latency: Duration,
    stalled: bool,
    reject: Option<EngineError>,
}

type Job = Box<dyn FnOnce(&Store) + Send>;

struct Queued {
    op_id: u64,
    job: Job,
}

struct Store {
    docs: DashMap<Vec<u8>, StoredDocument>,
    inflight: DashMap<u64, &'static str>,
    parked: Mutex<HashMap<u64, Job>>,
    behavior: Mutex<Behavior>,
    next_op: AtomicU64,
    next_cas: AtomicU64,
    next_seqno: AtomicU64,
    cancelled: AtomicU64,
    vbucket_uuid: u64,
}

impl Store {
    fn behavior(&self) -> MutexGuard<'_, Behavior> {
        self.behavior.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn parked(&self) -> MutexGuard<'_, HashMap<u64, Job>> {
        self.parked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_outcome(&self, key: &[u8]) -> MutationOutcome {
        let vbucket = key
            .iter()
            .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(*b)))
            % VBUCKET_COUNT;

        MutationOutcome {
            cas: Cas(self.next_cas.fetch_add(1, Ordering::SeqCst)),
            token: MutationToken {
                vbucket_id: vbucket as u16,
                vbucket_uuid: self.vbucket_uuid,
                seq_no: self.next_seqno.fetch_add(1, Ordering::SeqCst),
            },
        }
    }

    fn check_cas(existing: Option<&StoredDocument>, cas: Cas) -> Result<(), EngineError> {
        if cas.is_zero() {
            return Ok(());
        }
        match existing {
            None => Err(EngineError::KeyNotFound),
            Some(doc) if doc.cas != cas => Err(EngineError::CasMismatch),
            Some(_) => Ok(()),
        }
    }

    fn write(
        &self,
        key: Vec<u8>,
        cas: Cas,
        mut doc: StoredDocument,
    ) -> Result<MutationOutcome, EngineError> {
        let outcome = match self.docs.entry(key) {
            Entry::Occupied(mut entry) => {
                Self::check_cas(Some(entry.get()), cas)?;
                let outcome = self.next_outcome(entry.key());
                doc.cas = outcome.cas;
                entry.insert(doc);
                outcome
            }
            Entry::Vacant(entry) => {
                Self::check_cas(None, cas)?;
                let outcome = self.next_outcome(entry.key());
                doc.cas = outcome.cas;
                entry.insert(doc);
                outcome
            }
        };
        Ok(outcome)
    }

    /// Unconditional store; seeding never goes through CAS checks.
    fn overwrite(&self, key: Vec<u8>, mut doc: StoredDocument) -> MutationOutcome {
        let outcome = self.next_outcome(&key);
        doc.cas = outcome.cas;
        self.docs.insert(key, doc);
        outcome
    }

    fn apply_set_meta(&self, request: SetMetaRequest) -> Result<MutationOutcome, EngineError> {
        let doc = StoredDocument {
            value: request.value,
            flags: request.flags,
            cas: Cas::ZERO,
            expiry: request.expiry,
            extra: request.extra,
            rev_seqno: request.rev_seqno,
        };
        self.write(request.key, request.cas, doc)
    }

    fn apply_set(&self, request: StoreRequest) -> Result<MutationOutcome, EngineError> {
        let doc = StoredDocument {
            value: request.value,
            flags: request.flags,
            cas: Cas::ZERO,
            expiry: request.expiry,
            extra: Vec::new(),
            rev_seqno: 0,
        };
        self.write(request.key, request.cas, doc)
    }

    fn apply_delete_meta(&self, request: DeleteMetaRequest) -> Result<MutationOutcome, EngineError> {
        match self.docs.entry(request.key) {
            Entry::Occupied(entry) => {
                Self::check_cas(Some(entry.get()), request.cas)?;
                let outcome = self.next_outcome(entry.key());
                entry.remove();
                Ok(outcome)
            }
            Entry::Vacant(_) => Err(EngineError::KeyNotFound),
        }
    }

    fn random_document(&self) -> Result<RawDocument, EngineError> {
        let len = self.docs.len();
        if len == 0 {
            return Err(EngineError::KeyNotFound);
        }
        let index = fastrand::usize(..len);
        self.docs
            .iter()
            .nth(index)
            .map(|entry| RawDocument {
                key: entry.key().clone(),
                value: entry.value().value.clone(),
                flags: entry.value().flags,
                cas: entry.value().cas,
            })
            .ok_or(EngineError::KeyNotFound)
    }
}

/// Cancellable handle for a request issued to a [`MemoryEngine`].
struct MemoryOp {
    op_id: u64,
    store: Arc<Store>,
}

impl PendingOp for MemoryOp {
    fn cancel(&self) -> bool {
        let was_inflight = self.store.inflight.remove(&self.op_id).is_some();
        self.store.parked().remove(&self.op_id);
        if was_inflight {
            self.store.cancelled.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(op_id = self.op_id, "memory engine request cancelled");
        }
        was_inflight
    }
}

/// Loopback [`ProtocolEngine`] backed by a concurrent map.
pub struct MemoryEngine {
    store: Arc<Store>,
    jobs: mpsc::UnboundedSender<Queued>,
}

impl MemoryEngine {
    /// Create an engine and start its callback worker thread.
    ///
    /// The worker exits once the engine is dropped.
    pub fn new() -> Self {
        let store = Arc::new(Store {
            docs: DashMap::new(),
            inflight: DashMap::new(),
            parked: Mutex::new(HashMap::new()),
            behavior: Mutex::new(Behavior::default()),
            next_op: AtomicU64::new(1),
            next_cas: AtomicU64::new(1),
            next_seqno: AtomicU64::new(1),
            cancelled: AtomicU64::new(0),
            vbucket_uuid: fastrand::u64(1..),
        });
        let (jobs, mut rx) = mpsc::unbounded_channel::<Queued>();

        let worker_store = Arc::clone(&store);
        thread::spawn(move || {
            while let Some(queued) = rx.blocking_recv() {
                let latency = worker_store.behavior().latency;
                if !latency.is_zero() {
                    thread::sleep(latency);
                }
                // Claim the request; a concurrent cancel wins if it got here first.
                if worker_store.inflight.remove(&queued.op_id).is_none() {
                    continue;
                }
                (queued.job)(&worker_store);
            }
            tracing::debug!("memory engine worker stopped");
        });

        Self { store, jobs }
    }

    /// Delay every callback by `latency` on the worker thread.
    pub fn set_latency(&self, latency: Duration) {
        self.store.behavior().latency = latency;
    }

    /// While stalled, accepted requests are parked and never answered
    /// until [`release_stalled`](Self::release_stalled) is called.
    pub fn set_stalled(&self, stalled: bool) {
        self.store.behavior().stalled = stalled;
    }

    /// Reject every subsequent submission with `error` (`None` to accept again).
    pub fn reject_submissions(&self, error: Option<EngineError>) {
        self.store.behavior().reject = error;
    }

    /// Un-stall and hand every parked request to the worker.
    ///
    /// Returns the number of requests released.
    pub fn release_stalled(&self) -> usize {
        self.set_stalled(false);
        let parked: Vec<(u64, Job)> = self.store.parked().drain().collect();
        let count = parked.len();
        for (op_id, job) in parked {
            let _ = self.jobs.send(Queued { op_id, job });
        }
        count
    }

    /// Insert a document directly, bypassing the callback path.
    pub fn seed(&self, key: &str, value: &[u8], flags: u32) -> Cas {
        let doc = StoredDocument {
            value: value.to_vec(),
            flags,
            cas: Cas::ZERO,
            expiry: 0,
            extra: Vec::new(),
            rev_seqno: 0,
        };
        self.store.overwrite(key.as_bytes().to_vec(), doc).cas
    }

    /// Snapshot of a stored document.
    pub fn document(&self, key: &str) -> Option<StoredDocument> {
        self.store.docs.get(key.as_bytes()).map(|r| r.value().clone())
    }

    /// Current CAS of a document, if present.
    pub fn cas_of(&self, key: &str) -> Option<Cas> {
        self.store.docs.get(key.as_bytes()).map(|r| r.value().cas)
    }

    /// Current value of a document, if present.
    pub fn value_of(&self, key: &str) -> Option<Vec<u8>> {
        self.store.docs.get(key.as_bytes()).map(|r| r.value().value.clone())
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.store.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.docs.is_empty()
    }

    /// Requests accepted but not yet answered or cancelled.
    pub fn in_flight(&self) -> usize {
        self.store.inflight.len()
    }

    /// Requests that were cancelled while still in flight.
    pub fn cancelled_count(&self) -> u64 {
        self.store.cancelled.load(Ordering::Relaxed)
    }

    fn submit(&self, op: &'static str, job: Job) -> Result<OpHandle, EngineError> {
        let (stalled, reject) = {
            let behavior = self.store.behavior();
            (behavior.stalled, behavior.reject.clone())
        };
        if let Some(error) = reject {
            return Err(error);
        }

        let op_id = self.store.next_op.fetch_add(1, Ordering::Relaxed);
        self.store.inflight.insert(op_id, op);

        if stalled {
            self.store.parked().insert(op_id, job);
        } else if self.jobs.send(Queued { op_id, job }).is_err() {
            self.store.inflight.remove(&op_id);
            return Err(EngineError::Unavailable("memory engine worker stopped".to_string()));
        }

        tracing::trace!(op, op_id, "memory engine request accepted");
        Ok(Arc::new(MemoryOp {
            op_id,
            store: Arc::clone(&self.store),
        }))
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("documents", &self.store.docs.len())
            .field("in_flight", &self.store.inflight.len())
            .finish()
    }
}

impl ProtocolEngine for MemoryEngine {
    fn get_random(&self, callback: Callback<RawDocument>) -> Result<OpHandle, EngineError> {
        self.submit(
            "get_random",
            Box::new(move |store: &Store| callback(store.random_document())),
        )
    }

    fn set_meta(
        &self,
        request: SetMetaRequest,
        callback: Callback<MutationOutcome>,
    ) -> Result<OpHandle, EngineError> {
        self.submit(
            "set_meta",
            Box::new(move |store: &Store| callback(store.apply_set_meta(request))),
        )
    }

    fn delete_meta(
        &self,
        request: DeleteMetaRequest,
        callback: Callback<MutationOutcome>,
    ) -> Result<OpHandle, EngineError> {
        self.submit(
            "delete_meta",
            Box::new(move |store: &Store| callback(store.apply_delete_meta(request))),
        )
    }

    fn set(
        &self,
        request: StoreRequest,
        callback: Callback<MutationOutcome>,
    ) -> Result<OpHandle, EngineError> {
        self.submit(
            "set",
            Box::new(move |store: &Store| callback(store.apply_set(request))),
        )
    }
}
