//! Shared utilities for integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bucket_bridge::engine::{
    Callback, DeleteMetaRequest, EngineError, MutationOutcome, OpHandle, PendingOp,
    ProtocolEngine, RawDocument, SetMetaRequest, StoreRequest,
};

/// Operation handle that counts how often it was cancelled.
#[derive(Default)]
pub struct CountingOp {
    cancels: AtomicUsize,
}

impl CountingOp {
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl PendingOp for CountingOp {
    fn cancel(&self) -> bool {
        self.cancels.fetch_add(1, Ordering::SeqCst) == 0
    }
}

/// A mutation request captured by [`ManualEngine`].
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum Mutation {
    SetMeta(SetMetaRequest),
    DeleteMeta(DeleteMetaRequest),
    Set(StoreRequest),
}

/// Engine that never answers on its own: tests pull captured callbacks and
/// fire them whenever (and from whichever thread) they like.
#[allow(dead_code)]
#[derive(Default)]
pub struct ManualEngine {
    reads: Mutex<VecDeque<(Arc<CountingOp>, Callback<RawDocument>)>>,
    mutations: Mutex<VecDeque<(Arc<CountingOp>, Mutation, Callback<MutationOutcome>)>>,
    reject: Mutex<Option<EngineError>>,
}

#[allow(dead_code)]
impl ManualEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_with(&self, error: EngineError) {
        *self.reject.lock().unwrap() = Some(error);
    }

    pub fn take_read(&self) -> Option<(Arc<CountingOp>, Callback<RawDocument>)> {
        self.reads.lock().unwrap().pop_front()
    }

    pub fn take_mutation(&self) -> Option<(Arc<CountingOp>, Mutation, Callback<MutationOutcome>)> {
        self.mutations.lock().unwrap().pop_front()
    }

    pub fn pending_reads(&self) -> usize {
        self.reads.lock().unwrap().len()
    }

    pub fn pending_mutations(&self) -> usize {
        self.mutations.lock().unwrap().len()
    }

    fn check_reject(&self) -> Result<(), EngineError> {
        match self.reject.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn push_mutation(
        &self,
        mutation: Mutation,
        callback: Callback<MutationOutcome>,
    ) -> Result<OpHandle, EngineError> {
        self.check_reject()?;
        let op = Arc::new(CountingOp::default());
        self.mutations
            .lock()
            .unwrap()
            .push_back((op.clone(), mutation, callback));
        Ok(op)
    }
}

impl ProtocolEngine for ManualEngine {
    fn get_random(&self, callback: Callback<RawDocument>) -> Result<OpHandle, EngineError> {
        self.check_reject()?;
        let op = Arc::new(CountingOp::default());
        self.reads.lock().unwrap().push_back((op.clone(), callback));
        Ok(op)
    }

    fn set_meta(
        &self,
        request: SetMetaRequest,
        callback: Callback<MutationOutcome>,
    ) -> Result<OpHandle, EngineError> {
        self.push_mutation(Mutation::SetMeta(request), callback)
    }

    fn delete_meta(
        &self,
        request: DeleteMetaRequest,
        callback: Callback<MutationOutcome>,
    ) -> Result<OpHandle, EngineError> {
        self.push_mutation(Mutation::DeleteMeta(request), callback)
    }

    fn set(
        &self,
        request: StoreRequest,
        callback: Callback<MutationOutcome>,
    ) -> Result<OpHandle, EngineError> {
        self.push_mutation(Mutation::Set(request), callback)
    }
}

/// Poll `condition` until it holds or `within` elapses.
#[allow(dead_code)]
pub fn eventually(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
