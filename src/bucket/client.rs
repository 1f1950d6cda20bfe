//! Bucket-level operation submitter.
//!
//! # Responsibilities
//! - Build engine requests for random reads, meta mutations and upserts
//! - Bridge each request to a blocking call or an [`OpFuture`]
//! - Bound blocking calls by the bucket's operation timeout
//!
//! # Design Decisions
//! - The engine is injected and shared; the bucket never owns connections
//! - Blocking calls are a submitted future plus a bounded wait, so both
//!   completion models share one state machine
//! - Decoding happens on the caller's thread after the raw read completes
//! - No retries: every failure goes straight back to the caller

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::bucket::error::{BucketError, BucketResult};
use crate::bucket::internal::BucketInternal;
use crate::bucket::transcoder::{JsonTranscoder, Transcoder};
use crate::completion::{Completion, OpFuture, WaitOptions};
use crate::config::BridgeConfig;
use crate::engine::{
    Callback, Cas, DeleteMetaRequest, EngineError, MutationOutcome, OpHandle, ProtocolEngine,
    RawDocument, SetMetaRequest, StoreRequest,
};

/// A decoded document returned by a random read.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomDocument<V> {
    pub key: String,
    pub cas: Cas,
    pub value: V,
}

/// Handle for issuing operations against one bucket.
pub struct Bucket<C: Transcoder = JsonTranscoder> {
    name: String,
    engine: Arc<dyn ProtocolEngine>,
    transcoder: C,
    op_timeout: ArcSwap<Duration>,
    wait_options: WaitOptions,
}

impl Bucket<JsonTranscoder> {
    /// Create a bucket using the default JSON transcoder.
    pub fn new(name: impl Into<String>, engine: Arc<dyn ProtocolEngine>, op_timeout: Duration) -> Self {
        Self::with_transcoder(name, engine, JsonTranscoder, op_timeout)
    }

    /// Create a bucket from validated configuration.
    pub fn from_config(config: &BridgeConfig, engine: Arc<dyn ProtocolEngine>) -> Self {
        let mut bucket = Self::new(
            config.bucket.name.clone(),
            engine,
            config.bucket.operation_timeout(),
        );
        bucket.wait_options = config.futures.wait_options();
        bucket
    }
}

impl<C: Transcoder> Bucket<C> {
    pub fn with_transcoder(
        name: impl Into<String>,
        engine: Arc<dyn ProtocolEngine>,
        transcoder: C,
        op_timeout: Duration,
    ) -> Self {
        let name = name.into();
        tracing::debug!(bucket = %name, timeout_ms = op_timeout.as_millis() as u64, "Bucket opened");
        Self {
            name,
            engine,
            transcoder,
            op_timeout: ArcSwap::from_pointee(op_timeout),
            wait_options: WaitOptions::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Timeout applied to every blocking operation.
    pub fn operation_timeout(&self) -> Duration {
        **self.op_timeout.load()
    }

    /// Change the blocking-operation timeout; takes effect for calls that
    /// start afterwards.
    pub fn set_operation_timeout(&self, timeout: Duration) {
        self.op_timeout.store(Arc::new(timeout));
        tracing::info!(bucket = %self.name, timeout_ms = timeout.as_millis() as u64, "Operation timeout updated");
    }

    /// Default wait policy for futures returned by the async operations.
    pub fn wait_options(&self) -> WaitOptions {
        self.wait_options
    }

    pub fn set_wait_options(&mut self, options: WaitOptions) {
        self.wait_options = options;
    }

    /// Caller-facing facade for meta operations.
    pub fn internal(&self) -> BucketInternal<'_, C> {
        BucketInternal::new(self)
    }

    /// Fetch and decode an arbitrary document.
    ///
    /// On timeout the in-flight read is cancelled and
    /// [`BucketError::Timeout`] is returned. Decode failures surface as
    /// [`BucketError::Decode`].
    pub fn get_random<V: DeserializeOwned>(&self) -> BucketResult<RandomDocument<V>> {
        let raw = Completion::<RawDocument>::submit("get_random", |cb| self.engine.get_random(cb))
            .wait(Some(self.operation_timeout()))?;

        let value = self
            .transcoder
            .decode(&raw.value, raw.flags)
            .map_err(BucketError::Decode)?;

        Ok(RandomDocument {
            key: String::from_utf8_lossy(&raw.key).into_owned(),
            cas: raw.cas,
            value,
        })
    }

    /// Store a document with replication metadata and wait for the result.
    pub fn upsert_meta(&self, request: SetMetaRequest) -> BucketResult<MutationOutcome> {
        self.cas_exec("upsert_meta", |cb| self.engine.set_meta(request, cb))
    }

    /// Remove a document with replication metadata and wait for the result.
    pub fn remove_meta(&self, request: DeleteMetaRequest) -> BucketResult<MutationOutcome> {
        self.cas_exec("remove_meta", |cb| self.engine.delete_meta(request, cb))
    }

    /// Encode `value` and store it under `key`.
    pub fn upsert<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        expiry: u32,
        cas: Cas,
    ) -> BucketResult<MutationOutcome> {
        let request = self.store_request(key, value, expiry, cas)?;
        self.cas_exec("upsert", |cb| self.engine.set(request, cb))
    }

    /// Submit a meta upsert and return immediately.
    pub fn async_upsert_meta(&self, request: SetMetaRequest) -> OpFuture {
        self.cas_future("async_upsert_meta", |cb| self.engine.set_meta(request, cb))
    }

    /// Submit a meta remove and return immediately.
    pub fn async_remove_meta(&self, request: DeleteMetaRequest) -> OpFuture {
        self.cas_future("async_remove_meta", |cb| self.engine.delete_meta(request, cb))
    }

    /// Submit a plain upsert and return immediately.
    ///
    /// An encoding failure yields a future that is already complete.
    pub fn async_upsert<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        expiry: u32,
        cas: Cas,
    ) -> OpFuture {
        match self.store_request(key, value, expiry, cas) {
            Ok(request) => self.cas_future("async_upsert", |cb| self.engine.set(request, cb)),
            Err(e) => Completion::failed("async_upsert", e),
        }
    }

    fn store_request<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        expiry: u32,
        cas: Cas,
    ) -> BucketResult<StoreRequest> {
        let (bytes, flags) = self.transcoder.encode(value).map_err(BucketError::Encode)?;
        Ok(StoreRequest {
            key: key.as_bytes().to_vec(),
            value: bytes,
            flags,
            expiry,
            cas,
        })
    }

    fn cas_exec<F>(&self, op: &'static str, launch: F) -> BucketResult<MutationOutcome>
    where
        F: FnOnce(Callback<MutationOutcome>) -> Result<OpHandle, EngineError>,
    {
        Completion::submit(op, launch).wait(Some(self.operation_timeout()))
    }

    fn cas_future<F>(&self, op: &'static str, launch: F) -> OpFuture
    where
        F: FnOnce(Callback<MutationOutcome>) -> Result<OpHandle, EngineError>,
    {
        Completion::submit(op, |cb: Callback<Cas>| {
            launch(Box::new(move |result: Result<MutationOutcome, EngineError>| {
                cb(result.map(|outcome| outcome.cas))
            }))
        })
    }
}

impl<C: Transcoder> std::fmt::Debug for Bucket<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("name", &self.name)
            .field("operation_timeout", &self.operation_timeout())
            .field("wait_options", &self.wait_options)
            .finish()
    }
}
