//! Caller-facing meta operations used by replication tooling.
//!
//! Thin argument-list wrappers over [`Bucket`]: they build the engine
//! requests and return only the CAS, dropping the mutation token.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::bucket::client::Bucket;
use crate::bucket::error::BucketResult;
use crate::bucket::transcoder::{JsonTranscoder, Transcoder};
use crate::completion::OpFuture;
use crate::engine::{Cas, DeleteMetaRequest, SetMetaRequest};

/// Borrowed view over a [`Bucket`] exposing the meta API.
pub struct BucketInternal<'a, C: Transcoder = JsonTranscoder> {
    bucket: &'a Bucket<C>,
}

impl<'a, C: Transcoder> BucketInternal<'a, C> {
    pub(crate) fn new(bucket: &'a Bucket<C>) -> Self {
        Self { bucket }
    }

    /// Read an arbitrary document into `destination`.
    ///
    /// `destination` is only written when the read and decode both succeed.
    pub fn get_random<V: DeserializeOwned>(&self, destination: &mut V) -> BucketResult<(String, Cas)> {
        let doc = self.bucket.get_random::<V>()?;
        *destination = doc.value;
        Ok((doc.key, doc.cas))
    }

    /// Insert or replace a document together with its metadata.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_meta(
        &self,
        key: &str,
        value: &[u8],
        extra: &[u8],
        flags: u32,
        expiry: u32,
        cas: Cas,
        rev_seqno: u64,
    ) -> BucketResult<Cas> {
        let request = set_meta_request(key, value, extra, flags, expiry, cas, rev_seqno);
        self.bucket.upsert_meta(request).map(|outcome| outcome.cas)
    }

    /// Remove a document together with its metadata.
    pub fn remove_meta(
        &self,
        key: &str,
        extra: &[u8],
        flags: u32,
        expiry: u32,
        cas: Cas,
        rev_seqno: u64,
    ) -> BucketResult<Cas> {
        let request = delete_meta_request(key, extra, flags, expiry, cas, rev_seqno);
        self.bucket.remove_meta(request).map(|outcome| outcome.cas)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn async_upsert_meta(
        &self,
        key: &str,
        value: &[u8],
        extra: &[u8],
        flags: u32,
        expiry: u32,
        cas: Cas,
        rev_seqno: u64,
    ) -> OpFuture {
        let request = set_meta_request(key, value, extra, flags, expiry, cas, rev_seqno);
        self.bucket.async_upsert_meta(request)
    }

    pub fn async_remove_meta(
        &self,
        key: &str,
        extra: &[u8],
        flags: u32,
        expiry: u32,
        cas: Cas,
        rev_seqno: u64,
    ) -> OpFuture {
        let request = delete_meta_request(key, extra, flags, expiry, cas, rev_seqno);
        self.bucket.async_remove_meta(request)
    }

    /// Unconditional upsert of an encoded value.
    pub fn async_upsert<V: Serialize + ?Sized>(&self, key: &str, value: &V, expiry: u32) -> OpFuture {
        self.bucket.async_upsert(key, value, expiry, Cas::ZERO)
    }
}

fn set_meta_request(
    key: &str,
    value: &[u8],
    extra: &[u8],
    flags: u32,
    expiry: u32,
    cas: Cas,
    rev_seqno: u64,
) -> SetMetaRequest {
    SetMetaRequest {
        key: key.as_bytes().to_vec(),
        value: value.to_vec(),
        extra: extra.to_vec(),
        flags,
        expiry,
        cas,
        rev_seqno,
    }
}

fn delete_meta_request(
    key: &str,
    extra: &[u8],
    flags: u32,
    expiry: u32,
    cas: Cas,
    rev_seqno: u64,
) -> DeleteMetaRequest {
    DeleteMetaRequest {
        key: key.as_bytes().to_vec(),
        extra: extra.to_vec(),
        flags,
        expiry,
        cas,
        rev_seqno,
    }
}
