//! Timeout-bounded request/response bridge for a bucket client.
//!
//! Turns the callback-driven, single-shot operations of a protocol engine
//! into blocking calls and cancellable futures.

pub mod bucket;
pub mod completion;
pub mod config;
pub mod engine;
pub mod observability;

pub use bucket::{Bucket, BucketError, BucketInternal, BucketResult};
pub use completion::{Completion, FutureStatus, OpFuture, WaitOptions};
pub use config::BridgeConfig;
pub use engine::{Cas, MutationToken, ProtocolEngine};
