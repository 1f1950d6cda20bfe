//! Bucket subsystem.
//!
//! # Data Flow
//! ```text
//! Caller
//!     → internal.rs (argument-list meta API, CAS only)
//!     → client.rs (request construction, blocking or future bridge)
//!     → completion (single-shot result, wait / cancel / timeout)
//!     → engine (submit + callback)
//!
//! Random reads:
//!     raw document → transcoder.rs → typed value
//! ```
//!
//! # Design Decisions
//! - CAS zero means "unconditional"; CAS checks are enforced by the engine
//! - Timeouts are distinct errors and cancel the in-flight operation
//! - Retry policy belongs to the caller

pub mod client;
pub mod error;
pub mod internal;
pub mod transcoder;

pub use client::{Bucket, RandomDocument};
pub use error::{BucketError, BucketResult};
pub use internal::BucketInternal;
pub use transcoder::{JsonTranscoder, TranscodeError, Transcoder};
