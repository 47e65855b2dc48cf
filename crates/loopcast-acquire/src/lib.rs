//! File acquisition for loopcast.
//!
//! The media engine can only open plain local paths, so a selected video is
//! first copied into a private cache slot. This crate provides the sources
//! that can be copied, the chunked copy itself, an optional retry policy and
//! a background worker that keeps the copy off the caller's thread.

mod copy;
mod error;
mod retry;
mod source;
mod worker;

pub use copy::{acquire, acquire_with_retry, copy_stream, AcquiredFile};
pub use error::AcquireError;
pub use retry::RetryPolicy;
pub use source::{FileSource, OnceSource, SourceProvider};
pub use worker::{spawn_acquire, AcquireConfig, AcquireTask};

/// Result type for acquisition operations.
pub type AcquireResult<T> = Result<T, AcquireError>;

/// Default copy chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default number of copy attempts (a single pass).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;

/// Base delay between copy attempts in milliseconds.
pub const BASE_RETRY_DELAY_MS: u64 = 500;
