//! Default values and hard limits for archive policies.
//!
//! # Design
//! - Centralize defaults so the CLI, policy files and tests agree.
//! - Keep limits explicit so validation messages stay auditable.

use std::num::NonZeroUsize;

/// Directory (relative to the output root) holding manifest state.
pub const MANIFEST_DIR_NAME: &str = ".logvault";
/// Marker emitted by the tenhou log format when a participant disconnects.
pub const DEFAULT_OFFLINE_MARKER: &str = "BYE";
/// Upper bound on concurrent workers.
pub const MAX_WORKERS: usize = 64;
/// Default number of extra attempts for a failed archive write.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Upper bound on extra write attempts.
pub const MAX_RETRIES: u32 = 10;
/// Base backoff between write attempts, multiplied by the attempt number.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 50;
/// Default gzip level.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
/// Highest gzip level accepted by the encoder.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;
/// Bytes of content inspected when the file name carries no date.
pub const DEFAULT_DATE_SCAN_BYTES: usize = 64 * 1024;
/// Largest permitted date scan window.
pub const MAX_DATE_SCAN_BYTES: usize = 16 * 1024 * 1024;
/// Chunk size used by the marker scan.
pub const DEFAULT_SCAN_CHUNK_BYTES: usize = 64 * 1024;
/// Smallest permitted marker scan chunk.
pub const MIN_SCAN_CHUNK_BYTES: usize = 16;

/// Worker count derived from the host's available parallelism.
#[must_use]
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map_or(1, NonZeroUsize::get)
        .clamp(1, MAX_WORKERS)
}
