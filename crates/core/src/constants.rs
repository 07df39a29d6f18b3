//! Constants used throughout the DFS core crate.

use std::time::Duration;

/// Default directory for blob storage when none is configured.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Default size of each chunk sent on a download stream (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest accepted chunk size. Keeps each message well under gRPC's 4 MiB default limit.
pub const MAX_CHUNK_SIZE: usize = 3 * 1024 * 1024;

/// Default upper bound on a single upload or download.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);
