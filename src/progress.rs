//! Progress-callback convention shared by the index builder and scanners.

/// Called periodically during a long forward pass over a dataset.
///
/// Arguments are `(bytes_processed, total_bytes_estimate)`. A coarse cadence
/// is expected — callers should not assume a call per row.
pub type ProgressFn<'a> = dyn FnMut(u64, u64) + 'a;
