//! Crate-wide error taxonomy.
//!
//! Every fallible operation in `subrange` returns `Result<T, EngineError>`.
//! A subject simply not being present in a dataset is represented as an
//! empty result, never as an error — see [`EngineError`] doc comments below
//! for the line between "absent" and "broken".

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Caller error: bad CLI arguments, unknown dataset id, malformed path.
    #[error("usage error: {0}")]
    Usage(String),

    /// The dataset's `.idx` checkpoint sidecar has not been built yet.
    #[error("no checkpoint index for dataset {dataset_id:?} — run `subrange index {dataset_id}` first")]
    IndexMissing { dataset_id: String },

    /// A checkpoint sidecar exists but does not cover the byte range being
    /// requested (e.g. it was built for a shorter, truncated copy of the file).
    #[error("checkpoint index for dataset {dataset_id:?} does not cover offset {offset}")]
    CheckpointMissing { dataset_id: String, offset: u64 },

    /// The range table or checkpoint sidecar exists but fails a structural or
    /// content check — magic mismatch, CRC32 mismatch, or a post-seek verify
    /// that the decoded row's sort key does not match the subject requested.
    /// This is never silently downgraded to a full scan; see SPEC_FULL.md §9.
    #[error("corrupt index for dataset {dataset_id:?}: {reason}")]
    CorruptIndex { dataset_id: String, reason: String },

    #[error("dataset {0:?} is not registered in the catalog")]
    UnknownDataset(String),

    #[error("dataset {0:?} is already registered in the catalog")]
    DuplicateDataset(String),

    #[error("path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl EngineError {
    /// Process exit code convention used by the `subrange` binary:
    /// 0 success, 1 usage, 2 index missing/corrupt, 3 I/O failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Usage(_)
            | EngineError::UnknownDataset(_)
            | EngineError::DuplicateDataset(_) => 1,
            EngineError::IndexMissing { .. }
            | EngineError::CheckpointMissing { .. }
            | EngineError::CorruptIndex { .. } => 2,
            EngineError::PathNotFound(_) | EngineError::Csv(_) | EngineError::Io(_) => 3,
        }
    }
}
