//! Explicit configuration objects.
//!
//! The re-architecture note in SPEC_FULL.md §9 calls for configuration to be
//! passed explicitly rather than read from ambient global state. This mirrors
//! `archive::PackOptions`: a plain struct with a `Default` impl, constructed
//! once by the caller (CLI or library consumer) and threaded down.

use std::path::PathBuf;

/// Number of uncompressed bytes between successive gzip checkpoints.
///
/// 4 MiB keeps amortized seek cost low (at most 4 MiB of discard-decode per
/// query) while keeping sidecar size modest — each checkpoint carries up to
/// a 32 KiB sliding-window dictionary.
pub const DEFAULT_CHECKPOINT_SPACING: u64 = 4 * 1024 * 1024;

/// Per-engine configuration: where a dataset's files live and how its
/// checkpoint index should be built.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory containing `<dataset_id>.csv.gz` and its `.idx` sidecar.
    pub base_dir: PathBuf,
    /// Path to the shared subject-range lookup table CSV. Defaults to
    /// `<base_dir>/subjects.csv` when not overridden.
    pub range_table_path: Option<PathBuf>,
    /// Uncompressed bytes between checkpoints; see [`DEFAULT_CHECKPOINT_SPACING`].
    pub checkpoint_spacing: u64,
}

impl EngineConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            range_table_path: None,
            checkpoint_spacing: DEFAULT_CHECKPOINT_SPACING,
        }
    }

    pub fn with_checkpoint_spacing(mut self, spacing: u64) -> Self {
        self.checkpoint_spacing = spacing;
        self
    }

    pub fn with_range_table_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.range_table_path = Some(path.into());
        self
    }

    pub fn gzip_path(&self, dataset_id: &str) -> PathBuf {
        self.base_dir.join(format!("{dataset_id}.csv.gz"))
    }

    pub fn checkpoint_path(&self, dataset_id: &str) -> PathBuf {
        self.base_dir.join(format!("{dataset_id}.idx"))
    }

    pub fn resolved_range_table_path(&self) -> PathBuf {
        self.range_table_path
            .clone()
            .unwrap_or_else(|| self.base_dir.join("subjects.csv"))
    }
}
