//! # subrange — subject-range indexing and random-access retrieval over sorted, gzip-compressed CSV
//!
//! Guarantees:
//! - The source `.csv.gz` file is never rewritten; every artifact this crate
//!   produces is a sidecar (`.idx` checkpoints) or a separate lookup table
//!   (the subject-range CSV).
//! - A query either returns the rows for a subject, an empty batch if the
//!   subject is known to be absent, or a tagged [`error::EngineError`] — it
//!   never silently falls back to a full scan when the index looks wrong.
//! - All configuration is explicit (see [`config::EngineConfig`]); nothing
//!   in this crate reads ambient global or environment state.

pub mod builder;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod facade;
pub mod gzindex;
pub mod progress;
pub mod rangetable;
pub mod row;

pub use catalog::{Catalog, DatasetInfo};
pub use config::EngineConfig;
pub use engine::QueryEngine;
pub use error::EngineError;
pub use facade::Facade;
pub use gzindex::GzReader;
pub use rangetable::{Range, RangeTable};
pub use row::{Record, RowBatch};
