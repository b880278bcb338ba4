//! Dataset catalog (component C2).
//!
//! A small, explicit registry of which dataset ids exist and where their
//! files live — the in-process equivalent of the original `IDs` dict
//! (`{"chartevents": {"rows": ..., "ordered_by": "subject_id"}}`). Built once
//! at startup and read thereafter; there is no mutation API for removing an
//! entry, matching the single-writer, no-WAL posture of the rest of this
//! crate.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub dataset_id: String,
    /// Name of the CSV column the source file is sorted by and keyed on.
    pub sort_column: String,
    /// Approximate row count, used only for progress estimation — never
    /// trusted for correctness.
    #[serde(default)]
    pub row_count_hint: Option<u64>,
}

#[derive(Debug, Default)]
pub struct Catalog {
    datasets: BTreeMap<String, DatasetInfo>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: DatasetInfo) -> Result<(), EngineError> {
        if self.datasets.contains_key(&info.dataset_id) {
            return Err(EngineError::DuplicateDataset(info.dataset_id));
        }
        self.datasets.insert(info.dataset_id.clone(), info);
        Ok(())
    }

    pub fn lookup(&self, dataset_id: &str) -> Result<&DatasetInfo, EngineError> {
        self.datasets
            .get(dataset_id)
            .ok_or_else(|| EngineError::UnknownDataset(dataset_id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Load dataset descriptors from a CSV manifest (`dataset_id,
    /// sort_column, row_count_hint` — the header order does not matter,
    /// `csv`'s serde integration matches by name). Lets a CLI invocation
    /// remember a dataset's `sort_column` instead of requiring every
    /// subcommand to repeat it on the command line.
    pub fn load_manifest(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
        let mut catalog = Self::new();
        for record in reader.deserialize() {
            let info: DatasetInfo = record?;
            catalog.register(info)?;
        }
        Ok(catalog)
    }

    /// Persist every registered dataset's descriptor as a CSV manifest.
    pub fn save_manifest(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let file = File::create(path.as_ref())?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        for info in self.datasets.values() {
            writer.serialize(info)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str) -> DatasetInfo {
        DatasetInfo {
            dataset_id: id.to_string(),
            sort_column: "subject_id".to_string(),
            row_count_hint: None,
        }
    }

    #[test]
    fn rejects_duplicate_registration() {
        let mut cat = Catalog::new();
        cat.register(info("chartevents")).unwrap();
        let err = cat.register(info("chartevents")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateDataset(_)));
    }

    #[test]
    fn lookup_unknown_dataset_errors() {
        let cat = Catalog::new();
        let err = cat.lookup("chartevents").unwrap_err();
        assert!(matches!(err, EngineError::UnknownDataset(_)));
    }

    #[test]
    fn manifest_round_trips_through_csv() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("catalog.csv");

        let mut cat = Catalog::new();
        cat.register(DatasetInfo {
            dataset_id: "chartevents".to_string(),
            sort_column: "subject_id".to_string(),
            row_count_hint: Some(330_712_483),
        })
        .unwrap();
        cat.register(info("labevents")).unwrap();
        cat.save_manifest(&path).unwrap();

        let loaded = Catalog::load_manifest(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded.lookup("chartevents").unwrap().row_count_hint,
            Some(330_712_483)
        );
        assert_eq!(loaded.lookup("labevents").unwrap().sort_column, "subject_id");
    }

    #[test]
    fn missing_manifest_yields_empty_catalog() {
        let cat = Catalog::load_manifest("/nonexistent/catalog.csv").unwrap();
        assert!(cat.is_empty());
    }

    #[test]
    fn ids_lists_every_registered_dataset() {
        let mut cat = Catalog::new();
        cat.register(info("chartevents")).unwrap();
        cat.register(info("labevents")).unwrap();
        let mut ids: Vec<&str> = cat.ids().collect();
        ids.sort();
        assert_eq!(ids, vec!["chartevents", "labevents"]);
    }
}
