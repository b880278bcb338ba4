//! Multi-dataset facade (component C6).
//!
//! Fans a single subject lookup out across every registered dataset's own
//! [`QueryEngine`], independently. Grounded on `Subject_Filter.get_all_subject_data`
//! in the original implementation: one dataset failing must never hide the
//! other datasets' results, so a failure here is logged and replaced with an
//! empty batch rather than propagated. This is composition, not inheritance
//! — the facade owns a catalog and a range table and builds a `QueryEngine`
//! per dataset on demand; it does not extend or subclass anything.

use std::collections::HashMap;

use tracing::warn;

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::engine::QueryEngine;
use crate::rangetable::RangeTable;
use crate::row::RowBatch;

pub struct Facade {
    config: EngineConfig,
    catalog: Catalog,
    range_table: RangeTable,
}

impl Facade {
    pub fn new(config: EngineConfig, catalog: Catalog, range_table: RangeTable) -> Self {
        Self {
            config,
            catalog,
            range_table,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn range_table(&self) -> &RangeTable {
        &self.range_table
    }

    pub fn range_table_mut(&mut self) -> &mut RangeTable {
        &mut self.range_table
    }

    /// All rows for `subject_id` across every registered dataset, keyed by
    /// dataset id. A dataset whose lookup fails contributes an empty batch
    /// and a logged warning; it never fails the whole call.
    ///
    /// Each dataset's query opens its own [`QueryEngine`]/[`GzReader`]
    /// handle, so fanning the per-dataset work out across threads is safe
    /// per §5's concurrency model (only the shared, read-only range table
    /// is touched from more than one thread). With the `parallel` feature
    /// enabled, that fan-out runs on rayon's global pool once there is more
    /// than one dataset to fetch; otherwise it runs sequentially.
    #[cfg(not(feature = "parallel"))]
    pub fn get_all(&self, subject_id: u64) -> HashMap<String, RowBatch> {
        self.catalog
            .ids()
            .map(|dataset_id| (dataset_id.to_string(), self.fetch_one(dataset_id, subject_id)))
            .collect()
    }

    #[cfg(feature = "parallel")]
    pub fn get_all(&self, subject_id: u64) -> HashMap<String, RowBatch> {
        use rayon::prelude::*;

        self.catalog
            .ids()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|dataset_id| (dataset_id.to_string(), self.fetch_one(dataset_id, subject_id)))
            .collect()
    }

    fn fetch_one(&self, dataset_id: &str, subject_id: u64) -> RowBatch {
        let dataset = self
            .catalog
            .lookup(dataset_id)
            .expect("dataset_id came from catalog.ids()");
        let engine = QueryEngine::new(&self.config, dataset, &self.range_table);
        match engine.search(subject_id) {
            Ok(batch) => batch,
            Err(err) => {
                warn!(
                    dataset_id,
                    subject_id,
                    error = %err,
                    "dataset query failed; returning an empty batch for this dataset only"
                );
                RowBatch::empty(Vec::new())
            }
        }
    }

    /// Rows for a single dataset, or an error if that dataset fails —
    /// the non-fanned-out counterpart to [`get_all`] for callers that only
    /// care about one dataset and want the failure, not a swallowed empty
    /// batch.
    pub fn get_one(
        &self,
        dataset_id: &str,
        subject_id: u64,
    ) -> Result<RowBatch, crate::error::EngineError> {
        let dataset = self.catalog.lookup(dataset_id)?;
        QueryEngine::new(&self.config, dataset, &self.range_table).search(subject_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_index;
    use crate::catalog::DatasetInfo;
    use crate::rangetable::Range;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_dataset(dir: &TempDir, dataset_id: &str, rows: &[(u64, &str)]) {
        let mut content = String::from("subject_id,value\n");
        for (sid, val) in rows {
            content.push_str(&format!("{sid},{val}\n"));
        }
        let path = dir.path().join(format!("{dataset_id}.csv.gz"));
        let mut enc = GzEncoder::new(std::fs::File::create(path).unwrap(), Compression::default());
        enc.write_all(content.as_bytes()).unwrap();
        enc.finish().unwrap();
    }

    fn register(catalog: &mut Catalog, dataset_id: &str) {
        catalog
            .register(DatasetInfo {
                dataset_id: dataset_id.to_string(),
                sort_column: "subject_id".to_string(),
                row_count_hint: None,
            })
            .unwrap();
    }

    #[test]
    fn fans_out_independently_across_datasets() {
        let dir = TempDir::new().unwrap();
        write_dataset(&dir, "chartevents", &[(1, "a"), (2, "b")]);
        write_dataset(&dir, "labevents", &[(1, "x")]);

        let config = EngineConfig::new(dir.path()).with_checkpoint_spacing(16);
        let mut catalog = Catalog::new();
        register(&mut catalog, "chartevents");
        register(&mut catalog, "labevents");

        let mut table = RangeTable::new();
        build_index(&config, &catalog, &mut table, "chartevents", None).unwrap();
        build_index(&config, &catalog, &mut table, "labevents", None).unwrap();

        let facade = Facade::new(config, catalog, table);
        let results = facade.get_all(1);
        assert_eq!(results.len(), 2);
        assert_eq!(results["chartevents"].len(), 1);
        assert_eq!(results["labevents"].len(), 1);

        let results_for_2 = facade.get_all(2);
        assert_eq!(results_for_2["chartevents"].len(), 1);
        assert!(results_for_2["labevents"].is_empty());
    }

    #[test]
    fn one_broken_dataset_does_not_affect_the_others() {
        let dir = TempDir::new().unwrap();
        write_dataset(&dir, "chartevents", &[(1, "a")]);
        write_dataset(&dir, "labevents", &[(1, "x")]);

        let config = EngineConfig::new(dir.path()).with_checkpoint_spacing(16);
        let mut catalog = Catalog::new();
        register(&mut catalog, "chartevents");
        register(&mut catalog, "labevents");

        let mut table = RangeTable::new();
        build_index(&config, &catalog, &mut table, "chartevents", None).unwrap();
        build_index(&config, &catalog, &mut table, "labevents", None).unwrap();
        // Corrupt only labevents' range for subject 1.
        table.set("labevents", 1, Range::Present { start: 9999, end: 10000 });

        let facade = Facade::new(config, catalog, table);
        let results = facade.get_all(1);
        assert_eq!(results["chartevents"].len(), 1);
        assert!(results["labevents"].is_empty());
    }
}
