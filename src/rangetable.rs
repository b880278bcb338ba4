//! Subject-range lookup table (component C3).
//!
//! One CSV file, shared across every dataset, with a `subject_id` column
//! plus a `<dataset_id>_byteidx_start` / `<dataset_id>_byteidx_end` column
//! pair per indexed dataset. A subject known to exist (because some dataset
//! was indexed and the subject was looked for) but not present in a given
//! dataset is recorded as `(-1, -1)` — never as a missing row or a missing
//! column value. This mirrors the original `subjects_df` lookup table: the
//! table only ever grows new columns (one indexing pass per dataset), and
//! rows stay sorted by `subject_id`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::EngineError;

const SUBJECT_COLUMN: &str = "subject_id";
const ABSENT: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    Present { start: u64, end: u64 },
    Absent,
}

impl Range {
    fn to_csv_pair(self) -> (String, String) {
        match self {
            Range::Present { start, end } => (start.to_string(), end.to_string()),
            Range::Absent => (ABSENT.to_string(), ABSENT.to_string()),
        }
    }

    fn from_csv_pair(start: &str, end: &str) -> Result<Self, EngineError> {
        let s: i64 = start
            .parse()
            .map_err(|_| EngineError::Usage(format!("malformed byte offset {start:?}")))?;
        let e: i64 = end
            .parse()
            .map_err(|_| EngineError::Usage(format!("malformed byte offset {end:?}")))?;
        if s == ABSENT || e == ABSENT {
            Ok(Range::Absent)
        } else {
            Ok(Range::Present {
                start: s as u64,
                end: e as u64,
            })
        }
    }
}

/// Rows are keyed by `subject_id` in a `BTreeMap`, which keeps the
/// sorted-by-subject_id invariant without a separate sort step.
#[derive(Debug, Default)]
pub struct RangeTable {
    rows: BTreeMap<u64, BTreeMap<String, Range>>,
}

impl RangeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }

        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
        let headers = reader.headers()?.clone();

        let subject_col = headers
            .iter()
            .position(|h| h == SUBJECT_COLUMN)
            .ok_or_else(|| EngineError::Usage(format!("{path:?} is missing a subject_id column")))?;

        // Pair up `<dataset>_byteidx_start` / `<dataset>_byteidx_end` columns.
        let mut dataset_columns: Vec<(String, usize, usize)> = Vec::new();
        for (idx, name) in headers.iter().enumerate() {
            if let Some(dataset_id) = name.strip_suffix("_byteidx_start") {
                let end_name = format!("{dataset_id}_byteidx_end");
                let end_idx = headers
                    .iter()
                    .position(|h| h == end_name)
                    .ok_or_else(|| {
                        EngineError::Usage(format!(
                            "{path:?} has {name:?} without matching {end_name:?}"
                        ))
                    })?;
                dataset_columns.push((dataset_id.to_string(), idx, end_idx));
            }
        }

        let mut rows = BTreeMap::new();
        for record in reader.records() {
            let record = record?;
            let subject_id: u64 = record
                .get(subject_col)
                .ok_or_else(|| EngineError::Usage("row is missing subject_id".to_string()))?
                .parse()
                .map_err(|_| EngineError::Usage("malformed subject_id".to_string()))?;

            let mut ranges = BTreeMap::new();
            for (dataset_id, start_idx, end_idx) in &dataset_columns {
                let start = record.get(*start_idx).unwrap_or("-1");
                let end = record.get(*end_idx).unwrap_or("-1");
                ranges.insert(dataset_id.clone(), Range::from_csv_pair(start, end)?);
            }
            rows.insert(subject_id, ranges);
        }

        Ok(Self { rows })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let mut dataset_ids: Vec<String> = self
            .rows
            .values()
            .flat_map(|r| r.keys().cloned())
            .collect();
        dataset_ids.sort();
        dataset_ids.dedup();

        let file = File::create(path.as_ref())?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));

        let mut header = vec![SUBJECT_COLUMN.to_string()];
        for dataset_id in &dataset_ids {
            header.push(format!("{dataset_id}_byteidx_start"));
            header.push(format!("{dataset_id}_byteidx_end"));
        }
        writer.write_record(&header)?;

        for (subject_id, ranges) in &self.rows {
            let mut record = vec![subject_id.to_string()];
            for dataset_id in &dataset_ids {
                let (start, end) = ranges
                    .get(dataset_id)
                    .copied()
                    .unwrap_or(Range::Absent)
                    .to_csv_pair();
                record.push(start);
                record.push(end);
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn get(&self, dataset_id: &str, subject_id: u64) -> Option<Range> {
        self.rows.get(&subject_id)?.get(dataset_id).copied()
    }

    pub fn set(&mut self, dataset_id: &str, subject_id: u64, range: Range) {
        self.rows
            .entry(subject_id)
            .or_default()
            .insert(dataset_id.to_string(), range);
    }

    /// Merge a full dataset's subject -> range mapping in. Subjects already
    /// known from other datasets keep their existing columns; subjects new
    /// to the table gain a row with this dataset's column populated (and,
    /// implicitly, `Absent` for every other dataset column once saved).
    pub fn set_bulk(&mut self, dataset_id: &str, ranges: &BTreeMap<u64, Range>) {
        for (subject_id, range) in ranges {
            self.set(dataset_id, *subject_id, *range);
        }
    }

    pub fn known_subjects(&self) -> impl Iterator<Item = u64> + '_ {
        self.rows.keys().copied()
    }

    pub fn has_columns(&self, dataset_id: &str) -> bool {
        self.rows.values().any(|r| r.contains_key(dataset_id))
    }

    /// True if at least one row already carries a non-sentinel range for
    /// `dataset_id`. This is the idempotence check a builder re-run consults
    /// before touching anything — an all-absent column (every row Absent,
    /// possible if a build ran over an empty dataset) does not count as
    /// "already populated".
    pub fn has_present(&self, dataset_id: &str) -> bool {
        self.rows
            .values()
            .any(|r| matches!(r.get(dataset_id), Some(Range::Present { .. })))
    }

    /// Drop `dataset_id`'s column entirely so a subsequent build is no
    /// longer treated as already-populated. The explicit "clear first" step
    /// the on-disk contract requires before a forced rebuild.
    pub fn clear_dataset(&mut self, dataset_id: &str) {
        for ranges in self.rows.values_mut() {
            ranges.remove(dataset_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn round_trips_through_csv() {
        let mut table = RangeTable::new();
        table.set("chartevents", 10, Range::Present { start: 0, end: 120 });
        table.set("chartevents", 20, Range::Absent);
        table.set("labevents", 10, Range::Present { start: 500, end: 700 });

        let tmp = NamedTempFile::new().unwrap();
        table.save(tmp.path()).unwrap();

        let loaded = RangeTable::load(tmp.path()).unwrap();
        assert_eq!(
            loaded.get("chartevents", 10),
            Some(Range::Present { start: 0, end: 120 })
        );
        assert_eq!(loaded.get("chartevents", 20), Some(Range::Absent));
        assert_eq!(
            loaded.get("labevents", 10),
            Some(Range::Present { start: 500, end: 700 })
        );
        // subject 20 was never looked up against labevents.
        assert_eq!(loaded.get("labevents", 20), None);
    }

    #[test]
    fn missing_file_yields_empty_table() {
        let table = RangeTable::load("/nonexistent/path/subjects.csv").unwrap();
        assert_eq!(table.known_subjects().count(), 0);
    }

    #[test]
    fn subjects_stay_sorted() {
        let mut table = RangeTable::new();
        table.set("d", 30, Range::Absent);
        table.set("d", 10, Range::Absent);
        table.set("d", 20, Range::Absent);
        let ids: Vec<u64> = table.known_subjects().collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }
}
