//! Row batch types shared between the query engine and the facade.
//!
//! A [`Record`] is an ordered column-name → value mapping, header-ordered;
//! typed coercion is the caller's concern except for the sort-key column,
//! which is always retrievable as a parsed integer via [`Record::sort_key`].

use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Record {
    header: Arc<Vec<String>>,
    values: Vec<String>,
}

impl Record {
    pub fn new(header: Arc<Vec<String>>, values: Vec<String>) -> Self {
        Self { header, values }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        let idx = self.header.iter().position(|c| c == column)?;
        self.values.get(idx).map(String::as_str)
    }

    pub fn sort_key(&self, column: &str) -> Option<i64> {
        self.get(column)?.parse().ok()
    }

    pub fn columns(&self) -> &[String] {
        &self.header
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

/// All rows returned for one subject within one dataset.
#[derive(Debug, Clone, Default)]
pub struct RowBatch {
    pub header: Arc<Vec<String>>,
    pub rows: Vec<Record>,
}

impl RowBatch {
    pub fn new(header: Arc<Vec<String>>, rows: Vec<Record>) -> Self {
        Self { header, rows }
    }

    /// A batch with no rows — the subject is known to be absent, or the
    /// header could not be determined before the failure that produced it.
    pub fn empty(header: Vec<String>) -> Self {
        Self {
            header: Arc::new(header),
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
