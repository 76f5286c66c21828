//! In-memory tabular dataset.

use std::collections::HashSet;

use super::dtype::Dtype;
use super::value::Value;
use crate::error::{LoaderError, Result};

/// A named column with its dtype classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub dtype: Dtype,
    pub values: Vec<Value>,
}

impl Column {
    /// Create a column, classifying its dtype from the values.
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        let dtype = Dtype::infer(&values);
        Self {
            name: name.into(),
            dtype,
            values,
        }
    }

    /// Create a column with an explicit dtype.
    pub fn with_dtype(name: impl Into<String>, dtype: Dtype, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            dtype,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Ordered collection of equally long, uniquely named columns.
///
/// Loaders only borrow a dataset; normalization produces a separate copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
}

impl Dataset {
    /// Build a dataset, checking column lengths and name uniqueness.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let mut names = HashSet::new();
        for column in &columns {
            if !names.insert(column.name.as_str()) {
                return Err(LoaderError::Config(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
        }
        if let Some(first) = columns.first() {
            if let Some(bad) = columns.iter().find(|c| c.len() != first.len()) {
                return Err(LoaderError::Config(format!(
                    "column '{}' has {} rows, expected {} (from '{}')",
                    bad.name,
                    bad.len(),
                    first.len(),
                    first.name
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Build a dataset from a JSON array of objects.
    ///
    /// Columns are taken in first-seen key order; keys missing from a record
    /// become NULL in that row.
    pub fn from_records(records: &serde_json::Value) -> Result<Self> {
        let rows = records.as_array().ok_or_else(|| {
            LoaderError::Config("records must be a JSON array of objects".to_string())
        })?;

        let mut names: Vec<String> = Vec::new();
        for (idx, row) in rows.iter().enumerate() {
            let fields = row.as_object().ok_or_else(|| {
                LoaderError::Config(format!("record {} is not a JSON object", idx))
            })?;
            for key in fields.keys() {
                if !names.iter().any(|n| n == key) {
                    names.push(key.clone());
                }
            }
        }

        let columns = names
            .into_iter()
            .map(|name| {
                let values = rows
                    .iter()
                    .map(|row| row.get(&name).cloned().map(Value::from).unwrap_or(Value::Null))
                    .collect();
                Column::new(name, values)
            })
            .collect();
        Self::new(columns)
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Look up a column by exact name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Values of one row, in column order.
    pub fn row(&self, idx: usize) -> Option<Vec<&Value>> {
        if idx >= self.num_rows() {
            return None;
        }
        Some(self.columns.iter().map(|c| &c.values[idx]).collect())
    }
}

/// Make result-set column names usable as dataset column names.
///
/// Unnamed columns become `column_<n>` (1-based position) and repeated names
/// get a `_<n>` suffix.
pub(crate) fn unique_column_names(raw: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    raw.into_iter()
        .enumerate()
        .map(|(idx, name)| {
            let base = if name.is_empty() {
                format!("column_{}", idx + 1)
            } else {
                name
            };
            let mut candidate = base.clone();
            let mut n = 1;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{}_{}", base, n);
                n += 1;
            }
            candidate
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_rejects_ragged_columns() {
        let result = Dataset::new(vec![
            Column::new("a", vec![1.into(), 2.into()]),
            Column::new("b", vec![1.into()]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_new_rejects_duplicate_names() {
        let result = Dataset::new(vec![
            Column::new("a", vec![1.into()]),
            Column::new("a", vec![2.into()]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_records() {
        let records = json!([
            {"id": 1, "name": "a"},
            {"id": 2, "extra": {"k": true}},
        ]);
        let dataset = Dataset::from_records(&records).unwrap();
        assert_eq!(dataset.num_rows(), 2);
        assert_eq!(dataset.num_columns(), 3);

        let id = dataset.column("id").unwrap();
        assert_eq!(id.dtype, Dtype::Integer);

        let name = dataset.column("name").unwrap();
        assert_eq!(name.values[1], Value::Null);
        assert_eq!(name.dtype, Dtype::String);

        let extra = dataset.column("extra").unwrap();
        assert_eq!(extra.dtype, Dtype::Object);
    }

    #[test]
    fn test_from_records_rejects_non_objects() {
        assert!(Dataset::from_records(&json!({"id": 1})).is_err());
        assert!(Dataset::from_records(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_row_access() {
        let dataset = Dataset::new(vec![
            Column::new("a", vec![1.into(), 2.into()]),
            Column::new("b", vec!["x".into(), "y".into()]),
        ])
        .unwrap();
        let row = dataset.row(1).unwrap();
        assert_eq!(row, vec![&Value::Int(2), &Value::Str("y".into())]);
        assert!(dataset.row(2).is_none());
        assert_eq!(dataset.column_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_explicit_dtype_overrides_inference() {
        let column = Column::with_dtype("c", Dtype::Categorical, vec!["x".into()]);
        assert_eq!(column.dtype, Dtype::Categorical);
    }

    #[test]
    fn test_unique_column_names() {
        let names = unique_column_names(vec![
            "id".to_string(),
            String::new(),
            "id".to_string(),
            "id".to_string(),
        ]);
        assert_eq!(names, vec!["id", "column_2", "id_1", "id_2"]);
    }
}
