//! Row-wise batch loading on the primary session.
//!
//! The whole dataset is normalized, materialized as positional rows and sent
//! as one `execute_many` batch. The cursor applies the batch atomically, so a
//! failure leaves the table as it was.

use std::time::Instant;

use tracing::info;

use crate::core::{Cursor, Dataset, QualifiedName};
use crate::drivers::mssql::MssqlDialect;
use crate::error::{LoaderError, Result};
use crate::normalize::normalize_dataset;

/// Insert every row of `dataset` into `table`.
///
/// `db_dtypes` holds one destination type per column and must match the
/// column count. Returns the number of rows the server reported affected.
pub async fn load(
    cursor: &mut dyn Cursor,
    dataset: &Dataset,
    db_dtypes: &[String],
    table: &QualifiedName,
) -> Result<u64> {
    if db_dtypes.len() != dataset.num_columns() {
        return Err(LoaderError::Config(format!(
            "{} destination types given for {} columns of {}",
            db_dtypes.len(),
            dataset.num_columns(),
            table
        )));
    }
    if dataset.num_rows() == 0 {
        return Ok(0);
    }

    let start = Instant::now();
    let sql = MssqlDialect.build_insert_command(table, dataset.num_columns())?;
    let rows = normalize_dataset(dataset);
    let affected = cursor
        .execute_many(&sql, &rows)
        .await
        .map_err(|e| LoaderError::transfer(table.to_string(), e.to_string()))?;

    info!(
        "Inserted {} rows into {} in {:.2}s",
        rows.len(),
        table,
        start.elapsed().as_secs_f64()
    );
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, SqlValue, Value};
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingCursor {
        batches: Vec<(String, Vec<Vec<SqlValue>>)>,
        fail: bool,
    }

    #[async_trait]
    impl Cursor for RecordingCursor {
        async fn execute(&mut self, _: &str, _: &[SqlValue]) -> Result<u64> {
            Ok(0)
        }

        async fn execute_many(&mut self, sql: &str, rows: &[Vec<SqlValue>]) -> Result<u64> {
            if self.fail {
                return Err(LoaderError::Config("conversion failed".into()));
            }
            self.batches.push((sql.to_string(), rows.to_vec()));
            Ok(rows.len() as u64)
        }

        async fn fetch(&mut self, _: &str, _: &[SqlValue], _: Option<usize>) -> Result<Dataset> {
            Ok(Dataset::default())
        }
    }

    fn sample() -> Dataset {
        Dataset::new(vec![
            Column::new("id", vec![1.into(), 2.into()]),
            Column::new("score", vec![Value::Float(1.5), Value::Float(f64::NAN)]),
            Column::new("flag", vec![true.into(), false.into()]),
        ])
        .unwrap()
    }

    fn types(n: usize) -> Vec<String> {
        vec!["char(255)".to_string(); n]
    }

    #[tokio::test]
    async fn test_load_sends_one_batch() {
        let mut cursor = RecordingCursor::default();
        let table = QualifiedName::new("dbo", "scores");
        let affected = load(&mut cursor, &sample(), &types(3), &table).await.unwrap();

        assert_eq!(affected, 2);
        assert_eq!(cursor.batches.len(), 1);
        let (sql, rows) = &cursor.batches[0];
        assert_eq!(sql, "INSERT INTO [dbo].[scores] VALUES (?, ?, ?)");
        assert_eq!(
            rows[1],
            vec![SqlValue::I64(2), SqlValue::Null, SqlValue::Text("False".into())]
        );
    }

    #[tokio::test]
    async fn test_load_rejects_type_count_mismatch() {
        let mut cursor = RecordingCursor::default();
        let table = QualifiedName::new("dbo", "scores");
        let result = load(&mut cursor, &sample(), &types(2), &table).await;
        assert!(matches!(result, Err(LoaderError::Config(_))));
        assert!(cursor.batches.is_empty());
    }

    #[tokio::test]
    async fn test_load_failure_names_table() {
        let mut cursor = RecordingCursor {
            fail: true,
            ..Default::default()
        };
        let table = QualifiedName::new("dbo", "scores");
        let err = load(&mut cursor, &sample(), &types(3), &table).await.unwrap_err();
        match err {
            LoaderError::Transfer { table, .. } => assert_eq!(table, "dbo.scores"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_dataset_is_noop() {
        let mut cursor = RecordingCursor::default();
        let dataset = Dataset::new(vec![Column::new("id", vec![])]).unwrap();
        let table = QualifiedName::new("dbo", "t");
        assert_eq!(load(&mut cursor, &dataset, &types(1), &table).await.unwrap(), 0);
        assert!(cursor.batches.is_empty());
    }
}
