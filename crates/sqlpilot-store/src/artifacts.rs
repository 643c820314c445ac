use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::target::{cell_text, QueryRows};

/// The CSV + SQL files written for one successful query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPair {
    pub csv_path: PathBuf,
    pub sql_path: PathBuf,
    pub row_count: usize,
}

/// Writes result artifacts under a fixed output directory.
///
/// Names carry a second-resolution timestamp plus a random UUID, so concurrent
/// turns never collide and no lock is needed.
#[derive(Clone, Debug)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `rows` as CSV and `sql` as text; both files exist afterwards or neither does.
    ///
    /// The header is `output_columns`, or the result-set columns when that is empty.
    pub fn persist(
        &self,
        rows: &QueryRows,
        output_columns: &[String],
        sql: &str,
    ) -> Result<ArtifactPair, StoreError> {
        let header: &[String] = if output_columns.is_empty() {
            &rows.columns
        } else {
            output_columns
        };
        if header.len() != rows.columns.len() {
            return Err(StoreError::ColumnMismatch {
                header: header.len(),
                row: rows.columns.len(),
            });
        }

        std::fs::create_dir_all(&self.dir)?;

        let stamp = Local::now().format("%Y%m%d%H%M%S");
        let id = Uuid::new_v4();
        let csv_path = self.dir.join(format!("query_result_{stamp}_{id}.csv"));
        let sql_path = self.dir.join(format!("query_{stamp}_{id}.sql"));

        write_pair(&csv_path, &sql_path, header, rows, sql)?;

        info!(
            csv = %csv_path.display(),
            sql = %sql_path.display(),
            rows = rows.len(),
            "query artifacts saved"
        );
        Ok(ArtifactPair {
            csv_path,
            sql_path,
            row_count: rows.len(),
        })
    }
}

fn write_pair(
    csv_path: &Path,
    sql_path: &Path,
    header: &[String],
    rows: &QueryRows,
    sql: &str,
) -> Result<(), StoreError> {
    let written = write_csv(csv_path, header, rows)
        .and_then(|()| std::fs::write(sql_path, sql).map_err(StoreError::from));

    if let Err(e) = written {
        if csv_path.exists() {
            if let Err(cleanup) = std::fs::remove_file(csv_path) {
                warn!(path = %csv_path.display(), error = %cleanup, "failed to remove partial csv");
            }
        }
        return Err(e);
    }
    Ok(())
}

fn write_csv(path: &Path, header: &[String], rows: &QueryRows) -> Result<(), StoreError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(header)?;
    for row in &rows.rows {
        writer.write_record(row.iter().map(cell_text))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn count_rows() -> QueryRows {
        QueryRows {
            columns: vec!["COUNT(*)".into()],
            rows: vec![vec![Value::from(59)]],
        }
    }

    #[test]
    fn persist_writes_pair_with_shared_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("result_files"));

        let pair = writer
            .persist(&count_rows(), &["customer_count".to_string()], "SELECT COUNT(*) FROM customers")
            .unwrap();

        assert_eq!(pair.row_count, 1);
        let csv = std::fs::read_to_string(&pair.csv_path).unwrap();
        assert_eq!(csv, "customer_count\n59\n");
        let sql = std::fs::read_to_string(&pair.sql_path).unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM customers");

        let csv_name = pair.csv_path.file_name().unwrap().to_str().unwrap();
        let sql_name = pair.sql_path.file_name().unwrap().to_str().unwrap();
        let suffix = csv_name.strip_prefix("query_result_").unwrap().strip_suffix(".csv").unwrap();
        assert_eq!(sql_name, format!("query_{suffix}.sql"));
        assert_eq!(suffix.len(), 14 + 1 + 36);
    }

    #[test]
    fn header_falls_back_to_result_columns() {
        let dir = tempfile::tempdir().unwrap();
        let rows = QueryRows {
            columns: vec!["FirstName".into(), "Email".into()],
            rows: vec![vec![Value::from("Luís"), Value::Null]],
        };
        let pair = ArtifactWriter::new(dir.path()).persist(&rows, &[], "SELECT 1").unwrap();
        let csv = std::fs::read_to_string(pair.csv_path).unwrap();
        assert_eq!(csv, "FirstName,Email\nLuís,\n");
    }

    #[test]
    fn column_mismatch_rejected_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let err = ArtifactWriter::new(&out)
            .persist(&count_rows(), &["a".to_string(), "b".to_string()], "SELECT 1")
            .unwrap_err();
        assert!(matches!(err, StoreError::ColumnMismatch { header: 2, row: 1 }));
        assert!(!out.exists());
    }

    #[test]
    fn failed_sql_write_removes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("query_result_x.csv");
        let sql_path = dir.path().join("query_x.sql");
        // A directory where the SQL file should go makes the write fail.
        std::fs::create_dir(&sql_path).unwrap();

        let result = write_pair(&csv_path, &sql_path, &["COUNT(*)".to_string()], &count_rows(), "SELECT 1");
        assert!(result.is_err());
        assert!(!csv_path.exists());
    }
}
