/// Errors from the turn-log store, the target database, and artifact files.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration to version {version} failed: {source}")]
    Migration {
        version: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("column mismatch: header has {header} columns, rows have {row}")]
    ColumnMismatch { header: usize, row: usize },

    #[error("unsupported database uri: {0}")]
    UnsupportedUri(String),
}
