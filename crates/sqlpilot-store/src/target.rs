use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::StoreError;

const SAMPLE_ROWS: usize = 3;

/// The database the agent queries on the user's behalf.
///
/// Calls are synchronous; one connection is reused for introspection,
/// explain and execution within a turn, with no transaction around them.
pub trait SqlDatabase: Send + Sync {
    /// Names of the tables and views the agent may query.
    fn usable_table_names(&self) -> Result<BTreeSet<String>, StoreError>;

    /// Textual schema dump for the given tables: DDL followed by a few sample rows.
    ///
    /// Never fails. Unknown names are skipped, and when nothing can be described
    /// the returned text starts with `Error:`.
    fn table_info_no_throw(&self, table_names: &[String]) -> String;

    /// Run a statement and collect every row.
    fn run(&self, sql: &str) -> Result<QueryRows, StoreError>;
}

/// A fully materialized result set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The first `limit` rows as objects keyed by `columns`.
    ///
    /// Extra values beyond the key list are dropped; missing ones are null.
    pub fn records(&self, columns: &[String], limit: usize) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .take(limit)
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| (col.clone(), row.get(i).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect()
    }

    /// Compact text rendering for prompts, e.g. `[[59]]`.
    pub fn to_text(&self) -> String {
        serde_json::to_string(&self.rows).unwrap_or_default()
    }
}

/// Render a cell the way it should appear in a CSV or a prompt.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// SQLite implementation of [`SqlDatabase`].
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteDatabase {
    /// Open an existing database file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(format!("database file {}", path.display())));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!(path = %path.display(), "target database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_owned(),
        })
    }

    /// Open from a connection URI: `sqlite:///relative.db`, `sqlite:////abs/path.db`,
    /// `sqlite://:memory:` or a bare filesystem path.
    pub fn open_uri(uri: &str) -> Result<Self, StoreError> {
        let target = match uri.strip_prefix("sqlite://") {
            Some(rest) => rest.strip_prefix('/').unwrap_or(rest),
            None if uri.contains("://") => return Err(StoreError::UnsupportedUri(uri.to_string())),
            None => uri,
        };

        if target.is_empty() || target == ":memory:" {
            return Self::in_memory();
        }
        Self::open(Path::new(target))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Execute one or more statements without collecting rows (seeding, migrations).
    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| Ok(conn.execute_batch(sql)?))
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn describe_table(conn: &Connection, table: &str) -> Result<String, StoreError> {
        let ddl: String = conn.query_row(
            "SELECT sql FROM sqlite_master WHERE name = ?1 AND type IN ('table', 'view')",
            [table],
            |row| row.get(0),
        )?;
        let ddl: Vec<&str> = ddl.lines().filter(|l| !l.trim().is_empty()).collect();

        let sample = query_rows(
            conn,
            &format!("SELECT * FROM {} LIMIT {SAMPLE_ROWS}", quote_ident(table)),
        )?;
        let mut block = format!(
            "{}\n\n/*\n{SAMPLE_ROWS} rows from {table} table:\n{}",
            ddl.join("\n"),
            sample.columns.join("\t")
        );
        for row in &sample.rows {
            let cells: Vec<String> = row.iter().map(cell_text).collect();
            block.push('\n');
            block.push_str(&cells.join("\t"));
        }
        block.push_str("\n*/");
        Ok(block)
    }
}

impl SqlDatabase for SqliteDatabase {
    fn usable_table_names(&self) -> Result<BTreeSet<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master
                 WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<BTreeSet<_>, _>>()?;
            Ok(names)
        })
    }

    fn table_info_no_throw(&self, table_names: &[String]) -> String {
        let usable = match self.usable_table_names() {
            Ok(names) => names,
            Err(e) => return format!("Error: {e}"),
        };

        let mut resolved: Vec<&String> = Vec::new();
        let mut unknown: Vec<&str> = Vec::new();
        for requested in table_names {
            let requested = requested.trim();
            match usable.iter().find(|n| n.eq_ignore_ascii_case(requested)) {
                Some(name) if !resolved.contains(&name) => resolved.push(name),
                Some(_) => {}
                None => unknown.push(requested),
            }
        }
        if !unknown.is_empty() {
            debug!(?unknown, "skipping unknown tables in schema dump");
        }
        if resolved.is_empty() {
            return format!("Error: table_names {unknown:?} not found in database");
        }

        let described = self.with_conn(|conn| {
            resolved
                .iter()
                .map(|t| Self::describe_table(conn, t))
                .collect::<Result<Vec<_>, _>>()
        });
        match described {
            Ok(blocks) => blocks.join("\n\n\n"),
            Err(e) => format!("Error: {e}"),
        }
    }

    fn run(&self, sql: &str) -> Result<QueryRows, StoreError> {
        self.with_conn(|conn| query_rows(conn, sql))
    }
}

fn query_rows(conn: &Connection, sql: &str) -> Result<QueryRows, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(to_json(row.get_ref(i)?));
        }
        out.push(values);
    }

    Ok(QueryRows { columns, rows: out })
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
