use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const LOG_TABLE: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    level TEXT NOT NULL,
    target TEXT NOT NULL,
    message TEXT NOT NULL,
    fields TEXT,
    turn_id TEXT,
    conversation_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
CREATE INDEX IF NOT EXISTS idx_logs_turn ON logs(turn_id);
";

const DEFAULT_QUERY_LIMIT: u32 = 100;

/// A persisted log row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    /// Structured event fields as a JSON object, if the event had any.
    pub fields: Option<String>,
    pub turn_id: Option<String>,
    pub conversation_id: Option<String>,
}

impl LogRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
            level: row.get("level")?,
            target: row.get("target")?,
            message: row.get("message")?,
            fields: row.get("fields")?,
            turn_id: row.get("turn_id")?,
            conversation_id: row.get("conversation_id")?,
        })
    }
}

/// Filters for [`SqliteLogSink::query`]. Unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    /// Case-insensitive level name.
    pub level: Option<String>,
    /// Substring match on the event target.
    pub target: Option<String>,
    pub turn_id: Option<String>,
    pub limit: Option<u32>,
}

impl LogQuery {
    fn to_sql(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut args = Vec::new();
        let conditions = [
            ("level =", self.level.as_ref().map(|l| l.to_uppercase())),
            ("target LIKE", self.target.as_ref().map(|t| format!("%{t}%"))),
            ("turn_id =", self.turn_id.clone()),
        ];
        for (column, value) in conditions {
            if let Some(value) = value {
                args.push(value);
                clauses.push(format!("{column} ?{}", args.len()));
            }
        }

        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields, turn_id, conversation_id FROM logs",
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(
            " ORDER BY id DESC LIMIT {}",
            self.limit.unwrap_or(DEFAULT_QUERY_LIMIT)
        ));
        (sql, args)
    }
}

/// Append-only SQLite table of log events, queried by the `logs` command.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            // Connection::open reports the real error if this fails.
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(LOG_TABLE)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn append(&self, entry: &LogEntry) -> rusqlite::Result<usize> {
        self.conn.lock().execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, turn_id, conversation_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.timestamp,
                entry.level,
                entry.target,
                entry.message,
                entry.fields,
                entry.scope.turn_id,
                entry.scope.conversation_id,
            ],
        )
    }

    /// Matching rows, newest first.
    pub fn query(&self, query: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let (sql, args) = query.to_sql();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), LogRecord::from_row)?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

struct LogEntry {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    scope: TurnScope,
}

/// The turn an event belongs to. Stored on spans that carry `turn_id` or
/// `conversation_id` so events inside them inherit the ids.
#[derive(Clone, Debug, Default)]
struct TurnScope {
    turn_id: Option<String>,
    conversation_id: Option<String>,
}

impl TurnScope {
    fn is_known(&self) -> bool {
        self.turn_id.is_some() && self.conversation_id.is_some()
    }

    fn inherit(&mut self, outer: &TurnScope) {
        self.turn_id = self.turn_id.take().or_else(|| outer.turn_id.clone());
        self.conversation_id = self
            .conversation_id
            .take()
            .or_else(|| outer.conversation_id.clone());
    }
}

/// Splits an event's fields into message, turn ids and everything else.
#[derive(Default)]
struct EventFields {
    message: Option<String>,
    scope: TurnScope,
    extra: Map<String, Value>,
}

impl EventFields {
    fn of(record: impl FnOnce(&mut Self)) -> Self {
        let mut fields = Self::default();
        record(&mut fields);
        fields
    }

    fn text(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            "turn_id" => self.scope.turn_id = Some(value),
            "conversation_id" => self.scope.conversation_id = Some(value),
            name => {
                self.extra.insert(name.to_string(), Value::String(value));
            }
        }
    }

    fn value(&mut self, field: &Field, value: impl Into<Value>) {
        self.extra.insert(field.name().to_string(), value.into());
    }

    fn extra_json(&self) -> Option<String> {
        if self.extra.is_empty() {
            return None;
        }
        serde_json::to_string(&self.extra).ok()
    }
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        // `%display` values arrive here too; drop the quotes Debug adds to strings.
        let rendered = format!("{value:?}");
        self.text(field, rendered.trim_matches('"').to_string());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.text(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.value(field, value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.value(field, value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.value(field, value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(number) = serde_json::Number::from_f64(value) {
            self.value(field, Value::Number(number));
        }
    }
}

/// `tracing` layer that writes events at or above `min_level` into a
/// [`SqliteLogSink`]. Warnings and errors by default.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
    min_level: Level,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self {
            sink,
            min_level: Level::WARN,
        }
    }

    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let fields = EventFields::of(|f| attrs.record(f));
        if fields.scope.turn_id.is_none() && fields.scope.conversation_id.is_none() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(fields.scope);
        }
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let fields = EventFields::of(|f| values.record(f));
        let Some(span) = ctx.span(id) else { return };
        let mut extensions = span.extensions_mut();
        let mut scope = fields.scope;
        if let Some(known) = extensions.get_mut::<TurnScope>() {
            scope.inherit(known);
            *known = scope;
        } else if scope.turn_id.is_some() || scope.conversation_id.is_some() {
            extensions.insert(scope);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // Levels order from ERROR (smallest) to TRACE.
        if *metadata.level() > self.min_level {
            return;
        }

        let mut fields = EventFields::of(|f| event.record(f));
        let spans = ctx.event_scope(event).into_iter().flatten();
        for span in spans {
            if fields.scope.is_known() {
                break;
            }
            if let Some(outer) = span.extensions().get::<TurnScope>() {
                fields.scope.inherit(outer);
            }
        }

        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: metadata.level().as_str().to_string(),
            target: metadata.target().to_string(),
            fields: fields.extra_json(),
            message: fields.message.unwrap_or_default(),
            scope: fields.scope,
        };
        // A failed log write has nowhere to be reported.
        let _ = self.sink.append(&entry);
    }
}
