use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use sqlpilot_retrieval::ColumnHit;

/// Consecutive validation failures at which the router stops suggesting retries.
pub const RETRY_CEILING: u32 = 2;

/// Where the validate-and-run loop stands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "failures", rename_all = "snake_case")]
pub enum RetryState {
    #[default]
    Clean,
    Failed(u32),
    /// At or past the ceiling; the next failure is answered with a stop hint.
    Stop(u32),
}

impl RetryState {
    pub fn count(&self) -> u32 {
        match *self {
            Self::Clean => 0,
            Self::Failed(n) | Self::Stop(n) => n,
        }
    }

    fn after_failure(self) -> Self {
        let n = self.count() + 1;
        if n >= RETRY_CEILING {
            Self::Stop(n)
        } else {
            Self::Failed(n)
        }
    }
}

/// Advice returned to the model alongside a failure log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureHint {
    Stop,
    SchemaExploration,
    RetryGeneration,
}

impl FailureHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "Stop the sequence.",
            Self::SchemaExploration => "Use the schema_exploration tool",
            Self::RetryGeneration => "Retry the query generation tool",
        }
    }
}

/// The most recent validation failure and the query that caused it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub log: String,
    pub query: String,
}

/// Accumulated schema-exploration results. Append-only within a turn.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaFindings {
    pub hits: Vec<ColumnHit>,
    /// Keywords whose search failed.
    pub not_found: Vec<String>,
}

impl SchemaFindings {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty() && self.not_found.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultLocation {
    Saved(PathBuf),
    /// The final query ran and returned zero rows.
    NoData,
}

impl ResultLocation {
    fn to_value(&self) -> Value {
        match self {
            Self::Saved(path) => Value::String(path.display().to_string()),
            Self::NoData => Value::String("No data found from query execution".into()),
        }
    }
}

/// First rows of a saved result, keyed by output column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultPreview {
    pub rows: Vec<Map<String, Value>>,
    pub truncated: bool,
    pub total_rows: usize,
}

/// What a successful validate-and-run leaves behind.
#[derive(Clone, Debug)]
pub struct QuerySuccess {
    pub final_query: String,
    pub location: ResultLocation,
    pub sql_file: Option<PathBuf>,
    pub preview: Option<ResultPreview>,
}

/// Per-turn record of query generation and validation progress.
///
/// Retry and failure fields change only through [`record_failure`] and
/// [`record_success`], so the failure log and failed query are always both
/// present or both absent.
///
/// [`record_failure`]: SessionState::record_failure
/// [`record_success`]: SessionState::record_success
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    pub user_prompt: String,
    pub refined_prompt: String,
    pub initial_query: Option<String>,
    pub final_query: Option<String>,
    sql_query_file: Option<PathBuf>,
    result: Option<ResultLocation>,
    result_preview: Option<ResultPreview>,
    failure: Option<Failure>,
    retry: RetryState,
    findings: SchemaFindings,
    success: bool,
}

impl SessionState {
    pub fn new(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self {
            refined_prompt: prompt.clone(),
            user_prompt: prompt,
            ..Default::default()
        }
    }

    /// The question the pipeline works from: the refined prompt if there is one.
    pub fn effective_prompt(&self) -> &str {
        if self.refined_prompt.is_empty() {
            &self.user_prompt
        } else {
            &self.refined_prompt
        }
    }

    pub fn retry(&self) -> RetryState {
        self.retry
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub fn findings(&self) -> &SchemaFindings {
        &self.findings
    }

    pub fn result(&self) -> Option<&ResultLocation> {
        self.result.as_ref()
    }

    pub fn sql_query_file(&self) -> Option<&PathBuf> {
        self.sql_query_file.as_ref()
    }

    pub fn result_preview(&self) -> Option<&ResultPreview> {
        self.result_preview.as_ref()
    }

    pub fn success(&self) -> bool {
        self.success
    }

    /// Store the failure and advance the retry state.
    ///
    /// The hint reflects the state before this failure: at the ceiling it is
    /// always a stop, otherwise a missing schema object points at exploration.
    pub fn record_failure(&mut self, log: impl Into<String>, query: impl Into<String>) -> FailureHint {
        let log = log.into();
        let hint = if matches!(self.retry, RetryState::Stop(_)) {
            FailureHint::Stop
        } else if log.contains("no such") {
            FailureHint::SchemaExploration
        } else {
            FailureHint::RetryGeneration
        };
        self.failure = Some(Failure {
            log,
            query: query.into(),
        });
        self.retry = self.retry.after_failure();
        hint
    }

    pub fn record_success(&mut self, outcome: QuerySuccess) {
        self.final_query = Some(outcome.final_query);
        self.result = Some(outcome.location);
        if outcome.sql_file.is_some() {
            self.sql_query_file = outcome.sql_file;
        }
        if outcome.preview.is_some() {
            self.result_preview = outcome.preview;
        }
        self.failure = None;
        self.retry = RetryState::Clean;
        self.success = true;
    }

    pub fn add_findings(&mut self, hits: impl IntoIterator<Item = ColumnHit>) {
        self.findings.hits.extend(hits);
    }

    pub fn add_not_found(&mut self, keyword: impl Into<String>) {
        self.findings.not_found.push(keyword.into());
    }

    /// Prior failure and exploration hints, as fed to the generation prompts.
    pub fn failure_context(&self) -> String {
        let (log, query) = match &self.failure {
            Some(f) => (f.log.as_str(), f.query.as_str()),
            None => ("none", "none"),
        };
        let hints = if self.findings.is_empty() {
            "none".to_string()
        } else {
            serde_json::to_string(&self.findings).unwrap_or_default()
        };
        format!("failure_log: {log}\nfailed_query: {query}\nretry_hint: {hints}")
    }

    /// Flat JSON record of the state, `null` where nothing was recorded.
    pub fn record(&self) -> Value {
        let mut record = json!({
            "user_prompt": self.user_prompt,
            "refined_prompt": self.refined_prompt,
            "initial_query": self.initial_query,
            "final_query": self.final_query,
            "sql_query_file": self.sql_query_file.as_ref().map(|p| p.display().to_string()),
            "result_csv_file": self.result.as_ref().map(ResultLocation::to_value),
            "failure_log": self.failure.as_ref().map(|f| f.log.clone()),
            "failed_query": self.failure.as_ref().map(|f| f.query.clone()),
            "search_result": self.findings,
            "success": self.success,
            "retry": self.retry.count(),
        });
        if let (Some(preview), Value::Object(map)) = (&self.result_preview, &mut record) {
            map.insert("result_preview".into(), json!(preview));
        }
        record
    }
}
