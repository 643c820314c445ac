use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use sqlpilot_store::{QueryRows, SqlDatabase};

use crate::dialect::explain_statement;
use crate::parsed::ParsedQuery;
use crate::prompts;
use crate::services::AgentServices;
use crate::state::{QuerySuccess, ResultLocation, ResultPreview};
use crate::turn::Turn;

/// Which validation step failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureCode {
    /// Plan check could not be built or run.
    E01,
    /// Model-side review failed or gave an unusable reply.
    E02,
    /// The final query failed to execute.
    E03,
    /// Results could not be saved.
    E04,
}

impl FailureCode {
    fn message(&self, detail: &str) -> String {
        match self {
            Self::E01 => format!("[E01] An error occurred while generating the EXPLAIN query: {detail}"),
            Self::E02 => format!(
                "[E02] An issue unrelated to the query was encountered: {detail} (Model-related problem)"
            ),
            Self::E03 => format!("[E03] An error occurred while executing the final query: {detail}"),
            Self::E04 => format!("[E04] An error occurred while saving the results to CSV: {detail}"),
        }
    }
}

/// Plan-check, review, execute and persist a candidate query.
///
/// Every outcome is returned as tool-result JSON: a failure records itself in
/// the session state and carries `failure_log` plus `next_action`; a success
/// clears the failure and carries `message`.
pub async fn validate_and_run(turn: &mut Turn, services: &AgentServices, generated_query: &str) -> Value {
    turn.state.initial_query = Some(generated_query.to_string());
    let config = &services.config;

    let explain = explain_statement(&config.dialect, generated_query);
    let plan = match run_off_runtime(&services.database, explain).await {
        Ok(plan) => plan,
        Err(detail) => return fail(turn, FailureCode::E01, &detail, generated_query),
    };

    let prompt = prompts::query_validation(
        &config.dialect,
        &plan.to_text(),
        generated_query,
        &config.language,
        turn.state.effective_prompt(),
    );
    let (final_query, output_columns) = match turn.call(services, &prompt.into_context(), false).await {
        Ok(reply) => match ParsedQuery::from_reply(&reply.text(), "final_query") {
            ParsedQuery::Ok {
                query,
                output_columns,
                ..
            } => (query, output_columns),
            ParsedQuery::Malformed { raw } => {
                let detail = format!("validation reply had no final_query: {}", truncate(&raw, 200));
                return fail(turn, FailureCode::E02, &detail, generated_query);
            }
        },
        Err(e) => return fail(turn, FailureCode::E02, &e.to_string(), generated_query),
    };

    let rows = match run_off_runtime(&services.database, final_query.clone()).await {
        Ok(rows) => rows,
        Err(detail) => return fail(turn, FailureCode::E03, &detail, &final_query),
    };

    if rows.is_empty() {
        info!(query = %final_query, "query returned no rows");
        turn.state.record_success(QuerySuccess {
            final_query,
            location: ResultLocation::NoData,
            sql_file: None,
            preview: None,
        });
        return json!({"message": "Query executed successfully, but no matching data found."});
    }

    let pair = match services.artifacts.persist(&rows, &output_columns, &final_query) {
        Ok(pair) => pair,
        Err(e) => return fail(turn, FailureCode::E04, &e.to_string(), &final_query),
    };

    let preview = preview(&rows, &output_columns, config.preview_rows);
    turn.state.record_success(QuerySuccess {
        final_query,
        location: ResultLocation::Saved(pair.csv_path),
        sql_file: Some(pair.sql_path),
        preview: Some(preview),
    });
    json!({"message": "Query executed successfully"})
}

/// Database calls block, so they run on the blocking pool and a slow query
/// never stalls the async workers.
async fn run_off_runtime(db: &Arc<dyn SqlDatabase>, sql: String) -> Result<QueryRows, String> {
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || db.run(&sql))
        .await
        .map_err(|e| format!("query task failed: {e}"))?
        .map_err(|e| e.to_string())
}

fn fail(turn: &mut Turn, code: FailureCode, detail: &str, query: &str) -> Value {
    let log = code.message(detail);
    let hint = turn.state.record_failure(log.clone(), query);
    warn!(
        ?code,
        retry = turn.state.retry().count(),
        next_action = hint.as_str(),
        "query validation failed"
    );
    json!({"failure_log": log, "next_action": hint.as_str()})
}

fn preview(rows: &QueryRows, output_columns: &[String], limit: usize) -> ResultPreview {
    let header: &[String] = if output_columns.is_empty() {
        &rows.columns
    } else {
        output_columns
    };
    ResultPreview {
        rows: rows.records(header, limit),
        truncated: rows.len() > limit,
        total_rows: rows.len(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FailureHint, RetryState};
    use crate::services::{AgentConfig, AgentServices};
    use crate::testutil::{validated, Harness, TOOLS};
    use crate::turn::Turn;
    use sqlpilot_core::tools::ToolConfig;
    use sqlpilot_llm::{MockProvider, MockResponse};
    use sqlpilot_retrieval::{InMemoryIndex, Retriever, RetrieverConfig};
    use sqlpilot_store::{ArtifactWriter, StoreError};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::broadcast;

    const COUNT: &str = "SELECT COUNT(*) AS total FROM customers";

    #[tokio::test]
    async fn successful_query_saves_artifacts() {
        let h = Harness::new(vec![validated(COUNT, &["total"])]);
        let (mut turn, _rx) = h.turn("How many customers are there?");

        let out = validate_and_run(&mut turn, &h.services, COUNT).await;

        assert_eq!(out, json!({"message": "Query executed successfully"}));
        assert!(turn.state.success());
        assert_eq!(turn.state.initial_query.as_deref(), Some(COUNT));
        assert_eq!(turn.state.final_query.as_deref(), Some(COUNT));
        match turn.state.result() {
            Some(ResultLocation::Saved(path)) => {
                let csv = std::fs::read_to_string(path).unwrap();
                assert_eq!(csv.lines().collect::<Vec<_>>(), vec!["total", "59"]);
            }
            other => panic!("unexpected result {other:?}"),
        }
        let sql = std::fs::read_to_string(turn.state.sql_query_file().unwrap()).unwrap();
        assert_eq!(sql, COUNT);
        let preview = turn.state.result_preview().unwrap();
        assert_eq!(preview.rows[0]["total"], json!(59));
        assert!(!preview.truncated);
        assert_eq!(turn.ledger().calls(), 1);
    }

    #[tokio::test]
    async fn zero_rows_is_success_without_files() {
        let query = "SELECT Email FROM customers WHERE Country = 'Chile'";
        let h = Harness::new(vec![validated(query, &["Email"])]);
        let (mut turn, _rx) = h.turn("Emails of customers in Chile");

        let out = validate_and_run(&mut turn, &h.services, query).await;

        assert_eq!(out["message"], "Query executed successfully, but no matching data found.");
        assert!(turn.state.success());
        assert_eq!(turn.state.result(), Some(&ResultLocation::NoData));
        assert_eq!(turn.state.record()["result_csv_file"], "No data found from query execution");
        assert!(!h.dir.path().join("result_files").exists());
    }

    #[tokio::test]
    async fn missing_table_points_at_exploration() {
        let h = Harness::new(vec![]);
        let (mut turn, _rx) = h.turn("Total invoiced");

        let out = validate_and_run(&mut turn, &h.services, "SELECT SUM(Total) FROM invoices").await;

        assert!(out["failure_log"].as_str().unwrap().starts_with("[E01]"));
        assert!(out["failure_log"].as_str().unwrap().contains("no such table"));
        assert_eq!(out["next_action"], FailureHint::SchemaExploration.as_str());
        assert_eq!(turn.state.retry(), RetryState::Failed(1));
        assert_eq!(h.provider.call_count(), 0);
        assert!(!turn.state.success());
    }

    #[tokio::test]
    async fn unusable_review_reply_is_e02() {
        let h = Harness::new(vec![MockResponse::text_with_usage("Looks fine to me.", 40, 5)]);
        let (mut turn, _rx) = h.turn("How many customers?");

        let out = validate_and_run(&mut turn, &h.services, COUNT).await;

        assert!(out["failure_log"].as_str().unwrap().starts_with("[E02]"));
        assert_eq!(out["next_action"], FailureHint::RetryGeneration.as_str());
        assert_eq!(turn.state.failure().unwrap().query, COUNT);
    }

    #[tokio::test]
    async fn execution_failure_records_final_query() {
        let broken = "SELEC COUNT(*) FROM customers";
        let h = Harness::new(vec![validated(broken, &["total"])]);
        let (mut turn, _rx) = h.turn("How many customers?");

        let out = validate_and_run(&mut turn, &h.services, COUNT).await;

        assert!(out["failure_log"].as_str().unwrap().starts_with("[E03]"));
        assert_eq!(out["next_action"], FailureHint::RetryGeneration.as_str());
        assert_eq!(turn.state.failure().unwrap().query, broken);
        assert_eq!(turn.state.retry().count(), 1);
        let record = turn.state.record();
        assert_eq!(record["failed_query"], broken);
        assert_eq!(record["success"], false);
    }

    #[tokio::test]
    async fn third_failure_says_stop() {
        let broken = "SELEC 1";
        let h = Harness::new(vec![
            validated(broken, &[]),
            validated(broken, &[]),
            validated(broken, &[]),
        ]);
        let (mut turn, _rx) = h.turn("How many customers?");

        let mut hints = Vec::new();
        for _ in 0..3 {
            let out = validate_and_run(&mut turn, &h.services, COUNT).await;
            hints.push(out["next_action"].as_str().unwrap().to_string());
        }

        assert_eq!(
            hints,
            vec![
                FailureHint::RetryGeneration.as_str(),
                FailureHint::RetryGeneration.as_str(),
                FailureHint::Stop.as_str(),
            ]
        );
        assert_eq!(turn.state.retry(), RetryState::Stop(3));
    }

    #[tokio::test]
    async fn column_mismatch_is_e04() {
        let query = "SELECT FirstName, Email FROM customers";
        let h = Harness::new(vec![validated(query, &["name"])]);
        let (mut turn, _rx) = h.turn("Customer names");

        let out = validate_and_run(&mut turn, &h.services, query).await;

        assert!(out["failure_log"].as_str().unwrap().starts_with("[E04]"));
        assert_eq!(turn.state.failure().unwrap().query, query);
        assert!(turn.state.result().is_none());
    }

    #[tokio::test]
    async fn large_results_are_previewed() {
        let query = "SELECT CustomerId, Email FROM customers";
        let h = Harness::new(vec![validated(query, &[])]);
        let (mut turn, _rx) = h.turn("List customer emails");

        validate_and_run(&mut turn, &h.services, query).await;

        let preview = turn.state.result_preview().unwrap();
        assert_eq!(preview.rows.len(), 20);
        assert!(preview.truncated);
        assert_eq!(preview.total_rows, 59);
        assert_eq!(preview.rows[0]["Email"], "c1@example.com");
    }

    /// Every statement takes `delay` of wall-clock time and then fails.
    struct SlowDatabase {
        delay: std::time::Duration,
    }

    impl SqlDatabase for SlowDatabase {
        fn usable_table_names(&self) -> Result<BTreeSet<String>, StoreError> {
            Ok(BTreeSet::new())
        }

        fn table_info_no_throw(&self, _table_names: &[String]) -> String {
            String::new()
        }

        fn run(&self, _sql: &str) -> Result<QueryRows, StoreError> {
            std::thread::sleep(self.delay);
            Err(StoreError::NotFound("table customers".into()))
        }
    }

    #[tokio::test]
    async fn slow_statement_does_not_block_other_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let services = AgentServices {
            provider: Arc::new(MockProvider::new(vec![])),
            database: Arc::new(SlowDatabase {
                delay: std::time::Duration::from_millis(150),
            }),
            retriever: Retriever::new(Arc::new(InMemoryIndex::new()), RetrieverConfig::default()),
            artifacts: ArtifactWriter::new(dir.path().join("result_files")),
            tools: ToolConfig::from_json(TOOLS).unwrap(),
            config: AgentConfig::default(),
        };
        let (tx, _rx) = broadcast::channel(8);
        let mut turn = Turn::new("How many customers?", None, tx);

        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });

        let out = validate_and_run(&mut turn, &services, COUNT).await;
        ticker.abort();

        assert!(out["failure_log"].as_str().unwrap().starts_with("[E01]"));
        let ticked = ticks.load(Ordering::Relaxed);
        assert!(ticked >= 3, "runtime stalled during the statement: {ticked} ticks");
    }

    #[test]
    fn long_details_truncated() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
