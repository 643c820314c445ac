use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast;

use sqlpilot_core::events::ProgressEvent;
use sqlpilot_core::tools::ToolConfig;
use sqlpilot_llm::{MockProvider, MockResponse};
use sqlpilot_retrieval::{InMemoryIndex, Retriever, RetrieverConfig};
use sqlpilot_store::{ArtifactWriter, SqliteDatabase};

use crate::services::{AgentConfig, AgentServices};
use crate::turn::Turn;

pub(crate) const TOOLS: &str = r#"{"tools": [
    {"toolSpec": {"name": "query_generation", "description": "Draft SQL",
        "inputSchema": {"json": {"type": "object", "properties": {"input": {"type": "string"}}, "required": ["input"]}}}},
    {"toolSpec": {"name": "validate_and_run_queries", "description": "Check and run SQL",
        "inputSchema": {"json": {"type": "object", "properties": {"generated_query": {"type": "string"}}, "required": ["generated_query"]}}}},
    {"toolSpec": {"name": "schema_exploration", "description": "Search column descriptions",
        "inputSchema": {"json": {"type": "object", "properties": {"keyword": {"type": "string"}}, "required": ["keyword"]}}}}
]}"#;

/// 59 customers, ten of them in Brazil.
const SEED: &str = "
    CREATE TABLE customers (CustomerId INTEGER PRIMARY KEY, FirstName TEXT, Country TEXT, Email TEXT);
    WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 59)
    INSERT INTO customers
    SELECT i, 'Name' || i, CASE WHEN i <= 10 THEN 'Brazil' ELSE 'USA' END, 'c' || i || '@example.com' FROM n;
";

pub(crate) struct Harness {
    pub services: Arc<AgentServices>,
    pub provider: Arc<MockProvider>,
    pub index: Arc<InMemoryIndex>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self::with_config(responses, AgentConfig::default())
    }

    pub fn with_config(responses: Vec<MockResponse>, config: AgentConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let database = SqliteDatabase::in_memory().unwrap();
        database.execute_batch(SEED).unwrap();

        let index = Arc::new(InMemoryIndex::new());
        index.insert(
            "schema_descriptions",
            vec![json!({
                "table_name": "customers",
                "table_summary": "Store customers with contact details and country",
                "columns": [
                    {"col_name": "CustomerId", "col_desc": "Unique customer identifier"},
                    {"col_name": "Email", "col_desc": "Customer email address"},
                    {"col_name": "Country", "col_desc": "Country of the billing address"}
                ]
            })],
        );

        let provider = Arc::new(MockProvider::new(responses));
        let services = AgentServices {
            provider: provider.clone(),
            database: Arc::new(database),
            retriever: Retriever::new(index.clone(), RetrieverConfig::default()),
            artifacts: ArtifactWriter::new(dir.path().join("result_files")),
            tools: ToolConfig::from_json(TOOLS).unwrap(),
            config,
        };
        Self {
            services: Arc::new(services),
            provider,
            index,
            dir,
        }
    }

    pub fn turn(&self, prompt: &str) -> (Turn, broadcast::Receiver<ProgressEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (Turn::new(prompt, None, tx), rx)
    }
}

/// Validation reply naming the final query and its output columns.
pub(crate) fn validated(query: &str, columns: &[&str]) -> MockResponse {
    let body = json!({"final_query": query, "output_columns": columns}).to_string();
    MockResponse::text_with_usage(&body, 50, 10)
}

/// Query-generation reply.
pub(crate) fn generated(query: &str, columns: &[&str]) -> MockResponse {
    let body = json!({"query": query, "output_columns": columns}).to_string();
    MockResponse::text_with_usage(&body, 80, 20)
}
