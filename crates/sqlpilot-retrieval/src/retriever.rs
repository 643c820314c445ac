use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::documents::{ColumnSearch, RetrievedDocument, TableSummary};
use crate::error::RetrievalError;
use crate::index::KnowledgeIndex;

#[derive(Clone, Debug)]
pub struct RetrieverConfig {
    pub sample_index: String,
    pub schema_index: String,
    /// Candidates fetched for sample selection.
    pub sample_k: usize,
    /// Table summaries fetched for table selection.
    pub schema_k: usize,
    /// Upper bound on column hits returned by keyword exploration.
    pub column_cap: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            sample_index: "example_queries".into(),
            schema_index: "schema_descriptions".into(),
            sample_k: 10,
            schema_k: 5,
            column_cap: 10,
        }
    }
}

/// The agent's view of the knowledge index: named corpora plus fixed fan-outs.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn KnowledgeIndex>,
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(index: Arc<dyn KnowledgeIndex>, config: RetrieverConfig) -> Self {
        Self { index, config }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn backend(&self) -> &str {
        self.index.name()
    }

    /// Up to `sample_k` stored question/SQL pairs similar to `prompt`.
    pub async fn query_samples(&self, prompt: &str) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        let docs = self
            .index
            .vector_search(&self.config.sample_index, prompt, self.config.sample_k)
            .await?;
        debug!(count = docs.len(), "query samples retrieved");
        Ok(docs)
    }

    /// The `schema_k` most relevant table summaries, as a JSON array of their documents.
    pub async fn table_summaries(&self, prompt: &str) -> Result<String, RetrievalError> {
        let docs = self
            .index
            .vector_search(&self.config.schema_index, prompt, self.config.schema_k)
            .await?;
        let values = docs
            .iter()
            .map(|d| d.json().unwrap_or_else(|_| serde_json::Value::String(d.page_content.clone())))
            .collect::<Vec<_>>();
        Ok(serde_json::to_string(&values)?)
    }

    /// `{table_name: table_summary}` across the whole schema index.
    ///
    /// Documents that do not decode as table summaries are skipped.
    pub async fn all_table_summaries(&self) -> Result<BTreeMap<String, String>, RetrievalError> {
        let docs = self.index.all_documents(&self.config.schema_index).await?;
        let mut summaries = BTreeMap::new();
        for doc in docs {
            match doc.parse::<TableSummary>() {
                Ok(table) => {
                    summaries.insert(table.table_name, table.table_summary);
                }
                Err(e) => warn!(error = %e, "skipping undecodable schema document"),
            }
        }
        Ok(summaries)
    }

    pub async fn column_descriptions(
        &self,
        table_name: &str,
    ) -> Result<BTreeMap<String, String>, RetrievalError> {
        self.index
            .column_descriptions(&self.config.schema_index, table_name)
            .await
    }

    /// Keyword search over column descriptions, capped at `column_cap` hits.
    pub async fn explore(&self, keyword: &str) -> Result<ColumnSearch, RetrievalError> {
        self.index
            .search_columns(&self.config.schema_index, keyword, self.config.column_cap)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryIndex;
    use serde_json::json;

    fn retriever() -> Retriever {
        let index = InMemoryIndex::new();
        index.insert(
            "example_queries",
            (0..12).map(|i| json!({"input": format!("question {i} about tracks"), "query": format!("SELECT {i}")})),
        );
        index.insert(
            "schema_descriptions",
            vec![
                json!({"table_name": "tracks", "table_summary": "Songs with length and price", "columns": [
                    {"col_name": "Milliseconds", "col_desc": "Track length in milliseconds"}
                ]}),
                json!({"table_name": "genres", "table_summary": "Music genres", "columns": [
                    {"col_name": "Name", "col_desc": "Genre name"}
                ]}),
            ],
        );
        Retriever::new(Arc::new(index), RetrieverConfig::default())
    }

    #[tokio::test]
    async fn samples_capped_at_sample_k() {
        let docs = retriever().query_samples("tracks").await.unwrap();
        assert_eq!(docs.len(), 10);
    }

    #[tokio::test]
    async fn table_summaries_is_json_array() {
        let raw = retriever().table_summaries("song length").await.unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["table_name"], "tracks");
    }

    #[tokio::test]
    async fn all_summaries_keyed_by_table() {
        let all = retriever().all_table_summaries().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["genres"], "Music genres");
    }

    #[tokio::test]
    async fn explore_uses_schema_index() {
        let r = retriever();
        let found = r.explore("length").await.unwrap();
        assert_eq!(found.tables, vec!["tracks"]);
        assert_eq!(found.hits[0].column_name, "Milliseconds");
        assert_eq!(r.backend(), "memory");
    }
}
