use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::documents::{ColumnSearch, RetrievedDocument};
use crate::error::RetrievalError;

/// Search backend holding the query-sample and table-schema corpora.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Similarity search, best match first, at most `k` documents.
    async fn vector_search(
        &self,
        index: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError>;

    /// `{col_name: col_desc}` for the table whose `table_name` matches; empty when none does.
    async fn column_descriptions(
        &self,
        index: &str,
        table_name: &str,
    ) -> Result<BTreeMap<String, String>, RetrievalError>;

    /// Keyword match against column descriptions: one best column per table, at most `cap` hits.
    async fn search_columns(
        &self,
        index: &str,
        keyword: &str,
        cap: usize,
    ) -> Result<ColumnSearch, RetrievalError>;

    /// Every document in the index.
    async fn all_documents(&self, index: &str) -> Result<Vec<RetrievedDocument>, RetrievalError>;
}
