use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::documents::{ColumnHit, ColumnSearch, RetrievedDocument};
use crate::error::RetrievalError;
use crate::index::KnowledgeIndex;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_SCAN: usize = 10_000;

#[derive(Clone, Debug)]
pub struct OpenSearchConfig {
    pub endpoint: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Deployed embedding model used by `neural` queries. Without one,
    /// `vector_search` falls back to a keyword match on `text_field`.
    pub neural_model_id: Option<String>,
    pub text_field: String,
    pub vector_field: String,
}

impl Default for OpenSearchConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9200".into(),
            username: None,
            password: None,
            neural_model_id: None,
            text_field: "text".into(),
            vector_field: "vector_field".into(),
        }
    }
}

/// OpenSearch over its REST `_search` API.
pub struct OpenSearchIndex {
    client: Client,
    config: OpenSearchConfig,
}

impl OpenSearchIndex {
    pub fn new(mut config: OpenSearchConfig) -> Result<Self, RetrievalError> {
        config.endpoint = config.endpoint.trim_end_matches('/').to_string();
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, config })
    }

    async fn search(&self, index: &str, body: Value) -> Result<SearchResponse, RetrievalError> {
        let url = format!("{}/{index}/_search", self.config.endpoint);
        let mut req = self.client.post(&url).json(&body);
        if let Some(user) = &self.config.username {
            let password = self.config.password.as_ref().map(|p| p.expose_secret().to_string());
            req = req.basic_auth(user, password);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RetrievalError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SearchResponse = resp.json().await?;
        debug!(index, hits = parsed.hits.hits.len(), "search complete");
        Ok(parsed)
    }

    fn page_content(&self, source: &Value) -> String {
        match source.get(&self.config.text_field) {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => {
                let mut source = source.clone();
                if let Some(obj) = source.as_object_mut() {
                    obj.remove(&self.config.vector_field);
                }
                source.to_string()
            }
        }
    }

    fn vector_query(&self, query: &str, k: usize) -> Value {
        let excludes = json!({"excludes": [self.config.vector_field]});
        match &self.config.neural_model_id {
            Some(model_id) => json!({
                "size": k,
                "_source": excludes,
                "query": {
                    "neural": {
                        self.config.vector_field.as_str(): {
                            "query_text": query,
                            "model_id": model_id,
                            "k": k,
                        }
                    }
                }
            }),
            None => json!({
                "size": k,
                "_source": excludes,
                "query": {"match": {self.config.text_field.as_str(): query}}
            }),
        }
    }
}

#[async_trait]
impl KnowledgeIndex for OpenSearchIndex {
    fn name(&self) -> &str {
        "opensearch"
    }

    #[instrument(skip(self, query))]
    async fn vector_search(
        &self,
        index: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        let resp = self.search(index, self.vector_query(query, k)).await?;
        Ok(resp
            .hits
            .hits
            .iter()
            .take(k)
            .map(|hit| RetrievedDocument::new(self.page_content(&hit.source)))
            .collect())
    }

    async fn column_descriptions(
        &self,
        index: &str,
        table_name: &str,
    ) -> Result<BTreeMap<String, String>, RetrievalError> {
        let body = json!({
            "_source": ["columns.col_name", "columns.col_desc"],
            "query": {"match": {"table_name": table_name}}
        });
        let resp = self.search(index, body).await?;

        let Some(first) = resp.hits.hits.first() else {
            return Ok(BTreeMap::new());
        };
        let columns: Vec<NestedColumn> = match first.source.get("columns") {
            Some(cols) => serde_json::from_value(cols.clone())?,
            None => Vec::new(),
        };
        Ok(columns.into_iter().map(|c| (c.col_name, c.col_desc)).collect())
    }

    #[instrument(skip(self))]
    async fn search_columns(
        &self,
        index: &str,
        keyword: &str,
        cap: usize,
    ) -> Result<ColumnSearch, RetrievalError> {
        let body = json!({
            "size": cap,
            "query": {
                "nested": {
                    "path": "columns",
                    "query": {"match": {"columns.col_desc": keyword}},
                    "inner_hits": {
                        "size": 1,
                        "_source": ["columns.col_name", "columns.col_desc"]
                    }
                }
            },
            "_source": ["table_name"]
        });
        let resp = self.search(index, body).await?;

        let mut search = ColumnSearch::default();
        'hits: for hit in &resp.hits.hits {
            let table_name = hit
                .source
                .get("table_name")
                .and_then(Value::as_str)
                .ok_or_else(|| RetrievalError::Decode("hit without table_name".into()))?;
            search.push_table(table_name);

            let inner = hit
                .inner_hits
                .as_ref()
                .and_then(|ih| ih.pointer("/columns/hits/hits"))
                .and_then(Value::as_array);
            for inner_hit in inner.into_iter().flatten() {
                let column: NestedColumn = serde_json::from_value(
                    inner_hit.get("_source").cloned().unwrap_or(Value::Null),
                )?;
                search.hits.push(ColumnHit {
                    table_name: table_name.to_string(),
                    column_name: column.col_name,
                    column_description: column.col_desc,
                });
                if search.hits.len() >= cap {
                    break 'hits;
                }
            }
        }
        Ok(search)
    }

    async fn all_documents(&self, index: &str) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        let body = json!({
            "size": MAX_SCAN,
            "_source": {"excludes": [self.config.vector_field]},
            "query": {"match_all": {}}
        });
        let resp = self.search(index, body).await?;
        Ok(resp
            .hits
            .hits
            .iter()
            .map(|hit| RetrievedDocument::new(self.page_content(&hit.source)))
            .collect())
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: HitList,
}

#[derive(Deserialize)]
struct HitList {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_source", default)]
    source: Value,
    #[serde(default)]
    inner_hits: Option<Value>,
}

#[derive(Deserialize)]
struct NestedColumn {
    col_name: String,
    #[serde(default)]
    col_desc: String,
}
