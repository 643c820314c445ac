use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::documents::{ColumnHit, ColumnSearch, RetrievedDocument, TableSummary};
use crate::error::RetrievalError;
use crate::index::KnowledgeIndex;

/// In-process index with brute-force bag-of-words cosine ranking.
///
/// Used offline and in tests. Loaded from a fixture shaped as
/// `{"<index name>": [<document object>, ...]}`; each object's JSON text is
/// its page content.
#[derive(Default)]
pub struct InMemoryIndex {
    indices: RwLock<HashMap<String, Vec<StoredDoc>>>,
}

struct StoredDoc {
    source: Value,
    page_content: String,
    terms: HashMap<String, f32>,
}

impl StoredDoc {
    fn new(source: Value) -> Self {
        let page_content = source.to_string();
        let terms = term_counts(&searchable_text(&source));
        Self {
            source,
            page_content,
            terms,
        }
    }
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(path: &Path) -> Result<Self, RetrievalError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RetrievalError::Fixture(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, RetrievalError> {
        let parsed: HashMap<String, Vec<Value>> = serde_json::from_str(raw)
            .map_err(|e| RetrievalError::Fixture(e.to_string()))?;
        let index = Self::new();
        for (name, docs) in parsed {
            index.insert(&name, docs);
        }
        Ok(index)
    }

    pub fn insert(&self, index: &str, docs: impl IntoIterator<Item = Value>) {
        let mut indices = self.indices.write();
        indices
            .entry(index.to_string())
            .or_default()
            .extend(docs.into_iter().map(StoredDoc::new));
    }

    fn with_index<T>(
        &self,
        index: &str,
        f: impl FnOnce(&[StoredDoc]) -> T,
    ) -> Result<T, RetrievalError> {
        let indices = self.indices.read();
        let docs = indices
            .get(index)
            .ok_or_else(|| RetrievalError::UnknownIndex(index.to_string()))?;
        Ok(f(docs))
    }
}

#[async_trait]
impl KnowledgeIndex for InMemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn vector_search(
        &self,
        index: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        let query_terms = term_counts(query);
        self.with_index(index, |docs| {
            let mut scored: Vec<(f32, usize)> = docs
                .iter()
                .enumerate()
                .map(|(i, doc)| (cosine_similarity(&query_terms, &doc.terms), i))
                .collect();
            // Stable: equal scores keep insertion order.
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            scored
                .into_iter()
                .take(k)
                .map(|(_, i)| RetrievedDocument::new(docs[i].page_content.clone()))
                .collect()
        })
    }

    async fn column_descriptions(
        &self,
        index: &str,
        table_name: &str,
    ) -> Result<BTreeMap<String, String>, RetrievalError> {
        self.with_index(index, |docs| {
            docs.iter()
                .filter_map(|d| serde_json::from_value::<TableSummary>(d.source.clone()).ok())
                .find(|t| t.table_name.eq_ignore_ascii_case(table_name.trim()))
                .map(|t| t.columns.into_iter().map(|c| (c.col_name, c.col_desc)).collect())
                .unwrap_or_default()
        })
    }

    async fn search_columns(
        &self,
        index: &str,
        keyword: &str,
        cap: usize,
    ) -> Result<ColumnSearch, RetrievalError> {
        let wanted = term_counts(keyword);
        self.with_index(index, |docs| {
            // Best-matching column per table, like a nested query with one inner hit.
            let mut per_table: Vec<(usize, ColumnHit)> = docs
                .iter()
                .filter_map(|d| serde_json::from_value::<TableSummary>(d.source.clone()).ok())
                .filter_map(|table| {
                    table
                        .columns
                        .iter()
                        .map(|c| (overlap(&wanted, &c.col_desc), c))
                        .filter(|(score, _)| *score > 0)
                        .max_by_key(|(score, _)| *score)
                        .map(|(score, c)| {
                            (
                                score,
                                ColumnHit {
                                    table_name: table.table_name.clone(),
                                    column_name: c.col_name.clone(),
                                    column_description: c.col_desc.clone(),
                                },
                            )
                        })
                })
                .collect();
            per_table.sort_by(|a, b| b.0.cmp(&a.0));

            let mut search = ColumnSearch::default();
            for (_, hit) in per_table.into_iter().take(cap) {
                search.push_table(&hit.table_name);
                search.hits.push(hit);
            }
            search
        })
    }

    async fn all_documents(&self, index: &str) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        self.with_index(index, |docs| {
            docs.iter()
                .map(|d| RetrievedDocument::new(d.page_content.clone()))
                .collect()
        })
    }
}

/// All string leaves of a document, space-joined.
fn searchable_text(value: &Value) -> String {
    let mut out = String::new();
    collect_strings(value, &mut out);
    out
}

fn collect_strings(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(s);
            out.push(' ');
        }
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn term_counts(text: &str) -> HashMap<String, f32> {
    let mut counts = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0.0) += 1.0;
    }
    counts
}

fn overlap(wanted: &HashMap<String, f32>, text: &str) -> usize {
    tokenize(text).filter(|t| wanted.contains_key(t)).count()
}

fn cosine_similarity(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    let dot: f32 = a
        .iter()
        .filter_map(|(term, wa)| b.get(term).map(|wb| wa * wb))
        .sum();
    let norm_a = a.values().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.values().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
