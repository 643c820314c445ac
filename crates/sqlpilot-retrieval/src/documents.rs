use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// A search hit whose content is a JSON document serialized as a string.
///
/// Documents have no stable id; callers refer to them by position in the
/// list they were returned in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub page_content: String,
}

impl RetrievedDocument {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
        }
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, RetrievalError> {
        Ok(serde_json::from_str(&self.page_content)?)
    }

    pub fn json(&self) -> Result<serde_json::Value, RetrievalError> {
        self.parse()
    }
}

/// A previously answered question and its SQL, plus any extra context fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuerySample {
    pub input: String,
    pub query: String,
    #[serde(flatten)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub col_name: String,
    pub col_desc: String,
}

/// Indexed summary of one table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSummary {
    pub table_name: String,
    #[serde(default)]
    pub table_summary: String,
    #[serde(default)]
    pub columns: Vec<ColumnDescription>,
}

/// One column matched by keyword search.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnHit {
    pub table_name: String,
    pub column_name: String,
    pub column_description: String,
}

/// Result of a column-description keyword search.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSearch {
    pub hits: Vec<ColumnHit>,
    /// Distinct table names, in first-hit order.
    pub tables: Vec<String>,
}

impl ColumnSearch {
    pub fn push_table(&mut self, table: &str) {
        if !self.tables.iter().any(|t| t == table) {
            self.tables.push(table.to_string());
        }
    }
}
