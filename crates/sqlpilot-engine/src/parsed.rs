use serde_json::{Map, Value};

/// Extract the JSON object from a model reply.
///
/// Replies often wrap the object in a fenced block or surround it with
/// prose; everything outside the outermost braces is ignored.
pub fn parse_json_object(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str(&text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// A model reply that should carry a SQL query and its output columns.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedQuery {
    Ok {
        query: String,
        output_columns: Vec<String>,
        /// Remaining keys of the reply object, passed through untouched.
        extra: Map<String, Value>,
    },
    Malformed {
        raw: String,
    },
}

impl ParsedQuery {
    /// Parse `text`, reading the SQL from `query_key`.
    ///
    /// A missing or empty query makes the reply malformed. Missing
    /// `output_columns` is not an error; the result-set columns stand in later.
    pub fn from_reply(text: &str, query_key: &str) -> Self {
        let Some(mut map) = parse_json_object(text) else {
            return Self::Malformed { raw: text.to_string() };
        };
        let query = match map.remove(query_key) {
            Some(Value::String(q)) if !q.trim().is_empty() => q,
            _ => return Self::Malformed { raw: text.to_string() },
        };
        let output_columns = match map.remove("output_columns") {
            Some(Value::Array(cols)) => cols
                .into_iter()
                .map(|c| match c {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
            Some(Value::String(s)) => s.split(',').map(|c| c.trim().to_string()).collect(),
            _ => Vec::new(),
        };
        Self::Ok {
            query,
            output_columns,
            extra: map,
        }
    }

    /// The shape handed back to the model as a tool result.
    pub fn to_value(&self, query_key: &str) -> Value {
        match self {
            Self::Ok {
                query,
                output_columns,
                extra,
            } => {
                let mut map = extra.clone();
                map.insert(query_key.into(), Value::String(query.clone()));
                map.insert("output_columns".into(), Value::from(output_columns.clone()));
                Value::Object(map)
            }
            Self::Malformed { raw } => serde_json::json!({
                "error": format!("response did not contain a usable `{query_key}`"),
                "raw_response": raw,
            }),
        }
    }
}
