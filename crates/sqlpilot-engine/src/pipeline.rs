//! Turn preparation and the two-stage query generation pipeline.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use sqlpilot_core::events::ProgressEvent;
use sqlpilot_retrieval::{QuerySample, RetrievedDocument};

use crate::error::EngineError;
use crate::parsed::{parse_json_object, ParsedQuery};
use crate::prompts::{self, GenerationInputs};
use crate::services::AgentServices;
use crate::turn::Turn;

const NO_DDL: &str = "Not available";
const NO_SAMPLE_DATA: &str = "No sample data available";

/// Rewrite the question into a standalone one. Any unusable reply keeps the original.
pub async fn refine_prompt(
    turn: &mut Turn,
    services: &AgentServices,
    history: &str,
) -> Result<(), EngineError> {
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let prompt = prompts::prompt_refinement(
        &turn.state.user_prompt,
        &today,
        history,
        &services.config.language,
    );
    let reply = turn.call(services, &prompt.into_context(), false).await?;

    let refined = parse_json_object(&reply.text())
        .and_then(|mut map| match map.remove("refined_prompt") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
            _ => None,
        });
    match refined {
        Some(refined) => {
            info!(refined = %refined, "prompt refined");
            turn.state.refined_prompt = refined;
        }
        None => warn!("prompt refinement reply unusable, keeping original"),
    }
    Ok(())
}

/// Retrieve similar answered questions and let the model keep the useful ones.
pub async fn select_samples(turn: &mut Turn, services: &AgentServices) -> Result<(), EngineError> {
    let candidates = match services.retriever.query_samples(turn.state.effective_prompt()).await {
        Ok(docs) => docs,
        Err(e) => {
            warn!(error = %e, "sample retrieval failed, continuing without samples");
            Vec::new()
        }
    };
    if candidates.is_empty() {
        turn.samples = Vec::new();
        return Ok(());
    }

    let inputs: Vec<String> = candidates
        .iter()
        .map(|doc| match doc.parse::<QuerySample>() {
            Ok(sample) => sample.input,
            Err(_) => doc.page_content.clone(),
        })
        .collect();
    let prompt = prompts::sample_selection(&inputs, turn.state.effective_prompt());
    let reply = turn.call(services, &prompt.into_context(), false).await?;

    turn.samples = pick_samples(&reply.text(), &candidates);
    debug!(candidates = candidates.len(), selected = turn.samples.len(), "samples selected");
    turn.emit(ProgressEvent::SamplesSelected {
        turn_id: turn.id.clone(),
        count: turn.samples.len(),
    });
    Ok(())
}

/// Parse a comma-separated index list. Non-numeric and out-of-range entries are dropped.
pub(crate) fn pick_samples(reply: &str, candidates: &[RetrievedDocument]) -> Vec<RetrievedDocument> {
    let reply = reply.trim();
    if reply.is_empty() || reply == "\"\"" {
        return Vec::new();
    }
    reply
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|id| id.parse::<usize>().ok())
        .filter_map(|i| candidates.get(i).cloned())
        .collect()
}

/// Schema bundle for one selected table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableSchema {
    pub table: String,
    pub cols: BTreeMap<String, String>,
    pub create_table_sql: String,
    pub sample_data: String,
}

/// Table selection, schema loading, then SQL generation.
///
/// Returns the parsed reply as given to the model; a malformed reply is
/// returned as data, not raised.
pub async fn generate_query(
    turn: &mut Turn,
    services: &AgentServices,
    task: &str,
) -> Result<Value, EngineError> {
    let question = turn.state.effective_prompt().to_string();
    let failure_context = turn.state.failure_context();
    let samples = turn.samples_text();

    let summaries = match services.retriever.table_summaries(&question).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "table summary retrieval failed");
            "[]".to_string()
        }
    };
    let prompt = prompts::table_selection(&summaries, &question, &samples, &failure_context);
    let reply = turn.call(services, &prompt.into_context(), false).await?;
    let tables = split_table_names(&reply.text());
    info!(?tables, "tables selected");

    let schemas = load_schemas(services, &tables).await;
    let schemas_json = serde_json::to_string_pretty(&schemas)
        .map_err(|e| EngineError::Internal(format!("serialize schemas: {e}")))?;

    let prompt = prompts::query_generation(&GenerationInputs {
        samples: &samples,
        dialect: &services.config.dialect,
        schemas: &schemas_json,
        language: &services.config.language,
        question: &question,
        failure_context: &failure_context,
        task,
    });
    let reply = turn.call(services, &prompt.into_context(), false).await?;
    let parsed = ParsedQuery::from_reply(&reply.text(), "query");
    if let ParsedQuery::Malformed { .. } = parsed {
        warn!("query generation reply had no usable query");
    }
    Ok(parsed.to_value("query"))
}

fn split_table_names(reply: &str) -> Vec<String> {
    reply
        .split(',')
        .map(|t| t.trim().trim_matches(|c| c == '`' || c == '"' || c == '.').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Live DDL and sample rows combined with indexed column descriptions.
/// Names the database does not know still get an entry, with defaults.
async fn load_schemas(services: &AgentServices, tables: &[String]) -> BTreeMap<String, TableSchema> {
    let dump = services.database.table_info_no_throw(tables);
    let (ddl, samples) = parse_schema_dump(&dump);

    let mut schemas = BTreeMap::new();
    for table in tables {
        let key = table.to_lowercase();
        let cols = match services.retriever.column_descriptions(table).await {
            Ok(cols) => cols,
            Err(e) => {
                warn!(table = %table, error = %e, "column description lookup failed");
                BTreeMap::new()
            }
        };
        if cols.is_empty() {
            debug!(table = %table, "no indexed column descriptions");
        }
        schemas.insert(
            table.clone(),
            TableSchema {
                table: table.clone(),
                cols,
                create_table_sql: ddl.get(&key).cloned().unwrap_or_else(|| NO_DDL.into()),
                sample_data: samples.get(&key).cloned().unwrap_or_else(|| NO_SAMPLE_DATA.into()),
            },
        );
    }
    schemas
}

fn create_table_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?[`"\[]?(\w+)[`"\]]?"#).ok()
    })
    .as_ref()
}

fn sample_rows_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"rows from\s+[`"\[]?(\w+)[`"\]]?\s+table"#).ok())
        .as_ref()
}

/// Split a schema dump into DDL and sample-row blocks keyed by lowercased table name.
pub(crate) fn parse_schema_dump(dump: &str) -> (HashMap<String, String>, HashMap<String, String>) {
    let mut ddl = HashMap::new();
    let mut samples = HashMap::new();
    for block in dump.split("\n\n") {
        if let Some(caps) = create_table_re().and_then(|re| re.captures(block)) {
            ddl.insert(caps[1].to_lowercase(), block.trim().to_string());
        } else if let Some(caps) = sample_rows_re().and_then(|re| re.captures(block)) {
            samples.insert(caps[1].to_lowercase(), block.trim().to_string());
        }
    }
    (ddl, samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(n: usize) -> Vec<RetrievedDocument> {
        (0..n)
            .map(|i| RetrievedDocument::new(format!(r#"{{"input":"q{i}","query":"SELECT {i}"}}"#)))
            .collect()
    }

    #[test]
    fn sample_ids_parsed_leniently() {
        let candidates = docs(4);
        let picked = pick_samples(" 0, 2 ,x, 9, -1", &candidates);
        assert_eq!(picked, vec![candidates[0].clone(), candidates[2].clone()]);
        assert!(pick_samples("\"\"", &candidates).is_empty());
        assert!(pick_samples("   ", &candidates).is_empty());
        assert!(pick_samples("none of them", &candidates).is_empty());
    }

    #[test]
    fn table_names_trimmed() {
        assert_eq!(split_table_names(" customers, `invoices` ,,"), vec!["customers", "invoices"]);
    }

    #[test]
    fn schema_dump_split_by_table() {
        let dump = "CREATE TABLE customers (\n\tCustomerId INTEGER PRIMARY KEY,\n\tEmail TEXT\n)\n\n\
                    /*\n3 rows from customers table:\nCustomerId\tEmail\n1\ta@b.c\n*/\n\n\n\
                    CREATE TABLE \"Invoice Lines\" (x INTEGER)\n\n\
                    CREATE TABLE `albums` (AlbumId INTEGER)\n\n\
                    /*\n3 rows from albums table:\nAlbumId\n1\n*/";
        let (ddl, samples) = parse_schema_dump(dump);
        assert!(ddl["customers"].starts_with("CREATE TABLE customers"));
        assert!(ddl.contains_key("albums"));
        assert!(samples["customers"].contains("1\ta@b.c"));
        assert!(samples["albums"].starts_with("/*"));
        assert!(!samples.contains_key("invoice"));
    }
}
