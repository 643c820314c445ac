use serde_json::{json, Value};
use tracing::warn;

use crate::services::AgentServices;
use crate::turn::Turn;

/// Keyword search over column descriptions. Hits are appended to the
/// session's findings; a failed search records the keyword as not found.
pub async fn explore_schema(turn: &mut Turn, services: &AgentServices, keyword: &str) -> Value {
    let tables_hits = match services.retriever.explore(keyword).await {
        Ok(search) => {
            let tables = search.tables.join(", ");
            turn.state.add_findings(search.hits);
            tables
        }
        Err(e) => {
            warn!(keyword, error = %e, "schema exploration failed");
            turn.state.add_not_found(keyword);
            String::new()
        }
    };
    json!({"keyword": keyword, "tables_hits": tables_hits})
}
