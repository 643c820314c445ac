use rusqlite::Row;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// One persisted turn-log record: the final session state plus end time and tokens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnLogRow {
    pub turn_id: String,
    pub conversation_id: Option<String>,
    pub user_prompt: String,
    pub success: bool,
    pub token_used: u64,
    pub endtime: String,
    pub record: serde_json::Value,
}

#[derive(Clone)]
pub struct TurnLogRepo {
    db: Database,
}

impl TurnLogRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, row), fields(turn_id = %row.turn_id))]
    pub fn append(&self, row: &TurnLogRow) -> Result<(), StoreError> {
        let record = serde_json::to_string(&row.record)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO turn_logs (turn_id, conversation_id, user_prompt, success, token_used, endtime, record)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    row.turn_id,
                    row.conversation_id,
                    row.user_prompt,
                    row.success,
                    row.token_used as i64,
                    row.endtime,
                    record,
                ],
            )?;
            Ok(())
        })
    }

    /// Most recent turns first.
    pub fn recent(&self, limit: u32) -> Result<Vec<TurnLogRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT turn_id, conversation_id, user_prompt, success, token_used, endtime, record
                 FROM turn_logs ORDER BY id DESC LIMIT ?1",
            )?;
            let mut rows = stmt.query([limit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_turn_log(row)?);
            }
            Ok(out)
        })
    }

    pub fn get(&self, turn_id: &str) -> Result<TurnLogRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT turn_id, conversation_id, user_prompt, success, token_used, endtime, record
                 FROM turn_logs WHERE turn_id = ?1",
            )?;
            let mut rows = stmt.query([turn_id])?;
            match rows.next()? {
                Some(row) => row_to_turn_log(row),
                None => Err(StoreError::NotFound(format!("turn {turn_id}"))),
            }
        })
    }
}

fn row_to_turn_log(row: &Row<'_>) -> Result<TurnLogRow, StoreError> {
    let record: String = row.get(6)?;
    let token_used: i64 = row.get(4)?;
    Ok(TurnLogRow {
        turn_id: row.get(0)?,
        conversation_id: row.get(1)?,
        user_prompt: row.get(2)?,
        success: row.get(3)?,
        token_used: token_used.max(0) as u64,
        endtime: row.get(5)?,
        record: serde_json::from_str(&record)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(turn_id: &str, success: bool) -> TurnLogRow {
        TurnLogRow {
            turn_id: turn_id.into(),
            conversation_id: Some("conv_1".into()),
            user_prompt: "How many customers are there?".into(),
            success,
            token_used: 1234,
            endtime: "2026-10-18T10:00:00+00:00".into(),
            record: json!({"final_query": "SELECT COUNT(*) FROM customers", "success": success}),
        }
    }

    #[test]
    fn append_and_get() {
        let repo = TurnLogRepo::new(Database::in_memory().unwrap());
        repo.append(&row("turn_a", true)).unwrap();

        let got = repo.get("turn_a").unwrap();
        assert_eq!(got, row("turn_a", true));
        assert!(matches!(repo.get("turn_missing"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let repo = TurnLogRepo::new(Database::in_memory().unwrap());
        for (i, ok) in [true, false, true].into_iter().enumerate() {
            repo.append(&row(&format!("turn_{i}"), ok)).unwrap();
        }

        let recent = repo.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].turn_id, "turn_2");
        assert_eq!(recent[1].turn_id, "turn_1");
        assert!(!recent[1].success);
    }

    #[test]
    fn duplicate_turn_id_rejected() {
        let repo = TurnLogRepo::new(Database::in_memory().unwrap());
        repo.append(&row("turn_dup", true)).unwrap();
        assert!(matches!(repo.append(&row("turn_dup", true)), Err(StoreError::Sqlite(_))));
    }
}
