/// Build the plan-check statement for `query` in `dialect` (case-insensitive).
///
/// Dialects without a SQL-level EXPLAIN get an instruction string instead;
/// running it fails, which surfaces as an explain error.
pub fn explain_statement(dialect: &str, query: &str) -> String {
    match dialect.to_lowercase().as_str() {
        "mysql" | "mariadb" => format!("EXPLAIN {query}"),
        "sqlite" => format!("EXPLAIN QUERY PLAN {query}"),
        "oracle" => format!("EXPLAIN PLAN FOR\n{query}\n\nSELECT * FROM TABLE(DBMS_XPLAN.DISPLAY);"),
        "postgresql" | "postgres" | "redshift" | "presto" => format!("EXPLAIN ANALYZE {query}"),
        "sqlserver" | "mssql" => format!("SET STATISTICS PROFILE ON; {query} SET STATISTICS PROFILE OFF;"),
        "bigquery" => "BigQuery requires using the API to get query explanation.".to_string(),
        _ => format!("Unsupported dialect: {dialect}. Please provide the EXPLAIN syntax manually."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates() {
        let q = "SELECT 1";
        assert_eq!(explain_statement("SQLite", q), "EXPLAIN QUERY PLAN SELECT 1");
        assert_eq!(explain_statement("MariaDB", q), "EXPLAIN SELECT 1");
        assert_eq!(explain_statement("Redshift", q), "EXPLAIN ANALYZE SELECT 1");
        assert_eq!(
            explain_statement("oracle", q),
            "EXPLAIN PLAN FOR\nSELECT 1\n\nSELECT * FROM TABLE(DBMS_XPLAN.DISPLAY);"
        );
        assert!(explain_statement("sqlserver", q).starts_with("SET STATISTICS PROFILE ON; SELECT 1"));
    }

    #[test]
    fn unknown_dialect_passthrough() {
        assert_eq!(
            explain_statement("Snowflake", "SELECT 1"),
            "Unsupported dialect: Snowflake. Please provide the EXPLAIN syntax manually."
        );
    }
}
