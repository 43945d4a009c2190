//! DDL generation and table introspection
use sqlx::SqlitePool;

use crate::config::STATUS_TABLE;
use crate::error::WriteError;
use crate::mapping::ColumnMapping;

/// A column as reported by the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    pub sql_type: String,
}

/// Quote an identifier, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Generate the CREATE TABLE statement for a mapped schema.
///
/// Every column is nullable: nullability is validated while decoding, and a
/// column typed from a sample may still see empty values later in the file.
pub fn generate_ddl(table_name: &str, mappings: &[ColumnMapping]) -> String {
    let mut ddl = format!("CREATE TABLE {} (\n", quote_identifier(table_name));

    let column_defs: Vec<String> = mappings
        .iter()
        .map(|m| {
            format!(
                "  {} {}",
                quote_identifier(&m.target_name),
                m.target_type.sql_name()
            )
        })
        .collect();

    ddl.push_str(&column_defs.join(",\n"));
    ddl.push_str("\n);");

    ddl
}

pub fn index_name(table_name: &str, column: &str) -> String {
    format!("idx_{table_name}_{column}")
}

pub fn generate_index_ddl(table_name: &str, column: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_identifier(&index_name(table_name, column)),
        quote_identifier(table_name),
        quote_identifier(column)
    )
}

/// Leading columns worth indexing, at most `limit`
pub fn index_candidates(mappings: &[ColumnMapping], limit: usize) -> Vec<&ColumnMapping> {
    mappings
        .iter()
        .filter(|m| m.target_type.is_indexable())
        .take(limit)
        .collect()
}

/// Multi-row INSERT with `rows` groups of `columns` placeholders
pub fn generate_insert(table_name: &str, mappings_len: usize, rows: usize) -> String {
    let group = format!("({})", vec!["?"; mappings_len].join(", "));
    let groups = vec![group.as_str(); rows].join(", ");
    format!("INSERT INTO {} VALUES {}", quote_identifier(table_name), groups)
}

pub fn status_table_ddl() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {STATUS_TABLE} (\n  \
         job_id TEXT PRIMARY KEY,\n  \
         table_name TEXT NOT NULL,\n  \
         source TEXT NOT NULL,\n  \
         status TEXT NOT NULL,\n  \
         ready INTEGER NOT NULL DEFAULT 0,\n  \
         rows_written INTEGER NOT NULL DEFAULT 0,\n  \
         message TEXT,\n  \
         updated_at TEXT NOT NULL\n);"
    )
}

pub async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool, WriteError> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table_name)
            .fetch_one(pool)
            .await
            .map_err(|e| WriteError::database("failed to look up table", e))?;
    Ok(count > 0)
}

/// Query the columns of an existing table, in order
pub async fn query_table_schema(
    pool: &SqlitePool,
    table_name: &str,
) -> Result<Vec<TableColumn>, WriteError> {
    let pragma_sql = format!("PRAGMA table_info({})", quote_identifier(table_name));
    let rows: Vec<(i32, String, String, i32, Option<String>, i32)> = sqlx::query_as(&pragma_sql)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            WriteError::database(format!("failed to describe table {table_name}"), e)
        })?;

    Ok(rows
        .into_iter()
        .map(|(_, name, sql_type, _, _, _)| TableColumn { name, sql_type })
        .collect())
}
