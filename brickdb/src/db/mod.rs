use crate::error::Result;
use crate::schema::{CollectionSchema, TableSchema};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::path::Path;

/// The SQLite handle: system tables plus every derived collection table.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS schema_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash TEXT NOT NULL,
                schema_yaml TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction. Dropping it without commit rolls back.
    /// Nested transactions are rejected by SQLite itself.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // ── Schema State ─────────────────────────────────────────────────

    /// Get the most recent schema hash.
    pub fn get_last_schema_hash(&self) -> Result<Option<String>> {
        let result = self
            .conn
            .query_row(
                "SELECT hash FROM schema_history ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    /// Record a new schema version.
    pub fn record_schema(&self, hash: &str, yaml: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO schema_history (hash, schema_yaml) VALUES (?1, ?2)",
            params![hash, yaml],
        )?;
        Ok(())
    }

    // ── Derived Tables ───────────────────────────────────────────────

    /// Create every derived table of a collection that does not exist yet.
    pub fn ensure_collection_tables(&self, collection: &CollectionSchema) -> Result<()> {
        for table in collection.tables() {
            log::debug!("Ensuring table {}", table.name);
            self.conn.execute(&table.create_sql(), [])?;
            for index in table.index_sql() {
                self.conn.execute(index, [])?;
            }
        }
        Ok(())
    }
}

pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Insert one row into any derived table. Returns the generated id.
pub fn insert_row(conn: &Connection, table: &str, columns: &[(String, SqlValue)]) -> Result<i64> {
    let names: Vec<String> = columns.iter().map(|(name, _)| quote(name)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table),
        names.join(", "),
        placeholders.join(", ")
    );
    conn.execute(&sql, params_from_iter(columns.iter().map(|(_, v)| v)))?;
    Ok(conn.last_insert_rowid())
}

/// Select rows of a derived table where `column = value`, every declared column included.
pub fn select_rows(
    conn: &Connection,
    table: &TableSchema,
    column: &str,
    value: i64,
) -> Result<Vec<HashMap<String, SqlValue>>> {
    let names: Vec<String> = table.columns.iter().map(|c| quote(&c.name)).collect();
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1 ORDER BY id",
        names.join(", "),
        quote(&table.name),
        quote(column)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![value], |row| {
        let mut map = HashMap::new();
        for (i, col) in table.columns.iter().enumerate() {
            let val: SqlValue = row.get(i)?;
            map.insert(col.name.clone(), val);
        }
        Ok(map)
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", quote(table)), [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Read helpers over a generic row map
pub(crate) fn get_i64(row: &HashMap<String, SqlValue>, column: &str) -> Option<i64> {
    match row.get(column) {
        Some(SqlValue::Integer(i)) => Some(*i),
        _ => None,
    }
}

pub(crate) fn get_text(row: &HashMap<String, SqlValue>, column: &str) -> Option<String> {
    match row.get(column) {
        Some(SqlValue::Text(s)) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::test_schema;

    #[test]
    fn test_schema_history() {
        let db = Database::open_in_memory().unwrap();

        assert!(db.get_last_schema_hash().unwrap().is_none());

        db.record_schema("abc123", "collections: {}").unwrap();
        assert_eq!(db.get_last_schema_hash().unwrap(), Some("abc123".to_string()));

        db.record_schema("def456", "collections: { page: {} }").unwrap();
        assert_eq!(db.get_last_schema_hash().unwrap(), Some("def456".to_string()));
    }

    #[test]
    fn test_ensure_collection_tables_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let schema = test_schema();
        let page = schema.collection("page").unwrap();

        db.ensure_collection_tables(page).unwrap();
        db.ensure_collection_tables(page).unwrap();

        for table in page.tables() {
            assert!(table_exists(db.conn(), &table.name).unwrap(), "{}", table.name);
        }
    }

    #[test]
    fn test_insert_and_select_generic_row() {
        let db = Database::open_in_memory().unwrap();
        let schema = test_schema();
        let settings = schema.collection("settings").unwrap();
        db.ensure_collection_tables(settings).unwrap();

        let id = insert_row(
            db.conn(),
            &settings.document_table,
            &[
                ("collection_key".into(), SqlValue::Text("settings".into())),
                ("created_at".into(), SqlValue::Text("now".into())),
                ("updated_at".into(), SqlValue::Text("now".into())),
            ],
        )
        .unwrap();

        let table = settings.table(&settings.document_table).unwrap();
        let rows = select_rows(db.conn(), table, "id", id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(get_text(&rows[0], "collection_key").as_deref(), Some("settings"));
        assert_eq!(get_i64(&rows[0], "is_deleted"), Some(0));
        assert_eq!(count_rows(db.conn(), &settings.document_table).unwrap(), 1);
    }

    #[test]
    fn test_transaction_rollback_on_drop() {
        let db = Database::open_in_memory().unwrap();
        let schema = test_schema();
        let settings = schema.collection("settings").unwrap();
        db.ensure_collection_tables(settings).unwrap();

        {
            let tx = db.transaction().unwrap();
            insert_row(
                &tx,
                &settings.document_table,
                &[
                    ("collection_key".into(), SqlValue::Text("settings".into())),
                    ("created_at".into(), SqlValue::Text("now".into())),
                    ("updated_at".into(), SqlValue::Text("now".into())),
                ],
            )
            .unwrap();
        }

        assert_eq!(count_rows(db.conn(), &settings.document_table).unwrap(), 0);
    }
}
