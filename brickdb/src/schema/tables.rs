//! Derived relational layout of a collection.
//!
//! Every collection owns a document table, a version table, a table for its
//! own top-level fields, one table per brick and one per repeater at every
//! nesting level. Names follow `<document-table>__<brick-key>[__<repeater-key>]*`.

use super::types::ColumnKind;
use super::BrickType;

/// What a derived table stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableKind {
    Document,
    Versions,
    Brick {
        brick_key: String,
        brick_type: BrickType,
    },
    Repeater {
        brick_key: String,
        /// Repeater keys from the brick down to this table
        path: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub definition: String,
    /// Set for `_<key>` field columns
    pub field_kind: Option<ColumnKind>,
}

impl ColumnDef {
    fn system(name: &str, definition: &str) -> Self {
        ColumnDef {
            name: name.to_string(),
            definition: definition.to_string(),
            field_kind: None,
        }
    }

    pub fn field(key: &str, kind: ColumnKind) -> Self {
        ColumnDef {
            name: field_column(key),
            definition: kind.sql_type().to_string(),
            field_kind: Some(kind),
        }
    }
}

/// Column name of a field value cell
pub fn field_column(key: &str) -> String {
    format!("_{key}")
}

/// Description of one derived table, consumed by the generic DDL and row paths.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub kind: TableKind,
    /// Insert order: 0 for documents/versions/bricks, repeater depth otherwise
    pub priority: usize,
    pub columns: Vec<ColumnDef>,
    foreign_keys: Vec<String>,
    indexes: Vec<String>,
}

/// Name of the document table for a collection
pub fn document_table(prefix: &str, collection_key: &str) -> String {
    format!("{prefix}_document__{collection_key}")
}

pub fn child_table(parent: &str, key: &str) -> String {
    format!("{parent}__{key}")
}

impl TableSchema {
    pub fn document(name: &str) -> Self {
        TableSchema {
            name: name.to_string(),
            kind: TableKind::Document,
            priority: 0,
            columns: vec![
                ColumnDef::system("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
                ColumnDef::system("collection_key", "TEXT NOT NULL"),
                ColumnDef::system("is_deleted", "INTEGER NOT NULL DEFAULT 0"),
                ColumnDef::system("deleted_at", "TEXT"),
                ColumnDef::system("deleted_by", "INTEGER"),
                ColumnDef::system("created_by", "INTEGER"),
                ColumnDef::system("updated_by", "INTEGER"),
                ColumnDef::system("created_at", "TEXT NOT NULL"),
                ColumnDef::system("updated_at", "TEXT NOT NULL"),
            ],
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn versions(name: &str, document_table: &str) -> Self {
        TableSchema {
            name: name.to_string(),
            kind: TableKind::Versions,
            priority: 0,
            columns: vec![
                ColumnDef::system("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
                ColumnDef::system("document_id", "INTEGER NOT NULL"),
                ColumnDef::system(
                    "type",
                    "TEXT NOT NULL CHECK (type IN ('draft', 'published', 'revision'))",
                ),
                ColumnDef::system("promoted_from", "INTEGER"),
                ColumnDef::system("created_by", "INTEGER"),
                ColumnDef::system("updated_by", "INTEGER"),
                ColumnDef::system("created_at", "TEXT NOT NULL"),
                ColumnDef::system("updated_at", "TEXT NOT NULL"),
            ],
            foreign_keys: vec![
                format!(
                    "FOREIGN KEY (document_id) REFERENCES \"{document_table}\"(id) ON DELETE CASCADE"
                ),
                format!("FOREIGN KEY (promoted_from) REFERENCES \"{name}\"(id) ON DELETE SET NULL"),
            ],
            indexes: vec![
                // One live draft and one live published version per document.
                format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS \"{name}_active\" ON \"{name}\"(document_id, type) \
                     WHERE type IN ('draft', 'published')"
                ),
                format!(
                    "CREATE INDEX IF NOT EXISTS \"{name}_document\" ON \"{name}\"(document_id)"
                ),
            ],
        }
    }

    /// A brick table; the collection's own fields use the same shape.
    pub fn brick(
        name: &str,
        brick_key: &str,
        brick_type: BrickType,
        document_table: &str,
        version_table: &str,
        fields: Vec<ColumnDef>,
    ) -> Self {
        let mut columns = content_columns();
        columns.push(ColumnDef::system("brick_type", "TEXT NOT NULL"));
        columns.push(ColumnDef::system("brick_ref", "TEXT NOT NULL"));
        columns.extend(fields);

        TableSchema {
            name: name.to_string(),
            kind: TableKind::Brick {
                brick_key: brick_key.to_string(),
                brick_type,
            },
            priority: 0,
            columns,
            foreign_keys: content_foreign_keys(document_table, version_table),
            indexes: vec![format!(
                "CREATE INDEX IF NOT EXISTS \"{name}_version\" ON \"{name}\"(document_version_id)"
            )],
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn repeater(
        name: &str,
        brick_key: &str,
        path: Vec<String>,
        brick_table: &str,
        parent_table: Option<&str>,
        document_table: &str,
        version_table: &str,
        fields: Vec<ColumnDef>,
    ) -> Self {
        let mut columns = content_columns();
        columns.push(ColumnDef::system("brick_id", "INTEGER NOT NULL"));
        columns.push(ColumnDef::system("parent_id", "INTEGER"));
        columns.push(ColumnDef::system("group_ref", "TEXT NOT NULL"));
        columns.push(ColumnDef::system("parent_id_ref", "TEXT"));
        columns.extend(fields);

        let mut foreign_keys = content_foreign_keys(document_table, version_table);
        foreign_keys.push(format!(
            "FOREIGN KEY (brick_id) REFERENCES \"{brick_table}\"(id) ON DELETE CASCADE"
        ));
        if let Some(parent) = parent_table {
            foreign_keys.push(format!(
                "FOREIGN KEY (parent_id) REFERENCES \"{parent}\"(id) ON DELETE CASCADE"
            ));
        }

        let priority = path.len();
        TableSchema {
            name: name.to_string(),
            kind: TableKind::Repeater {
                brick_key: brick_key.to_string(),
                path,
            },
            priority,
            columns,
            foreign_keys,
            indexes: vec![format!(
                "CREATE INDEX IF NOT EXISTS \"{name}_version\" ON \"{name}\"(document_version_id)"
            )],
        }
    }

    /// Whether this table holds versioned content rows
    pub fn is_content(&self) -> bool {
        matches!(self.kind, TableKind::Brick { .. } | TableKind::Repeater { .. })
    }

    pub fn field_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.field_kind.is_some())
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("\"{}\" {}", c.name, c.definition))
            .collect();
        parts.extend(self.foreign_keys.iter().cloned());
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n    {}\n)",
            self.name,
            parts.join(",\n    ")
        )
    }

    pub fn index_sql(&self) -> &[String] {
        &self.indexes
    }
}

fn content_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::system("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
        ColumnDef::system("document_id", "INTEGER NOT NULL"),
        ColumnDef::system("document_version_id", "INTEGER NOT NULL"),
        ColumnDef::system("locale", "TEXT NOT NULL"),
        ColumnDef::system("position", "INTEGER NOT NULL DEFAULT 0"),
        ColumnDef::system("is_open", "INTEGER NOT NULL DEFAULT 0"),
    ]
}

fn content_foreign_keys(document_table: &str, version_table: &str) -> Vec<String> {
    vec![
        format!("FOREIGN KEY (document_id) REFERENCES \"{document_table}\"(id) ON DELETE CASCADE"),
        format!(
            "FOREIGN KEY (document_version_id) REFERENCES \"{version_table}\"(id) ON DELETE CASCADE"
        ),
    ]
}
