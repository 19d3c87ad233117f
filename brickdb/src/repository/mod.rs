//! Documents, versions and their materialized content rows.
//!
//! Mutations take the caller's `Transaction`; nothing here commits. Reads
//! take a plain `Connection` so they also work inside an open transaction.

mod listing;
mod records;

pub use listing::{DocumentListing, Filter, FilterOp, ListQuery};
pub use records::{
    DocumentRecord, DocumentTarget, ReadScope, VersionRecord, VersionSelector, VersionSnapshot,
    VersionType,
};

use crate::db::{get_i64, get_text, insert_row, quote, select_rows};
use crate::error::{BrickDbError, Result};
use crate::materializer::{materialize, reconstruct, Materialization, StoredContent, StoredRow};
use crate::payload::DocumentPayload;
use crate::schema::{CollectionSchema, Schema, TableKind, TableSchema};
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;

pub struct DocumentRepository<'s> {
    schema: &'s Schema,
    collection: &'s CollectionSchema,
}

impl<'s> DocumentRepository<'s> {
    pub fn new(schema: &'s Schema, collection_key: &str) -> Result<Self> {
        let collection = schema.collection(collection_key)?;
        Ok(DocumentRepository { schema, collection })
    }

    pub fn collection(&self) -> &'s CollectionSchema {
        self.collection
    }

    pub fn schema(&self) -> &'s Schema {
        self.schema
    }

    // ── Documents ────────────────────────────────────────────────────

    pub fn create_document(&self, conn: &Connection, user: Option<i64>) -> Result<DocumentRecord> {
        let now = Utc::now();
        conn.execute(
            &format!(
                "INSERT INTO {} (collection_key, created_by, updated_by, created_at, updated_at) \
                 VALUES (?1, ?2, ?2, ?3, ?3)",
                quote(&self.collection.document_table)
            ),
            params![self.collection.key, user, now],
        )?;
        let id = conn.last_insert_rowid();
        log::info!("Created document {} in '{}'", id, self.collection.key);
        self.get_document(conn, id, ReadScope::Admin)
    }

    pub fn get_document(
        &self,
        conn: &Connection,
        document_id: i64,
        scope: ReadScope,
    ) -> Result<DocumentRecord> {
        let document = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE id = ?1",
                    DocumentRecord::COLUMNS,
                    quote(&self.collection.document_table)
                ),
                params![document_id],
                DocumentRecord::from_row,
            )
            .optional()?;

        match document {
            Some(doc) if scope == ReadScope::Admin || !doc.is_deleted => Ok(doc),
            _ => Err(BrickDbError::not_found("Document", document_id)),
        }
    }

    pub fn count_documents(&self, conn: &Connection, scope: ReadScope) -> Result<i64> {
        let include_deleted = scope == ReadScope::Admin;
        let count = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE ?1 OR is_deleted = 0",
                quote(&self.collection.document_table)
            ),
            params![include_deleted],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn soft_delete(
        &self,
        tx: &Transaction<'_>,
        document_id: i64,
        user: Option<i64>,
    ) -> Result<DocumentRecord> {
        self.ensure_unlocked()?;
        self.get_document(tx, document_id, ReadScope::Public)?;
        let now = Utc::now();
        tx.execute(
            &format!(
                "UPDATE {} SET is_deleted = 1, deleted_at = ?1, deleted_by = ?2, \
                 updated_at = ?1, updated_by = ?2 WHERE id = ?3",
                quote(&self.collection.document_table)
            ),
            params![now, user, document_id],
        )?;
        log::info!(
            "Soft-deleted document {} in '{}'",
            document_id,
            self.collection.key
        );
        self.get_document(tx, document_id, ReadScope::Admin)
    }

    pub(crate) fn touch_document(&self, conn: &Connection, document_id: i64, user: Option<i64>) -> Result<()> {
        conn.execute(
            &format!(
                "UPDATE {} SET updated_at = ?1, updated_by = ?2 WHERE id = ?3",
                quote(&self.collection.document_table)
            ),
            params![Utc::now(), user, document_id],
        )?;
        Ok(())
    }

    pub(crate) fn ensure_unlocked(&self) -> Result<()> {
        if self.collection.locked {
            return Err(BrickDbError::guard(format!(
                "Collection '{}' is locked",
                self.collection.key
            )));
        }
        Ok(())
    }

    /// Find or create the document a new version goes to. An existing
    /// document is only touched once it is known to have no live version
    /// of `version_type`.
    fn resolve_target(
        &self,
        conn: &Connection,
        target: DocumentTarget,
        version_type: VersionType,
        user: Option<i64>,
    ) -> Result<i64> {
        match target {
            DocumentTarget::New => Ok(self.create_document(conn, user)?.id),
            DocumentTarget::Existing(id) => {
                self.get_document(conn, id, ReadScope::Public)?;
                if self.find_version(conn, id, version_type)?.is_some() {
                    return Err(BrickDbError::guard(match version_type {
                        VersionType::Draft => format!("Document {id} already has a draft"),
                        _ => format!("Document {id} is already published"),
                    }));
                }
                self.touch_document(conn, id, user)?;
                Ok(id)
            }
        }
    }

    // ── Versions ─────────────────────────────────────────────────────

    pub fn get_version(&self, conn: &Connection, version_id: i64) -> Result<VersionRecord> {
        conn.query_row(
            &format!(
                "SELECT {} FROM {} WHERE id = ?1",
                VersionRecord::COLUMNS,
                quote(&self.collection.version_table)
            ),
            params![version_id],
            VersionRecord::from_row,
        )
        .optional()?
        .ok_or_else(|| BrickDbError::not_found("Version", version_id))
    }

    /// The live draft or published version of a document
    pub fn find_version(
        &self,
        conn: &Connection,
        document_id: i64,
        version_type: VersionType,
    ) -> Result<Option<VersionRecord>> {
        let version = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE document_id = ?1 AND type = ?2 \
                     ORDER BY id DESC LIMIT 1",
                    VersionRecord::COLUMNS,
                    quote(&self.collection.version_table)
                ),
                params![document_id, version_type],
                VersionRecord::from_row,
            )
            .optional()?;
        Ok(version)
    }

    fn latest_version(&self, conn: &Connection, document_id: i64) -> Result<Option<VersionRecord>> {
        let version = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE document_id = ?1 AND type IN ('draft', 'published') \
                     ORDER BY id DESC LIMIT 1",
                    VersionRecord::COLUMNS,
                    quote(&self.collection.version_table)
                ),
                params![document_id],
                VersionRecord::from_row,
            )
            .optional()?;
        Ok(version)
    }

    /// Revisions of a document, newest first
    pub fn list_revisions(
        &self,
        conn: &Connection,
        document_id: i64,
        scope: ReadScope,
    ) -> Result<Vec<VersionRecord>> {
        self.get_document(conn, document_id, scope)?;
        self.query_versions(
            conn,
            "WHERE document_id = ?1 AND type = 'revision' ORDER BY id DESC",
            document_id,
        )
    }

    /// Every version of a document in creation order
    pub fn list_versions(
        &self,
        conn: &Connection,
        document_id: i64,
        scope: ReadScope,
    ) -> Result<Vec<VersionRecord>> {
        self.get_document(conn, document_id, scope)?;
        self.query_versions(conn, "WHERE document_id = ?1 ORDER BY id", document_id)
    }

    fn query_versions(
        &self,
        conn: &Connection,
        clause: &str,
        document_id: i64,
    ) -> Result<Vec<VersionRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} {clause}",
            VersionRecord::COLUMNS,
            quote(&self.collection.version_table)
        ))?;
        let rows = stmt.query_map(params![document_id], VersionRecord::from_row)?;
        let mut versions = Vec::new();
        for row in rows {
            versions.push(row?);
        }
        Ok(versions)
    }

    pub fn create_draft(
        &self,
        tx: &Transaction<'_>,
        target: DocumentTarget,
        payload: &DocumentPayload,
        user: Option<i64>,
    ) -> Result<VersionRecord> {
        self.ensure_unlocked()?;
        if !self.collection.use_drafts {
            return Err(BrickDbError::guard(format!(
                "Collection '{}' does not use drafts",
                self.collection.key
            )));
        }
        let materialization = materialize(self.collection, self.schema.locales(), payload)?;

        let document_id = self.resolve_target(tx, target, VersionType::Draft, user)?;

        let version = self.insert_version(tx, document_id, VersionType::Draft, None, user)?;
        self.write_content(tx, document_id, version.id, &materialization)?;
        log::info!(
            "Created draft {} of document {} in '{}'",
            version.id,
            document_id,
            self.collection.key
        );
        Ok(version)
    }

    pub fn create_published(
        &self,
        tx: &Transaction<'_>,
        target: DocumentTarget,
        payload: &DocumentPayload,
        user: Option<i64>,
    ) -> Result<VersionRecord> {
        self.ensure_unlocked()?;
        if self.collection.use_drafts {
            return Err(BrickDbError::guard(format!(
                "Collection '{}' uses drafts; publish through promotion",
                self.collection.key
            )));
        }
        let materialization = materialize(self.collection, self.schema.locales(), payload)?;

        let document_id = self.resolve_target(tx, target, VersionType::Published, user)?;

        let version = self.insert_version(tx, document_id, VersionType::Published, None, user)?;
        self.write_content(tx, document_id, version.id, &materialization)?;
        log::info!(
            "Published version {} of document {} in '{}'",
            version.id,
            document_id,
            self.collection.key
        );
        Ok(version)
    }

    /// Rewrite the content of the live draft, or of the published version
    /// when the collection has no drafts.
    pub fn replace_content(
        &self,
        tx: &Transaction<'_>,
        document_id: i64,
        version_type: VersionType,
        payload: &DocumentPayload,
        user: Option<i64>,
    ) -> Result<VersionRecord> {
        self.ensure_unlocked()?;
        let materialization = materialize(self.collection, self.schema.locales(), payload)?;
        self.get_document(tx, document_id, ReadScope::Public)?;

        let current = match version_type {
            VersionType::Revision => {
                return Err(BrickDbError::guard("Revisions cannot be edited"));
            }
            VersionType::Published if self.collection.use_drafts => {
                return Err(BrickDbError::guard(format!(
                    "Published content of '{}' changes only through promotion",
                    self.collection.key
                )));
            }
            _ => self
                .find_version(tx, document_id, version_type)?
                .ok_or_else(|| {
                    let entity = match version_type {
                        VersionType::Draft => "Draft of document",
                        _ => "Published version of document",
                    };
                    BrickDbError::not_found(entity, document_id)
                })?,
        };
        self.touch_document(tx, document_id, user)?;

        if version_type == VersionType::Published && self.collection.use_revisions {
            self.retype_version(tx, current.id, VersionType::Revision, current.promoted_from, user)?;
            let version = self.insert_version(
                tx,
                document_id,
                VersionType::Published,
                Some(current.id),
                user,
            )?;
            self.write_content(tx, document_id, version.id, &materialization)?;
            self.prune_revisions(tx, document_id, None)?;
            return Ok(version);
        }

        self.delete_content(tx, current.id)?;
        self.write_content(tx, document_id, current.id, &materialization)?;
        tx.execute(
            &format!(
                "UPDATE {} SET updated_at = ?1, updated_by = ?2 WHERE id = ?3",
                quote(&self.collection.version_table)
            ),
            params![Utc::now(), user, current.id],
        )?;
        self.get_version(tx, current.id)
    }

    /// Read a version of a document along with its reconstructed content.
    pub fn fetch_version(
        &self,
        conn: &Connection,
        document_id: i64,
        selector: VersionSelector,
        scope: ReadScope,
    ) -> Result<VersionSnapshot> {
        let document = self.get_document(conn, document_id, scope)?;
        let version = match selector {
            VersionSelector::Draft => self
                .find_version(conn, document_id, VersionType::Draft)?
                .ok_or_else(|| BrickDbError::not_found("Draft of document", document_id))?,
            VersionSelector::Published => self
                .find_version(conn, document_id, VersionType::Published)?
                .ok_or_else(|| BrickDbError::not_found("Published version of document", document_id))?,
            VersionSelector::Latest => self
                .latest_version(conn, document_id)?
                .ok_or_else(|| BrickDbError::not_found("Live version of document", document_id))?,
            VersionSelector::Revision(id) => {
                let version = self.get_version(conn, id)?;
                if version.document_id != document_id
                    || version.version_type != VersionType::Revision
                {
                    return Err(BrickDbError::not_found("Revision", id));
                }
                version
            }
        };
        let payload = self.read_payload(conn, version.id)?;
        Ok(VersionSnapshot {
            document,
            version,
            payload,
        })
    }

    pub(crate) fn insert_version(
        &self,
        conn: &Connection,
        document_id: i64,
        version_type: VersionType,
        promoted_from: Option<i64>,
        user: Option<i64>,
    ) -> Result<VersionRecord> {
        let now = Utc::now();
        conn.execute(
            &format!(
                "INSERT INTO {} (document_id, type, promoted_from, created_by, updated_by, \
                 created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?5)",
                quote(&self.collection.version_table)
            ),
            params![document_id, version_type, promoted_from, user, now],
        )?;
        self.get_version(conn, conn.last_insert_rowid())
    }

    /// Change a version's type in place, keeping its id and content.
    pub(crate) fn retype_version(
        &self,
        conn: &Connection,
        version_id: i64,
        to: VersionType,
        promoted_from: Option<i64>,
        user: Option<i64>,
    ) -> Result<()> {
        conn.execute(
            &format!(
                "UPDATE {} SET type = ?1, promoted_from = ?2, updated_by = ?3, updated_at = ?4 \
                 WHERE id = ?5",
                quote(&self.collection.version_table)
            ),
            params![to, promoted_from, user, Utc::now(), version_id],
        )?;
        Ok(())
    }

    /// Delete a version; its content rows cascade.
    pub(crate) fn delete_version(&self, conn: &Connection, version_id: i64) -> Result<()> {
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE id = ?1",
                quote(&self.collection.version_table)
            ),
            params![version_id],
        )?;
        Ok(())
    }

    /// Drop the oldest revisions beyond the collection's retention limit.
    /// `protected` (the source of a restore) survives even past the limit.
    pub(crate) fn prune_revisions(
        &self,
        conn: &Connection,
        document_id: i64,
        protected: Option<i64>,
    ) -> Result<usize> {
        let Some(keep) = self.collection.revision_retention else {
            return Ok(0);
        };
        let revisions = self.query_versions(
            conn,
            "WHERE document_id = ?1 AND type = 'revision' ORDER BY id DESC",
            document_id,
        )?;
        let mut pruned = 0;
        for revision in revisions
            .iter()
            .skip(keep)
            .filter(|r| Some(r.id) != protected)
        {
            self.delete_version(conn, revision.id)?;
            pruned += 1;
        }
        if pruned > 0 {
            log::debug!(
                "Pruned {} revisions of document {} in '{}'",
                pruned,
                document_id,
                self.collection.key
            );
        }
        Ok(pruned)
    }

    // ── Content ──────────────────────────────────────────────────────

    /// Insert materialized rows, parents first, swapping tokens for row ids.
    pub(crate) fn write_content(
        &self,
        conn: &Connection,
        document_id: i64,
        version_id: i64,
        materialization: &Materialization,
    ) -> Result<usize> {
        let mut ids: HashMap<(&str, &str), i64> = HashMap::new();
        let mut written = 0;

        for table_rows in materialization.ordered() {
            let table = self.content_table(&table_rows.table)?;
            let is_repeater = matches!(table.kind, TableKind::Repeater { .. });

            for row in &table_rows.rows {
                let mut columns: Vec<(String, SqlValue)> = vec![
                    ("document_id".into(), SqlValue::Integer(document_id)),
                    ("document_version_id".into(), SqlValue::Integer(version_id)),
                    ("locale".into(), SqlValue::Text(row.locale.clone())),
                    ("position".into(), SqlValue::Integer(row.position)),
                    ("is_open".into(), SqlValue::Integer(i64::from(row.open))),
                ];

                if is_repeater {
                    let brick_ref = row.brick_ref.as_deref().ok_or_else(|| {
                        BrickDbError::Schema(format!("Group row in '{}' has no brick", table.name))
                    })?;
                    let brick_id = resolve_ref(&ids, brick_ref, &row.locale)?;
                    let parent_id = match row.parent_id_ref.as_deref() {
                        Some(parent) => SqlValue::Integer(resolve_ref(&ids, parent, &row.locale)?),
                        None => SqlValue::Null,
                    };
                    columns.push(("brick_id".into(), SqlValue::Integer(brick_id)));
                    columns.push(("parent_id".into(), parent_id));
                    columns.push(("group_ref".into(), SqlValue::Text(row.token.clone())));
                    columns.push((
                        "parent_id_ref".into(),
                        row.parent_id_ref
                            .clone()
                            .map(SqlValue::Text)
                            .unwrap_or(SqlValue::Null),
                    ));
                } else {
                    let brick_type = row.brick_type.ok_or_else(|| {
                        BrickDbError::Schema(format!("Brick row in '{}' has no type", table.name))
                    })?;
                    columns.push((
                        "brick_type".into(),
                        SqlValue::Text(brick_type.as_str().to_string()),
                    ));
                    columns.push(("brick_ref".into(), SqlValue::Text(row.token.clone())));
                }
                columns.extend(row.values.iter().cloned());

                let id = insert_row(conn, &table.name, &columns)?;
                ids.insert((row.token.as_str(), row.locale.as_str()), id);
                written += 1;
            }
        }

        log::debug!(
            "Wrote {} content rows for version {} in '{}'",
            written,
            version_id,
            self.collection.key
        );
        Ok(written)
    }

    pub(crate) fn read_content(&self, conn: &Connection, version_id: i64) -> Result<StoredContent> {
        let mut content = StoredContent::default();
        for table in self.collection.content_tables() {
            let token_column = match table.kind {
                TableKind::Repeater { .. } => "group_ref",
                _ => "brick_ref",
            };
            let mut rows = Vec::new();
            for row in select_rows(conn, table, "document_version_id", version_id)? {
                match stored_row(table, row, token_column) {
                    Some(stored) => rows.push(stored),
                    None => log::warn!("Skipping unreadable row in {}", table.name),
                }
            }
            content.insert(&table.name, rows);
        }
        Ok(content)
    }

    pub(crate) fn read_payload(&self, conn: &Connection, version_id: i64) -> Result<DocumentPayload> {
        let content = self.read_content(conn, version_id)?;
        log::debug!("Read {} content rows for version {}", content.total_rows(), version_id);
        reconstruct(self.collection, self.schema.locales(), &content)
    }

    /// Remove every content row of a version, children first.
    pub(crate) fn delete_content(&self, conn: &Connection, version_id: i64) -> Result<()> {
        let mut tables: Vec<&TableSchema> = self.collection.content_tables().collect();
        tables.sort_by_key(|t| std::cmp::Reverse(t.priority));
        for table in tables {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE document_version_id = ?1",
                    quote(&table.name)
                ),
                params![version_id],
            )?;
        }
        Ok(())
    }

    fn content_table(&self, name: &str) -> Result<&'s TableSchema> {
        self.collection
            .table(name)
            .filter(|t| t.is_content())
            .ok_or_else(|| BrickDbError::Schema(format!("No content table '{name}'")))
    }
}

fn resolve_ref<'a>(
    ids: &HashMap<(&'a str, &'a str), i64>,
    token: &'a str,
    locale: &'a str,
) -> Result<i64> {
    ids.get(&(token, locale)).copied().ok_or_else(|| {
        BrickDbError::Schema(format!("Unresolved reference '{token}' for locale '{locale}'"))
    })
}

fn stored_row(
    table: &TableSchema,
    mut row: HashMap<String, SqlValue>,
    token_column: &str,
) -> Option<StoredRow> {
    let values = table
        .field_columns()
        .filter_map(|c| row.remove(&c.name).map(|v| (c.name.clone(), v)))
        .collect();
    Some(StoredRow {
        id: get_i64(&row, "id")?,
        locale: get_text(&row, "locale")?,
        position: get_i64(&row, "position").unwrap_or(0),
        open: get_i64(&row, "is_open").is_some_and(|v| v != 0),
        token: get_text(&row, token_column)?,
        brick_id: get_i64(&row, "brick_id"),
        parent_id: get_i64(&row, "parent_id"),
        values,
    })
}
