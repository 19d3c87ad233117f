use crate::db::{count_rows, quote, Database};
use crate::error::{BrickDbError, Result};
use crate::hooks::{run_hooks, HookFailure, PromotionHook};
use crate::payload::DocumentPayload;
use crate::promotion::{self, PromotionOutcome, PromotionRequest};
use crate::relations::{collect_relations, fetch_document_relations, RelationData, RelationSource};
use crate::repository::{
    DocumentListing, DocumentRecord, DocumentRepository, DocumentTarget, ListQuery, ReadScope,
    VersionRecord, VersionSelector, VersionSnapshot, VersionType,
};
use crate::schema::{hash_schema, CollectionMode, Schema};
use crate::validation::{self, ValidationReport};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A committed promotion plus whatever the post-commit hooks reported
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionReport {
    pub outcome: PromotionOutcome,
    #[serde(default)]
    pub hook_errors: Vec<HookFailure>,
}

/// The main entry point for brickdb.
/// Opens the database, resolves the config, creates derived tables and wraps
/// every operation in its own transaction.
pub struct Store {
    db: Database,
    schema: Schema,
    schema_yaml: String,
    hooks: Vec<Box<dyn PromotionHook>>,
    relation_source: Option<Box<dyn RelationSource>>,
}

impl Store {
    /// Open a store from a database file and a YAML config file.
    pub fn open(db_path: &str, config_path: &str) -> Result<Self> {
        let config_path = Path::new(config_path);
        if !config_path.exists() {
            return Err(BrickDbError::Schema(format!(
                "Config not found: {}",
                config_path.display()
            )));
        }
        let yaml = std::fs::read_to_string(config_path)?;
        let db = Database::open(Path::new(db_path))?;
        Self::boot(db, yaml)
    }

    pub fn open_in_memory(config_yaml: &str) -> Result<Self> {
        Self::boot(Database::open_in_memory()?, config_yaml.to_string())
    }

    /// Boot lifecycle: resolve the config, record it when it changed, create tables
    fn boot(db: Database, schema_yaml: String) -> Result<Self> {
        let schema = Schema::from_yaml(&schema_yaml)?;

        let current_hash = hash_schema(&schema_yaml);
        if db.get_last_schema_hash()?.as_deref() != Some(&current_hash) {
            log::info!("Recording config {current_hash}");
            db.record_schema(&current_hash, &schema_yaml)?;
        }
        for collection in schema.collections() {
            db.ensure_collection_tables(collection)?;
        }

        Ok(Store {
            db,
            schema,
            schema_yaml,
            hooks: Vec::new(),
            relation_source: None,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Register a hook run after every committed promotion.
    pub fn add_hook(&mut self, hook: Box<dyn PromotionHook>) {
        self.hooks.push(hook);
    }

    /// Media and user lookups for validation. Without a source, every
    /// media or user reference is reported as missing.
    pub fn set_relation_source(&mut self, source: Box<dyn RelationSource>) {
        self.relation_source = Some(source);
    }

    pub fn collection(&self, key: &str) -> Result<DocumentRepository<'_>> {
        DocumentRepository::new(&self.schema, key)
    }

    // ── Writes ───────────────────────────────────────────────────────

    pub fn create_draft(
        &self,
        collection: &str,
        target: DocumentTarget,
        payload: &DocumentPayload,
        user: Option<i64>,
    ) -> Result<VersionRecord> {
        let tx = self.db.transaction()?;
        let repo = self.prepare_write(&tx, collection, target, payload)?;
        let version = repo.create_draft(&tx, target, payload, user)?;
        tx.commit()?;
        Ok(version)
    }

    pub fn create_published(
        &self,
        collection: &str,
        target: DocumentTarget,
        payload: &DocumentPayload,
        user: Option<i64>,
    ) -> Result<VersionRecord> {
        let tx = self.db.transaction()?;
        let repo = self.prepare_write(&tx, collection, target, payload)?;
        let version = repo.create_published(&tx, target, payload, user)?;
        tx.commit()?;
        Ok(version)
    }

    pub fn replace_content(
        &self,
        collection: &str,
        document_id: i64,
        version_type: VersionType,
        payload: &DocumentPayload,
        user: Option<i64>,
    ) -> Result<VersionRecord> {
        let tx = self.db.transaction()?;
        let repo =
            self.prepare_write(&tx, collection, DocumentTarget::Existing(document_id), payload)?;
        let version = repo.replace_content(&tx, document_id, version_type, payload, user)?;
        tx.commit()?;
        Ok(version)
    }

    /// Validate before any write, and keep single-mode collections to one
    /// document. Runs inside the write's transaction.
    fn prepare_write(
        &self,
        conn: &Connection,
        collection: &str,
        target: DocumentTarget,
        payload: &DocumentPayload,
    ) -> Result<DocumentRepository<'_>> {
        let repo = self.collection(collection)?;
        if target == DocumentTarget::New
            && repo.collection().mode == CollectionMode::Single
            && repo.count_documents(conn, ReadScope::Public)? > 0
        {
            return Err(BrickDbError::guard(format!(
                "Collection '{collection}' holds a single document"
            )));
        }
        self.validate(collection, payload)?.into_result()?;
        Ok(repo)
    }

    pub fn promote(&self, request: &PromotionRequest) -> Result<PromotionReport> {
        let tx = self.db.transaction()?;
        let outcome = promotion::promote(&tx, &self.schema, request)?;
        tx.commit()?;
        Ok(self.after_promotion(outcome))
    }

    pub fn restore(
        &self,
        collection: &str,
        document_id: i64,
        revision_id: i64,
        to: VersionType,
        user: Option<i64>,
    ) -> Result<PromotionReport> {
        let tx = self.db.transaction()?;
        let outcome = promotion::restore_revision(
            &tx,
            &self.schema,
            collection,
            document_id,
            revision_id,
            to,
            user,
        )?;
        tx.commit()?;
        Ok(self.after_promotion(outcome))
    }

    fn after_promotion(&self, outcome: PromotionOutcome) -> PromotionReport {
        let hook_errors = run_hooks(&self.hooks, &outcome.event());
        PromotionReport {
            outcome,
            hook_errors,
        }
    }

    pub fn soft_delete(
        &self,
        collection: &str,
        document_id: i64,
        user: Option<i64>,
    ) -> Result<DocumentRecord> {
        let repo = self.collection(collection)?;
        let tx = self.db.transaction()?;
        let document = repo.soft_delete(&tx, document_id, user)?;
        tx.commit()?;
        Ok(document)
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn fetch(
        &self,
        collection: &str,
        document_id: i64,
        selector: VersionSelector,
        scope: ReadScope,
    ) -> Result<VersionSnapshot> {
        self.collection(collection)?
            .fetch_version(self.db.conn(), document_id, selector, scope)
    }

    pub fn list_documents(&self, collection: &str, query: &ListQuery) -> Result<Vec<DocumentListing>> {
        self.collection(collection)?.list_documents(self.db.conn(), query)
    }

    pub fn list_revisions(
        &self,
        collection: &str,
        document_id: i64,
        scope: ReadScope,
    ) -> Result<Vec<VersionRecord>> {
        self.collection(collection)?
            .list_revisions(self.db.conn(), document_id, scope)
    }

    /// Every version of a document with its `promoted_from` link
    pub fn history(
        &self,
        collection: &str,
        document_id: i64,
        scope: ReadScope,
    ) -> Result<Vec<VersionRecord>> {
        self.collection(collection)?
            .list_versions(self.db.conn(), document_id, scope)
    }

    /// Validate a payload, fetching every referenced entity in one batch.
    pub fn validate(&self, collection: &str, payload: &DocumentPayload) -> Result<ValidationReport> {
        let schema = self.schema.collection(collection)?;
        let request = collect_relations(schema, payload);

        let mut relations = match &self.relation_source {
            Some(source) if !request.is_empty() => source.fetch(&request)?,
            _ => RelationData::default(),
        };
        relations.merge(RelationData {
            documents: fetch_document_relations(self.db.conn(), &self.schema, &request)?,
            ..RelationData::default()
        });

        Ok(validation::validate(&self.schema, schema, payload, &relations))
    }

    /// Get status information: config hash, per-collection counts, derived tables.
    pub fn status(&self) -> Result<serde_json::Value> {
        let mut collections = serde_json::Map::new();

        for collection in self.schema.collections() {
            let repo = self.collection(&collection.key)?;
            let conn = self.db.conn();
            let mut versions = serde_json::Map::new();
            for version_type in [VersionType::Draft, VersionType::Published, VersionType::Revision] {
                let count: i64 = conn.query_row(
                    &format!(
                        "SELECT COUNT(*) FROM {} WHERE type = ?1",
                        quote(&collection.version_table)
                    ),
                    params![version_type],
                    |row| row.get(0),
                )?;
                versions.insert(version_type.as_str().into(), count.into());
            }

            let live = repo.count_documents(conn, ReadScope::Public)?;
            let all = repo.count_documents(conn, ReadScope::Admin)?;
            let content_rows = collection
                .content_tables()
                .map(|t| count_rows(conn, &t.name))
                .sum::<Result<i64>>()?;
            let tables: Vec<&str> = collection.tables().iter().map(|t| t.name.as_str()).collect();

            collections.insert(
                collection.key.clone(),
                serde_json::json!({
                    "documents": live,
                    "deleted": all - live,
                    "versions": versions,
                    "content_rows": content_rows,
                    "tables": tables,
                }),
            );
        }

        Ok(serde_json::json!({
            "schema_hash": hash_schema(&self.schema_yaml),
            "locales": self.schema.locales().codes(),
            "collections": collections,
        }))
    }
}
