//! Version promotion: draft → published, published → draft, and restoring
//! revisions.
//!
//! Every guard is checked before the first write, so a rejected promotion
//! leaves the database untouched even inside a transaction that is later
//! committed. The new version is always re-materialized from the source's
//! reconstructed content; rows are never copied table to table.

use crate::error::{BrickDbError, Result};
use crate::hooks::PromotionEvent;
use crate::materializer::materialize;
use crate::repository::{DocumentRepository, ReadScope, VersionRecord, VersionType};
use crate::schema::{CollectionSchema, Schema};
use rusqlite::Transaction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRequest {
    pub collection_key: String,
    pub document_id: i64,
    pub from_version_id: i64,
    pub to: VersionType,
    pub user_id: Option<i64>,
    /// Allows a revision as the source
    #[serde(default)]
    pub bypass_revision_check: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionOutcome {
    pub collection_key: String,
    pub document_id: i64,
    pub source: VersionRecord,
    pub version: VersionRecord,
    /// Previous published version, now a revision under the same id
    pub retired_version_id: Option<i64>,
    /// Version removed to make room for the new one
    pub deleted_version_id: Option<i64>,
    pub pruned_revisions: usize,
    pub user_id: Option<i64>,
}

impl PromotionOutcome {
    pub fn event(&self) -> PromotionEvent {
        PromotionEvent {
            collection_key: self.collection_key.clone(),
            document_id: self.document_id,
            from_version_id: self.source.id,
            from: self.source.version_type,
            to: self.version.version_type,
            version_id: self.version.id,
            retired_version_id: self.retired_version_id,
            user_id: self.user_id,
        }
    }
}

pub fn promote(
    tx: &Transaction<'_>,
    schema: &Schema,
    request: &PromotionRequest,
) -> Result<PromotionOutcome> {
    let repo = DocumentRepository::new(schema, &request.collection_key)?;
    let collection = repo.collection();

    repo.get_document(tx, request.document_id, ReadScope::Public)?;
    let source = repo.get_version(tx, request.from_version_id)?;
    if source.document_id != request.document_id {
        return Err(BrickDbError::not_found("Version", request.from_version_id));
    }
    check_guards(collection, &source, request)?;

    let payload = repo.read_payload(tx, source.id)?;
    let materialization = materialize(collection, schema.locales(), &payload)?;

    let mut retired_version_id = None;
    let mut deleted_version_id = None;
    if let Some(current) = repo.find_version(tx, request.document_id, request.to)? {
        if request.to == VersionType::Published && collection.use_revisions {
            repo.retype_version(
                tx,
                current.id,
                VersionType::Revision,
                Some(source.id),
                request.user_id,
            )?;
            retired_version_id = Some(current.id);
        } else {
            repo.delete_version(tx, current.id)?;
            deleted_version_id = Some(current.id);
        }
    }

    let version = repo.insert_version(
        tx,
        request.document_id,
        request.to,
        Some(source.id),
        request.user_id,
    )?;
    repo.write_content(tx, request.document_id, version.id, &materialization)?;
    repo.touch_document(tx, request.document_id, request.user_id)?;

    let pruned_revisions = match retired_version_id {
        Some(_) => repo.prune_revisions(tx, request.document_id, Some(source.id))?,
        None => 0,
    };

    log::info!(
        "Promoted {} {} to {} {} (document {} in '{}')",
        source.version_type,
        source.id,
        version.version_type,
        version.id,
        request.document_id,
        collection.key
    );

    Ok(PromotionOutcome {
        collection_key: collection.key.clone(),
        document_id: request.document_id,
        source,
        version,
        retired_version_id,
        deleted_version_id,
        pruned_revisions,
        user_id: request.user_id,
    })
}

/// Restore a revision's content as a new draft or published version.
pub fn restore_revision(
    tx: &Transaction<'_>,
    schema: &Schema,
    collection_key: &str,
    document_id: i64,
    revision_id: i64,
    to: VersionType,
    user_id: Option<i64>,
) -> Result<PromotionOutcome> {
    let repo = DocumentRepository::new(schema, collection_key)?;
    let revision = repo.get_version(tx, revision_id)?;
    if revision.version_type != VersionType::Revision {
        return Err(BrickDbError::guard(format!(
            "Version {revision_id} is a {}, not a revision",
            revision.version_type
        )));
    }

    promote(
        tx,
        schema,
        &PromotionRequest {
            collection_key: collection_key.to_string(),
            document_id,
            from_version_id: revision_id,
            to,
            user_id,
            bypass_revision_check: true,
        },
    )
}

fn check_guards(
    collection: &CollectionSchema,
    source: &VersionRecord,
    request: &PromotionRequest,
) -> Result<()> {
    if request.to == VersionType::Revision {
        return Err(BrickDbError::guard(
            "Revisions are created by promotion, not promoted to",
        ));
    }
    if source.version_type == request.to {
        return Err(BrickDbError::guard(format!(
            "Version {} is already {}",
            source.id, request.to
        )));
    }
    if source.version_type == VersionType::Revision && !request.bypass_revision_check {
        return Err(BrickDbError::guard(format!(
            "Version {} is a revision; restore it instead",
            source.id
        )));
    }
    if request.to == VersionType::Draft && !collection.use_drafts {
        return Err(BrickDbError::guard(format!(
            "Collection '{}' does not use drafts",
            collection.key
        )));
    }
    if collection.locked {
        return Err(BrickDbError::guard(format!(
            "Collection '{}' is locked",
            collection.key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_rows, Database};
    use crate::payload::{DocumentPayload, FieldPayload};
    use crate::repository::tests::{page_payload, setup, total_content_rows};
    use crate::repository::{DocumentTarget, VersionSelector};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const POLICY_SCHEMA: &str = r#"
locales:
  - { code: en, default: true }
  - { code: fr }
collections:
  news:
    translations: true
    use_drafts: true
    use_revisions: true
    revision_retention: 1
    fields:
      - { key: headline, type: text, translations: true }
  notes:
    use_drafts: true
    fields:
      - { key: headline, type: text }
  archive:
    use_drafts: true
    locked: true
    fields:
      - { key: headline, type: text }
"#;

    fn policy_setup() -> (Database, Schema) {
        let schema = Schema::from_yaml(POLICY_SCHEMA).unwrap();
        let db = Database::open_in_memory().unwrap();
        for collection in schema.collections() {
            db.ensure_collection_tables(collection).unwrap();
        }
        (db, schema)
    }

    fn headline(text: &str) -> DocumentPayload {
        DocumentPayload {
            fields: vec![FieldPayload::value("headline", json!(text))],
            bricks: vec![],
        }
    }

    fn request(collection: &str, version: &VersionRecord, to: VersionType) -> PromotionRequest {
        PromotionRequest {
            collection_key: collection.to_string(),
            document_id: version.document_id,
            from_version_id: version.id,
            to,
            user_id: Some(1),
            bypass_revision_check: false,
        }
    }

    fn live_counts(repo: &DocumentRepository<'_>, db: &Database, document_id: i64) -> (usize, usize) {
        let versions = repo.list_versions(db.conn(), document_id, ReadScope::Admin).unwrap();
        let count = |t: VersionType| versions.iter().filter(|v| v.version_type == t).count();
        (count(VersionType::Draft), count(VersionType::Published))
    }

    #[test]
    fn test_publish_draft_end_to_end() {
        let (db, schema) = setup();
        let repo = DocumentRepository::new(&schema, "page").unwrap();

        let tx = db.transaction().unwrap();
        let draft = repo
            .create_draft(&tx, DocumentTarget::New, &page_payload("Home"), None)
            .unwrap();
        let first = promote(&tx, &schema, &request("page", &draft, VersionType::Published)).unwrap();
        tx.commit().unwrap();

        assert_eq!(first.version.promoted_from, Some(draft.id));
        assert_eq!(first.retired_version_id, None);
        assert_eq!(live_counts(&repo, &db, draft.document_id), (1, 1));

        // Second publish retires the first published version under its own id.
        let tx = db.transaction().unwrap();
        let second = promote(&tx, &schema, &request("page", &draft, VersionType::Published)).unwrap();
        tx.commit().unwrap();

        assert_eq!(second.retired_version_id, Some(first.version.id));
        let retired = repo.get_version(db.conn(), first.version.id).unwrap();
        assert_eq!(retired.version_type, VersionType::Revision);
        assert_eq!(retired.promoted_from, Some(draft.id));
        assert_eq!(live_counts(&repo, &db, draft.document_id), (1, 1));

        let published = repo
            .fetch_version(db.conn(), draft.document_id, VersionSelector::Published, ReadScope::Public)
            .unwrap();
        let title = published.payload.fields[0].translations.as_ref().unwrap();
        assert_eq!(title["en"], json!("Home"));
        assert_eq!(title["fr"], serde_json::Value::Null);
    }

    #[test]
    fn test_same_type_guard_writes_nothing() {
        let (db, schema) = setup();
        let repo = DocumentRepository::new(&schema, "page").unwrap();

        let tx = db.transaction().unwrap();
        let draft = repo
            .create_draft(&tx, DocumentTarget::New, &page_payload("Home"), None)
            .unwrap();
        tx.commit().unwrap();

        let before = total_content_rows(&db, repo.collection());
        let versions_before = count_rows(db.conn(), &repo.collection().version_table).unwrap();

        let tx = db.transaction().unwrap();
        let err = promote(&tx, &schema, &request("page", &draft, VersionType::Draft)).unwrap_err();
        assert!(matches!(err, BrickDbError::Guard(_)));
        let err = promote(&tx, &schema, &request("page", &draft, VersionType::Revision)).unwrap_err();
        assert!(matches!(err, BrickDbError::Guard(_)));
        tx.commit().unwrap();

        assert_eq!(total_content_rows(&db, repo.collection()), before);
        assert_eq!(
            count_rows(db.conn(), &repo.collection().version_table).unwrap(),
            versions_before
        );
    }

    #[test]
    fn test_unpublish_replaces_existing_draft() {
        let (db, schema) = setup();
        let repo = DocumentRepository::new(&schema, "page").unwrap();

        let tx = db.transaction().unwrap();
        let draft = repo
            .create_draft(&tx, DocumentTarget::New, &page_payload("Home"), None)
            .unwrap();
        let published = promote(&tx, &schema, &request("page", &draft, VersionType::Published))
            .unwrap()
            .version;
        repo.replace_content(&tx, draft.document_id, VersionType::Draft, &page_payload("Edited"), None)
            .unwrap();
        let back = promote(&tx, &schema, &request("page", &published, VersionType::Draft)).unwrap();
        tx.commit().unwrap();

        assert_eq!(back.deleted_version_id, Some(draft.id));
        assert_eq!(back.version.promoted_from, Some(published.id));
        assert!(matches!(
            repo.get_version(db.conn(), draft.id),
            Err(BrickDbError::NotFound { .. })
        ));
        let restored = repo
            .fetch_version(db.conn(), draft.document_id, VersionSelector::Draft, ReadScope::Public)
            .unwrap();
        let title = restored.payload.fields[0].translations.as_ref().unwrap();
        assert_eq!(title["en"], json!("Home"));
    }

    #[test]
    fn test_restore_revision_is_byte_identical() {
        let (db, schema) = setup();
        let repo = DocumentRepository::new(&schema, "page").unwrap();

        let tx = db.transaction().unwrap();
        let draft = repo
            .create_draft(&tx, DocumentTarget::New, &page_payload("Original"), None)
            .unwrap();
        let first = promote(&tx, &schema, &request("page", &draft, VersionType::Published)).unwrap();
        repo.replace_content(&tx, draft.document_id, VersionType::Draft, &page_payload("Newer"), None)
            .unwrap();
        promote(&tx, &schema, &request("page", &draft, VersionType::Published)).unwrap();
        tx.commit().unwrap();

        let revision_id = first.version.id;
        let revision = repo
            .fetch_version(
                db.conn(),
                draft.document_id,
                VersionSelector::Revision(revision_id),
                ReadScope::Public,
            )
            .unwrap();

        let revision_version = repo.get_version(db.conn(), revision_id).unwrap();
        let tx = db.transaction().unwrap();
        let err = promote(&tx, &schema, &request("page", &revision_version, VersionType::Published))
            .unwrap_err();
        assert!(matches!(err, BrickDbError::Guard(_)));

        let restored = restore_revision(
            &tx,
            &schema,
            "page",
            draft.document_id,
            revision_id,
            VersionType::Draft,
            None,
        )
        .unwrap();
        tx.commit().unwrap();

        assert_eq!(restored.version.promoted_from, Some(revision_id));
        let draft_now = repo
            .fetch_version(db.conn(), draft.document_id, VersionSelector::Draft, ReadScope::Public)
            .unwrap();
        assert_eq!(
            serde_json::to_string(&draft_now.payload).unwrap(),
            serde_json::to_string(&revision.payload).unwrap()
        );
        assert_eq!(live_counts(&repo, &db, draft.document_id), (1, 1));
    }

    #[test]
    fn test_restore_requires_a_revision() {
        let (db, schema) = setup();
        let repo = DocumentRepository::new(&schema, "page").unwrap();
        let tx = db.transaction().unwrap();
        let draft = repo
            .create_draft(&tx, DocumentTarget::New, &page_payload("Home"), None)
            .unwrap();
        let err = restore_revision(
            &tx,
            &schema,
            "page",
            draft.document_id,
            draft.id,
            VersionType::Published,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, BrickDbError::Guard(_)));
    }

    #[test]
    fn test_retention_prunes_oldest_revisions() {
        let (db, schema) = policy_setup();
        let repo = DocumentRepository::new(&schema, "news").unwrap();

        let tx = db.transaction().unwrap();
        let draft = repo
            .create_draft(&tx, DocumentTarget::New, &headline("one"), None)
            .unwrap();
        let mut published = Vec::new();
        for _ in 0..3 {
            published.push(
                promote(&tx, &schema, &request("news", &draft, VersionType::Published))
                    .unwrap()
                    .version
                    .id,
            );
        }
        tx.commit().unwrap();

        let revisions = repo
            .list_revisions(db.conn(), draft.document_id, ReadScope::Public)
            .unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].id, published[1]);
    }

    #[test]
    fn test_without_revisions_previous_published_is_deleted() {
        let (db, schema) = policy_setup();
        let repo = DocumentRepository::new(&schema, "notes").unwrap();

        let tx = db.transaction().unwrap();
        let draft = repo
            .create_draft(&tx, DocumentTarget::New, &headline("one"), None)
            .unwrap();
        let first = promote(&tx, &schema, &request("notes", &draft, VersionType::Published)).unwrap();
        let second = promote(&tx, &schema, &request("notes", &draft, VersionType::Published)).unwrap();
        tx.commit().unwrap();

        assert_eq!(second.deleted_version_id, Some(first.version.id));
        assert!(repo
            .list_revisions(db.conn(), draft.document_id, ReadScope::Public)
            .unwrap()
            .is_empty());
        assert_eq!(count_rows(db.conn(), "bd_document__notes__fields").unwrap(), 2);
    }

    #[test]
    fn test_locked_collection_rejects_promotion() {
        let (db, schema) = policy_setup();
        let repo = DocumentRepository::new(&schema, "archive").unwrap();

        let tx = db.transaction().unwrap();
        let document = repo.create_document(&tx, None).unwrap();
        let draft = repo
            .insert_version(&tx, document.id, VersionType::Draft, None, None)
            .unwrap();
        let err = promote(&tx, &schema, &request("archive", &draft, VersionType::Published))
            .unwrap_err();
        assert!(matches!(err, BrickDbError::Guard(_)));
    }

    #[test]
    fn test_restore_keeps_its_source_when_pruning() {
        let (db, schema) = policy_setup();
        let repo = DocumentRepository::new(&schema, "news").unwrap();

        let tx = db.transaction().unwrap();
        let draft = repo
            .create_draft(&tx, DocumentTarget::New, &headline("one"), None)
            .unwrap();
        let first = promote(&tx, &schema, &request("news", &draft, VersionType::Published))
            .unwrap()
            .version;
        let second = promote(&tx, &schema, &request("news", &draft, VersionType::Published))
            .unwrap()
            .version;
        let restored = restore_revision(
            &tx,
            &schema,
            "news",
            draft.document_id,
            first.id,
            VersionType::Published,
            None,
        )
        .unwrap();
        tx.commit().unwrap();

        assert_eq!(restored.retired_version_id, Some(second.id));
        assert_eq!(restored.pruned_revisions, 0);
        let stored = repo.get_version(db.conn(), restored.version.id).unwrap();
        assert_eq!(stored.promoted_from, Some(first.id));
        assert_eq!(
            repo.get_version(db.conn(), first.id).unwrap().version_type,
            VersionType::Revision
        );

        // The next ordinary publish brings the revisions back to the limit.
        let tx = db.transaction().unwrap();
        let next = promote(&tx, &schema, &request("news", &draft, VersionType::Published)).unwrap();
        tx.commit().unwrap();
        assert_eq!(next.pruned_revisions, 2);
        let revisions = repo
            .list_revisions(db.conn(), draft.document_id, ReadScope::Public)
            .unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].id, restored.version.id);
    }

    #[test]
    fn test_soft_deleted_document_cannot_be_promoted() {
        let (db, schema) = setup();
        let repo = DocumentRepository::new(&schema, "page").unwrap();

        let tx = db.transaction().unwrap();
        let draft = repo
            .create_draft(&tx, DocumentTarget::New, &page_payload("Home"), None)
            .unwrap();
        repo.soft_delete(&tx, draft.document_id, None).unwrap();
        let err = promote(&tx, &schema, &request("page", &draft, VersionType::Published))
            .unwrap_err();
        assert!(matches!(err, BrickDbError::NotFound { .. }));
    }
}
