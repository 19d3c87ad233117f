//! Batched lookups for reference fields (media, users, documents).
//!
//! Validation never queries per field. `collect_relations` walks a payload
//! once and gathers every referenced id, the caller fetches them in one go,
//! and the validator reads from the resulting `RelationData`.

use crate::db::quote;
use crate::error::Result;
use crate::materializer::reference_id;
use crate::payload::{DocumentPayload, FieldPayload};
use crate::schema::{CollectionSchema, ColumnKind, Field, MediaKind, Schema};
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationRequest {
    pub media_ids: BTreeSet<i64>,
    pub user_ids: BTreeSet<i64>,
    /// Referenced document ids by target collection
    pub documents: BTreeMap<String, BTreeSet<i64>>,
}

impl RelationRequest {
    pub fn is_empty(&self) -> bool {
        self.media_ids.is_empty()
            && self.user_ids.is_empty()
            && self.documents.values().all(BTreeSet::is_empty)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub kind: MediaKind,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    #[serde(default)]
    pub is_deleted: bool,
}

/// Everything the validator knows about referenced entities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationData {
    #[serde(default)]
    pub media: BTreeMap<i64, MediaInfo>,
    #[serde(default)]
    pub users: BTreeMap<i64, UserInfo>,
    #[serde(default)]
    pub documents: BTreeMap<String, BTreeMap<i64, DocumentInfo>>,
}

impl RelationData {
    pub fn merge(&mut self, other: RelationData) {
        self.media.extend(other.media);
        self.users.extend(other.users);
        for (collection, docs) in other.documents {
            self.documents.entry(collection).or_default().extend(docs);
        }
    }

    pub fn document(&self, collection: &str, id: i64) -> Option<&DocumentInfo> {
        self.documents.get(collection).and_then(|docs| docs.get(&id))
    }
}

/// Fetches media and user data from outside the content store.
pub trait RelationSource {
    fn fetch(&self, request: &RelationRequest) -> Result<RelationData>;
}

/// A fixed set of relation data, answered as-is.
impl RelationSource for RelationData {
    fn fetch(&self, request: &RelationRequest) -> Result<RelationData> {
        Ok(RelationData {
            media: self
                .media
                .iter()
                .filter(|(id, _)| request.media_ids.contains(id))
                .map(|(id, m)| (*id, m.clone()))
                .collect(),
            users: self
                .users
                .iter()
                .filter(|(id, _)| request.user_ids.contains(id))
                .map(|(id, u)| (*id, u.clone()))
                .collect(),
            documents: BTreeMap::new(),
        })
    }
}

/// Gather every id referenced by the payload in a single walk.
pub fn collect_relations(collection: &CollectionSchema, payload: &DocumentPayload) -> RelationRequest {
    let mut request = RelationRequest::default();
    walk(&collection.collection_fields().fields, &payload.fields, &mut request);
    for brick in &payload.bricks {
        if let Some(schema) = collection.brick(&brick.key) {
            walk(&schema.fields, &brick.fields, &mut request);
        }
    }
    request
}

fn walk(schema_fields: &[Field], fields: &[FieldPayload], request: &mut RelationRequest) {
    for payload in fields {
        let Some(field) = schema_fields.iter().find(|f| f.key == payload.key) else {
            continue;
        };
        if field.is_repeater() {
            for group in payload.groups.iter().flatten() {
                walk(&field.children, &group.fields, request);
            }
            continue;
        }

        let ids = payload
            .value
            .iter()
            .chain(payload.translations.iter().flat_map(|t| t.values()))
            .filter_map(reference_id);
        match field.field_type.column_kind() {
            Some(ColumnKind::MediaRef) => request.media_ids.extend(ids),
            Some(ColumnKind::UserRef) => request.user_ids.extend(ids),
            Some(ColumnKind::DocumentRef) => {
                if let Some(target) = &field.collection {
                    request
                        .documents
                        .entry(target.clone())
                        .or_default()
                        .extend(ids);
                }
            }
            _ => {}
        }
    }
}

/// Look up referenced documents in the store's own tables.
pub fn fetch_document_relations(
    conn: &Connection,
    schema: &Schema,
    request: &RelationRequest,
) -> Result<BTreeMap<String, BTreeMap<i64, DocumentInfo>>> {
    let mut out = BTreeMap::new();
    for (collection_key, ids) in &request.documents {
        if ids.is_empty() {
            continue;
        }
        let collection = schema.collection(collection_key)?;
        let marks = vec!["?"; ids.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT id, is_deleted FROM {} WHERE id IN ({marks})",
            quote(&collection.document_table)
        ))?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?))
        })?;

        let docs: &mut BTreeMap<i64, DocumentInfo> = out.entry(collection_key.clone()).or_default();
        for row in rows {
            let (id, is_deleted) = row?;
            docs.insert(id, DocumentInfo { is_deleted });
        }
    }
    Ok(out)
}
