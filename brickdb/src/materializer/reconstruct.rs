// Inverse of materialization: stored rows back into a nested payload

use super::{brick_rank, declaration_index};
use crate::error::Result;
use crate::payload::{BrickPayload, DocumentPayload, FieldPayload, GroupPayload};
use crate::schema::{CollectionSchema, ColumnKind, Field, FieldType, Locales};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// A content row as read back from a derived table
#[derive(Debug, Clone)]
pub struct StoredRow {
    pub id: i64,
    pub locale: String,
    pub position: i64,
    pub open: bool,
    /// `brick_ref` on brick rows, `group_ref` on repeater rows
    pub token: String,
    pub brick_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub values: HashMap<String, SqlValue>,
}

/// Every content row of one version, by table
#[derive(Debug, Clone, Default)]
pub struct StoredContent {
    tables: HashMap<String, Vec<StoredRow>>,
}

impl StoredContent {
    pub fn insert(&mut self, table: &str, rows: Vec<StoredRow>) {
        self.tables.insert(table.to_string(), rows);
    }

    pub fn rows(&self, table: &str) -> &[StoredRow] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}

pub fn reconstruct(
    collection: &CollectionSchema,
    locales: &Locales,
    content: &StoredContent,
) -> Result<DocumentPayload> {
    let rebuild = Rebuild {
        collection,
        locales: locales.required(collection.translations),
        default_locale: locales.default_code(),
        content,
    };

    let collection_fields = collection.collection_fields();
    let field_rows: Vec<&StoredRow> = content.rows(&collection_fields.table).iter().collect();
    let fields = rebuild.fields(&collection_fields.fields, &field_rows, true)?;

    let mut bricks = Vec::new();
    for brick in collection.fixed_bricks().iter().chain(collection.builder_bricks()) {
        for instance in instances(content.rows(&brick.table).iter()) {
            let first = instance[0];
            let min_id = instance.iter().map(|r| r.id).min().unwrap_or(first.id);
            let payload = BrickPayload {
                brick_ref: Some(first.token.clone()),
                key: brick.key.clone(),
                brick_type: brick.brick_type,
                order: first.position,
                open: first.open,
                fields: rebuild.fields(&brick.fields, &instance, true)?,
            };
            let sort_key = (
                brick_rank(brick.brick_type),
                first.position,
                declaration_index(collection, &brick.key),
                min_id,
            );
            bricks.push((sort_key, payload));
        }
    }
    bricks.sort_by_key(|(key, _)| *key);

    Ok(DocumentPayload {
        fields,
        bricks: bricks.into_iter().map(|(_, b)| b).collect(),
    })
}

/// Group rows by token, one entry per brick instance or group, in stored order.
fn instances<'r>(rows: impl Iterator<Item = &'r StoredRow>) -> Vec<Vec<&'r StoredRow>> {
    let mut by_token: BTreeMap<&str, Vec<&StoredRow>> = BTreeMap::new();
    for row in rows {
        by_token.entry(row.token.as_str()).or_default().push(row);
    }
    let mut out: Vec<Vec<&StoredRow>> = by_token.into_values().collect();
    out.sort_by_key(|rows| {
        let min_id = rows.iter().map(|r| r.id).min().unwrap_or(i64::MAX);
        (rows[0].position, min_id)
    });
    out
}

struct Rebuild<'a> {
    collection: &'a CollectionSchema,
    locales: Vec<String>,
    default_locale: &'a str,
    content: &'a StoredContent,
}

impl<'a> Rebuild<'a> {
    /// `rows` are the locale rows of the owner (brick instance or group).
    fn fields(
        &self,
        schema_fields: &[Field],
        rows: &[&StoredRow],
        brick_level: bool,
    ) -> Result<Vec<FieldPayload>> {
        let owner_ids: HashSet<i64> = rows.iter().map(|r| r.id).collect();
        let mut out = Vec::with_capacity(schema_fields.len());

        for field in schema_fields {
            if field.is_repeater() {
                let table = field.table.as_deref().unwrap_or_default();
                let children = self.content.rows(table).iter().filter(|r| {
                    if brick_level {
                        r.parent_id.is_none() && r.brick_id.is_some_and(|b| owner_ids.contains(&b))
                    } else {
                        r.parent_id.is_some_and(|p| owner_ids.contains(&p))
                    }
                });

                let mut groups = Vec::new();
                for group_rows in instances(children) {
                    let first = group_rows[0];
                    groups.push(GroupPayload {
                        group_ref: Some(first.token.clone()),
                        order: first.position,
                        open: first.open,
                        fields: self.fields(&field.children, &group_rows, false)?,
                    });
                }
                out.push(FieldPayload {
                    key: field.key.clone(),
                    field_type: Some(FieldType::Repeater),
                    value: None,
                    translations: None,
                    groups: Some(groups),
                });
                continue;
            }

            let Some(kind) = field.field_type.column_kind() else {
                continue;
            };
            let column = field.column();

            if self.collection.is_translatable(field) {
                let mut translations = BTreeMap::new();
                for row in rows.iter().filter(|r| self.locales.contains(&r.locale)) {
                    translations.insert(row.locale.clone(), from_sql(kind, row.values.get(&column))?);
                }
                out.push(FieldPayload {
                    key: field.key.clone(),
                    field_type: Some(field.field_type),
                    value: None,
                    translations: Some(translations),
                    groups: None,
                });
            } else {
                let row = rows
                    .iter()
                    .find(|r| r.locale == self.default_locale)
                    .or_else(|| rows.first());
                let value = match row {
                    Some(row) => from_sql(kind, row.values.get(&column))?,
                    None => Value::Null,
                };
                out.push(FieldPayload {
                    key: field.key.clone(),
                    field_type: Some(field.field_type),
                    value: Some(value),
                    translations: None,
                    groups: None,
                });
            }
        }
        Ok(out)
    }
}

pub(crate) fn from_sql(kind: ColumnKind, value: Option<&SqlValue>) -> Result<Value> {
    let value = match value {
        None | Some(SqlValue::Null) => return Ok(Value::Null),
        Some(v) => v,
    };
    Ok(match (kind, value) {
        (ColumnKind::Boolean, SqlValue::Integer(i)) => Value::Bool(*i != 0),
        (ColumnKind::Json, SqlValue::Text(s)) => serde_json::from_str(s)?,
        (_, SqlValue::Integer(i)) => Value::from(*i),
        (_, SqlValue::Real(f)) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        (_, SqlValue::Text(s)) => Value::String(s.clone()),
        (_, SqlValue::Blob(b)) => Value::String(String::from_utf8_lossy(b).into()),
        (_, SqlValue::Null) => Value::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materializer::{materialize, Materialization};
    use crate::schema::tests::test_schema;
    use crate::schema::TableKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Simulate an insert pass: hand out ids and resolve tokens the way the repository does.
    fn store(collection: &CollectionSchema, m: &Materialization) -> StoredContent {
        let mut next_id = 0;
        let mut ids: HashMap<(String, String), i64> = HashMap::new();
        let mut content = StoredContent::default();
        for table in m.ordered() {
            let mut rows = Vec::new();
            for row in &table.rows {
                next_id += 1;
                let brick_id = row
                    .brick_ref
                    .as_ref()
                    .map(|t| ids[&(t.clone(), row.locale.clone())]);
                let parent_id = row
                    .parent_id_ref
                    .as_ref()
                    .map(|t| ids[&(t.clone(), row.locale.clone())]);
                ids.insert((row.token.clone(), row.locale.clone()), next_id);
                rows.push(StoredRow {
                    id: next_id,
                    locale: row.locale.clone(),
                    position: row.position,
                    open: row.open,
                    token: row.token.clone(),
                    brick_id,
                    parent_id,
                    values: row.values.iter().cloned().collect(),
                });
            }
            assert!(collection.table(&table.table).is_some_and(|t| matches!(
                t.kind,
                TableKind::Brick { .. } | TableKind::Repeater { .. }
            )));
            content.insert(&table.table, rows);
        }
        content
    }

    fn sample() -> DocumentPayload {
        DocumentPayload::from_json(
            &json!({
                "fields": [
                    { "key": "page_title", "translations": { "en": "Home", "fr": "Accueil" } },
                    { "key": "views", "value": 3 },
                    { "key": "featured", "value": true }
                ],
                "bricks": [
                    {
                        "key": "banner", "type": "builder", "order": 1, "open": true,
                        "fields": [
                            { "key": "title", "translations": { "en": "Hello" } },
                            { "key": "links", "groups": [
                                { "order": 1, "fields": [{ "key": "url", "value": "/b" }] },
                                { "order": 0, "open": true, "fields": [
                                    { "key": "url", "value": "/a" },
                                    { "key": "tags", "groups": [
                                        { "order": 0, "fields": [{ "key": "label", "translations": { "fr": "étiquette" } }] }
                                    ]}
                                ]}
                            ]}
                        ]
                    },
                    { "key": "seo", "type": "fixed", "fields": [{ "key": "meta_image", "value": 7 }] }
                ]
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_reconstruct_preserves_nesting_and_order() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();
        let m = materialize(page, schema.locales(), &sample()).unwrap();
        let payload = reconstruct(page, schema.locales(), &store(page, &m)).unwrap();

        assert_eq!(payload.bricks.len(), 2);
        assert_eq!(payload.bricks[0].key, "seo");
        assert_eq!(payload.bricks[0].fields[1].value, Some(json!(7)));

        let banner = &payload.bricks[1];
        assert!(banner.open);
        let links = banner.fields[1].groups.as_ref().unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].fields[0].value, Some(json!("/a")));
        assert_eq!(links[1].fields[0].value, Some(json!("/b")));

        let tags = links[0].fields[1].groups.as_ref().unwrap();
        let label = tags[0].fields[0].translations.as_ref().unwrap();
        assert_eq!(label["fr"], json!("étiquette"));
        assert_eq!(label["en"], Value::Null);

        let featured = &payload.fields[1];
        assert_eq!(featured.key, "featured");
        assert_eq!(featured.value, Some(json!(true)));
    }

    #[test]
    fn test_reconstruct_then_materialize_is_a_fixed_point() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();

        let first = materialize(page, schema.locales(), &sample()).unwrap();
        let snapshot = reconstruct(page, schema.locales(), &store(page, &first)).unwrap();
        let second = materialize(page, schema.locales(), &snapshot).unwrap();
        let again = reconstruct(page, schema.locales(), &store(page, &second)).unwrap();

        for table in first.ordered() {
            assert_eq!(table.rows, second.table(&table.table).unwrap().rows);
        }
        assert_eq!(
            serde_json::to_string(&snapshot).unwrap(),
            serde_json::to_string(&again).unwrap()
        );
    }
}
