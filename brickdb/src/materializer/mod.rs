//! Flattening of nested brick/field/group payloads into per-table rows.
//!
//! Materialization is pure: it reads the collection schema and a payload and
//! produces row sets for every content table, with no database access. Rows
//! do not carry real foreign keys yet. Every brick instance and every group is
//! given a token unique to the pass, and rows point at their owners by token.
//! The repository inserts tables by ascending priority and swaps tokens for
//! generated ids as it goes.

mod reconstruct;

pub use reconstruct::{reconstruct, StoredContent, StoredRow};
pub(crate) use reconstruct::from_sql;

use crate::error::{BrickDbError, Result};
use crate::payload::{find_field, BrickPayload, DocumentPayload, FieldPayload, GroupPayload};
use crate::schema::{BrickSchema, BrickType, CollectionSchema, ColumnKind, Field, Locales};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedRow {
    pub locale: String,
    pub position: i64,
    pub open: bool,
    /// Token of the brick instance or group; shared by its locale rows
    pub token: String,
    /// Set on brick rows
    pub brick_type: Option<BrickType>,
    /// Owning brick instance, set on repeater rows
    pub brick_ref: Option<String>,
    /// Parent group, set on groups nested inside another repeater
    pub parent_id_ref: Option<String>,
    /// Field cells, keyed by column name
    pub values: Vec<(String, SqlValue)>,
}

#[derive(Debug, Clone)]
pub struct TableRows {
    pub table: String,
    pub priority: usize,
    pub rows: Vec<MaterializedRow>,
}

#[derive(Debug, Clone)]
pub struct Materialization {
    tables: Vec<TableRows>,
}

impl Materialization {
    /// Tables in insert order: ascending priority, parents before children.
    pub fn ordered(&self) -> Vec<&TableRows> {
        let mut tables: Vec<&TableRows> = self.tables.iter().collect();
        tables.sort_by_key(|t| t.priority);
        tables
    }

    pub fn table(&self, name: &str) -> Option<&TableRows> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.table(table).map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }
}

/// Materialize a payload into row sets for every content table of the collection.
pub fn materialize(
    collection: &CollectionSchema,
    locales: &Locales,
    payload: &DocumentPayload,
) -> Result<Materialization> {
    let mut pass = Pass {
        collection,
        locales: locales.required(collection.translations),
        default_locale: locales.default_code(),
        next_brick: 0,
        next_group: 0,
        tables: collection
            .content_tables()
            .map(|t| TableRows {
                table: t.name.clone(),
                priority: t.priority,
                rows: Vec::new(),
            })
            .collect(),
    };

    pass.emit_brick(collection.collection_fields(), &payload.fields, 0, false)?;

    for (brick, brick_payload) in canonical_bricks(collection, &payload.bricks)? {
        pass.emit_brick(brick, &brick_payload.fields, brick_payload.order, brick_payload.open)?;
    }

    let materialization = Materialization {
        tables: pass.tables,
    };
    log::debug!(
        "Materialized {} rows across {} tables for collection '{}'",
        materialization.total_rows(),
        materialization.tables.len(),
        collection.key
    );
    Ok(materialization)
}

/// Validate payload bricks against the schema and sort them: fixed before
/// builder, then by order, then by declaration order. The sort is stable.
fn canonical_bricks<'a>(
    collection: &'a CollectionSchema,
    bricks: &'a [BrickPayload],
) -> Result<Vec<(&'a BrickSchema, &'a BrickPayload)>> {
    let mut resolved = Vec::with_capacity(bricks.len());
    let mut fixed_seen = Vec::new();

    for payload in bricks {
        let brick = collection.brick(&payload.key).ok_or_else(|| {
            BrickDbError::InvalidPayload(format!(
                "Brick '{}' is not part of collection '{}'",
                payload.key, collection.key
            ))
        })?;
        if brick.brick_type != payload.brick_type {
            return Err(BrickDbError::InvalidPayload(format!(
                "Brick '{}' is declared {} but was submitted as {}",
                payload.key,
                brick.brick_type.as_str(),
                payload.brick_type.as_str()
            )));
        }
        if brick.brick_type == BrickType::Fixed {
            if fixed_seen.contains(&brick.key.as_str()) {
                return Err(BrickDbError::InvalidPayload(format!(
                    "Fixed brick '{}' appears more than once",
                    brick.key
                )));
            }
            fixed_seen.push(brick.key.as_str());
        }
        resolved.push((brick, payload));
    }

    resolved.sort_by_key(|(brick, payload)| {
        (
            brick_rank(brick.brick_type),
            payload.order,
            declaration_index(collection, &brick.key),
        )
    });
    Ok(resolved)
}

pub(crate) fn brick_rank(brick_type: BrickType) -> u8 {
    match brick_type {
        BrickType::CollectionFields => 0,
        BrickType::Fixed => 1,
        BrickType::Builder => 2,
    }
}

pub(crate) fn declaration_index(collection: &CollectionSchema, key: &str) -> usize {
    collection
        .all_bricks()
        .position(|b| b.key == key)
        .unwrap_or(usize::MAX)
}

struct Pass<'a> {
    collection: &'a CollectionSchema,
    locales: Vec<String>,
    default_locale: &'a str,
    next_brick: u64,
    next_group: u64,
    tables: Vec<TableRows>,
}

impl<'a> Pass<'a> {
    fn push(&mut self, table: &str, row: MaterializedRow) -> Result<()> {
        let rows = self
            .tables
            .iter_mut()
            .find(|t| t.table == table)
            .ok_or_else(|| BrickDbError::Schema(format!("No derived table '{table}'")))?;
        rows.rows.push(row);
        Ok(())
    }

    fn emit_brick(
        &mut self,
        brick: &BrickSchema,
        fields: &[FieldPayload],
        position: i64,
        open: bool,
    ) -> Result<()> {
        self.next_brick += 1;
        let token = format!("b{}", self.next_brick);

        for locale in self.locales.clone() {
            let values = self.cells(&brick.fields, fields, &locale)?;
            self.push(
                &brick.table,
                MaterializedRow {
                    locale,
                    position,
                    open,
                    token: token.clone(),
                    brick_type: Some(brick.brick_type),
                    brick_ref: None,
                    parent_id_ref: None,
                    values,
                },
            )?;
        }

        self.emit_repeaters(&brick.fields, fields, &token, None)
    }

    fn emit_repeaters(
        &mut self,
        schema_fields: &[Field],
        fields: &[FieldPayload],
        brick_token: &str,
        parent_token: Option<&str>,
    ) -> Result<()> {
        for field in schema_fields.iter().filter(|f| f.is_repeater()) {
            let Some(table) = field.table.as_deref() else {
                continue;
            };
            let groups = find_field(fields, &field.key)
                .and_then(|f| f.groups.as_deref())
                .unwrap_or_default();

            let mut ordered: Vec<&GroupPayload> = groups.iter().collect();
            ordered.sort_by_key(|g| g.order);

            for group in ordered {
                self.next_group += 1;
                let token = format!("g{}", self.next_group);

                for locale in self.locales.clone() {
                    let values = self.cells(&field.children, &group.fields, &locale)?;
                    self.push(
                        table,
                        MaterializedRow {
                            locale,
                            position: group.order,
                            open: group.open,
                            token: token.clone(),
                            brick_type: None,
                            brick_ref: Some(brick_token.to_string()),
                            parent_id_ref: parent_token.map(str::to_string),
                            values,
                        },
                    )?;
                }

                self.emit_repeaters(&field.children, &group.fields, brick_token, Some(&token))?;
            }
        }
        Ok(())
    }

    /// Leaf cells of one nesting level for one locale
    fn cells(
        &self,
        schema_fields: &[Field],
        fields: &[FieldPayload],
        locale: &str,
    ) -> Result<Vec<(String, SqlValue)>> {
        let mut values = Vec::new();
        for field in schema_fields {
            let Some(kind) = field.field_type.column_kind() else {
                continue;
            };
            let supplied = find_field(fields, &field.key);
            let raw = self.pick_value(field, supplied, locale);
            values.push((field.column(), to_sql(field, kind, raw)?));
        }
        Ok(values)
    }

    fn pick_value<'v>(
        &self,
        field: &'v Field,
        supplied: Option<&'v FieldPayload>,
        locale: &str,
    ) -> Option<&'v Value> {
        let translatable = self.collection.is_translatable(field);
        let picked = supplied.and_then(|fp| {
            let translation = |code: &str| fp.translations.as_ref().and_then(|t| t.get(code));
            if translatable {
                translation(locale).or(fp.value.as_ref())
            } else {
                fp.value.as_ref().or_else(|| translation(self.default_locale))
            }
        });
        picked.or(field.default.as_ref())
    }
}

pub(crate) fn to_sql(field: &Field, kind: ColumnKind, value: Option<&Value>) -> Result<SqlValue> {
    let value = match value {
        None | Some(Value::Null) => return Ok(SqlValue::Null),
        Some(v) => v,
    };

    let mismatch = || {
        BrickDbError::InvalidPayload(format!(
            "Field '{}' ({}) cannot store value {}",
            field.key,
            field.field_type.as_str(),
            value
        ))
    };

    match kind {
        ColumnKind::Text => value
            .as_str()
            .map(|s| SqlValue::Text(s.to_string()))
            .ok_or_else(mismatch),
        ColumnKind::Numeric => {
            if let Some(i) = value.as_i64() {
                Ok(SqlValue::Integer(i))
            } else {
                value.as_f64().map(SqlValue::Real).ok_or_else(mismatch)
            }
        }
        ColumnKind::Boolean => value
            .as_bool()
            .map(|b| SqlValue::Integer(i64::from(b)))
            .ok_or_else(mismatch),
        ColumnKind::Json => Ok(SqlValue::Text(serde_json::to_string(value)?)),
        ColumnKind::MediaRef | ColumnKind::UserRef | ColumnKind::DocumentRef => {
            reference_id(value).map(SqlValue::Integer).ok_or_else(mismatch)
        }
    }
}

/// Reference values are an id, or an object carrying one
pub fn reference_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::Object(map) => map.get("id").and_then(Value::as_i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::GroupPayload;
    use crate::schema::tests::test_schema;
    use serde_json::json;

    fn group(order: i64, fields: Vec<FieldPayload>) -> GroupPayload {
        GroupPayload::new(order, fields)
    }

    fn banner_with(groups: Vec<GroupPayload>) -> BrickPayload {
        BrickPayload::builder(
            "banner",
            0,
            vec![
                FieldPayload::translated("title", [("en", json!("Hi")), ("fr", json!("Salut"))]),
                FieldPayload::repeater("links", groups),
            ],
        )
    }

    #[test]
    fn test_product_law_for_nested_repeaters() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();

        let tags = |n: usize| {
            FieldPayload::repeater(
                "tags",
                (0..n)
                    .map(|i| group(i as i64, vec![FieldPayload::value("label", json!("t"))]))
                    .collect(),
            )
        };
        let payload = DocumentPayload {
            fields: vec![],
            bricks: vec![
                banner_with(vec![
                    group(0, vec![FieldPayload::value("url", json!("/a")), tags(2)]),
                    group(1, vec![FieldPayload::value("url", json!("/b")), tags(3)]),
                ]),
                banner_with(vec![group(0, vec![FieldPayload::value("url", json!("/c"))])]),
            ],
        };

        let m = materialize(page, schema.locales(), &payload).unwrap();
        let locales = 2;
        assert_eq!(m.row_count("bd_document__page__fields"), locales);
        assert_eq!(m.row_count("bd_document__page__banner"), 2 * locales);
        assert_eq!(m.row_count("bd_document__page__banner__links"), 3 * locales);
        assert_eq!(m.row_count("bd_document__page__banner__links__tags"), 5 * locales);
        assert_eq!(m.row_count("bd_document__page__intro__links"), 0);
    }

    #[test]
    fn test_product_law_without_translations() {
        let schema = test_schema();
        let settings = schema.collection("settings").unwrap();
        let payload = DocumentPayload {
            fields: vec![FieldPayload::value("site_name", json!("Acme"))],
            bricks: vec![],
        };
        let m = materialize(settings, schema.locales(), &payload).unwrap();
        assert_eq!(m.row_count("bd_document__settings__fields"), 1);
        let row = &m.table("bd_document__settings__fields").unwrap().rows[0];
        assert_eq!(row.locale, "en");
        assert_eq!(row.brick_type, Some(BrickType::CollectionFields));
    }

    #[test]
    fn test_parent_refs_link_nested_groups() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();
        let payload = DocumentPayload {
            fields: vec![],
            bricks: vec![banner_with(vec![group(
                0,
                vec![FieldPayload::repeater(
                    "tags",
                    vec![group(0, vec![FieldPayload::value("label", json!("x"))])],
                )],
            )])],
        };

        let m = materialize(page, schema.locales(), &payload).unwrap();
        let links = &m.table("bd_document__page__banner__links").unwrap().rows;
        let tags = &m.table("bd_document__page__banner__links__tags").unwrap().rows;
        let brick = &m.table("bd_document__page__banner").unwrap().rows[0];

        assert!(links.iter().all(|r| r.parent_id_ref.is_none()));
        assert!(links.iter().all(|r| r.brick_ref.as_deref() == Some(brick.token.as_str())));
        assert!(tags
            .iter()
            .all(|r| r.parent_id_ref.as_deref() == Some(links[0].token.as_str())));
    }

    #[test]
    fn test_ordered_is_parent_first() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();
        let m = materialize(page, schema.locales(), &DocumentPayload::default()).unwrap();
        let priorities: Vec<usize> = m.ordered().iter().map(|t| t.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
    }

    #[test]
    fn test_non_translatable_uses_default_locale_value() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();
        let payload = DocumentPayload {
            fields: vec![FieldPayload::translated(
                "views",
                [("en", json!(10)), ("fr", json!(99))],
            )],
            bricks: vec![],
        };
        let m = materialize(page, schema.locales(), &payload).unwrap();
        for row in &m.table("bd_document__page__fields").unwrap().rows {
            let views = row.values.iter().find(|(c, _)| c == "_views").unwrap();
            assert_eq!(views.1, SqlValue::Integer(10));
        }
    }

    #[test]
    fn test_translatable_cells_per_locale_and_defaults() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();
        let payload = DocumentPayload {
            fields: vec![FieldPayload::translated("page_title", [("en", json!("Home"))])],
            bricks: vec![],
        };
        let m = materialize(page, schema.locales(), &payload).unwrap();
        let rows = &m.table("bd_document__page__fields").unwrap().rows;
        let cell = |locale: &str, col: &str| {
            rows.iter()
                .find(|r| r.locale == locale)
                .and_then(|r| r.values.iter().find(|(c, _)| c == col))
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(cell("en", "_page_title"), SqlValue::Text("Home".into()));
        assert_eq!(cell("fr", "_page_title"), SqlValue::Null);
        // default: false on the checkbox
        assert_eq!(cell("fr", "_featured"), SqlValue::Integer(0));
    }

    #[test]
    fn test_unknown_brick_rejected() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();
        let payload = DocumentPayload {
            fields: vec![],
            bricks: vec![BrickPayload::builder("hero", 0, vec![])],
        };
        let err = materialize(page, schema.locales(), &payload).unwrap_err();
        assert!(matches!(err, BrickDbError::InvalidPayload(_)));
    }

    #[test]
    fn test_fixed_brick_twice_rejected() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();
        let payload = DocumentPayload {
            fields: vec![],
            bricks: vec![BrickPayload::fixed("seo", vec![]), BrickPayload::fixed("seo", vec![])],
        };
        assert!(materialize(page, schema.locales(), &payload).is_err());
    }

    #[test]
    fn test_wrong_value_type_rejected() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();
        let payload = DocumentPayload {
            fields: vec![FieldPayload::value("featured", json!("yes"))],
            bricks: vec![],
        };
        assert!(matches!(
            materialize(page, schema.locales(), &payload),
            Err(BrickDbError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_tokens_are_canonical_regardless_of_input_order() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();
        let a = BrickPayload::builder("intro", 1, vec![]);
        let b = BrickPayload::builder("banner", 0, vec![]);

        let first = materialize(
            page,
            schema.locales(),
            &DocumentPayload { fields: vec![], bricks: vec![a.clone(), b.clone()] },
        )
        .unwrap();
        let second = materialize(
            page,
            schema.locales(),
            &DocumentPayload { fields: vec![], bricks: vec![b, a] },
        )
        .unwrap();
        assert_eq!(
            first.table("bd_document__page__intro").unwrap().rows,
            second.table("bd_document__page__intro").unwrap().rows
        );
    }
}
