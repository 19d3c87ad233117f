mod parser;
pub mod tables;
mod types;

pub use parser::{hash_schema, parse_schema, parse_schema_str};
pub use tables::{document_table, field_column, ColumnDef, TableKind, TableSchema};
pub use types::*;

use crate::error::{BrickDbError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Brick key of the pseudo-brick holding a collection's own fields
pub const COLLECTION_FIELDS_KEY: &str = "fields";

const RESERVED_BRICK_KEYS: &[&str] = &[COLLECTION_FIELDS_KEY, "versions"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BrickType {
    Builder,
    Fixed,
    CollectionFields,
}

impl BrickType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrickType::Builder => "builder",
            BrickType::Fixed => "fixed",
            BrickType::CollectionFields => "collection-fields",
        }
    }
}

/// The configured locales with the designated default
#[derive(Debug, Clone)]
pub struct Locales {
    codes: Vec<String>,
    default: String,
}

impl Locales {
    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn default_code(&self) -> &str {
        &self.default
    }

    /// Locales a collection materializes rows for.
    pub fn required(&self, translations: bool) -> Vec<String> {
        if translations {
            self.codes.clone()
        } else {
            vec![self.default.clone()]
        }
    }
}

/// A resolved field: tabs unwrapped, repeaters carrying their children
#[derive(Debug, Clone)]
pub struct Field {
    pub key: String,
    pub field_type: FieldType,
    pub translations: bool,
    pub default: Option<serde_json::Value>,
    pub validation: FieldValidation,
    pub pattern: Option<Regex>,
    pub options: Vec<SelectOption>,
    pub collection: Option<String>,
    pub include: bool,
    pub filterable: bool,
    /// Repeater table, for repeater fields
    pub table: Option<String>,
    pub children: Vec<Field>,
}

impl Field {
    pub fn column(&self) -> String {
        field_column(&self.key)
    }

    pub fn is_repeater(&self) -> bool {
        self.field_type == FieldType::Repeater
    }

    pub fn is_required(&self) -> bool {
        self.validation.required
    }

    pub fn child(&self, key: &str) -> Option<&Field> {
        self.children.iter().find(|f| f.key == key)
    }
}

#[derive(Debug, Clone)]
pub struct BrickSchema {
    pub key: String,
    pub brick_type: BrickType,
    pub table: String,
    pub fields: Vec<Field>,
}

impl BrickSchema {
    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.key == key)
    }
}

/// A field reachable from a collection, with its position in the tree
#[derive(Debug, Clone)]
pub struct FlatField<'a> {
    pub brick_key: &'a str,
    /// Keys from the brick root down to the field, repeaters included
    pub path: Vec<&'a str>,
    pub field: &'a Field,
}

#[derive(Debug, Clone)]
pub struct CollectionSchema {
    pub key: String,
    pub name: Option<String>,
    pub mode: CollectionMode,
    pub translations: bool,
    pub use_drafts: bool,
    pub use_revisions: bool,
    pub revision_retention: Option<usize>,
    pub locked: bool,
    pub document_table: String,
    pub version_table: String,
    collection_fields: BrickSchema,
    fixed: Vec<BrickSchema>,
    builder: Vec<BrickSchema>,
    tables: Vec<TableSchema>,
}

impl CollectionSchema {
    /// Pseudo-brick holding the collection's top-level fields
    pub fn collection_fields(&self) -> &BrickSchema {
        &self.collection_fields
    }

    pub fn fixed_bricks(&self) -> &[BrickSchema] {
        &self.fixed
    }

    pub fn builder_bricks(&self) -> &[BrickSchema] {
        &self.builder
    }

    pub fn brick(&self, key: &str) -> Option<&BrickSchema> {
        self.fixed
            .iter()
            .chain(self.builder.iter())
            .find(|b| b.key == key)
    }

    /// Collection fields first, then fixed, then builder bricks
    pub fn all_bricks(&self) -> impl Iterator<Item = &BrickSchema> {
        std::iter::once(&self.collection_fields)
            .chain(self.fixed.iter())
            .chain(self.builder.iter())
    }

    /// Every derived table, document and version tables first, parents before children.
    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn content_tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.iter().filter(|t| t.is_content())
    }

    pub fn flat_fields(&self) -> Vec<FlatField<'_>> {
        let mut out = Vec::new();
        for brick in self.all_bricks() {
            collect_flat(&brick.key, &brick.fields, &mut Vec::new(), &mut out);
        }
        out
    }

    pub fn include_fields(&self) -> impl Iterator<Item = &Field> {
        self.collection_fields.fields.iter().filter(|f| f.include)
    }

    pub fn filterable_fields(&self) -> impl Iterator<Item = &Field> {
        self.collection_fields.fields.iter().filter(|f| f.filterable)
    }

    /// Whether the field stores one value per locale
    pub fn is_translatable(&self, field: &Field) -> bool {
        self.translations && field.translations
    }
}

fn collect_flat<'a>(
    brick_key: &'a str,
    fields: &'a [Field],
    prefix: &mut Vec<&'a str>,
    out: &mut Vec<FlatField<'a>>,
) {
    for field in fields {
        let mut path = prefix.clone();
        path.push(field.key.as_str());
        out.push(FlatField {
            brick_key,
            path,
            field,
        });
        if field.is_repeater() {
            prefix.push(field.key.as_str());
            collect_flat(brick_key, &field.children, prefix, out);
            prefix.pop();
        }
    }
}

/// The settled, resolved schema used by every other component.
#[derive(Debug, Clone)]
pub struct Schema {
    table_prefix: String,
    locales: Locales,
    collections: BTreeMap<String, CollectionSchema>,
}

impl Schema {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let definition = parse_schema_str(content)?;
        Schema::from_definition(&definition)
    }

    pub fn from_definition(definition: &SchemaDefinition) -> Result<Self> {
        if !is_valid_key(&definition.table_prefix) {
            return Err(BrickDbError::Schema(format!(
                "Invalid table prefix '{}'",
                definition.table_prefix
            )));
        }

        let locales = resolve_locales(&definition.locales)?;

        let mut collections = BTreeMap::new();
        for (key, collection) in &definition.collections {
            let resolved = resolve_collection(definition, key, collection)?;
            collections.insert(key.clone(), resolved);
        }

        Ok(Schema {
            table_prefix: definition.table_prefix.clone(),
            locales,
            collections,
        })
    }

    pub fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    pub fn locales(&self) -> &Locales {
        &self.locales
    }

    pub fn collection(&self, key: &str) -> Result<&CollectionSchema> {
        self.collections
            .get(key)
            .ok_or_else(|| BrickDbError::not_found("Collection", key))
    }

    pub fn collections(&self) -> impl Iterator<Item = &CollectionSchema> {
        self.collections.values()
    }
}

fn resolve_locales(defs: &[LocaleDefinition]) -> Result<Locales> {
    if defs.is_empty() {
        return Err(BrickDbError::Schema("At least one locale is required".into()));
    }

    let mut seen = HashSet::new();
    for locale in defs {
        if locale.code.trim().is_empty() {
            return Err(BrickDbError::Schema("Locale code cannot be empty".into()));
        }
        if !seen.insert(locale.code.as_str()) {
            return Err(BrickDbError::Schema(format!(
                "Duplicate locale '{}'",
                locale.code
            )));
        }
    }

    let defaults: Vec<&LocaleDefinition> = defs.iter().filter(|l| l.default).collect();
    let default = match defaults.as_slice() {
        [] => defs[0].code.clone(),
        [single] => single.code.clone(),
        _ => {
            return Err(BrickDbError::Schema(
                "Only one locale can be marked default".into(),
            ))
        }
    };

    Ok(Locales {
        codes: defs.iter().map(|l| l.code.clone()).collect(),
        default,
    })
}

/// Keys become table and column names: lowercase, no leading digit, no `__`.
fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    key.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !key.contains("__")
        && !key.ends_with('_')
}

fn resolve_collection(
    definition: &SchemaDefinition,
    key: &str,
    collection: &CollectionDefinition,
) -> Result<CollectionSchema> {
    if !is_valid_key(key) {
        return Err(BrickDbError::Schema(format!("Invalid collection key '{key}'")));
    }

    let document_table = document_table(&definition.table_prefix, key);
    let version_table = tables::child_table(&document_table, "versions");

    let ctx = ResolveContext {
        definition,
        collection_key: key,
        collection_level: true,
    };

    let fields_table = tables::child_table(&document_table, COLLECTION_FIELDS_KEY);
    let collection_fields = BrickSchema {
        key: COLLECTION_FIELDS_KEY.to_string(),
        brick_type: BrickType::CollectionFields,
        fields: ctx.resolve_level(&collection.fields, &fields_table, false)?,
        table: fields_table,
    };

    let brick_ctx = ResolveContext {
        collection_level: false,
        ..ctx
    };

    let mut used = HashSet::new();
    let mut resolve_bricks = |keys: &[String], brick_type: BrickType| -> Result<Vec<BrickSchema>> {
        let mut out = Vec::new();
        for brick_key in keys {
            if RESERVED_BRICK_KEYS.contains(&brick_key.as_str()) || !is_valid_key(brick_key) {
                return Err(BrickDbError::Schema(format!(
                    "Invalid brick key '{brick_key}' in collection '{key}'"
                )));
            }
            if !used.insert(brick_key.clone()) {
                return Err(BrickDbError::Schema(format!(
                    "Brick '{brick_key}' is listed more than once in collection '{key}'"
                )));
            }
            let brick_def = definition.bricks.get(brick_key).ok_or_else(|| {
                BrickDbError::Schema(format!(
                    "Collection '{key}' references unknown brick '{brick_key}'"
                ))
            })?;
            let table = tables::child_table(&document_table, brick_key);
            out.push(BrickSchema {
                key: brick_key.clone(),
                brick_type,
                fields: brick_ctx.resolve_level(&brick_def.fields, &table, false)?,
                table,
            });
        }
        Ok(out)
    };

    let fixed = resolve_bricks(&collection.fixed_bricks, BrickType::Fixed)?;
    let builder = resolve_bricks(&collection.builder_bricks, BrickType::Builder)?;

    let mut derived = vec![
        TableSchema::document(&document_table),
        TableSchema::versions(&version_table, &document_table),
    ];
    for brick in std::iter::once(&collection_fields)
        .chain(fixed.iter())
        .chain(builder.iter())
    {
        derived.push(TableSchema::brick(
            &brick.table,
            &brick.key,
            brick.brick_type,
            &document_table,
            &version_table,
            leaf_columns(&brick.fields),
        ));
        derive_repeater_tables(
            brick,
            &brick.fields,
            &mut Vec::new(),
            None,
            &document_table,
            &version_table,
            &mut derived,
        );
    }

    if collection.revision_retention == Some(0) {
        return Err(BrickDbError::Schema(format!(
            "revision_retention for '{key}' must be at least 1"
        )));
    }

    Ok(CollectionSchema {
        key: key.to_string(),
        name: collection.name.clone(),
        mode: collection.mode,
        translations: collection.translations,
        use_drafts: collection.use_drafts,
        use_revisions: collection.use_revisions,
        revision_retention: collection.revision_retention,
        locked: collection.locked,
        document_table,
        version_table,
        collection_fields,
        fixed,
        builder,
        tables: derived,
    })
}

fn leaf_columns(fields: &[Field]) -> Vec<ColumnDef> {
    fields
        .iter()
        .filter_map(|f| {
            f.field_type
                .column_kind()
                .map(|kind| ColumnDef::field(&f.key, kind))
        })
        .collect()
}

fn derive_repeater_tables(
    brick: &BrickSchema,
    fields: &[Field],
    path: &mut Vec<String>,
    parent_table: Option<&str>,
    document_table: &str,
    version_table: &str,
    out: &mut Vec<TableSchema>,
) {
    for field in fields.iter().filter(|f| f.is_repeater()) {
        let Some(table) = field.table.as_deref() else {
            continue;
        };
        path.push(field.key.clone());
        out.push(TableSchema::repeater(
            table,
            &brick.key,
            path.clone(),
            &brick.table,
            parent_table,
            document_table,
            version_table,
            leaf_columns(&field.children),
        ));
        derive_repeater_tables(
            brick,
            &field.children,
            path,
            Some(table),
            document_table,
            version_table,
            out,
        );
        path.pop();
    }
}

#[derive(Clone, Copy)]
struct ResolveContext<'a> {
    definition: &'a SchemaDefinition,
    collection_key: &'a str,
    collection_level: bool,
}

impl<'a> ResolveContext<'a> {
    /// Resolve one nesting level. `level_table` is the table holding this level's cells.
    fn resolve_level(
        &self,
        defs: &[FieldDefinition],
        level_table: &str,
        in_repeater: bool,
    ) -> Result<Vec<Field>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        self.resolve_into(defs, level_table, in_repeater, false, &mut seen, &mut out)?;
        Ok(out)
    }

    fn resolve_into(
        &self,
        defs: &[FieldDefinition],
        level_table: &str,
        in_repeater: bool,
        in_tab: bool,
        seen: &mut HashSet<String>,
        out: &mut Vec<Field>,
    ) -> Result<()> {
        for def in defs {
            let key = &def.key;
            if !is_valid_key(key) {
                return Err(self.error(format!("Invalid field key '{key}'")));
            }
            if !seen.insert(key.clone()) {
                return Err(self.error(format!("Duplicate field key '{key}'")));
            }

            if def.field_type == FieldType::Tab {
                if in_repeater || in_tab {
                    return Err(self.error(format!(
                        "Tab '{key}' can only appear at the top level of a brick or collection"
                    )));
                }
                self.resolve_into(&def.fields, level_table, in_repeater, true, seen, out)?;
                continue;
            }

            if (def.include || def.filterable)
                && (!self.collection_level || in_repeater || def.field_type.column_kind().is_none())
            {
                return Err(self.error(format!(
                    "Field '{key}': include/filterable is only allowed on collection-level value fields"
                )));
            }

            let pattern = match &def.validation.pattern {
                Some(p) => Some(
                    Regex::new(p)
                        .map_err(|e| self.error(format!("Field '{key}' has invalid pattern: {e}")))?,
                ),
                None => None,
            };

            let (table, children) = match def.field_type {
                FieldType::Repeater => {
                    if def.fields.is_empty() {
                        return Err(self.error(format!("Repeater '{key}' has no fields")));
                    }
                    let table = tables::child_table(level_table, key);
                    let children = self.resolve_level(&def.fields, &table, true)?;
                    (Some(table), children)
                }
                _ => {
                    if !def.fields.is_empty() {
                        return Err(self.error(format!(
                            "Field '{key}' of type {} cannot have child fields",
                            def.field_type.as_str()
                        )));
                    }
                    (None, Vec::new())
                }
            };

            if def.field_type == FieldType::Select && def.options.is_empty() {
                return Err(self.error(format!("Select field '{key}' has no options")));
            }

            if def.field_type == FieldType::Document {
                match &def.collection {
                    Some(target) if self.definition.collections.contains_key(target) => {}
                    Some(target) => {
                        return Err(self.error(format!(
                            "Document field '{key}' targets unknown collection '{target}'"
                        )))
                    }
                    None => {
                        return Err(self.error(format!(
                            "Document field '{key}' is missing a target collection"
                        )))
                    }
                }
            }

            out.push(Field {
                key: key.clone(),
                field_type: def.field_type,
                translations: def.translations,
                default: def.default.clone(),
                validation: def.validation.clone(),
                pattern,
                options: def.options.clone(),
                collection: def.collection.clone(),
                include: def.include,
                filterable: def.filterable,
                table,
                children,
            });
        }
        Ok(())
    }

    fn error(&self, msg: String) -> BrickDbError {
        BrickDbError::Schema(format!("Collection '{}': {msg}", self.collection_key))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TEST_SCHEMA: &str = r#"
locales:
  - { code: en, default: true }
  - { code: fr }

bricks:
  banner:
    fields:
      - { key: title, type: text, translations: true, validation: { required: true } }
      - key: links
        type: repeater
        validation: { max_groups: 3 }
        fields:
          - { key: url, type: text, validation: { required: true } }
          - key: tags
            type: repeater
            fields:
              - { key: label, type: text, translations: true, validation: { required: true } }
  seo:
    fields:
      - key: meta_tab
        type: tab
        fields:
          - { key: meta_title, type: text, translations: true }
          - { key: meta_image, type: media, validation: { media_type: image } }
  intro:
    fields:
      - key: links
        type: repeater
        fields:
          - { key: label, type: text }

collections:
  page:
    translations: true
    use_drafts: true
    use_revisions: true
    fields:
      - { key: page_title, type: text, translations: true, include: true, filterable: true }
      - { key: featured, type: checkbox, filterable: true, default: false }
      - { key: author, type: user }
      - { key: related, type: document, collection: page }
      - { key: views, type: number, include: true }
    fixed_bricks: [seo]
    builder_bricks: [banner, intro]

  settings:
    mode: single
    fields:
      - { key: site_name, type: text, validation: { required: true } }
      - { key: theme, type: select, options: [{ value: light }, { value: dark }] }
"#;

    pub(crate) fn test_schema() -> Schema {
        Schema::from_yaml(TEST_SCHEMA).unwrap()
    }

    #[test]
    fn test_derived_table_names() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();
        let names: Vec<&str> = page.tables().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "bd_document__page",
                "bd_document__page__versions",
                "bd_document__page__fields",
                "bd_document__page__seo",
                "bd_document__page__banner",
                "bd_document__page__banner__links",
                "bd_document__page__banner__links__tags",
                "bd_document__page__intro",
                "bd_document__page__intro__links",
            ]
        );
    }

    #[test]
    fn test_same_repeater_key_under_different_bricks() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();
        let banner_links = page.brick("banner").unwrap().field("links").unwrap();
        let intro_links = page.brick("intro").unwrap().field("links").unwrap();
        assert_ne!(banner_links.table, intro_links.table);
    }

    #[test]
    fn test_priorities_follow_depth() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();
        let tags = page.table("bd_document__page__banner__links__tags").unwrap();
        assert_eq!(tags.priority, 2);
        assert_eq!(page.table("bd_document__page__banner").unwrap().priority, 0);
    }

    #[test]
    fn test_tabs_are_unwrapped() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();
        let seo = page.brick("seo").unwrap();
        let keys: Vec<&str> = seo.fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["meta_title", "meta_image"]);
    }

    #[test]
    fn test_include_and_filterable() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();
        let include: Vec<&str> = page.include_fields().map(|f| f.key.as_str()).collect();
        let filterable: Vec<&str> = page.filterable_fields().map(|f| f.key.as_str()).collect();
        assert_eq!(include, vec!["page_title", "views"]);
        assert_eq!(filterable, vec!["page_title", "featured"]);
    }

    #[test]
    fn test_flat_fields_reach_nested_repeaters() {
        let schema = test_schema();
        let page = schema.collection("page").unwrap();
        let flat = page.flat_fields();
        assert!(flat
            .iter()
            .any(|f| f.brick_key == "banner" && f.path == vec!["links", "tags", "label"]));
    }

    #[test]
    fn test_required_locales() {
        let schema = test_schema();
        assert_eq!(schema.locales().default_code(), "en");
        assert_eq!(schema.locales().required(true), vec!["en", "fr"]);
        assert_eq!(schema.locales().required(false), vec!["en"]);
    }

    #[test]
    fn test_unknown_collection_is_not_found() {
        let schema = test_schema();
        let err = schema.collection("missing").unwrap_err();
        assert!(matches!(err, BrickDbError::NotFound { .. }));
    }

    #[test]
    fn test_unknown_brick_rejected() {
        let yaml = r#"
locales: [{ code: en }]
collections:
  page:
    builder_bricks: [nope]
"#;
        let err = Schema::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown brick 'nope'"));
    }

    #[test]
    fn test_tab_inside_repeater_rejected() {
        let yaml = r#"
locales: [{ code: en }]
collections:
  page:
    fields:
      - key: items
        type: repeater
        fields:
          - key: inner
            type: tab
            fields:
              - { key: title, type: text }
"#;
        assert!(Schema::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_double_underscore_key_rejected() {
        let yaml = r#"
locales: [{ code: en }]
collections:
  page:
    fields:
      - { key: bad__key, type: text }
"#;
        assert!(Schema::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_duplicate_key_across_tab_rejected() {
        let yaml = r#"
locales: [{ code: en }]
collections:
  page:
    fields:
      - { key: title, type: text }
      - key: main
        type: tab
        fields:
          - { key: title, type: text }
"#;
        let err = Schema::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Duplicate field key 'title'"));
    }

    #[test]
    fn test_multiple_default_locales_rejected() {
        let yaml = r#"
locales:
  - { code: en, default: true }
  - { code: fr, default: true }
"#;
        assert!(Schema::from_yaml(yaml).is_err());
    }
}
