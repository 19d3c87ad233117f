use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level configuration parsed from brickdb.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    #[serde(default)]
    pub locales: Vec<LocaleDefinition>,
    #[serde(default)]
    pub bricks: BTreeMap<String, BrickDefinition>,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionDefinition>,
}

fn default_table_prefix() -> String {
    "bd".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocaleDefinition {
    pub code: String,
    #[serde(default)]
    pub default: bool,
}

/// A reusable brick, referenced by collections as fixed or builder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrickDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

/// Definition of a single collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mode: CollectionMode,
    #[serde(default)]
    pub translations: bool,
    #[serde(default)]
    pub use_drafts: bool,
    #[serde(default)]
    pub use_revisions: bool,
    /// Maximum number of revisions kept per document. Unlimited when absent.
    #[serde(default)]
    pub revision_retention: Option<usize>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub fixed_bricks: Vec<String>,
    #[serde(default)]
    pub builder_bricks: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMode {
    Single,
    #[default]
    Multiple,
}

/// Definition of a single field. Tabs and repeaters carry child fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub key: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub translations: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub validation: FieldValidation,
    #[serde(default)]
    pub options: Vec<SelectOption>,
    /// Target collection of a document field
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub include: bool,
    #[serde(default)]
    pub filterable: bool,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Textarea,
    Wysiwyg,
    Number,
    Checkbox,
    Select,
    Datetime,
    Colour,
    Link,
    Json,
    Media,
    User,
    Document,
    Repeater,
    Tab,
}

/// SQL storage class for a field column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Numeric,
    Boolean,
    Json,
    MediaRef,
    UserRef,
    DocumentRef,
}

impl ColumnKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Text | ColumnKind::Json => "TEXT",
            ColumnKind::Numeric => "NUMERIC",
            ColumnKind::Boolean
            | ColumnKind::MediaRef
            | ColumnKind::UserRef
            | ColumnKind::DocumentRef => "INTEGER",
        }
    }
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Textarea => "textarea",
            FieldType::Wysiwyg => "wysiwyg",
            FieldType::Number => "number",
            FieldType::Checkbox => "checkbox",
            FieldType::Select => "select",
            FieldType::Datetime => "datetime",
            FieldType::Colour => "colour",
            FieldType::Link => "link",
            FieldType::Json => "json",
            FieldType::Media => "media",
            FieldType::User => "user",
            FieldType::Document => "document",
            FieldType::Repeater => "repeater",
            FieldType::Tab => "tab",
        }
    }

    /// Column storage for leaf fields; `None` for repeaters and tabs.
    pub fn column_kind(&self) -> Option<ColumnKind> {
        match self {
            FieldType::Text
            | FieldType::Textarea
            | FieldType::Wysiwyg
            | FieldType::Select
            | FieldType::Datetime
            | FieldType::Colour => Some(ColumnKind::Text),
            FieldType::Number => Some(ColumnKind::Numeric),
            FieldType::Checkbox => Some(ColumnKind::Boolean),
            FieldType::Link | FieldType::Json => Some(ColumnKind::Json),
            FieldType::Media => Some(ColumnKind::MediaRef),
            FieldType::User => Some(ColumnKind::UserRef),
            FieldType::Document => Some(ColumnKind::DocumentRef),
            FieldType::Repeater | FieldType::Tab => None,
        }
    }
}

/// Type-specific validation rules. Only the rules relevant to a field's type apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldValidation {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub min_groups: Option<usize>,
    #[serde(default)]
    pub max_groups: Option<usize>,
    #[serde(default)]
    pub media_type: Option<MediaKind>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub mime_types: Vec<String>,
    #[serde(default)]
    pub width: Option<DimensionRule>,
    #[serde(default)]
    pub height: Option<DimensionRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Archive,
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DimensionRule {
    #[serde(default)]
    pub min: Option<u32>,
    #[serde(default)]
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    #[serde(default)]
    pub label: Option<String>,
}
