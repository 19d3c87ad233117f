// Nested document payload as submitted by clients and returned by reads

use crate::schema::{BrickType, FieldType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPayload {
    #[serde(default)]
    pub fields: Vec<FieldPayload>,
    #[serde(default)]
    pub bricks: Vec<BrickPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrickPayload {
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub brick_ref: Option<String>,
    pub key: String,
    #[serde(rename = "type")]
    pub brick_type: BrickType,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub open: bool,
    #[serde(default)]
    pub fields: Vec<FieldPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPayload {
    pub key: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translations: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<GroupPayload>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPayload {
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub group_ref: Option<String>,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub open: bool,
    #[serde(default)]
    pub fields: Vec<FieldPayload>,
}

impl DocumentPayload {
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl FieldPayload {
    /// A field with a single (default-locale) value
    pub fn value(key: &str, value: Value) -> Self {
        FieldPayload {
            key: key.to_string(),
            field_type: None,
            value: Some(value),
            translations: None,
            groups: None,
        }
    }

    /// A field with per-locale values
    pub fn translated<'a>(key: &str, values: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        FieldPayload {
            key: key.to_string(),
            field_type: None,
            value: None,
            translations: Some(
                values
                    .into_iter()
                    .map(|(locale, v)| (locale.to_string(), v))
                    .collect(),
            ),
            groups: None,
        }
    }

    pub fn repeater(key: &str, groups: Vec<GroupPayload>) -> Self {
        FieldPayload {
            key: key.to_string(),
            field_type: Some(FieldType::Repeater),
            value: None,
            translations: None,
            groups: Some(groups),
        }
    }

    /// Whether any value was supplied for this field
    pub fn has_content(&self) -> bool {
        self.value.as_ref().is_some_and(|v| !v.is_null())
            || self
                .translations
                .as_ref()
                .is_some_and(|t| t.values().any(|v| !v.is_null()))
            || self.groups.is_some()
    }
}

impl GroupPayload {
    pub fn new(order: i64, fields: Vec<FieldPayload>) -> Self {
        GroupPayload {
            group_ref: None,
            order,
            open: false,
            fields,
        }
    }
}

impl BrickPayload {
    pub fn builder(key: &str, order: i64, fields: Vec<FieldPayload>) -> Self {
        BrickPayload {
            brick_ref: None,
            key: key.to_string(),
            brick_type: BrickType::Builder,
            order,
            open: false,
            fields,
        }
    }

    pub fn fixed(key: &str, fields: Vec<FieldPayload>) -> Self {
        BrickPayload {
            brick_ref: None,
            key: key.to_string(),
            brick_type: BrickType::Fixed,
            order: 0,
            open: false,
            fields,
        }
    }
}

/// Look up a field by key at one nesting level
pub fn find_field<'a>(fields: &'a [FieldPayload], key: &str) -> Option<&'a FieldPayload> {
    fields.iter().find(|f| f.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_nested_payload() {
        let payload = DocumentPayload::from_json(
            r#"{
                "fields": [{ "key": "page_title", "translations": { "en": "Home" } }],
                "bricks": [{
                    "key": "banner", "type": "builder", "order": 2, "open": true,
                    "fields": [{
                        "key": "links", "type": "repeater",
                        "groups": [{ "ref": "a", "order": 0, "fields": [{ "key": "url", "value": "/x" }] }]
                    }]
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(payload.bricks[0].brick_type, BrickType::Builder);
        assert!(payload.bricks[0].open);
        let links = find_field(&payload.bricks[0].fields, "links").unwrap();
        let groups = links.groups.as_ref().unwrap();
        assert_eq!(groups[0].group_ref.as_deref(), Some("a"));
        assert_eq!(groups[0].fields[0].value, Some(json!("/x")));
    }

    #[test]
    fn test_has_content() {
        assert!(!FieldPayload::translated("t", [("en", Value::Null)]).has_content());
        assert!(FieldPayload::translated("t", [("en", json!("x"))]).has_content());
        assert!(FieldPayload::repeater("r", vec![]).has_content());
    }
}
