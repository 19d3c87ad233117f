use crate::error::{BrickDbError, Result};
use crate::materializer::reference_id;
use crate::payload::{BrickPayload, DocumentPayload, FieldPayload, GroupPayload};
use crate::relations::RelationData;
use crate::schema::{CollectionSchema, DimensionRule, Field, FieldType, Schema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Validation errors of one payload, nested the way the payload is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bricks: Vec<BrickErrors>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrickErrors {
    /// Position of the brick in the submitted payload
    pub index: usize,
    pub key: String,
    /// Error with the brick itself (unknown key, wrong type)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupErrors>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupErrors {
    pub index: usize,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub group_ref: Option<String>,
    pub fields: Vec<FieldError>,
}

impl FieldError {
    fn new(key: &str, locale: Option<&str>, message: impl Into<String>) -> Self {
        FieldError {
            key: key.to_string(),
            locale: locale.map(str::to_string),
            message: Some(message.into()),
            groups: Vec::new(),
        }
    }
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.fields.is_empty() && self.bricks.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.paths().len()
    }

    /// Flattened `path: message` pairs, e.g. `bricks[0].links[1].url`.
    pub fn errors(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        flatten_fields(&self.fields, "", &mut out);
        for brick in &self.bricks {
            let prefix = format!("bricks[{}]", brick.index);
            if let Some(message) = &brick.message {
                out.push((prefix.clone(), message.clone()));
            }
            flatten_fields(&brick.fields, &format!("{prefix}."), &mut out);
        }
        out
    }

    pub fn paths(&self) -> Vec<String> {
        self.errors().into_iter().map(|(path, _)| path).collect()
    }

    /// `Ok` when there are no errors, `BrickDbError::Validation` otherwise.
    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(BrickDbError::Validation(self))
        }
    }
}

fn flatten_fields(fields: &[FieldError], prefix: &str, out: &mut Vec<(String, String)>) {
    for field in fields {
        let path = format!("{prefix}{}", field.key);
        if let Some(message) = &field.message {
            let path = match &field.locale {
                Some(locale) => format!("{path}:{locale}"),
                None => path.clone(),
            };
            out.push((path, message.clone()));
        }
        for group in &field.groups {
            flatten_fields(&group.fields, &format!("{path}[{}].", group.index), out);
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errors = self.errors();
        write!(f, "{} invalid field(s)", errors.len())?;
        for (i, (path, message)) in errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{path} {message}")?;
        }
        Ok(())
    }
}

/// Validate a payload against a collection. Reference fields are checked
/// against the pre-fetched `relations`.
pub fn validate(
    schema: &Schema,
    collection: &CollectionSchema,
    payload: &DocumentPayload,
    relations: &RelationData,
) -> ValidationReport {
    let validator = Validator {
        collection,
        locales: schema.locales().required(collection.translations),
        default_locale: schema.locales().default_code(),
        relations,
    };

    let fields = validator.fields(&collection.collection_fields().fields, &payload.fields);
    let bricks = payload
        .bricks
        .iter()
        .enumerate()
        .filter_map(|(index, brick)| validator.brick(index, brick))
        .collect();

    ValidationReport { fields, bricks }
}

struct Validator<'a> {
    collection: &'a CollectionSchema,
    locales: Vec<String>,
    default_locale: &'a str,
    relations: &'a RelationData,
}

impl Validator<'_> {
    fn brick(&self, index: usize, brick: &BrickPayload) -> Option<BrickErrors> {
        let errors = |message: Option<String>, fields: Vec<FieldError>| BrickErrors {
            index,
            key: brick.key.clone(),
            message,
            fields,
        };

        let Some(schema) = self.collection.brick(&brick.key) else {
            return Some(errors(
                Some(format!(
                    "is not a brick of collection '{}'",
                    self.collection.key
                )),
                Vec::new(),
            ));
        };
        if schema.brick_type != brick.brick_type {
            return Some(errors(
                Some(format!(
                    "is declared {}, submitted as {}",
                    schema.brick_type.as_str(),
                    brick.brick_type.as_str()
                )),
                Vec::new(),
            ));
        }

        let fields = self.fields(&schema.fields, &brick.fields);
        if fields.is_empty() {
            None
        } else {
            Some(errors(None, fields))
        }
    }

    fn fields(&self, schema_fields: &[Field], supplied: &[FieldPayload]) -> Vec<FieldError> {
        let mut errors = Vec::new();

        for field in schema_fields {
            let mut matching = supplied.iter().filter(|p| p.key == field.key);
            let payload = matching.next();
            if matching.next().is_some() {
                errors.push(FieldError::new(&field.key, None, "is supplied more than once"));
                continue;
            }
            if let Some(submitted) = payload
                .and_then(|p| p.field_type)
                .filter(|t| *t != field.field_type)
            {
                errors.push(FieldError::new(
                    &field.key,
                    None,
                    format!(
                        "is declared {}, submitted as {}",
                        field.field_type.as_str(),
                        submitted.as_str()
                    ),
                ));
                continue;
            }
            if field.is_repeater() {
                errors.extend(self.repeater(field, payload));
            } else {
                errors.extend(self.leaf(field, payload));
            }
        }

        for payload in supplied {
            if !schema_fields.iter().any(|f| f.key == payload.key) {
                errors.push(FieldError::new(&payload.key, None, "is not a known field"));
            }
        }
        errors
    }

    fn repeater(&self, field: &Field, payload: Option<&FieldPayload>) -> Option<FieldError> {
        let rules = &field.validation;
        let Some(groups) = payload.and_then(|p| p.groups.as_ref()) else {
            if payload.is_some_and(|p| p.value.is_some() || p.translations.is_some()) {
                return Some(FieldError::new(&field.key, None, "expects groups"));
            }
            return field
                .is_required()
                .then(|| FieldError::new(&field.key, None, "is required"));
        };

        let mut message = None;
        if groups.is_empty() && field.is_required() {
            message = Some("is required".to_string());
        } else if let Some(min) = rules.min_groups.filter(|min| groups.len() < *min) {
            message = Some(format!("needs at least {min} groups"));
        } else if let Some(max) = rules.max_groups.filter(|max| groups.len() > *max) {
            message = Some(format!("allows at most {max} groups"));
        }

        let group_errors: Vec<GroupErrors> = groups
            .iter()
            .enumerate()
            .filter_map(|(index, group)| self.group(field, index, group))
            .collect();

        if message.is_none() && group_errors.is_empty() {
            return None;
        }
        Some(FieldError {
            key: field.key.clone(),
            locale: None,
            message,
            groups: group_errors,
        })
    }

    fn group(&self, field: &Field, index: usize, group: &GroupPayload) -> Option<GroupErrors> {
        let fields = self.fields(&field.children, &group.fields);
        (!fields.is_empty()).then(|| GroupErrors {
            index,
            group_ref: group.group_ref.clone(),
            fields,
        })
    }

    fn leaf(&self, field: &Field, payload: Option<&FieldPayload>) -> Vec<FieldError> {
        let required = field.is_required() && field.default.is_none();
        let Some(payload) = payload.filter(|p| p.value.is_some() || p.translations.is_some()) else {
            return if required {
                vec![FieldError::new(&field.key, None, "is required")]
            } else {
                Vec::new()
            };
        };

        let translation = |code: &str| payload.translations.as_ref().and_then(|t| t.get(code));
        let mut errors = Vec::new();

        if self.collection.is_translatable(field) {
            for locale in &self.locales {
                let value = translation(locale).or(payload.value.as_ref());
                match value.filter(|v| !is_empty(v)) {
                    None if required => {
                        errors.push(FieldError::new(&field.key, Some(locale), "is required"))
                    }
                    None => {}
                    Some(value) => {
                        if let Err(message) = self.check(field, value) {
                            errors.push(FieldError::new(&field.key, Some(locale), message));
                        }
                    }
                }
            }
        } else {
            let value = payload
                .value
                .as_ref()
                .or_else(|| translation(self.default_locale));
            match value.filter(|v| !is_empty(v)) {
                None if required => errors.push(FieldError::new(&field.key, None, "is required")),
                None => {}
                Some(value) => {
                    if let Err(message) = self.check(field, value) {
                        errors.push(FieldError::new(&field.key, None, message));
                    }
                }
            }
        }
        errors
    }

    /// Type rule of one non-empty value
    fn check(&self, field: &Field, value: &Value) -> std::result::Result<(), String> {
        let rules = &field.validation;
        match field.field_type {
            FieldType::Text | FieldType::Textarea | FieldType::Wysiwyg | FieldType::Colour => {
                let s = value.as_str().ok_or("must be a string")?;
                if field.field_type == FieldType::Colour && !is_hex_colour(s) {
                    return Err("must be a hex colour".into());
                }
                let len = s.chars().count();
                if let Some(min) = rules.min_length.filter(|min| len < *min) {
                    return Err(format!("must be at least {min} characters"));
                }
                if let Some(max) = rules.max_length.filter(|max| len > *max) {
                    return Err(format!("must be at most {max} characters"));
                }
                if let Some(pattern) = &field.pattern {
                    if !pattern.is_match(s) {
                        return Err(format!("must match pattern {}", pattern.as_str()));
                    }
                }
                Ok(())
            }
            FieldType::Number => {
                let n = value.as_f64().ok_or("must be a number")?;
                if let Some(min) = rules.min.filter(|min| n < *min) {
                    return Err(format!("must be at least {min}"));
                }
                if let Some(max) = rules.max.filter(|max| n > *max) {
                    return Err(format!("must be at most {max}"));
                }
                Ok(())
            }
            FieldType::Checkbox => value
                .is_boolean()
                .then_some(())
                .ok_or_else(|| "must be true or false".into()),
            FieldType::Select => {
                let s = value.as_str().ok_or("must be a string")?;
                if field.options.iter().any(|o| o.value == s) {
                    Ok(())
                } else {
                    Err(format!("'{s}' is not one of the options"))
                }
            }
            FieldType::Datetime => {
                let s = value.as_str().ok_or("must be an RFC 3339 date-time")?;
                chrono::DateTime::parse_from_rfc3339(s)
                    .map(|_| ())
                    .map_err(|e| format!("must be an RFC 3339 date-time ({e})"))
            }
            FieldType::Link => match value.get("url") {
                Some(Value::String(_)) => Ok(()),
                _ => Err("must be a link with a url".into()),
            },
            FieldType::Json => Ok(()),
            FieldType::Media => self.check_media(field, value),
            FieldType::User => {
                let id = reference_id(value).ok_or("must be a user id")?;
                match self.relations.users.get(&id) {
                    None => Err(format!("user {id} does not exist")),
                    Some(user) if user.is_deleted => Err(format!("user {id} has been deleted")),
                    Some(_) => Ok(()),
                }
            }
            FieldType::Document => {
                let id = reference_id(value).ok_or("must be a document id")?;
                let target = field.collection.as_deref().unwrap_or_default();
                match self.relations.document(target, id) {
                    None => Err(format!("document {id} does not exist in '{target}'")),
                    Some(doc) if doc.is_deleted => Err(format!("document {id} has been deleted")),
                    Some(_) => Ok(()),
                }
            }
            FieldType::Repeater | FieldType::Tab => Ok(()),
        }
    }

    fn check_media(&self, field: &Field, value: &Value) -> std::result::Result<(), String> {
        let rules = &field.validation;
        let id = reference_id(value).ok_or("must be a media id")?;
        let media = self
            .relations
            .media
            .get(&id)
            .ok_or_else(|| format!("media {id} does not exist"))?;
        if media.is_deleted {
            return Err(format!("media {id} has been deleted"));
        }
        if let Some(kind) = rules.media_type {
            if media.kind != kind {
                return Err(format!("media {id} must be of type {kind:?}").to_lowercase());
            }
        }
        if !rules.extensions.is_empty() {
            let allowed = media.extension.as_deref().is_some_and(|ext| {
                let ext = ext.trim_start_matches('.');
                rules
                    .extensions
                    .iter()
                    .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext))
            });
            if !allowed {
                return Err(format!(
                    "media {id} must have extension {}",
                    rules.extensions.join(", ")
                ));
            }
        }
        if !rules.mime_types.is_empty() {
            let allowed = media
                .mime_type
                .as_deref()
                .is_some_and(|mime| rules.mime_types.iter().any(|m| m.eq_ignore_ascii_case(mime)));
            if !allowed {
                return Err(format!(
                    "media {id} must be one of {}",
                    rules.mime_types.join(", ")
                ));
            }
        }
        check_dimension("width", media.width, rules.width)?;
        check_dimension("height", media.height, rules.height)?;
        Ok(())
    }
}

fn check_dimension(
    name: &str,
    actual: Option<u32>,
    rule: Option<DimensionRule>,
) -> std::result::Result<(), String> {
    let Some(rule) = rule else {
        return Ok(());
    };
    let Some(actual) = actual else {
        return Err(format!("has no known {name}"));
    };
    if let Some(min) = rule.min.filter(|min| actual < *min) {
        return Err(format!("{name} must be at least {min}px"));
    }
    if let Some(max) = rule.max.filter(|max| actual > *max) {
        return Err(format!("{name} must be at most {max}px"));
    }
    Ok(())
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn is_hex_colour(s: &str) -> bool {
    s.strip_prefix('#').is_some_and(|hex| {
        matches!(hex.len(), 3 | 4 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit())
    })
}
