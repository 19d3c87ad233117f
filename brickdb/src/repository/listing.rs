// Document listing over the collection-fields table: include columns and filters

use super::{DocumentRecord, DocumentRepository, ReadScope, VersionType};
use crate::db::quote;
use crate::error::{BrickDbError, Result};
use crate::materializer::{from_sql, to_sql};
use crate::schema::Field;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Like,
    In,
    IsNull,
}

impl FromStr for FilterOp {
    type Err = BrickDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eq" => Ok(FilterOp::Eq),
            "ne" => Ok(FilterOp::Ne),
            "like" => Ok(FilterOp::Like),
            "in" => Ok(FilterOp::In),
            "is_null" => Ok(FilterOp::IsNull),
            other => Err(BrickDbError::InvalidFilter(format!(
                "Unknown filter operator '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub key: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: Value,
}

impl Filter {
    pub fn eq(key: &str, value: Value) -> Self {
        Filter {
            key: key.to_string(),
            op: FilterOp::Eq,
            value,
        }
    }
}

/// Parses `key=op:value`, `key=value` (equality) and `key=is_null`.
/// Values are read as JSON when they parse, as plain strings otherwise.
impl FromStr for Filter {
    type Err = BrickDbError;

    fn from_str(s: &str) -> Result<Self> {
        let (key, rest) = s
            .split_once('=')
            .ok_or_else(|| BrickDbError::InvalidFilter(format!("Expected key=op:value, got '{s}'")))?;

        let (op, raw) = match rest.split_once(':') {
            Some((op, raw)) if op.parse::<FilterOp>().is_ok() => (op.parse::<FilterOp>()?, raw),
            _ if rest == "is_null" => (FilterOp::IsNull, ""),
            _ => (FilterOp::Eq, rest),
        };
        let value = match op {
            FilterOp::IsNull => Value::Null,
            _ => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
        };
        Ok(Filter {
            key: key.to_string(),
            op,
            value,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ListQuery {
    /// Draft or published; listing revisions goes through `list_revisions`
    pub version: VersionType,
    pub filters: Vec<Filter>,
    pub scope: ReadScope,
    /// Locale of the field row to read; the default locale when unset
    pub locale: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        ListQuery {
            version: VersionType::Published,
            filters: Vec::new(),
            scope: ReadScope::Public,
            locale: None,
            limit: None,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentListing {
    pub document: DocumentRecord,
    pub version_id: i64,
    /// `include` fields of the collection, decoded
    pub fields: BTreeMap<String, Value>,
}

impl DocumentRepository<'_> {
    pub fn list_documents(&self, conn: &Connection, query: &ListQuery) -> Result<Vec<DocumentListing>> {
        if query.version == VersionType::Revision {
            return Err(BrickDbError::InvalidFilter(
                "Documents are listed by draft or published version".into(),
            ));
        }
        let locale = self.listing_locale(query.locale.as_deref())?;
        let fields_table = &self.collection.collection_fields().table;
        let include: Vec<&Field> = self.collection.include_fields().collect();

        let mut select: Vec<String> = DocumentRecord::COLUMNS
            .split(',')
            .map(|c| format!("d.{}", c.trim()))
            .collect();
        select.push("v.id".into());
        select.extend(include.iter().map(|f| format!("f.{}", quote(&f.column()))));

        let mut sql = format!(
            "SELECT {} FROM {} d \
             JOIN {} v ON v.document_id = d.id AND v.type = ? \
             JOIN {} f ON f.document_version_id = v.id AND f.locale = ?",
            select.join(", "),
            quote(&self.collection.document_table),
            quote(&self.collection.version_table),
            quote(fields_table),
        );
        let mut args: Vec<SqlValue> = vec![
            SqlValue::Text(query.version.as_str().to_string()),
            SqlValue::Text(locale),
        ];

        let mut conditions = Vec::new();
        if query.scope == ReadScope::Public {
            conditions.push("d.is_deleted = 0".to_string());
        }
        for filter in &query.filters {
            conditions.push(self.filter_condition(filter, &mut args)?);
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY d.id");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit} OFFSET {}", query.offset));
        } else if query.offset > 0 {
            sql.push_str(&format!(" LIMIT -1 OFFSET {}", query.offset));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            let document = DocumentRecord::from_row(row)?;
            let version_id: i64 = row.get(9)?;
            let mut cells = Vec::with_capacity(include.len());
            for i in 0..include.len() {
                cells.push(row.get::<_, SqlValue>(10 + i)?);
            }
            Ok((document, version_id, cells))
        })?;

        let mut listings = Vec::new();
        for row in rows {
            let (document, version_id, cells) = row?;
            let mut fields = BTreeMap::new();
            for (field, cell) in include.iter().zip(cells.iter()) {
                let Some(kind) = field.field_type.column_kind() else {
                    continue;
                };
                let value = from_sql(kind, Some(cell)).unwrap_or_else(|e| {
                    log::warn!(
                        "Unreadable value for '{}' on document {}: {e}",
                        field.key,
                        document.id
                    );
                    Value::Null
                });
                fields.insert(field.key.clone(), value);
            }
            listings.push(DocumentListing {
                document,
                version_id,
                fields,
            });
        }
        Ok(listings)
    }

    fn listing_locale(&self, requested: Option<&str>) -> Result<String> {
        let locales = self.schema.locales();
        match requested {
            // Rows of untranslated collections only exist in the default locale.
            Some(code) if self.collection.translations => {
                if locales.codes().iter().any(|c| c == code) {
                    Ok(code.to_string())
                } else {
                    Err(BrickDbError::InvalidFilter(format!("Unknown locale '{code}'")))
                }
            }
            _ => Ok(locales.default_code().to_string()),
        }
    }

    fn filter_condition(&self, filter: &Filter, args: &mut Vec<SqlValue>) -> Result<String> {
        let field = self
            .collection
            .filterable_fields()
            .find(|f| f.key == filter.key)
            .ok_or_else(|| {
                BrickDbError::InvalidFilter(format!(
                    "Field '{}' of '{}' is not filterable",
                    filter.key, self.collection.key
                ))
            })?;
        let kind = field.field_type.column_kind().ok_or_else(|| {
            BrickDbError::InvalidFilter(format!("Field '{}' has no column", field.key))
        })?;
        let column = format!("f.{}", quote(&field.column()));
        let cell = |value: &Value| {
            to_sql(field, kind, Some(value)).map_err(|e| BrickDbError::InvalidFilter(e.to_string()))
        };

        let condition = match filter.op {
            FilterOp::Eq | FilterOp::Ne if filter.value.is_null() => {
                let not = if filter.op == FilterOp::Ne { "NOT " } else { "" };
                format!("{column} IS {not}NULL")
            }
            FilterOp::Eq => {
                args.push(cell(&filter.value)?);
                format!("{column} = ?")
            }
            FilterOp::Ne => {
                args.push(cell(&filter.value)?);
                format!("({column} IS NULL OR {column} != ?)")
            }
            FilterOp::Like => {
                let pattern = filter.value.as_str().ok_or_else(|| {
                    BrickDbError::InvalidFilter(format!("'like' on '{}' needs a string", field.key))
                })?;
                args.push(SqlValue::Text(pattern.to_string()));
                format!("{column} LIKE ?")
            }
            FilterOp::In => {
                let values = filter.value.as_array().ok_or_else(|| {
                    BrickDbError::InvalidFilter(format!("'in' on '{}' needs an array", field.key))
                })?;
                if values.is_empty() {
                    return Ok("0".to_string());
                }
                for value in values {
                    args.push(cell(value)?);
                }
                let marks = vec!["?"; values.len()].join(", ");
                format!("{column} IN ({marks})")
            }
            FilterOp::IsNull => format!("{column} IS NULL"),
        };
        Ok(condition)
    }
}
