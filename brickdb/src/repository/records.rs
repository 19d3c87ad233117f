// Document and version records as stored in the per-collection tables

use crate::error::{BrickDbError, Result};
use crate::payload::DocumentPayload;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    Draft,
    Published,
    Revision,
}

impl VersionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionType::Draft => "draft",
            VersionType::Published => "published",
            VersionType::Revision => "revision",
        }
    }
}

impl fmt::Display for VersionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionType {
    type Err = BrickDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(VersionType::Draft),
            "published" => Ok(VersionType::Published),
            "revision" => Ok(VersionType::Revision),
            other => Err(BrickDbError::InvalidPayload(format!(
                "Unknown version type '{other}'"
            ))),
        }
    }
}

impl ToSql for VersionType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for VersionType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|e: BrickDbError| FromSqlError::Other(e.to_string().into()))
    }
}

/// Which version of a document to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    Draft,
    Published,
    Revision(i64),
    /// The newest of the draft and published versions
    Latest,
}

impl FromStr for VersionSelector {
    type Err = BrickDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(VersionSelector::Draft),
            "published" => Ok(VersionSelector::Published),
            "latest" => Ok(VersionSelector::Latest),
            other => {
                let id = other
                    .strip_prefix("revision:")
                    .and_then(|id| id.parse::<i64>().ok())
                    .ok_or_else(|| {
                        BrickDbError::InvalidPayload(format!(
                            "Unknown version selector '{other}'"
                        ))
                    })?;
                Ok(VersionSelector::Revision(id))
            }
        }
    }
}

/// Whether soft-deleted documents are visible
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadScope {
    #[default]
    Public,
    Admin,
}

/// Where a new version goes: a fresh document or an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentTarget {
    New,
    Existing(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: i64,
    pub collection_key: String,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<i64>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub(crate) const COLUMNS: &'static str = "id, collection_key, is_deleted, deleted_at, deleted_by, \
         created_by, updated_by, created_at, updated_at";

    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(DocumentRecord {
            id: row.get(0)?,
            collection_key: row.get(1)?,
            is_deleted: row.get(2)?,
            deleted_at: row.get(3)?,
            deleted_by: row.get(4)?,
            created_by: row.get(5)?,
            updated_by: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: i64,
    pub document_id: i64,
    #[serde(rename = "type")]
    pub version_type: VersionType,
    pub promoted_from: Option<i64>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VersionRecord {
    pub(crate) const COLUMNS: &'static str =
        "id, document_id, type, promoted_from, created_by, updated_by, created_at, updated_at";

    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(VersionRecord {
            id: row.get(0)?,
            document_id: row.get(1)?,
            version_type: row.get(2)?,
            promoted_from: row.get(3)?,
            created_by: row.get(4)?,
            updated_by: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

/// A version with its reconstructed content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSnapshot {
    pub document: DocumentRecord,
    pub version: VersionRecord,
    pub payload: DocumentPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selectors() {
        assert_eq!("draft".parse::<VersionSelector>().unwrap(), VersionSelector::Draft);
        assert_eq!("latest".parse::<VersionSelector>().unwrap(), VersionSelector::Latest);
        assert_eq!(
            "revision:42".parse::<VersionSelector>().unwrap(),
            VersionSelector::Revision(42)
        );
        assert!("revision:abc".parse::<VersionSelector>().is_err());
        assert!("archived".parse::<VersionSelector>().is_err());
    }

    #[test]
    fn test_version_type_round_trip() {
        for t in [VersionType::Draft, VersionType::Published, VersionType::Revision] {
            assert_eq!(t.as_str().parse::<VersionType>().unwrap(), t);
        }
    }
}
