//! Remote and canonical record shapes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Untyped, dynamically-keyed attributes as delivered by the remote source.
///
/// Keys are human-readable field names ("Parent Company", "Impacted State", ...).
pub type FieldBag = serde_json::Map<String, serde_json::Value>;

/// One record exactly as the remote source returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Remote-assigned, globally unique and immutable identifier.
    pub id: String,
    /// Creation time reported by the remote source, if any.
    #[serde(rename = "createdTime", default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    /// The loosely-typed field bag.
    #[serde(default)]
    pub fields: FieldBag,
}

impl RemoteRecord {
    /// Create a record from an id and a field bag.
    pub fn new(id: impl Into<String>, fields: FieldBag) -> Self {
        Self {
            id: id.into(),
            created_time: None,
            fields,
        }
    }
}

/// A single typed value in a canonical row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Absent or unparseable value.
    Null,
    /// Free text.
    Text(String),
    /// Decimal number.
    Decimal(f64),
    /// Whole number.
    Integer(i64),
    /// Calendar date.
    Date(NaiveDate),
}

impl Cell {
    /// Text content, if this is a text cell.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A canonical filing row, the unit of synchronization.
///
/// `cells` holds one entry per canonical column, in mapping-table order.
#[derive(Debug, Clone, PartialEq)]
pub struct FilingRecord {
    /// Natural key, copied from [`RemoteRecord::id`].
    pub record_id: String,
    /// When the remote source last changed this record (not when it was synced).
    pub remote_modified_at: Option<DateTime<Utc>>,
    /// Business columns keyed by canonical column name.
    pub cells: Vec<(&'static str, Cell)>,
}

impl FilingRecord {
    /// Look up a business column by its canonical name.
    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, cell)| cell)
    }

    /// Last-writer-wins: whether `self` should replace a stored version whose
    /// remote modification time is `stored`.
    ///
    /// A stored version without a timestamp is always stale. Otherwise the
    /// incoming version must be strictly newer.
    pub fn supersedes(&self, stored: Option<DateTime<Utc>>) -> bool {
        match (stored, self.remote_modified_at) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(old), Some(new)) => new > old,
        }
    }
}
