//! Field mapping and validation.
//!
//! Converts a loosely-typed [`RemoteRecord`] into a canonical [`FilingRecord`].
//! The remote source has no schema contract, so every coupling to a remote
//! field name lives in [`FIELDS`]: one entry per canonical column.
//!
//! Mapping never fails as a whole. A field that cannot be coerced becomes
//! [`Cell::Null`] plus a [`ParseDiagnostic`], and the record keeps its other
//! fields.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use filing_sync_types::{Cell, FilingRecord, ParseDiagnostic, RemoteRecord};
use serde::Serialize;
use serde_json::Value;

/// Remote field carrying the source-side modification time.
pub const LAST_MODIFIED_FIELD: &str = "Last Modified";

/// Legacy locale-specific timestamp layouts, tried after RFC 3339.
const LEGACY_TIMESTAMP_FORMATS: &[&str] = &["%m/%d/%Y %I:%M%p", "%m/%d/%Y %I:%M %p"];

/// Date layouts accepted for date columns, in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%B %d, %Y", "%b %d, %Y"];

/// Canonical type of a mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Free text.
    Text,
    /// Decimal number; percentage strings are rejected.
    Decimal,
    /// Whole number.
    Integer,
    /// Calendar date.
    Date,
}

impl FieldKind {
    /// Whether this kind is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldKind::Decimal | FieldKind::Integer)
    }
}

/// One mapping-table entry: canonical column, remote source fields, parser.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Canonical column name in the local store.
    pub column: &'static str,
    /// Remote field names, tried in order; the first present value wins.
    pub sources: &'static [&'static str],
    /// How the raw value is coerced.
    pub kind: FieldKind,
}

impl FieldSpec {
    const fn new(column: &'static str, sources: &'static [&'static str], kind: FieldKind) -> Self {
        Self {
            column,
            sources,
            kind,
        }
    }
}

use FieldKind::{Date, Decimal, Integer, Text};

/// The mapping table. Adding a field is a one-line change here.
pub static FIELDS: &[FieldSpec] = &[
    FieldSpec::new("company", &["Parent Company"], Text),
    FieldSpec::new("subsidiary", &["Filing Company"], Text),
    FieldSpec::new("state", &["Impacted State"], Text),
    FieldSpec::new("product_line", &["Product Line"], Text),
    FieldSpec::new("rate_change_type", &["Rate Change Type"], Text),
    FieldSpec::new("premium_change_number", &["Overall Rate Change Number"], Decimal),
    FieldSpec::new("premium_change_amount_text", &["Overall Rate Change"], Text),
    FieldSpec::new(
        "effective_date",
        &["Effective Date", "Effective Date (New)", "Effective Date Requested (New)"],
        Date,
    ),
    FieldSpec::new("previous_increase_date", &["Previous Increase Date"], Date),
    FieldSpec::new("previous_increase_number", &["Previous Increase Number"], Decimal),
    FieldSpec::new("policyholders_affected_number", &["Policyholders Affected Number"], Integer),
    FieldSpec::new("policyholders_affected_text", &["Policyholders Affected Text"], Text),
    FieldSpec::new("total_written_premium_number", &["Total Written Premium Number"], Decimal),
    FieldSpec::new("total_written_premium_text", &["Total Written Premium Text"], Text),
    FieldSpec::new("serff_tracking_number", &["SERFF Tracking Number"], Text),
    FieldSpec::new("specific_coverages", &["Specific Coverages"], Text),
    FieldSpec::new("filing_method", &["Filing Method"], Text),
    FieldSpec::new("current_status", &["Current Status"], Text),
    FieldSpec::new("date_submitted", &["Date Submitted"], Date),
    FieldSpec::new("disposition_date", &["Disposition Date"], Date),
    FieldSpec::new("stated_reasons", &["Name"], Text),
    FieldSpec::new("population", &["Population"], Text),
    FieldSpec::new("impact_score", &["Impact Score"], Decimal),
    FieldSpec::new("renewals_date", &["Renewals Date"], Date),
];

/// A mapped record plus the diagnostics raised while mapping it.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRecord {
    /// The canonical row.
    pub record: FilingRecord,
    /// One entry per rejected field.
    pub diagnostics: Vec<ParseDiagnostic>,
}

/// Map one remote record. Pure: same input, same output.
pub fn map_record(remote: &RemoteRecord) -> MappedRecord {
    let mut diagnostics = Vec::new();
    let mut cells = Vec::with_capacity(FIELDS.len());

    for spec in FIELDS {
        let cell = match first_present(remote, spec.sources) {
            None => Cell::Null,
            Some((field_name, raw)) => match coerce(spec.kind, raw) {
                Ok(cell) => cell,
                Err(reason) => {
                    diagnostics.push(ParseDiagnostic::new(&remote.id, field_name, raw, reason));
                    Cell::Null
                }
            },
        };
        cells.push((spec.column, cell));
    }

    let remote_modified_at = match remote.fields.get(LAST_MODIFIED_FIELD) {
        Some(raw) => match parse_timestamp(raw) {
            Ok(ts) => ts,
            Err(reason) => {
                diagnostics.push(ParseDiagnostic::new(
                    &remote.id,
                    LAST_MODIFIED_FIELD,
                    raw,
                    reason,
                ));
                None
            }
        },
        None => None,
    };

    MappedRecord {
        record: FilingRecord {
            record_id: remote.id.clone(),
            remote_modified_at,
            cells,
        },
        diagnostics,
    }
}

/// Map a page of records, splitting rows from diagnostics.
pub fn map_page(page: &[RemoteRecord]) -> (Vec<FilingRecord>, Vec<ParseDiagnostic>) {
    let mut rows = Vec::with_capacity(page.len());
    let mut diagnostics = Vec::new();
    for remote in page {
        let mapped = map_record(remote);
        rows.push(mapped.record);
        diagnostics.extend(mapped.diagnostics);
    }
    (rows, diagnostics)
}

fn first_present<'a>(
    remote: &'a RemoteRecord,
    sources: &'static [&'static str],
) -> Option<(&'static str, &'a Value)> {
    sources.iter().find_map(|name| {
        remote
            .fields
            .get(*name)
            .filter(|v| !is_blank(v))
            .map(|v| (*name, v))
    })
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn coerce(kind: FieldKind, raw: &Value) -> Result<Cell, &'static str> {
    let cell = match kind {
        FieldKind::Text => parse_text(raw)?.map(Cell::Text),
        FieldKind::Decimal => parse_decimal(raw)?.map(Cell::Decimal),
        FieldKind::Integer => parse_integer(raw)?.map(Cell::Integer),
        FieldKind::Date => parse_date(raw)?.map(Cell::Date),
    };
    Ok(cell.unwrap_or(Cell::Null))
}

/// Coerce a value to text.
///
/// Scalars are rendered; arrays of scalars (lookup and multi-select fields)
/// are joined with `", "`.
pub fn parse_text(raw: &Value) -> Result<Option<String>, &'static str> {
    match raw {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => parts.push(s.clone()),
                    Value::Number(n) => parts.push(n.to_string()),
                    Value::Bool(b) => parts.push(b.to_string()),
                    Value::Null => {}
                    _ => return Err("nested values cannot be rendered as text"),
                }
            }
            Ok((!parts.is_empty()).then(|| parts.join(", ")))
        }
        Value::Object(_) => Err("objects cannot be rendered as text"),
    }
}

/// Coerce a value to a finite decimal.
///
/// Native numbers are taken as-is; strings are trimmed and parsed.
/// Percentage-suffixed strings (`"7.00%"`) are rejected rather than scaled.
pub fn parse_decimal(raw: &Value) -> Result<Option<f64>, &'static str> {
    match raw {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or("not a finite number"),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            if trimmed.ends_with('%') {
                return Err("percentage strings are not accepted for decimal fields");
            }
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Some)
                .ok_or("not a finite number")
        }
        _ => Err("unsupported type for a number"),
    }
}

/// Coerce a value to a whole number.
///
/// Values outside the `i64` range are rejected rather than saturated.
pub fn parse_integer(raw: &Value) -> Result<Option<i64>, &'static str> {
    let exact = match raw {
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => raw.as_i64(),
    };
    if let Some(v) = exact {
        return Ok(Some(v));
    }
    // `i64::MAX as f64` rounds up to 2^63, so the upper bound is exclusive.
    match parse_decimal(raw)? {
        None => Ok(None),
        Some(v) if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 => {
            Ok(Some(v as i64))
        }
        Some(v) if v.fract() == 0.0 => Err("whole number out of range"),
        Some(_) => Err("not a whole number"),
    }
}

/// Coerce a value to a calendar date.
///
/// Accepts ISO dates, RFC 3339 timestamps (UTC date is kept) and a few
/// common written layouts.
pub fn parse_date(raw: &Value) -> Result<Option<NaiveDate>, &'static str> {
    let text = match raw {
        Value::Null => return Ok(None),
        Value::String(s) => s.trim(),
        _ => return Err("unsupported type for a date"),
    };
    if text.is_empty() {
        return Ok(None);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(Some(ts.with_timezone(&Utc).date_naive()));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(Some(naive.date()));
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .map(Some)
        .ok_or("unrecognized date")
}

/// Parse the remote modification timestamp.
///
/// RFC 3339 with a zone offset is the primary format; the legacy
/// `M/D/YYYY h:mma` layout is read as UTC.
pub fn parse_timestamp(raw: &Value) -> Result<Option<DateTime<Utc>>, &'static str> {
    let text = match raw {
        Value::Null => return Ok(None),
        Value::String(s) => s.trim(),
        _ => return Err("unsupported type for a timestamp"),
    };
    if text.is_empty() {
        return Ok(None);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    LEGACY_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| Some(naive.and_utc()))
        .ok_or("unrecognized timestamp")
}

/// Validity summary for one numeric column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldStats {
    /// Canonical column.
    pub column: &'static str,
    /// Non-empty values that parsed.
    pub valid: u64,
    /// Non-empty values that were rejected.
    pub invalid: u64,
    /// Up to three rejected values.
    pub invalid_examples: Vec<ParseDiagnostic>,
}

const MAX_INVALID_EXAMPLES: usize = 3;

/// Summarize how well each numeric column parses across `records`.
pub fn numeric_field_stats(records: &[RemoteRecord]) -> Vec<FieldStats> {
    FIELDS
        .iter()
        .filter(|spec| spec.kind.is_numeric())
        .map(|spec| {
            let mut stats = FieldStats {
                column: spec.column,
                valid: 0,
                invalid: 0,
                invalid_examples: Vec::new(),
            };
            for remote in records {
                let Some((field_name, raw)) = first_present(remote, spec.sources) else {
                    continue;
                };
                match coerce(spec.kind, raw) {
                    Ok(_) => stats.valid += 1,
                    Err(reason) => {
                        stats.invalid += 1;
                        if stats.invalid_examples.len() < MAX_INVALID_EXAMPLES {
                            stats.invalid_examples.push(ParseDiagnostic::new(
                                &remote.id, field_name, raw, reason,
                            ));
                        }
                    }
                }
            }
            stats
        })
        .collect()
}
