// Tabular loading and relational primitives over schema-less records.
//
// GTFS static tables (routes.txt, trips.txt, stop_times.txt, stops.txt) are
// header-delimited text; every value stays a raw string. Consumers that need
// a number (stop_sequence, epoch timestamps) parse explicitly at the point of
// use, so "1" never silently equals 1.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::{PlannerError, Result};

/// One row of a loaded table: field name -> raw string value.
pub type Record = HashMap<String, String>;

/// Loads a header-delimited text file into one `Record` per data row.
///
/// A row whose column count does not match the header aborts the whole load
/// with `MalformedRow` rather than being skipped: a truncated or corrupted
/// table is fatal for the invocation.
pub fn load_table(path: &Path) -> Result<Vec<Record>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| PlannerError::SourceUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let headers = reader
        .headers()
        .map_err(|e| PlannerError::SourceUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| match e.kind() {
            csv::ErrorKind::UnequalLengths { pos, expected_len, len } => PlannerError::MalformedRow {
                path: path.to_path_buf(),
                line: pos.as_ref().map(|p| p.line()).unwrap_or(0),
                expected: *expected_len as usize,
                found: *len as usize,
            },
            _ => PlannerError::SourceUnreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        })?;

        records.push(
            headers
                .iter()
                .zip(row.iter())
                .map(|(field, value)| (field.to_string(), value.to_string()))
                .collect(),
        );
    }

    Ok(records)
}

/// Keeps records where every criterion field equals the given value.
///
/// AND semantics, strict string equality. A record missing a criterion field
/// never matches.
pub fn filter(records: &[Record], criteria: &[(&str, &str)]) -> Vec<Record> {
    records
        .iter()
        .filter(|record| {
            criteria
                .iter()
                .all(|(field, value)| record.get(*field).map(String::as_str) == Some(*value))
        })
        .cloned()
        .collect()
}

/// Nested-loop join on `key`; right's fields overwrite left's on collision.
///
/// O(|left| * |right|) — fine at GTFS static-table sizes. Pre-filter before
/// joining anything larger.
pub fn join(left: &[Record], right: &[Record], key: &str) -> Vec<Record> {
    let mut joined = Vec::new();
    for left_record in left {
        let Some(left_value) = left_record.get(key) else {
            continue;
        };
        for right_record in right {
            if right_record.get(key) == Some(left_value) {
                let mut merged = left_record.clone();
                merged.extend(right_record.clone());
                joined.push(merged);
            }
        }
    }
    joined
}

/// Projects each record down to the named fields, silently omitting fields a
/// record does not carry.
pub fn select(records: &[Record], fields: &[&str]) -> Vec<Record> {
    records
        .iter()
        .map(|record| {
            fields
                .iter()
                .filter_map(|field| record.get(*field).map(|value| (field.to_string(), value.clone())))
                .collect()
        })
        .collect()
}

/// Unique values of one field, first-occurrence order preserved.
pub fn distinct(records: &[Record], field: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|record| record.get(field))
        .filter(|value| seen.insert((*value).clone()))
        .cloned()
        .collect()
}
