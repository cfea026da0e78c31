//! CSV parser for measurement files.

use csv::{ReaderBuilder, Trim};
use std::collections::HashSet;

use crate::error::{Result, StoreError};
use crate::pipeline::types::{Record, RecordSet, Value};

/// Tokenizes one CSV file into records keyed by its header row.
///
/// Cells are type-inferred with [`Value::infer`]. Rows shorter than the
/// header leave the missing fields absent. Trailing rows whose every cell is
/// empty are tokenizer artifacts of trailing whitespace and are stripped;
/// a legitimate final row is always kept.
///
/// # Errors
///
/// Returns a parse error naming `file_name` if there is no header, the header
/// repeats a column, a row has more cells than the header, or the bytes are
/// not valid UTF-8.
pub fn parse_records(file_name: &str, bytes: &[u8]) -> Result<RecordSet> {
    let parse_err = |reason: String| StoreError::Parse {
        file: file_name.to_string(),
        reason,
    };

    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::Headers)
        .from_reader(bytes);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| parse_err(e.to_string()))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(parse_err("missing header row".to_string()));
    }

    let mut seen = HashSet::new();
    for h in &headers {
        if !seen.insert(h.as_str()) {
            return Err(parse_err(format!("duplicate column '{h}' in header")));
        }
    }

    let mut records = Vec::new();
    for result in rdr.records() {
        let row = result.map_err(|e| parse_err(e.to_string()))?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);

        if row.len() > headers.len() {
            return Err(parse_err(format!(
                "line {line} has {} cells but the header has {}",
                row.len(),
                headers.len()
            )));
        }

        let record: Record = headers
            .iter()
            .zip(row.iter())
            .map(|(h, cell)| (h.as_str(), Value::infer(cell)))
            .collect();

        records.push(record.with_origin(file_name, line));
    }

    strip_trailing_artifacts(&mut records);
    Ok(records)
}

/// Removes trailing blank rows, if present.
pub fn strip_trailing_artifacts(records: &mut RecordSet) {
    while records.last().is_some_and(Record::is_blank) {
        records.pop();
    }
}
