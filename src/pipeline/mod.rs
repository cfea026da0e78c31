//! The merge pipeline: deduplicate, average, sort.
//!
//! Loading lives in [`crate::loader`] and persistence in [`crate::store`];
//! everything here is a pure transformation of an in-memory [`RecordSet`].

pub mod aggregate;
pub mod dedupe;
pub mod sort;
pub mod types;
pub mod utility;

use tracing::debug;

use crate::error::Result;
use crate::schema::Schema;
use types::RecordSet;

/// Counts describing one pass through [`process`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub rows_in: usize,
    pub groups: usize,
    pub duplicate_groups: usize,
    pub rows_out: usize,
}

/// Validates `records` against `schema`, then deduplicates, averages and
/// sorts them by date.
///
/// # Errors
///
/// Fails with a validation error if any record violates the schema. No
/// partial result is returned.
#[tracing::instrument(skip_all, fields(rows = records.len()))]
pub fn process(records: RecordSet, schema: &Schema) -> Result<(RecordSet, MergeStats)> {
    schema.validate_all(&records)?;

    let rows_in = records.len();
    let groups = dedupe::group_duplicates(records, schema);
    let duplicate_groups = groups.iter().filter(|g| g.len() > 1).count();
    let group_count = groups.len();
    debug!(groups = group_count, duplicate_groups, "Records grouped");

    let averaged = aggregate::average_groups(groups, schema);
    let sorted = sort::sort_by_date(averaged, schema)?;

    let stats = MergeStats {
        rows_in,
        groups: group_count,
        duplicate_groups,
        rows_out: sorted.len(),
    };
    Ok((sorted, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use super::types::{Record, Value};

    fn obs(date: &str, station: &str, value: f64) -> Record {
        [
            ("date", Value::Text(date.into())),
            ("station", Value::Text(station.into())),
            ("value", Value::Number(value)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_process_dedupes_averages_then_sorts() {
        let schema = Schema::default().with_metrics(["value"]);
        let records = vec![
            obs("2020-01-02", "A", 1.0),
            obs("2020-01-01", "A", 10.0),
            obs("2020-01-01", "B", 5.0),
            obs("2020-01-01", "A", 20.0),
        ];

        let (out, stats) = process(records, &schema).unwrap();

        assert_eq!(
            out,
            vec![
                obs("2020-01-01", "A", 15.0),
                obs("2020-01-01", "B", 5.0),
                obs("2020-01-02", "A", 1.0),
            ]
        );
        assert_eq!(
            stats,
            MergeStats {
                rows_in: 4,
                groups: 3,
                duplicate_groups: 1,
                rows_out: 3,
            }
        );
    }

    #[test]
    fn test_process_rejects_invalid_record() {
        let schema = Schema::default().with_metrics(["value"]);
        let bad: Record = [("date", Value::Text("soon".into()))].into_iter().collect();

        let err = process(vec![obs("2020-01-01", "A", 1.0), bad], &schema).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_process_empty() {
        let (out, stats) = process(Vec::new(), &Schema::default()).unwrap();
        assert!(out.is_empty());
        assert_eq!(stats, MergeStats::default());
    }
}
