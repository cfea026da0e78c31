use crate::error::Result;
use crate::pipeline::types::RecordSet;
use crate::schema::Schema;

/// Orders `records` ascending by their parsed date. The sort is stable, so
/// records with equal dates keep their relative input order.
///
/// # Errors
///
/// Any record whose date is missing or unparsable rejects the whole set with
/// a validation error; nothing is reordered.
pub fn sort_by_date(records: RecordSet, schema: &Schema) -> Result<RecordSet> {
    let mut keyed = records
        .into_iter()
        .map(|r| -> Result<_> { Ok((schema.record_date(&r)?, r)) })
        .collect::<Result<Vec<_>>>()?;

    keyed.sort_by_key(|(date, _)| *date);

    Ok(keyed.into_iter().map(|(_, r)| r).collect())
}
