use crate::pipeline::types::{DuplicateGroup, Record, RecordSet, Value};
use crate::pipeline::utility::mean;
use crate::schema::Schema;

/// Collapses each [`DuplicateGroup`] into a single record.
///
/// Output order matches group order (first encountered), not date order.
pub fn average_groups(groups: Vec<DuplicateGroup>, schema: &Schema) -> RecordSet {
    groups.into_iter().map(|g| average_group(g, schema)).collect()
}

/// Returns the sole member of a single-member group unchanged. Otherwise
/// synthesizes a record where:
///
/// - identity fields are copied from the group key;
/// - each metric field is the mean of the members' numeric values, skipping
///   members where it is missing or null, and is left out entirely when no
///   member contributes a value;
/// - any other field takes the value of the first member carrying it.
///
/// Fields appear in the order they are first seen across members.
pub fn average_group(mut group: DuplicateGroup, schema: &Schema) -> Record {
    if group.members.len() == 1 {
        if let Some(only) = group.members.pop() {
            return only;
        }
    }

    let mut field_order: Vec<&str> = Vec::new();
    for member in &group.members {
        for (name, _) in member.fields() {
            if !field_order.contains(&name) {
                field_order.push(name);
            }
        }
    }

    let mut merged = Record::new();
    for name in field_order {
        if schema.is_metric(name) {
            let series: Vec<f64> = group
                .members
                .iter()
                .filter_map(|m| m.get(name).and_then(Value::as_number))
                .collect();
            if let Some(avg) = mean(&series) {
                merged.insert(name, Value::Number(avg));
            }
        } else if let Some(value) = group.key.get(name) {
            merged.insert(name, value.clone());
        } else if let Some(value) = group.members.iter().find_map(|m| m.get(name)) {
            merged.insert(name, value.clone());
        }
    }

    merged
}
