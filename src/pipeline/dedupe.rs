use std::collections::HashMap;

use crate::pipeline::types::{DuplicateGroup, IdentityKey, RecordSet};
use crate::schema::Schema;

/// Partitions `records` into groups sharing an identity key.
///
/// Groups appear in the order their key was first seen, and members keep
/// their input order. An empty input yields no groups.
pub fn group_duplicates(records: RecordSet, schema: &Schema) -> Vec<DuplicateGroup> {
    let mut index: HashMap<IdentityKey, usize> = HashMap::new();
    let mut groups: Vec<DuplicateGroup> = Vec::new();

    for record in records {
        let key = schema.identity_key(&record);
        match index.get(&key).copied() {
            Some(slot) => groups[slot].members.push(record),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(DuplicateGroup {
                    key,
                    members: vec![record],
                });
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Record, Value};

    fn obs(date: &str, station: &str, value: f64) -> Record {
        [
            ("date", Value::Text(date.into())),
            ("station", Value::Text(station.into())),
            ("value", Value::Number(value)),
        ]
        .into_iter()
        .collect()
    }

    fn schema() -> Schema {
        Schema::default().with_metrics(["value"])
    }

    #[test]
    fn test_groups_in_first_encountered_order() {
        let records = vec![
            obs("2020-01-02", "A", 1.0),
            obs("2020-01-01", "A", 2.0),
            obs("2020-01-02", "A", 3.0),
            obs("2020-01-01", "B", 4.0),
        ];

        let groups = group_duplicates(records, &schema());

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0].key.get("date"), Some(&Value::Text("2020-01-02".into())));
        let member_values: Vec<_> = groups[0]
            .members
            .iter()
            .map(|r| r.get("value").cloned())
            .collect();
        assert_eq!(
            member_values,
            vec![Some(Value::Number(1.0)), Some(Value::Number(3.0))]
        );
        assert_eq!(groups[1].len(), 1);
        assert_eq!(groups[2].key.get("station"), Some(&Value::Text("B".into())));
    }

    #[test]
    fn test_grouping_is_independent_of_interleaving() {
        let a = vec![
            obs("2020-01-01", "A", 1.0),
            obs("2020-01-02", "A", 2.0),
            obs("2020-01-01", "A", 3.0),
        ];
        let b = vec![
            obs("2020-01-01", "A", 1.0),
            obs("2020-01-01", "A", 3.0),
            obs("2020-01-02", "A", 2.0),
        ];

        let ga = group_duplicates(a, &schema());
        let gb = group_duplicates(b, &schema());

        assert_eq!(ga.len(), gb.len());
        for (x, y) in ga.iter().zip(&gb) {
            assert_eq!(x.key, y.key);
            assert_eq!(x.members, y.members);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(group_duplicates(Vec::new(), &schema()).is_empty());
    }
}
