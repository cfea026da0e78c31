//! Explicit record schema: which field is the date, which fields are numeric
//! metrics, and which fields make up an observation's identity.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::pipeline::types::{IdentityKey, Record, Value};

/// Date layouts tried in order after RFC 3339.
pub const DEFAULT_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d",
    "%d.%m.%Y",
];

/// Which fields define "the same observation".
///
/// The date field is always part of the key regardless of policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    /// Every field that is not a declared metric. Null cells are left out so
    /// that a missing column and an empty cell compare equal.
    #[default]
    AllNonMetric,
    /// The date field plus exactly these fields, in this order.
    Fields(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schema {
    pub date_field: String,
    pub metric_fields: Vec<String>,
    pub identity: IdentityPolicy,
    pub date_formats: Vec<String>,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            date_field: "date".to_string(),
            metric_fields: Vec::new(),
            identity: IdentityPolicy::AllNonMetric,
            date_formats: DEFAULT_DATE_FORMATS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl Schema {
    pub fn new(date_field: impl Into<String>) -> Self {
        Self {
            date_field: date_field.into(),
            ..Self::default()
        }
    }

    pub fn with_metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metric_fields = metrics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_identity_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identity = IdentityPolicy::Fields(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_metric(&self, field: &str) -> bool {
        self.metric_fields.iter().any(|m| m == field)
    }

    /// Derives the identity key of `record` under this schema's policy.
    pub fn identity_key(&self, record: &Record) -> IdentityKey {
        let date = record.get(&self.date_field).cloned().unwrap_or(Value::Null);
        let mut parts = vec![(self.date_field.clone(), date)];

        match &self.identity {
            IdentityPolicy::AllNonMetric => {
                let mut rest: Vec<(String, Value)> = record
                    .fields()
                    .filter(|(name, value)| {
                        *name != self.date_field && !self.is_metric(name) && !value.is_null()
                    })
                    .map(|(name, value)| (name.to_string(), value.clone()))
                    .collect();
                // Column order differs between files; the key must not.
                rest.sort_by(|a, b| a.0.cmp(&b.0));
                parts.extend(rest);
            }
            IdentityPolicy::Fields(fields) => {
                for field in fields.iter().filter(|f| **f != self.date_field) {
                    let value = record.get(field).cloned().unwrap_or(Value::Null);
                    parts.push((field.clone(), value));
                }
            }
        }

        IdentityKey::new(parts)
    }

    /// Parses a date cell into a comparable calendar value.
    ///
    /// Accepts RFC 3339 timestamps, the configured layouts, and compact
    /// `YYYYMMDD` dates (which type inference turns into numbers).
    pub fn parse_date(&self, value: &Value) -> Option<NaiveDateTime> {
        let text = match value {
            Value::Text(s) => s.trim().to_string(),
            Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 => format!("{}", *n as u64),
            _ => return None,
        };

        if text.len() == 8 && text.bytes().all(|b| b.is_ascii_digit()) {
            return NaiveDate::parse_from_str(
                &format!("{}-{}-{}", &text[..4], &text[4..6], &text[6..]),
                "%Y-%m-%d",
            )
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0));
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
            return Some(dt.naive_utc());
        }

        for format in &self.date_formats {
            if let Ok(dt) = NaiveDateTime::parse_from_str(&text, format) {
                return Some(dt);
            }
            if let Ok(d) = NaiveDate::parse_from_str(&text, format) {
                return d.and_hms_opt(0, 0, 0);
            }
        }

        None
    }

    /// Resolves `record`'s date, failing with a validation error naming the
    /// record's source if it is missing or unparsable.
    pub fn record_date(&self, record: &Record) -> Result<NaiveDateTime> {
        let value = record
            .get(&self.date_field)
            .ok_or_else(|| self.invalid(record, &self.date_field, "is missing".to_string()))?;

        self.parse_date(value).ok_or_else(|| {
            self.invalid(
                record,
                &self.date_field,
                format!("has unrecognised date {}", describe(value)),
            )
        })
    }

    /// Checks `record` against the schema: a resolvable date, and numeric (or
    /// null) values in every declared metric field it carries.
    pub fn validate(&self, record: &Record) -> Result<()> {
        self.record_date(record)?;

        for metric in &self.metric_fields {
            if let Some(value) = record.get(metric) {
                if matches!(value, Value::Text(_)) {
                    return Err(self.invalid(
                        record,
                        metric,
                        format!("expected a number, found {}", describe(value)),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn validate_all(&self, records: &[Record]) -> Result<()> {
        records.iter().try_for_each(|r| self.validate(r))
    }

    fn invalid(&self, record: &Record, field: &str, reason: String) -> StoreError {
        let (file, line) = record.location();
        StoreError::Validation {
            file,
            line,
            field: field.to_string(),
            reason,
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Number(n) => n.to_string(),
        Value::Text(s) => format!("'{s}'"),
    }
}
