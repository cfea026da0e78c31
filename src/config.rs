use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use crate::schema::Schema;

/// Where a pipeline run reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub source_dir: PathBuf,
    pub database_file: PathBuf,
    /// Extension of source files, without the dot. Matched case-insensitively.
    pub extension: String,
    pub read_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("csl-database"),
            database_file: PathBuf::from("database/processed_data.json"),
            extension: "csv".to_string(),
            read_concurrency: 4,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.extension.is_empty() || self.extension.starts_with('.') {
            bail!("source extension must be non-empty and given without a leading dot");
        }
        if self.read_concurrency == 0 {
            bail!("read concurrency must be at least 1");
        }
        if self.database_file.file_name().is_none() {
            bail!("database file path must name a file");
        }
        Ok(())
    }
}

/// Loads a [`Schema`] from a JSON file at `path`.
///
/// Stored as a plain JSON object; every key is optional:
/// ```json
/// {
///   "date_field": "date",
///   "metric_fields": ["pm10", "pm25"],
///   "identity": { "fields": ["station"] },
///   "date_formats": ["%Y-%m-%d"]
/// }
/// ```
pub fn load_schema(path: &Path) -> Result<Schema> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read schema file {}", path.display()))?;
    let schema: Schema = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse schema file {}", path.display()))?;
    validate_schema(&schema)?;
    Ok(schema)
}

/// Builds a [`Schema`] from individual settings (CLI flags or env vars).
/// An empty `identity_fields` selects the all-non-metric identity policy.
pub fn schema_from_parts(
    date_field: &str,
    metric_fields: &[String],
    identity_fields: &[String],
) -> Result<Schema> {
    let mut schema = Schema::new(date_field).with_metrics(metric_fields.iter().cloned());
    if !identity_fields.is_empty() {
        schema = schema.with_identity_fields(identity_fields.iter().cloned());
    }
    validate_schema(&schema)?;
    Ok(schema)
}

fn validate_schema(schema: &Schema) -> Result<()> {
    if schema.date_field.trim().is_empty() {
        bail!("schema date field must not be empty");
    }
    if schema.metric_fields.iter().all(|m| m.trim().is_empty()) {
        bail!("schema must declare at least one metric field");
    }
    if schema.is_metric(&schema.date_field) {
        bail!("date field '{}' cannot also be a metric", schema.date_field);
    }
    if let crate::schema::IdentityPolicy::Fields(fields) = &schema.identity {
        if let Some(f) = fields.iter().find(|f| schema.is_metric(f)) {
            bail!("field '{f}' cannot be both an identity field and a metric");
        }
    }
    if schema.date_formats.is_empty() {
        bail!("schema must list at least one date format");
    }
    Ok(())
}
