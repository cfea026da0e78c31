//! The query surface: fetch the last result, or run the full pipeline.
//!
//! Pipeline runs are serialized by a run gate owned by the service. A request
//! that arrives while a run is in flight waits its turn; it is never rejected.

use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::loader::load_directory;
use crate::pipeline::process;
use crate::pipeline::types::RecordSet;
use crate::schema::Schema;
use crate::store::{JsonFileStore, RecordStore};

/// What one successful run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub files: usize,
    pub rows_loaded: usize,
    pub groups: usize,
    pub duplicates_collapsed: usize,
    pub records_written: usize,
}

pub struct RecordService {
    config: PipelineConfig,
    schema: Schema,
    store: Box<dyn RecordStore>,
    run_gate: Mutex<()>,
}

impl RecordService {
    pub fn new(config: PipelineConfig, schema: Schema, store: Box<dyn RecordStore>) -> Self {
        if schema.metric_fields.is_empty() {
            warn!("No metric fields declared; duplicates will never be averaged");
        }
        Self {
            config,
            schema,
            store,
            run_gate: Mutex::new(()),
        }
    }

    /// A service persisting to a [`JsonFileStore`] at `config.database_file`.
    pub fn with_json_store(config: PipelineConfig, schema: Schema) -> Self {
        let store = JsonFileStore::new(config.database_file.clone());
        Self::new(config, schema, Box::new(store))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    /// Returns the last persisted result, or a not-found error if no run has
    /// succeeded yet.
    pub async fn fetch_result(&self) -> Result<RecordSet> {
        self.store.load().await
    }

    /// Runs load → dedupe → average → sort → persist and returns the result.
    pub async fn run_pipeline(&self) -> Result<RecordSet> {
        self.run_pipeline_with_summary().await.map(|(records, _)| records)
    }

    /// Like [`run_pipeline`](Self::run_pipeline), also returning run counts.
    ///
    /// On any failure nothing is persisted and the previous result stays in
    /// place.
    #[tracing::instrument(skip_all, fields(source_dir = %self.config.source_dir.display()))]
    pub async fn run_pipeline_with_summary(&self) -> Result<(RecordSet, RunSummary)> {
        let _gate = self.run_gate.lock().await;
        let started = Instant::now();

        let result = self.run_locked().await;
        match &result {
            Ok((_, summary)) => info!(
                files = summary.files,
                rows_loaded = summary.rows_loaded,
                groups = summary.groups,
                duplicates_collapsed = summary.duplicates_collapsed,
                records_written = summary.records_written,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Pipeline run complete"
            ),
            Err(e) => error!(error = %e, kind = ?e.kind(), "Pipeline run failed"),
        }
        result
    }

    async fn run_locked(&self) -> Result<(RecordSet, RunSummary)> {
        let loaded = load_directory(
            &self.config.source_dir,
            &self.config.extension,
            self.config.read_concurrency,
        )
        .await?;
        let files = loaded.files.len();

        let (records, stats) = process(loaded.records, &self.schema)?;
        self.store.persist(&records).await?;

        let summary = RunSummary {
            files,
            rows_loaded: stats.rows_in,
            groups: stats.groups,
            duplicates_collapsed: stats.rows_in - stats.groups,
            records_written: records.len(),
        };
        Ok((records, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pipeline::types::{Record, Value};
    use std::fs;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn service(dir: &std::path::Path) -> RecordService {
        let config = PipelineConfig {
            source_dir: dir.join("sources"),
            database_file: dir.join("database/processed_data.json"),
            ..PipelineConfig::default()
        };
        let schema = Schema::default().with_metrics(["value"]);
        RecordService::with_json_store(config, schema)
    }

    #[tokio::test]
    async fn test_fetch_before_run_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());

        let err = svc.fetch_result().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_run_then_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let sources = dir.path().join("sources");
        fs::create_dir(&sources).unwrap();
        fs::write(sources.join("a.csv"), "date,station,value\n2020-01-02,A,1\n2020-01-01,A,10\n").unwrap();
        fs::write(sources.join("b.csv"), "date,station,value\n2020-01-01,A,20\n").unwrap();

        let svc = service(dir.path());
        let (records, summary) = svc.run_pipeline_with_summary().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("value"), Some(&Value::Number(15.0)));
        assert_eq!(
            summary,
            RunSummary {
                files: 2,
                rows_loaded: 3,
                groups: 2,
                duplicates_collapsed: 1,
                records_written: 2,
            }
        );
        assert_eq!(svc.fetch_result().await.unwrap(), records);
    }

    #[tokio::test]
    async fn test_failed_run_keeps_previous_result() {
        let dir = tempfile::tempdir().unwrap();
        let sources = dir.path().join("sources");
        fs::create_dir(&sources).unwrap();
        fs::write(sources.join("a.csv"), "date,value\n2020-01-01,1\n").unwrap();

        let svc = service(dir.path());
        let first = svc.run_pipeline().await.unwrap();

        fs::write(sources.join("b.csv"), "date,value\nlater,2\n").unwrap();
        let err = svc.run_pipeline().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert_eq!(svc.fetch_result().await.unwrap(), first);
    }

    /// Wraps a [`JsonFileStore`] and records the most `persist` calls ever in
    /// flight at once.
    struct CountingStore {
        inner: JsonFileStore,
        in_flight: AtomicUsize,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl RecordStore for CountingStore {
        async fn persist(&self, records: &[Record]) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let result = self.inner.persist(records).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn load(&self) -> Result<RecordSet> {
            self.inner.load().await
        }

        fn location(&self) -> &std::path::Path {
            self.inner.location()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_runs_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let sources = dir.path().join("sources");
        fs::create_dir(&sources).unwrap();
        for i in 0..5 {
            fs::write(
                sources.join(format!("f{i}.csv")),
                format!("date,value\n2020-01-0{},{}\n", i + 1, i),
            )
            .unwrap();
        }

        let config = PipelineConfig {
            source_dir: sources,
            database_file: dir.path().join("database/processed_data.json"),
            ..PipelineConfig::default()
        };
        let peak = Arc::new(AtomicUsize::new(0));
        let store = CountingStore {
            inner: JsonFileStore::new(config.database_file.clone()),
            in_flight: AtomicUsize::new(0),
            peak: peak.clone(),
        };
        let svc = Arc::new(RecordService::new(
            config,
            Schema::default().with_metrics(["value"]),
            Box::new(store),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let svc = svc.clone();
                tokio::spawn(async move { svc.run_pipeline().await })
            })
            .collect();

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap().len(), 5);
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(svc.fetch_result().await.unwrap().len(), 5);
    }
}
