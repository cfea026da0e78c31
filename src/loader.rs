//! Source directory loading: lists measurement files and merges their rows.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::parser::parse_records;
use crate::pipeline::types::RecordSet;

/// The merged contents of a source directory.
#[derive(Debug, Default)]
pub struct LoadedSources {
    /// File names in the order they were merged.
    pub files: Vec<String>,
    pub records: RecordSet,
}

/// Lists regular files in `dir` whose extension matches `extension`
/// (case-insensitive), sorted by file name.
pub async fn list_source_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| StoreError::io(dir, e))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::io(dir, e))?
    {
        let path = entry.path();

        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if !matches_ext {
            continue;
        }

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        if meta.is_file() {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Reads and parses every matching file in `dir`, concatenating their
/// records in file order with row order preserved.
///
/// Files are read concurrently, at most `concurrency` at a time, but results
/// are reassembled in listing order before merging.
#[tracing::instrument(skip_all, fields(source_dir = %dir.display(), extension = %extension))]
pub async fn load_directory(dir: &Path, extension: &str, concurrency: usize) -> Result<LoadedSources> {
    let paths = list_source_files(dir, extension).await?;
    info!(file_count = paths.len(), "Source files found");

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = Vec::with_capacity(paths.len());

    for path in paths {
        let sem = semaphore.clone();
        let task = tokio::spawn(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|e| StoreError::io(&path, io::Error::other(e)))?;
            read_source_file(&path).await
        });
        tasks.push(task);
    }

    let mut loaded = LoadedSources::default();
    for task in tasks {
        let (name, records) = task
            .await
            .map_err(|e| StoreError::io(dir, io::Error::other(e)))??;
        debug!(file = %name, rows = records.len(), "Source file parsed");
        loaded.files.push(name);
        loaded.records.extend(records);
    }

    info!(
        file_count = loaded.files.len(),
        rows = loaded.records.len(),
        "Source files merged"
    );
    Ok(loaded)
}

async fn read_source_file(path: &Path) -> Result<(String, RecordSet)> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    let records = parse_records(&name, &bytes)?;

    Ok((name, records))
}
