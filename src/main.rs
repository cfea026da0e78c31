//! CLI entry point for the measurement store.
//!
//! Provides subcommands for running the merge pipeline once, printing the
//! persisted result, and serving both over HTTP.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use measurement_store::config::{PipelineConfig, load_schema, schema_from_parts};
use measurement_store::server;
use measurement_store::store::encode_document;
use measurement_store::{ErrorKind, RecordService, Schema};
use std::ffi::OsStr;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "measurement_store")]
#[command(about = "Merge, deduplicate and average CSV measurement files", long_about = None)]
struct Cli {
    #[command(flatten)]
    pipeline: PipelineArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PipelineArgs {
    /// Directory containing the source CSV files
    #[arg(long, global = true, env = "SOURCE_DIR", default_value = "csl-database")]
    source_dir: PathBuf,

    /// JSON document the merged result is persisted to
    #[arg(long, global = true, env = "DATABASE_FILE", default_value = "database/processed_data.json")]
    database_file: PathBuf,

    /// Extension of source files (matched case-insensitively)
    #[arg(long, global = true, env = "SOURCE_EXTENSION", default_value = "csv")]
    extension: String,

    /// Maximum number of source files read concurrently
    #[arg(long, global = true, env = "READ_CONCURRENCY", default_value_t = 4)]
    read_concurrency: usize,

    /// JSON schema file; overrides the field flags below when given
    #[arg(long, global = true, env = "SCHEMA_PATH")]
    schema: Option<PathBuf>,

    /// Name of the date column
    #[arg(long, global = true, env = "DATE_FIELD", default_value = "date")]
    date_field: String,

    /// Numeric columns averaged across duplicates
    #[arg(
        long = "metric",
        global = true,
        env = "METRIC_FIELDS",
        value_delimiter = ',',
        default_value = "value"
    )]
    metrics: Vec<String>,

    /// Columns that, with the date, identify an observation (default: all non-metric columns)
    #[arg(long = "identity", global = true, env = "IDENTITY_FIELDS", value_delimiter = ',')]
    identity: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline once and persist the result
    Process {
        /// Also print the merged result to stdout
        #[arg(long, default_value_t = false)]
        print: bool,
    },
    /// Print the last persisted result
    Show,
    /// Serve `GET /database` and `GET /process` over HTTP
    Serve {
        /// Address to bind
        #[arg(long, env = "HOST", default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on
        #[arg(short, long, env = "PORT", default_value_t = 3000)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/measurement_store.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("measurement_store.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let (config, schema) = resolve(&cli.pipeline)?;
    info!(
        source_dir = %config.source_dir.display(),
        database_file = %config.database_file.display(),
        date_field = %schema.date_field,
        metrics = ?schema.metric_fields,
        identity = ?schema.identity,
        "Configuration loaded"
    );

    let service = RecordService::with_json_store(config, schema);

    match cli.command {
        Commands::Process { print } => {
            let (records, summary) = service.run_pipeline_with_summary().await?;
            info!(
                records = summary.records_written,
                file = %service.config().database_file.display(),
                "Processed data saved"
            );
            if print {
                print_document(&records)?;
            }
        }
        Commands::Show => match service.fetch_result().await {
            Ok(records) => print_document(&records)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                anyhow::bail!("no processed data yet; run `process` first ({e})");
            }
            Err(e) => return Err(e.into()),
        },
        Commands::Serve { host, port } => {
            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            server::serve(Arc::new(service), addr).await?;
        }
    }

    Ok(())
}

/// Builds the pipeline config and schema from CLI flags, env vars and an
/// optional schema file.
fn resolve(args: &PipelineArgs) -> Result<(PipelineConfig, Schema)> {
    let config = PipelineConfig {
        source_dir: args.source_dir.clone(),
        database_file: args.database_file.clone(),
        extension: args.extension.clone(),
        read_concurrency: args.read_concurrency,
    };
    config.validate()?;

    let schema = match &args.schema {
        Some(path) => load_schema(path)?,
        None => schema_from_parts(&args.date_field, &args.metrics, &args.identity)?,
    };

    Ok((config, schema))
}

fn print_document(records: &[measurement_store::Record]) -> Result<()> {
    let body = encode_document(records)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&body)?;
    stdout.flush()?;
    Ok(())
}
