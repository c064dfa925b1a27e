//! QuoteVault CLI: ingest, status, and format conversion commands.
//!
//! Commands:
//! - `ingest`: run provider payload files through the ingestion pipeline
//! - `status`: report stored row counts, coverage and checksums
//! - `convert`: rewrite a stored series in another on-disk format

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use quotevault_core::data::{
    read_metadata, run_batch, series_path, AtomicStorageWriter, Deduplicator, GuardedSource,
    IngestPipeline, SeriesFormat, SeriesReader, StaticSource, Validator,
};
use quotevault_core::domain::{check_symbol, DateRange, FetchRequest, Period, Provider};
use quotevault_core::PipelineConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "quotevault",
    about = "QuoteVault CLI: validated, deduplicated OHLCV storage"
)]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize, validate, merge and store provider payloads.
    Ingest {
        /// Payloads as PROVIDER:SYMBOL:FILE (e.g., yahoo:AAPL:aapl.json).
        #[arg(long = "payload", required = true)]
        payloads: Vec<String>,

        /// Bar period (1m, 5m, 15m, 30m, 1h, 1d, 1wk, 1mo).
        #[arg(long, default_value = "1d")]
        period: Period,

        /// Start date (YYYY-MM-DD). Defaults to 1970-01-01.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<String>,

        /// On-disk format for new series files.
        #[arg(long, default_value = "csv")]
        format: SeriesFormat,

        /// Data directory. Defaults to ./data.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Path to a TOML pipeline config.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Longest a job may wait on the rate limiter, in seconds.
        #[arg(long, default_value_t = 60)]
        max_wait_secs: u64,
    },
    /// Report what is stored for the given symbols.
    Status {
        /// Symbols to report on.
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Bar period.
        #[arg(long, default_value = "1d")]
        period: Period,

        /// Data directory. Defaults to ./data.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Print metadata records as JSON lines instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Rewrite a series file in the format implied by the target extension.
    Convert {
        /// Existing series file (.csv or .parquet).
        from: PathBuf,

        /// Target series file (.csv or .parquet).
        to: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Ingest {
            payloads,
            period,
            start,
            end,
            format,
            data_dir,
            config,
            max_wait_secs,
        } => run_ingest(
            &payloads,
            period,
            start.as_deref(),
            end.as_deref(),
            format,
            data_dir,
            config.as_deref(),
            Duration::from_secs(max_wait_secs),
        ),
        Commands::Status {
            symbols,
            period,
            data_dir,
            json,
        } => run_status(&symbols, period, &data_dir, json),
        Commands::Convert { from, to } => run_convert(&from, &to),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

struct PayloadArg {
    provider: Provider,
    symbol: String,
    path: PathBuf,
}

fn parse_payload_arg(arg: &str) -> Result<PayloadArg> {
    let mut parts = arg.splitn(3, ':');
    let (Some(provider), Some(symbol), Some(path)) = (parts.next(), parts.next(), parts.next())
    else {
        bail!("payload '{arg}' is not PROVIDER:SYMBOL:FILE");
    };
    check_symbol(symbol).with_context(|| format!("payload '{arg}'"))?;
    Ok(PayloadArg {
        provider: provider.parse()?,
        symbol: symbol.to_uppercase(),
        path: PathBuf::from(path),
    })
}

fn parse_date(value: Option<&str>, fallback: NaiveDate) -> Result<NaiveDate> {
    match value {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD")),
        None => Ok(fallback),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_ingest(
    payloads: &[String],
    period: Period,
    start: Option<&str>,
    end: Option<&str>,
    format: SeriesFormat,
    data_dir: PathBuf,
    config_path: Option<&Path>,
    max_wait: Duration,
) -> Result<()> {
    let config = match config_path {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };

    let start_date = parse_date(start, NaiveDate::default())?;
    let end_date = parse_date(end, chrono::Utc::now().date_naive())?;
    if start_date > end_date {
        bail!("--start {start_date} is after --end {end_date}");
    }
    let range = DateRange::new(start_date, end_date);

    let mut source = StaticSource::new();
    let mut requests = Vec::with_capacity(payloads.len());
    for arg in payloads {
        let payload = parse_payload_arg(arg)?;
        source.load_file(payload.provider, payload.symbol.clone(), &payload.path)?;
        requests.push(FetchRequest::new(payload.symbol, period, range, payload.provider));
    }
    let source = GuardedSource::new(source, &config.breaker);
    let pipeline = IngestPipeline::new(&config, &data_dir, format);
    info!(
        instruments = requests.len(),
        %period,
        data_dir = %data_dir.display(),
        %format,
        "starting ingest batch"
    );

    let results = run_batch(&pipeline, &source, requests, max_wait);

    let mut failures = 0usize;
    for (request, result) in &results {
        match result {
            Ok(r) => println!(
                "{:<8} {:<9} {:>6} rows  quality {:.3}  dups {:>4}  {}",
                request.symbol,
                request.provider.as_str(),
                r.storage.rows,
                r.quality.value,
                r.dedup.duplicate_count,
                r.storage.path.display(),
            ),
            Err(e) => {
                failures += 1;
                eprintln!("{:<8} {:<9} FAILED: {e}", request.symbol, request.provider.as_str());
            }
        }
    }

    if failures > 0 {
        eprintln!("{failures} of {} instruments failed", results.len());
        std::process::exit(1);
    }
    Ok(())
}

fn run_status(symbols: &[String], period: Period, data_dir: &Path, json: bool) -> Result<()> {
    if json {
        for symbol in symbols {
            let symbol = symbol.to_uppercase();
            check_symbol(&symbol)?;
            for format in [SeriesFormat::Csv, SeriesFormat::Parquet] {
                let path = series_path(data_dir, &symbol, period, format);
                if let Some(meta) = read_metadata(&path)? {
                    println!("{}", serde_json::to_string(&meta)?);
                }
            }
        }
        return Ok(());
    }

    println!(
        "{:<8} {:<8} {:>8}  {:<10}  {:<10}  {:<16}  Last write",
        "Symbol", "Format", "Rows", "First", "Last", "Checksum"
    );
    println!("{}", "-".repeat(84));

    for symbol in symbols {
        let symbol = symbol.to_uppercase();
        check_symbol(&symbol)?;
        let found = [SeriesFormat::Csv, SeriesFormat::Parquet]
            .into_iter()
            .map(|format| series_path(data_dir, &symbol, period, format))
            .find(|path| path.exists());

        let Some(path) = found else {
            println!("{symbol:<8} (not stored)");
            continue;
        };
        match read_metadata(&path)? {
            Some(meta) => println!(
                "{:<8} {:<8} {:>8}  {:<10}  {:<10}  {:<16}  {}",
                meta.symbol,
                meta.format.extension(),
                meta.row_count,
                meta.first_timestamp.date_naive(),
                meta.last_timestamp.date_naive(),
                &meta.checksum[..16.min(meta.checksum.len())],
                meta.last_write.format("%Y-%m-%d %H:%M:%S"),
            ),
            None => println!("{symbol:<8} {} (no metadata)", path.display()),
        }
    }
    Ok(())
}

fn run_convert(from: &Path, to: &Path) -> Result<()> {
    if SeriesFormat::from_path(to).is_none() {
        bail!("cannot infer format from '{}'", to.display());
    }
    let series = SeriesReader::load(from)
        .with_context(|| format!("failed to read {}", from.display()))?;

    let config = PipelineConfig::default();
    let writer = AtomicStorageWriter::new(
        Validator::new(config.validation),
        Deduplicator::new(config.dedup),
    );
    let report = writer
        .save(to, &series)
        .with_context(|| format!("failed to write {}", to.display()))?;

    println!(
        "Wrote {} rows to {} ({} bytes, blake3 {})",
        report.rows,
        report.path.display(),
        report.bytes,
        report.checksum
    );
    Ok(())
}
