//! CLI entry point for the scopus-resolve tool.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use scopus_resolver_core::input::{InputReport, SearchMode, prepare_items};
use scopus_resolver_core::pipeline::{
    DEFAULT_WORKERS, Pipeline, PipelineConfig, PipelineError, RetryPolicy, RunReport,
};
use scopus_resolver_core::source::{
    HttpTimeouts, OpenAlexClient, ScopusClient, SourceClient, SourceError,
};
use scopus_resolver_core::ResultCache;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod output;

use app_config::{FileConfig, load_file_config_from};
use cli::{Args, DEFAULT_CACHE_FILE, DEFAULT_CHECKPOINT_FILE};

/// DOI used by `--test-key`; known to be indexed in Scopus.
const TEST_KEY_DOI: &str = "10.1016/j.softx.2019.100263";

/// Default pacing between API calls in milliseconds.
const DEFAULT_RATE_LIMIT_MS: u64 = 1000;

/// Effective settings after merging CLI flags over the config file.
#[derive(Debug)]
struct Settings {
    workers: usize,
    max_retries: u32,
    rate_limit_ms: u64,
    cache_file: PathBuf,
    checkpoint_file: PathBuf,
    timeouts: HttpTimeouts,
    scopus_base_url: Option<String>,
    openalex_base_url: Option<String>,
    openalex_mailto: Option<String>,
}

impl Settings {
    fn merge(args: &Args, file: &FileConfig) -> Self {
        let defaults = HttpTimeouts::default();
        Self {
            workers: args
                .workers
                .map(usize::from)
                .or(file.workers)
                .unwrap_or(DEFAULT_WORKERS),
            max_retries: args
                .max_retries
                .map(u32::from)
                .or(file.max_retries)
                .unwrap_or_else(|| RetryPolicy::default().max_attempts()),
            rate_limit_ms: args
                .rate_limit
                .or(file.rate_limit)
                .unwrap_or(DEFAULT_RATE_LIMIT_MS),
            cache_file: args
                .cache_file
                .clone()
                .or_else(|| file.cache_file.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_FILE)),
            checkpoint_file: args
                .checkpoint_file
                .clone()
                .or_else(|| file.checkpoint_file.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_FILE)),
            timeouts: HttpTimeouts {
                connect_secs: file.connect_timeout_secs.unwrap_or(defaults.connect_secs),
                read_secs: file.read_timeout_secs.unwrap_or(defaults.read_secs),
            },
            scopus_base_url: file.scopus_base_url.clone(),
            openalex_base_url: file.openalex_base_url.clone(),
            openalex_mailto: args.mailto.clone().or_else(|| file.openalex_mailto.clone()),
        }
    }

    fn scopus_client(&self, api_key: &str) -> Result<ScopusClient> {
        let client = match &self.scopus_base_url {
            Some(base) => ScopusClient::with_base_url(api_key, base.as_str(), self.timeouts),
            None => ScopusClient::new(api_key, self.timeouts),
        };
        client.context("Failed to build Scopus client")
    }

    fn openalex_client(&self) -> Result<OpenAlexClient> {
        let client = match &self.openalex_base_url {
            Some(base) => OpenAlexClient::with_base_url(base.as_str(), self.timeouts),
            None => OpenAlexClient::new(self.timeouts),
        };
        Ok(client
            .context("Failed to build OpenAlex client")?
            .with_mailto(self.openalex_mailto.clone()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let loaded = load_file_config_from(args.config.as_deref())?;
    if let Some(path) = loaded.path.as_deref()
        && loaded.config.is_some()
    {
        debug!(path = %path.display(), "loaded config file");
    }
    let file_config = loaded.config.unwrap_or_default();
    let settings = Settings::merge(&args, &file_config);
    debug!(?settings, "effective settings");

    if args.is_maintenance() {
        if args.test_key {
            return run_test_key(&args, &settings).await;
        }
        return run_cache_maintenance(&args, &settings);
    }

    let Some(mode) = args.mode() else {
        bail!("No search mode selected\n  Suggestion: pass --doi or --title (see --help)");
    };

    let input_path = args.input_path(mode);
    let lines = read_input_lines(&input_path)?;
    info!(
        mode = %mode,
        input = %input_path.display(),
        lines = lines.len(),
        "scopus-resolve starting"
    );

    if args.dry_run {
        return run_dry(&args, mode, &lines);
    }

    let api_key = require_api_key(&args)?;
    let primary = Arc::new(settings.scopus_client(&api_key)?);
    let fallback = Arc::new(settings.openalex_client()?);

    let cache = if args.no_cache {
        debug!("cache disabled");
        None
    } else {
        Some(Arc::new(ResultCache::open(&settings.cache_file)))
    };

    let mut config = PipelineConfig::new(mode, &settings.checkpoint_file);
    config.workers = settings.workers;
    config.skip_duplicates = args.skip_duplicates;
    config.resume = args.resume;
    config.limit = args.limit.map(|n| usize::try_from(n).unwrap_or(usize::MAX));
    config.retry = RetryPolicy::with_max_attempts(settings.max_retries);
    config.pacing = Duration::from_millis(settings.rate_limit_ms);
    if settings.rate_limit_ms == 0 {
        debug!("rate limiting disabled");
    }

    let pipeline = Pipeline::new(config, primary, fallback).with_cache(cache);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight lookups");
            signal_cancel.cancel();
        }
    });

    match pipeline.run(&lines, &cancel).await {
        Ok(report) => {
            finish_run(&args, mode, &report)?;
            Ok(())
        }
        Err(PipelineError::Unauthorized { error, report }) => {
            finish_run(&args, mode, &report)?;
            Err(anyhow::Error::new(error).context(
                "Scopus rejected the API key; partial results and checkpoint were saved\n  \
                 Suggestion: check the key with --test-key, then rerun with --resume",
            ))
        }
        Err(err) => Err(err).context("Resolution run failed"),
    }
}

fn finish_run(args: &Args, mode: SearchMode, report: &RunReport) -> Result<()> {
    if let Some(path) = output::write_validation_report(&args.output, mode, &report.input_report)?
    {
        info!(path = %path.display(), "validation report written");
    }
    output::write_results(&args.output, mode, report)?;

    let stats = report.stats;
    info!(
        path = %args.output.display(),
        total = stats.total,
        found = stats.found,
        partial = stats.partial,
        not_found = stats.not_found,
        errors = stats.errors,
        cache_hits = stats.cache_hits,
        api_requests = stats.api_requests,
        success_rate = format!("{:.1}%", stats.success_rate()),
        "results written"
    );
    if report.interrupted {
        warn!("run interrupted; rerun with --resume to continue from the checkpoint");
    }
    Ok(())
}

fn run_dry(args: &Args, mode: SearchMode, lines: &[String]) -> Result<()> {
    let (items, report) = prepare_items(lines, mode, args.skip_duplicates);
    print_input_report(&report);
    println!("Items to resolve: {}", items.len());
    if let Some(path) = output::write_validation_report(&args.output, mode, &report)? {
        println!("Validation report: {}", path.display());
    }
    info!("dry run complete; no lookups performed");
    Ok(())
}

fn print_input_report(report: &InputReport) {
    println!("Total: {}", report.total);
    println!("Valid: {}", report.valid);
    println!("Invalid: {}", report.invalid.len());
    println!("Duplicates: {}", report.duplicates.len());
    for line in &report.invalid {
        println!("  line {}: {}", line.index, line.reason);
    }
}

fn run_cache_maintenance(args: &Args, settings: &Settings) -> Result<()> {
    let cache = ResultCache::open(&settings.cache_file);
    if args.clear_cache {
        let removed = cache.len();
        cache.clear().context("Failed to clear cache")?;
        println!(
            "Cleared {removed} cache entries from {}",
            settings.cache_file.display()
        );
    }
    if args.cache_stats {
        let stats = cache.stats();
        println!("Cache file: {}", settings.cache_file.display());
        println!("Entries: {}", stats.count);
        println!("Size: {:.1} KB", size_kb(stats.file_size));
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn size_kb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0
}

async fn run_test_key(args: &Args, settings: &Settings) -> Result<()> {
    let api_key = require_api_key(args)?;
    let client = settings.scopus_client(&api_key)?;
    info!(doi = TEST_KEY_DOI, "testing Scopus API key");

    match client.lookup(TEST_KEY_DOI, SearchMode::Doi).await {
        Ok(hit) => {
            println!("API key is valid");
            if let Some(id) = hit.resolved_id {
                println!("Test lookup returned {id}");
            }
            Ok(())
        }
        Err(SourceError::NotFound { .. }) => {
            println!("API key is valid (test DOI not matched)");
            Ok(())
        }
        Err(err @ SourceError::Unauthorized { .. }) => {
            Err(anyhow::Error::new(err).context("API key was rejected"))
        }
        Err(err @ SourceError::RateLimited { .. }) => {
            println!("API key is valid but currently rate limited");
            debug!(error = %err, "test lookup throttled");
            Ok(())
        }
        Err(err) => Err(anyhow::Error::new(err).context("API key test could not complete")),
    }
}

fn require_api_key(args: &Args) -> Result<String> {
    match args.api_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => bail!(
            "No Scopus API key provided\n  Suggestion: set SCOPUS_API_KEY or pass --api-key"
        ),
    }
}

fn read_input_lines(path: &Path) -> Result<Vec<String>> {
    let text = if path == Path::new("-") {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read input from stdin")?;
        buffer
    } else {
        fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read input file '{}'\n  Suggestion: create it with one item per line or pass --input",
                path.display()
            )
        })?
    };
    Ok(text.lines().map(str::to_string).collect())
}
