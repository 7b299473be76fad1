//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{ArgGroup, Parser};

use scopus_resolver_core::input::SearchMode;

/// Default input file for DOI mode.
pub const DEFAULT_DOI_INPUT: &str = "dois.txt";
/// Default input file for title mode.
pub const DEFAULT_TITLE_INPUT: &str = "titles.txt";
/// Default results file.
pub const DEFAULT_OUTPUT: &str = "scopus_results.json";
/// Default cache file.
pub const DEFAULT_CACHE_FILE: &str = ".scopus_cache.json";
/// Default checkpoint file.
pub const DEFAULT_CHECKPOINT_FILE: &str = "checkpoint.json";

/// Resolve DOIs or article titles to Scopus identifiers.
///
/// Each input line is looked up in Scopus first and in OpenAlex as a fallback.
/// Results are cached, checkpointed, and written as JSON in input order.
#[derive(Parser, Debug)]
#[command(name = "scopus-resolve")]
#[command(author, version, about)]
#[command(group(ArgGroup::new("mode").args(["doi", "title"])))]
pub struct Args {
    /// Input lines are DOIs (default input: dois.txt)
    #[arg(long)]
    pub doi: bool,

    /// Input lines are article titles (default input: titles.txt)
    #[arg(long)]
    pub title: bool,

    /// Input file, one item per line ("-" reads stdin)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Results file (JSON)
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Concurrent workers (1-32) [default: 3]
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub workers: Option<u8>,

    /// Process at most N items after the resume point
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub limit: Option<u64>,

    /// Resume from the checkpoint file
    #[arg(long)]
    pub resume: bool,

    /// Drop duplicate lines instead of copying the first result to them
    #[arg(long)]
    pub skip_duplicates: bool,

    /// Bypass the response cache
    #[arg(long)]
    pub no_cache: bool,

    /// Validate and deduplicate only, no network calls
    #[arg(long)]
    pub dry_run: bool,

    /// Calls per source per item before giving up (1-10) [default: 3]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: Option<u8>,

    /// Minimum delay between API calls in milliseconds (0 to disable, max 60000) [default: 1000]
    #[arg(short = 'l', long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: Option<u64>,

    /// Cache file location [default: .scopus_cache.json]
    #[arg(long)]
    pub cache_file: Option<PathBuf>,

    /// Checkpoint file location [default: checkpoint.json]
    #[arg(long)]
    pub checkpoint_file: Option<PathBuf>,

    /// Config file (overrides the default config path)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Scopus API key
    #[arg(long, env = "SCOPUS_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Contact email sent to OpenAlex (polite pool)
    #[arg(long)]
    pub mailto: Option<String>,

    /// Check the API key with a single lookup and exit
    #[arg(long)]
    pub test_key: bool,

    /// Print cache statistics and exit
    #[arg(long)]
    pub cache_stats: bool,

    /// Delete all cache entries and exit
    #[arg(long)]
    pub clear_cache: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Selected search mode, if any.
    #[must_use]
    pub fn mode(&self) -> Option<SearchMode> {
        if self.doi {
            Some(SearchMode::Doi)
        } else if self.title {
            Some(SearchMode::Title)
        } else {
            None
        }
    }

    /// Input path, falling back to the mode's default file.
    #[must_use]
    pub fn input_path(&self, mode: SearchMode) -> PathBuf {
        self.input.clone().unwrap_or_else(|| {
            PathBuf::from(match mode {
                SearchMode::Doi => DEFAULT_DOI_INPUT,
                SearchMode::Title => DEFAULT_TITLE_INPUT,
            })
        })
    }

    /// True when a maintenance flag replaces the normal run.
    #[must_use]
    pub fn is_maintenance(&self) -> bool {
        self.test_key || self.cache_stats || self.clear_cache
    }
}
