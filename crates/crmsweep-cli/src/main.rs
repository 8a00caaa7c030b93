mod display;
mod pipeline;

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use crmsweep_core::Filter;
use crmsweep_dedupe::{DEFAULT_MAX_BUCKET_SIZE, KeepStrategy};
use crmsweep_extract::CancellationToken;
use crmsweep_store::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "crmsweep",
    version,
    about = "Windowed CRM extraction and two-phase deduplication"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// CRM API base URL.
    #[arg(long, global = true, env = "CRMSWEEP_BASE_URL", default_value = "https://api.hubapi.com")]
    pub base_url: String,
    /// Bearer token for the CRM API.
    #[arg(long, global = true, env = "CRMSWEEP_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    /// Leaf windows fetched concurrently.
    #[arg(long, global = true, env = "CRMSWEEP_WORKERS", default_value_t = 4)]
    pub workers: usize,
    /// Search calls per second across all workers.
    #[arg(long, global = true, env = "CRMSWEEP_RATE", default_value_t = 4.0)]
    pub rate: f64,
    #[arg(long, global = true, env = "CRMSWEEP_CALL_TIMEOUT_SECS", default_value_t = 60)]
    pub call_timeout_secs: u64,
    #[arg(long, global = true, env = "CRMSWEEP_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,
    /// Root for run directories holding large outputs.
    #[arg(long, global = true, env = "CRMSWEEP_ARTIFACT_DIR", default_value = "crmsweep-artifacts")]
    pub artifact_dir: PathBuf,
    /// Keep run directories after exit instead of printing and removing them.
    #[arg(long, global = true)]
    pub keep_files: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract every record of an object type in a date range.
    Pull(PullArgs),
    /// Find duplicates and merge them in two phases.
    Dedupe {
        #[command(subcommand)]
        command: DedupeCommand,
    },
}

#[derive(Subcommand, Debug)]
enum DedupeCommand {
    /// Extract, detect duplicate groups, and save a hashed merge plan.
    Plan(PlanArgs),
    /// Dry-run a saved plan, or apply it with --approve and the plan hash.
    Apply(ApplyArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    /// CRM object type, e.g. contacts or companies.
    pub object_type: String,
    /// Range start (inclusive): RFC 3339 instant or YYYY-MM-DD.
    #[arg(long, value_parser = parse_instant)]
    pub since: DateTime<Utc>,
    /// Range end (exclusive): RFC 3339 instant or YYYY-MM-DD.
    #[arg(long, value_parser = parse_instant)]
    pub until: DateTime<Utc>,
    /// Extra filter clause such as lifecyclestage=customer; repeatable.
    #[arg(long = "where")]
    pub filters: Vec<Filter>,
    /// Timestamp property the range applies to.
    #[arg(long, default_value = "createdate")]
    pub sort_property: String,
    /// Properties to fetch, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub properties: Vec<String>,
    /// Stop after this many records; 0 means no limit.
    #[arg(long, default_value_t = 0)]
    pub limit: u64,
    /// Run one search over the whole range instead of splitting it.
    #[arg(long)]
    pub no_auto_window: bool,
}

#[derive(Args, Debug)]
pub struct PullArgs {
    #[command(flatten)]
    pub extract: ExtractArgs,
    #[arg(long, default_value = "json")]
    pub format: OutputFormat,
    /// Write large output here instead of the run directory.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub extract: ExtractArgs,
    #[arg(long, default_value = "email")]
    pub identity_field: String,
    /// Secondary match fields, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub secondary: Vec<String>,
    /// Secondary fields that must agree for a STRONG match.
    #[arg(long, default_value_t = 2)]
    pub strong_threshold: usize,
    /// Secondary values shared by more records than this are too common to pair on.
    #[arg(long, default_value_t = DEFAULT_MAX_BUCKET_SIZE)]
    pub max_bucket_size: usize,
    /// Which record survives a merge: oldest, newest or first.
    #[arg(long, default_value = "oldest")]
    pub keep: KeepStrategy,
    #[arg(long, default_value = "plan.json")]
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[arg(long)]
    pub plan_file: PathBuf,
    /// Perform the merges. Without this only a dry run happens.
    #[arg(long)]
    pub approve: bool,
    /// Plan hash reported by the dry run.
    #[arg(long)]
    pub plan_hash: Option<String>,
    /// Write a large outcome here instead of the run directory.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

/// Parse `2024-01-31T12:00:00Z` or a bare `2024-01-31` (midnight UTC).
fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("expected an RFC 3339 instant or YYYY-MM-DD, got {s:?}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    tracing::debug!("crmsweep v{}", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Interrupted, finishing with what was fetched...");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Command::Pull(args) => pipeline::run_pull(&cli.global, &args, &cancel).await,
        Command::Dedupe { command } => match command {
            DedupeCommand::Plan(args) => pipeline::run_plan(&cli.global, &args, &cancel).await,
            DedupeCommand::Apply(args) => pipeline::run_apply(&cli.global, &args).await,
        },
    }
}
