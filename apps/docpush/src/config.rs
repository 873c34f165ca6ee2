//! Command-line and file configuration.
//!
//! Settings come from three places, highest precedence first:
//! - command-line flags
//! - `DOCPUSH_*` environment variables
//! - an optional TOML file passed with `--config`
//!
//! The merged result is validated into an [`EngineConfig`] before anything
//! touches the network.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use docpush_transfer::PlannerConfig;
use docpush_upload::{
    ConflictBehavior, Credentials, EngineConfig, RetryPolicy, UploadTarget, WalkOptions,
};
use serde::{Deserialize, Serialize};

/// Upload a local directory tree to a SharePoint document library.
#[derive(Debug, Parser)]
#[command(name = "docpush", version)]
pub struct Args {
    /// Local directory to upload.
    pub root: PathBuf,

    /// TOML file with default settings.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Site URL, e.g. https://contoso.sharepoint.com/sites/Finance.
    #[arg(long, env = "DOCPUSH_SITE_URL")]
    pub site_url: Option<String>,

    /// Document library name or display name.
    #[arg(long, env = "DOCPUSH_LIBRARY")]
    pub library: Option<String>,

    /// Folder under the library root to upload into.
    #[arg(long, env = "DOCPUSH_FOLDER")]
    pub folder: Option<String>,

    #[arg(long, env = "DOCPUSH_TENANT_ID")]
    pub tenant_id: Option<String>,

    #[arg(long, env = "DOCPUSH_CLIENT_ID")]
    pub client_id: Option<String>,

    #[arg(long, env = "DOCPUSH_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Files uploaded concurrently.
    #[arg(long, short = 'j')]
    pub workers: Option<usize>,

    /// Largest file (bytes) sent in a single request.
    #[arg(long)]
    pub small_upload_max: Option<u64>,

    /// Bytes per upload-session request; a multiple of 327680.
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// What to do when the remote file exists: replace, rename or fail.
    #[arg(long)]
    pub conflict: Option<ConflictBehavior>,

    /// Attempts per request before giving up.
    #[arg(long)]
    pub retry_max: Option<u32>,

    /// Backoff multiplier between attempts.
    #[arg(long)]
    pub retry_backoff: Option<f64>,

    /// File or directory name to skip; repeatable.
    #[arg(long = "exclude", value_name = "NAME")]
    pub exclude: Vec<String>,

    /// Upload dot-files and dot-directories too.
    #[arg(long)]
    pub include_hidden: bool,

    /// Per-request timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Plan the upload and print it without contacting the network.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the summary as JSON.
    #[arg(long)]
    pub json: bool,

    /// Debug logging and per-chunk progress.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Settings read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,

    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default = "default_library")]
    pub library: String,
    #[serde(default)]
    pub folder: Option<String>,

    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_small_upload_max")]
    pub small_upload_max: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default)]
    pub conflict: ConflictBehavior,

    #[serde(default = "default_retry_max")]
    pub retry_max: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: f64,
    /// Seconds one request may spend retrying, sleeps included.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u64,

    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub include_hidden: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_session_renewals")]
    pub max_session_renewals: u32,
}

fn default_library() -> String {
    "Documents".into()
}

fn default_workers() -> usize {
    4
}

fn default_small_upload_max() -> u64 {
    docpush_transfer::DEFAULT_SMALL_UPLOAD_MAX
}

fn default_chunk_size() -> u64 {
    docpush_transfer::DEFAULT_CHUNK_SIZE
}

fn default_retry_max() -> u32 {
    RetryPolicy::default().max_attempts
}

fn default_retry_backoff() -> f64 {
    RetryPolicy::default().backoff_factor
}

fn default_retry_budget() -> u64 {
    RetryPolicy::default().time_budget.as_secs()
}

fn default_timeout() -> u64 {
    docpush_graph::DEFAULT_TIMEOUT.as_secs()
}

fn default_session_renewals() -> u32 {
    3
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            tenant_id: None,
            client_id: None,
            client_secret: None,
            site_url: None,
            library: default_library(),
            folder: None,
            workers: default_workers(),
            small_upload_max: default_small_upload_max(),
            chunk_size: default_chunk_size(),
            conflict: ConflictBehavior::default(),
            retry_max: default_retry_max(),
            retry_backoff: default_retry_backoff(),
            retry_budget: default_retry_budget(),
            exclude: Vec::new(),
            include_hidden: false,
            timeout: default_timeout(),
            max_session_renewals: default_session_renewals(),
        }
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: FileConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration file loaded");
        Ok(config)
    }
}

/// Everything the app needs for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub engine: EngineConfig,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    pub json: bool,
}

impl Settings {
    /// Loads the file named by `--config` (if any) and merges `args` over it.
    pub fn resolve(args: &Args) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let settings = Self::merge(args, file);
        settings
            .engine
            .validate()
            .context("invalid configuration")?;
        Ok(settings)
    }

    /// Overlays command-line values on file values.
    pub fn merge(args: &Args, file: FileConfig) -> Self {
        let credentials = Credentials {
            tenant_id: args.tenant_id.clone().or(file.tenant_id).unwrap_or_default(),
            client_id: args.client_id.clone().or(file.client_id).unwrap_or_default(),
            client_secret: args
                .client_secret
                .clone()
                .or(file.client_secret)
                .unwrap_or_default(),
        };

        let target = UploadTarget {
            site_url: args.site_url.clone().or(file.site_url).unwrap_or_default(),
            library: args.library.clone().unwrap_or(file.library),
            folder: args
                .folder
                .clone()
                .or(file.folder)
                .filter(|f| !f.trim().is_empty()),
        };

        let planner = PlannerConfig {
            small_upload_max: args.small_upload_max.unwrap_or(file.small_upload_max),
            chunk_size: args.chunk_size.unwrap_or(file.chunk_size),
            ..PlannerConfig::default()
        };

        let retry = RetryPolicy {
            max_attempts: args.retry_max.unwrap_or(file.retry_max),
            backoff_factor: args.retry_backoff.unwrap_or(file.retry_backoff),
            time_budget: Duration::from_secs(file.retry_budget),
            ..RetryPolicy::default()
        };

        let mut exclude = file.exclude;
        exclude.extend(args.exclude.iter().cloned());
        let walk = WalkOptions {
            skip_hidden: !(args.include_hidden || file.include_hidden),
            exclude,
        };

        let engine = EngineConfig {
            credentials,
            target,
            root: args.root.clone(),
            planner,
            retry,
            walk,
            conflict: args.conflict.unwrap_or(file.conflict),
            workers: args.workers.unwrap_or(file.workers),
            dry_run: args.dry_run,
            verbose: args.verbose,
            max_session_renewals: file.max_session_renewals,
            session_expiry_margin: Duration::from_secs(30),
        };

        Self {
            engine,
            timeout: Duration::from_secs(args.timeout.unwrap_or(file.timeout)),
            json: args.json,
        }
    }
}
