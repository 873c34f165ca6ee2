//! Data types for the upload flow.

use std::path::PathBuf;
use std::time::Duration;

use docpush_transfer::{PlannerConfig, Strategy};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, UploadError};
use crate::retry::RetryPolicy;

/// App registration used for the client-credentials grant.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Where files land remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// Site URL, e.g. `https://contoso.sharepoint.com/sites/Ops`.
    pub site_url: String,
    /// Document library name or display name.
    pub library: String,
    /// Folder under the library root; `None` uploads to the root.
    pub folder: Option<String>,
}

/// What the remote side does when the target item already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictBehavior {
    #[default]
    Replace,
    Rename,
    Fail,
}

impl ConflictBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Rename => "rename",
            Self::Fail => "fail",
        }
    }
}

impl std::str::FromStr for ConflictBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "rename" => Ok(Self::Rename),
            "fail" => Ok(Self::Fail),
            other => Err(format!(
                "unknown conflict behavior '{other}' (expected replace, rename or fail)"
            )),
        }
    }
}

impl std::fmt::Display for ConflictBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entries the file walk skips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkOptions {
    /// Skip dot-prefixed files and directories.
    pub skip_hidden: bool,
    /// Exact file or directory names to skip.
    pub exclude: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            skip_hidden: true,
            exclude: Vec::new(),
        }
    }
}

/// Validated engine configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub credentials: Credentials,
    pub target: UploadTarget,
    pub root: PathBuf,
    pub planner: PlannerConfig,
    pub retry: RetryPolicy,
    pub walk: WalkOptions,
    pub conflict: ConflictBehavior,
    /// Maximum files in flight.
    pub workers: usize,
    pub dry_run: bool,
    pub verbose: bool,
    /// Session recreations allowed per file before it fails.
    pub max_session_renewals: u32,
    /// A session this close to its expiry is treated as expired.
    pub session_expiry_margin: Duration,
}

impl EngineConfig {
    /// Checks everything that would otherwise fail per file.
    pub fn validate(&self) -> Result<(), UploadError> {
        self.planner
            .validate()
            .map_err(|e| UploadError::Config(e.to_string()))?;
        self.retry.validate()?;

        if self.workers == 0 {
            return Err(UploadError::Config("worker limit must be at least 1".into()));
        }
        if self.target.library.trim().is_empty() {
            return Err(UploadError::Config("library name is empty".into()));
        }
        if !self.dry_run {
            if self.target.site_url.trim().is_empty() {
                return Err(UploadError::Config("site URL is empty".into()));
            }
            let c = &self.credentials;
            if c.tenant_id.is_empty() || c.client_id.is_empty() || c.client_secret.is_empty() {
                return Err(UploadError::Config(
                    "tenant id, client id and client secret are required".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Final state of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Uploaded {
        remote_path: String,
        item_id: Option<String>,
    },
    /// Dry run: planned and recorded, nothing sent.
    Planned { remote_path: String },
    Failed { kind: ErrorKind, message: String },
}

/// Per-file result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    /// Path relative to the upload root (or the local path for walk errors).
    pub path: String,
    pub strategy: Option<Strategy>,
    pub size: u64,
    pub retries: u32,
    pub outcome: Outcome,
}

impl TransferResult {
    pub fn failure(path: impl Into<String>, err: &UploadError) -> Self {
        Self {
            path: path.into(),
            strategy: None,
            size: 0,
            retries: 0,
            outcome: Outcome::Failed {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, Outcome::Failed { .. })
    }
}

/// A failed file as listed in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub path: String,
    pub kind: ErrorKind,
    pub message: String,
    pub retries: u32,
}

/// Aggregated run outcome.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub dry_run: bool,
    pub succeeded: usize,
    pub failed: usize,
    /// Files never uploaded because the run was cancelled.
    pub skipped: usize,
    pub bytes: u64,
    pub retries: u32,
    pub failures: Vec<FailureRecord>,
    pub results: Vec<TransferResult>,
    /// First fatal error, if the run was aborted.
    pub fatal: Option<String>,
}

impl Summary {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    /// Folds one file result into the totals.
    pub fn record(&mut self, result: TransferResult) {
        self.retries += result.retries;
        match &result.outcome {
            Outcome::Failed {
                kind: ErrorKind::Cancelled,
                ..
            } => self.skipped += 1,
            Outcome::Failed { kind, message } => {
                self.failed += 1;
                self.failures.push(FailureRecord {
                    path: result.path.clone(),
                    kind: *kind,
                    message: message.clone(),
                    retries: result.retries,
                });
                if *kind == ErrorKind::Auth && self.fatal.is_none() {
                    self.fatal = Some(message.clone());
                }
            }
            Outcome::Uploaded { .. } | Outcome::Planned { .. } => {
                self.succeeded += 1;
                self.bytes += result.size;
            }
        }
        self.results.push(result);
    }

    /// True only if every file succeeded (or was planned) and nothing aborted.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0 && self.fatal.is_none()
    }

    /// Process exit status for the run.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

/// Progress event emitted while uploading.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Started {
        path: String,
        strategy: Strategy,
        size: u64,
    },
    /// The server acknowledged bytes up to `acked`.
    ChunkAcknowledged { path: String, acked: u64, total: u64 },
    Retrying {
        path: String,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    /// A replacement session was opened after expiry.
    SessionRenewed { path: String, resume_from: u64 },
    Completed { path: String, remote_path: String },
    Failed {
        path: String,
        kind: ErrorKind,
        message: String,
    },
}
