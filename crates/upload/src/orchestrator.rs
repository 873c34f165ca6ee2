//! Upload orchestrator.
//!
//! Walks the root, plans each file and runs the matching uploader on a
//! bounded set of tokio tasks. Results are folded into one [`Summary`] by
//! the dispatch loop, which is the only place that touches it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use docpush_transfer::{
    LocalFile, PlannerConfig, Strategy, ThroughputMeter, join_remote_path, normalize_folder, plan,
};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chunked::ChunkedUploader;
use crate::context::{EventSink, UploadContext};
use crate::dry_run::{OfflineToken, PlannedRequest, RecordingTransport};
use crate::error::UploadError;
use crate::simple::SimpleUploader;
use crate::token::TokenSource;
use crate::transport::Transport;
use crate::types::{EngineConfig, Outcome, Summary, TransferResult, UploadEvent};
use crate::walker::{FileWalker, count_files};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Uploads a directory tree with bounded concurrency.
pub struct Orchestrator {
    config: EngineConfig,
    tokens: Arc<dyn TokenSource>,
    transport: Arc<dyn Transport>,
    recorder: Option<Arc<RecordingTransport>>,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
    meter: Arc<ThroughputMeter>,
}

impl Orchestrator {
    /// Creates an orchestrator that talks to `transport`.
    pub fn new(
        config: EngineConfig,
        tokens: Arc<dyn TokenSource>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            config,
            tokens,
            transport,
            recorder: None,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
            meter: Arc::new(ThroughputMeter::default()),
        }
    }

    /// Creates an orchestrator that records requests instead of sending them.
    pub fn dry_run(mut config: EngineConfig) -> Self {
        config.dry_run = true;
        let recorder = Arc::new(RecordingTransport::new());
        let mut orch = Self::new(config, Arc::new(OfflineToken::new()), recorder.clone());
        orch.recorder = Some(recorder);
        orch
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns a cancellation token for this run.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests recorded by a dry run; empty otherwise.
    pub fn planned_requests(&self) -> Vec<PlannedRequest> {
        self.recorder
            .as_ref()
            .map(|r| r.requests())
            .unwrap_or_default()
    }

    fn context(&self) -> UploadContext {
        UploadContext {
            tokens: Arc::clone(&self.tokens),
            transport: Arc::clone(&self.transport),
            retry: self.config.retry.clone(),
            conflict: self.config.conflict,
            cancel: self.cancel.clone(),
            events: EventSink::new(self.events_tx.clone()),
            meter: Arc::clone(&self.meter),
            max_session_renewals: self.config.max_session_renewals,
            session_expiry_margin: self.config.session_expiry_margin,
        }
    }

    /// Uploads every file under the configured root.
    ///
    /// Returns `Err` only for failures before any file is dispatched (bad
    /// configuration, unreadable root, no token, target folder unusable).
    /// Per-file failures and mid-run aborts are reported in the summary.
    pub async fn run(&self) -> Result<Summary, UploadError> {
        self.config.validate()?;
        let config = &self.config;
        let ctx = self.context();

        let walker = FileWalker::new(&config.root, config.walk.clone())?;
        if config.verbose {
            let root = config.root.clone();
            let walk = config.walk.clone();
            if let Ok(Ok(total)) =
                tokio::task::spawn_blocking(move || count_files(root, &walk)).await
            {
                info!(files = total, root = %config.root.display(), "scanning complete");
            }
        }

        // No upload is attempted without a token.
        ctx.tokens.get_token().await?;
        let folder = self.prepare_target(&ctx).await?;

        info!(
            root = %config.root.display(),
            library = %config.target.library,
            folder = folder.as_deref().unwrap_or("/"),
            workers = config.workers,
            dry_run = config.dry_run,
            "upload started"
        );

        let (files_tx, mut files_rx) = mpsc::channel(config.workers * 2);
        let walk_cancel = self.cancel.clone();
        let walk_task = tokio::task::spawn_blocking(move || {
            for item in walker {
                if walk_cancel.is_cancelled() || files_tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });

        let done = CancellationToken::new();
        let queued = Arc::new(AtomicU64::new(0));
        let ticker = tokio::spawn(report_progress(
            Arc::clone(&self.meter),
            Arc::clone(&queued),
            done.clone(),
        ));

        let semaphore = Arc::new(Semaphore::new(config.workers));
        let mut tasks: JoinSet<TransferResult> = JoinSet::new();
        let mut summary = Summary::new(config.dry_run);

        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                item = files_rx.recv() => item,
            };
            let Some(item) = item else { break };

            let file = match item {
                Ok(file) => file,
                Err(e) => {
                    warn!("skipping unreadable entry: {e}");
                    summary.record(TransferResult::failure(error_path(&e), &e));
                    continue;
                }
            };

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    summary.skipped += 1;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => permit,
            };
            let Ok(permit) = permit else { break };

            while let Some(joined) = tasks.try_join_next() {
                collect(&mut summary, joined);
            }

            queued.fetch_add(file.size, Ordering::Relaxed);
            let ctx = ctx.clone();
            let planner = config.planner;
            let folder = folder.clone();
            let dry_run = config.dry_run;
            tasks.spawn(async move {
                let _permit = permit;
                process_file(&ctx, file, &planner, folder.as_deref(), dry_run).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            collect(&mut summary, joined);
        }

        if self.cancel.is_cancelled() {
            files_rx.close();
            while let Some(item) = files_rx.recv().await {
                if item.is_ok() {
                    summary.skipped += 1;
                }
            }
        }
        if let Err(e) = walk_task.await {
            error!("file walk aborted: {e}");
        }
        done.cancel();
        let _ = ticker.await;

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            bytes = summary.bytes,
            retries = summary.retries,
            "upload finished"
        );
        if let Some(fatal) = &summary.fatal {
            error!("run aborted: {fatal}");
        }
        Ok(summary)
    }

    /// Checks the library and makes sure the target folder exists; returns
    /// the folder's normalized form.
    async fn prepare_target(&self, ctx: &UploadContext) -> Result<Option<String>, UploadError> {
        let library = self.config.target.library.as_str();
        let (result, _) = ctx
            .retry
            .run(
                &ctx.cancel,
                |attempt, delay, err| ctx.notify_retry(library, attempt, delay, err),
                || async {
                    let token = ctx.tokens.get_token().await?;
                    ctx.transport.check_target(&token).await
                },
            )
            .await;
        result?;

        let Some(folder) = self
            .config
            .target
            .folder
            .as_deref()
            .map(normalize_folder)
            .filter(|f| !f.is_empty())
        else {
            return Ok(None);
        };

        let (result, _) = ctx
            .retry
            .run(
                &ctx.cancel,
                |attempt, delay, err| ctx.notify_retry(&folder, attempt, delay, err),
                || async {
                    let token = ctx.tokens.get_token().await?;
                    ctx.transport.ensure_folder(&token, &folder).await
                },
            )
            .await;
        result?;
        debug!(folder = %folder, "target folder ready");
        Ok(Some(folder))
    }
}

/// Plans and uploads one file.
async fn process_file(
    ctx: &UploadContext,
    file: LocalFile,
    planner: &PlannerConfig,
    folder: Option<&str>,
    dry_run: bool,
) -> TransferResult {
    let path = file.relative_path.clone();
    let remote_path = match join_remote_path(folder, &path) {
        Ok(p) => p,
        Err(e) => {
            let err = UploadError::from_transfer(&file.path, e);
            warn!(path = %path, "cannot map to a remote path: {err}");
            return TransferResult::failure(path, &err);
        }
    };

    let plan = plan(file, planner);
    let strategy = plan.strategy;
    let size = plan.size();
    info!(path = %path, ?strategy, size, chunks = plan.chunk_count(), "uploading");
    ctx.events.emit(UploadEvent::Started {
        path: path.clone(),
        strategy,
        size,
    });

    let attempt = match strategy {
        Strategy::Simple => SimpleUploader::new(ctx).upload(&plan, &remote_path).await,
        Strategy::Chunked => ChunkedUploader::new(ctx).upload(&plan, &remote_path).await,
    };

    let outcome = match attempt.result {
        Ok(item) => {
            info!(path = %path, remote = %item.remote_path, retries = attempt.retries, "upload complete");
            ctx.events.emit(UploadEvent::Completed {
                path: path.clone(),
                remote_path: item.remote_path.clone(),
            });
            if dry_run {
                Outcome::Planned {
                    remote_path: item.remote_path,
                }
            } else {
                Outcome::Uploaded {
                    remote_path: item.remote_path,
                    item_id: item.id,
                }
            }
        }
        Err(err) => {
            match &err {
                UploadError::Cancelled => debug!(path = %path, "upload cancelled"),
                e if e.is_fatal() => {
                    error!(path = %path, "fatal error, stopping all uploads: {e}");
                    ctx.cancel.cancel();
                }
                e => error!(path = %path, kind = %e.kind(), retries = attempt.retries, "upload failed: {e}"),
            }
            ctx.events.emit(UploadEvent::Failed {
                path: path.clone(),
                kind: err.kind(),
                message: err.to_string(),
            });
            Outcome::Failed {
                kind: err.kind(),
                message: err.to_string(),
            }
        }
    };

    TransferResult {
        path,
        strategy: Some(strategy),
        size,
        retries: attempt.retries,
        outcome,
    }
}

fn collect(summary: &mut Summary, joined: Result<TransferResult, tokio::task::JoinError>) {
    match joined {
        Ok(result) => summary.record(result),
        Err(e) => {
            error!("upload task aborted: {e}");
            let err = UploadError::local_io("<worker>", std::io::Error::other(e.to_string()));
            summary.record(TransferResult::failure("<worker>", &err));
        }
    }
}

fn error_path(err: &UploadError) -> String {
    match err {
        UploadError::LocalIo { path, .. } => path.display().to_string(),
        _ => "<unknown>".to_string(),
    }
}

/// Logs the aggregate rate until `done` fires.
///
/// The ETA covers the files dispatched so far, not the whole tree.
async fn report_progress(meter: Arc<ThroughputMeter>, queued: Arc<AtomicU64>, done: CancellationToken) {
    let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
    interval.tick().await;
    let mut last = 0;
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = interval.tick() => {
                let total = meter.total_bytes();
                if total != last {
                    let remaining = queued.load(Ordering::Relaxed).saturating_sub(total);
                    debug!(
                        bytes = total,
                        rate_kib_s = format_args!("{:.1}", meter.bytes_per_second() / 1024.0),
                        eta = ?meter.eta(remaining),
                        "progress"
                    );
                    last = total;
                }
            }
        }
    }
}
