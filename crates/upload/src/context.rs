//! Shared state handed to every per-file uploader.

use std::sync::Arc;
use std::time::Duration;

use docpush_transfer::ThroughputMeter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::error::UploadError;
use crate::retry::RetryPolicy;
use crate::token::TokenSource;
use crate::transport::Transport;
use crate::types::{ConflictBehavior, UploadEvent};

/// Non-blocking sender for progress events.
///
/// A full or closed channel drops the event; progress reporting never stalls
/// an upload.
#[derive(Clone, Default)]
pub struct EventSink(Option<mpsc::Sender<UploadEvent>>);

impl EventSink {
    pub fn new(tx: mpsc::Sender<UploadEvent>) -> Self {
        Self(Some(tx))
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn emit(&self, event: UploadEvent) {
        if let Some(tx) = &self.0
            && let Err(e) = tx.try_send(event)
        {
            trace!("progress event dropped: {e}");
        }
    }
}

/// Everything an uploader needs besides the file itself.
#[derive(Clone)]
pub struct UploadContext {
    pub tokens: Arc<dyn TokenSource>,
    pub transport: Arc<dyn Transport>,
    pub retry: RetryPolicy,
    pub conflict: ConflictBehavior,
    pub cancel: CancellationToken,
    pub events: EventSink,
    pub meter: Arc<ThroughputMeter>,
    pub max_session_renewals: u32,
    pub session_expiry_margin: Duration,
}

impl UploadContext {
    /// Context with default policy, no events and a fresh cancel token.
    pub fn new(tokens: Arc<dyn TokenSource>, transport: Arc<dyn Transport>) -> Self {
        Self {
            tokens,
            transport,
            retry: RetryPolicy::default(),
            conflict: ConflictBehavior::default(),
            cancel: CancellationToken::new(),
            events: EventSink::disabled(),
            meter: Arc::new(ThroughputMeter::default()),
            max_session_renewals: 3,
            session_expiry_margin: Duration::from_secs(30),
        }
    }

    /// Logs and reports one retry of the file at `path`.
    pub(crate) fn notify_retry(&self, path: &str, attempt: u32, delay: Duration, err: &UploadError) {
        warn!(
            path,
            attempt,
            delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
            "retrying: {err}"
        );
        self.events.emit(UploadEvent::Retrying {
            path: path.to_string(),
            attempt,
            delay,
            reason: err.to_string(),
        });
    }
}

/// Result of one uploader run plus the retries it spent.
#[derive(Debug)]
pub struct Attempt<T> {
    pub result: Result<T, UploadError>,
    pub retries: u32,
}

impl<T> Attempt<T> {
    pub fn new(result: Result<T, UploadError>, retries: u32) -> Self {
        Self { result, retries }
    }
}
