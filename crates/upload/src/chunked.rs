//! Resumable upload through an upload session.
//!
//! States: `Created -> SessionOpen -> Uploading -> Completed`, with
//! `Uploading -> SessionExpired -> SessionOpen` when the session is lost and
//! `Uploading -> Failed` once retries are exhausted. Ranges of one file are
//! sent strictly in order; the session's acknowledged offset only moves
//! forward.

use std::path::PathBuf;

use chrono::Utc;
use docpush_transfer::{ChunkRange, RangeReader, TransferPlan, UploadSession};
use tracing::{debug, info, warn};

use crate::context::{Attempt, UploadContext};
use crate::error::UploadError;
use crate::retry::sleep_or_cancel;
use crate::transport::{RangeAck, UploadedItem};
use crate::types::UploadEvent;

/// Where a chunked upload stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    SessionOpen,
    Uploading,
    SessionExpired,
    Completed,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::SessionOpen => "session-open",
            Self::Uploading => "uploading",
            Self::SessionExpired => "session-expired",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Drives one file through an upload session.
pub struct ChunkedUploader<'a> {
    ctx: &'a UploadContext,
    state: SessionState,
    retries: u32,
    renewals: u32,
}

impl<'a> ChunkedUploader<'a> {
    pub fn new(ctx: &'a UploadContext) -> Self {
        Self {
            ctx,
            state: SessionState::Created,
            retries: 0,
            renewals: 0,
        }
    }

    /// Current state; `Completed` or `Failed` once [`Self::upload`] returns.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Sessions opened to replace expired ones.
    pub fn renewals(&self) -> u32 {
        self.renewals
    }

    pub async fn upload(&mut self, plan: &TransferPlan, remote_path: &str) -> Attempt<UploadedItem> {
        self.state = SessionState::Created;
        self.retries = 0;
        self.renewals = 0;

        let result = self.drive(plan, remote_path).await;
        match &result {
            Ok(_) => self.transition(plan, SessionState::Completed),
            Err(_) => self.transition(plan, SessionState::Failed),
        }
        Attempt::new(result, self.retries)
    }

    fn transition(&mut self, plan: &TransferPlan, to: SessionState) {
        if self.state != to {
            debug!(path = %plan.file.relative_path, from = %self.state, to = %to, "session state");
            self.state = to;
        }
    }

    async fn drive(&mut self, plan: &TransferPlan, remote_path: &str) -> Result<UploadedItem, UploadError> {
        let mut reader = if self.ctx.transport.reads_payload() {
            let reader = ChunkReader::open(plan.file.path.clone()).await?;
            if reader.size != plan.size() {
                return Err(UploadError::local_io(
                    &plan.file.path,
                    std::io::Error::other(format!(
                        "file changed since it was listed ({} -> {} bytes)",
                        plan.size(),
                        reader.size
                    )),
                ));
            }
            Some(reader)
        } else {
            None
        };

        let mut session = self.open_session(plan, remote_path).await?;
        let result = self.send_ranges(plan, remote_path, &mut reader, &mut session).await;

        if let Err(err) = &result
            && !matches!(err, UploadError::Cancelled | UploadError::Auth(_))
        {
            // Best effort: the server expires abandoned sessions anyway.
            if let Err(e) = self.ctx.transport.cancel_session(session.upload_url()).await {
                debug!(path = %plan.file.relative_path, "session cleanup failed: {e}");
            }
        }
        result
    }

    async fn open_session(
        &mut self,
        plan: &TransferPlan,
        remote_path: &str,
    ) -> Result<UploadSession, UploadError> {
        let ctx = self.ctx;
        let path = plan.file.relative_path.as_str();
        let total = plan.size();

        let (result, retries) = ctx
            .retry
            .run(
                &ctx.cancel,
                |attempt, delay, err| ctx.notify_retry(path, attempt, delay, err),
                || async move {
                    let token = ctx.tokens.get_token().await?;
                    ctx.transport
                        .create_session(&token, remote_path, total, ctx.conflict)
                        .await
                },
            )
            .await;
        self.retries += retries;

        let info = result?;
        debug!(path, expires_at = ?info.expires_at, "upload session created");
        self.transition(plan, SessionState::SessionOpen);
        Ok(UploadSession::new(info.upload_url, total, info.expires_at))
    }

    async fn send_ranges(
        &mut self,
        plan: &TransferPlan,
        remote_path: &str,
        reader: &mut Option<ChunkReader>,
        session: &mut UploadSession,
    ) -> Result<UploadedItem, UploadError> {
        let ctx = self.ctx;
        let path = plan.file.relative_path.as_str();
        let total = plan.size();
        let mut backoff = ctx.retry.start();

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            if session.is_expired(Utc::now(), ctx.session_expiry_margin) {
                *session = self.renew(plan, remote_path, session, "expiry reached").await?;
                continue;
            }

            let Some(range) = plan.range_at(session.acked()) else {
                return Err(UploadError::PermanentHttp {
                    status: None,
                    message: "server acknowledged every byte without returning the item".into(),
                });
            };
            let data = match reader.as_mut() {
                Some(reader) => reader.read(range).await?,
                None => Vec::new(),
            };
            self.transition(plan, SessionState::Uploading);

            match ctx.transport.put_range(session.upload_url(), range, total, data).await {
                Ok(RangeAck::Completed(item)) => {
                    let before = session.acked();
                    session.acknowledge(total);
                    ctx.meter.record(total - before);
                    ctx.events.emit(UploadEvent::ChunkAcknowledged {
                        path: path.to_string(),
                        acked: total,
                        total,
                    });
                    return Ok(item);
                }
                Ok(RangeAck::Accepted {
                    next_expected,
                    expires_at,
                }) => {
                    session.refresh_expiry(expires_at);
                    let before = session.acked();
                    let acked = session.acknowledge(next_expected.unwrap_or(range.end()));
                    ctx.meter.record(acked - before);
                    backoff.reset();
                    debug!(path, acked, total, "range acknowledged");
                    ctx.events.emit(UploadEvent::ChunkAcknowledged {
                        path: path.to_string(),
                        acked,
                        total,
                    });
                }
                Err(UploadError::SessionExpired(reason)) => {
                    *session = self.renew(plan, remote_path, session, &reason).await?;
                }
                Err(err) => {
                    let Some(delay) = backoff.next_delay(&err) else {
                        warn!(path, offset = range.start, "range upload failed: {err}");
                        return Err(err);
                    };
                    self.retries += 1;
                    ctx.notify_retry(path, backoff.retries(), delay, &err);
                    sleep_or_cancel(&ctx.cancel, delay).await?;

                    match self.resync(session).await {
                        Ok(()) => {}
                        Err(UploadError::SessionExpired(reason)) => {
                            *session = self.renew(plan, remote_path, session, &reason).await?;
                        }
                        Err(e) => {
                            debug!(path, "session status unavailable, keeping local offset: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Pulls the server's view of the session after a failed range.
    ///
    /// The server may be ahead of us if it committed a range whose response
    /// was lost.
    async fn resync(&mut self, session: &mut UploadSession) -> Result<(), UploadError> {
        let status = self.ctx.transport.session_status(session.upload_url()).await?;
        session.refresh_expiry(status.expires_at);
        if let Some(next) = status.next_expected {
            let before = session.acked();
            let acked = session.acknowledge(next);
            if acked > before {
                info!(from = before, to = acked, "server is ahead, skipping committed bytes");
                self.ctx.meter.record(acked - before);
            }
        }
        Ok(())
    }

    /// Replaces an expired session.
    ///
    /// Resumes from the bytes the old session kept, but only as far as the
    /// new session reports holding them; otherwise restarts from 0.
    async fn renew(
        &mut self,
        plan: &TransferPlan,
        remote_path: &str,
        old: &UploadSession,
        reason: &str,
    ) -> Result<UploadSession, UploadError> {
        let path = plan.file.relative_path.as_str();
        self.transition(plan, SessionState::SessionExpired);

        if self.renewals >= self.ctx.max_session_renewals {
            return Err(UploadError::SessionExpired(format!(
                "{reason} (gave up after {} renewals)",
                self.renewals
            )));
        }
        self.renewals += 1;

        let retained = match self.ctx.transport.session_status(old.upload_url()).await {
            Ok(status) => status.next_expected.unwrap_or(0).min(plan.size()),
            Err(_) => 0,
        };
        debug!(path, reason, retained, "upload session expired, opening a new one");

        let session = self.open_session(plan, remote_path).await?;
        let resume_from = if retained > 0 {
            self.held_by(&session, retained).await
        } else {
            0
        };
        info!(path, reason, resume_from, "upload session renewed");
        self.ctx.events.emit(UploadEvent::SessionRenewed {
            path: path.to_string(),
            resume_from,
        });
        Ok(session.with_retained(resume_from))
    }

    /// How much of `retained` the new session actually holds.
    async fn held_by(&self, session: &UploadSession, retained: u64) -> u64 {
        match self.ctx.transport.session_status(session.upload_url()).await {
            Ok(status) => status.next_expected.unwrap_or(0).min(retained),
            Err(e) => {
                debug!("new session status unavailable, restarting from 0: {e}");
                0
            }
        }
    }
}

/// Reads ranges on the blocking pool.
struct ChunkReader {
    inner: Option<RangeReader>,
    path: PathBuf,
    size: u64,
}

impl ChunkReader {
    async fn open(path: PathBuf) -> Result<Self, UploadError> {
        let p = path.clone();
        let reader = tokio::task::spawn_blocking(move || RangeReader::open(&p))
            .await
            .map_err(|e| UploadError::local_io(&path, std::io::Error::other(e)))?
            .map_err(|e| UploadError::from_transfer(&path, e))?;
        let size = reader.file_size();
        Ok(Self {
            inner: Some(reader),
            path,
            size,
        })
    }

    async fn read(&mut self, range: ChunkRange) -> Result<Vec<u8>, UploadError> {
        let Some(mut reader) = self.inner.take() else {
            return Err(UploadError::local_io(
                &self.path,
                std::io::Error::other("reader lost after a failed read"),
            ));
        };
        let (reader, result) = tokio::task::spawn_blocking(move || {
            let result = reader.read_range(range);
            (reader, result)
        })
        .await
        .map_err(|e| UploadError::local_io(&self.path, std::io::Error::other(e)))?;
        self.inner = Some(reader);
        result.map_err(|e| UploadError::from_transfer(&self.path, e))
    }
}
