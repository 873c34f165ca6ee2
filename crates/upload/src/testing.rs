//! In-memory document library for uploader and orchestrator tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use docpush_transfer::{ChunkRange, LocalFile, PlannerConfig};

use crate::context::UploadContext;
use crate::dry_run::{OfflineToken, PlannedRequest};
use crate::error::UploadError;
use crate::retry::RetryPolicy;
use crate::token::{AccessToken, TokenSource};
use crate::transport::{
    RangeAck, SessionInfo, SessionStatus, Transport, TransportFuture, UploadedItem,
};
use crate::types::{ConflictBehavior, Credentials, EngineConfig, UploadTarget, WalkOptions};

/// Failure injected on the n-th call (1-based) of a request kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Range PUT fails transiently; with `commit` the bytes are stored first.
    RangeTransient { call: usize, status: u16, commit: bool },
    RangePermanent { call: usize, status: u16 },
    /// The range is accepted, then the session expires.
    ExpireAfterRange { call: usize },
    /// The range is accepted with an expiry of now; the session stays usable.
    ExpiryDueAfterRange { call: usize },
    ContentTransient {
        call: usize,
        status: u16,
        retry_after: Option<Duration>,
    },
    ContentPermanent { call: usize, status: u16 },
}

struct StoredFile {
    data: Vec<u8>,
    content_type: String,
}

struct RemoteSession {
    remote_path: String,
    total: u64,
    data: Vec<u8>,
    expired: bool,
}

#[derive(Default)]
struct State {
    files: HashMap<String, StoredFile>,
    folders: Vec<String>,
    sessions: HashMap<String, RemoteSession>,
    retained: HashMap<String, Vec<u8>>,
    retain_on_expiry: bool,
    missing_library: bool,
    session_lifetime: Option<chrono::Duration>,
    faults: Vec<Fault>,
    log: Vec<PlannedRequest>,
    ranges: Vec<ChunkRange>,
    next_session: usize,
    content_calls: usize,
    range_calls: usize,
    status_calls: usize,
    cancelled: usize,
}

/// Fake remote that behaves like an upload-session API.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
    latency: Mutex<Option<Duration>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

fn transient(status: u16, retry_after: Option<Duration>) -> UploadError {
    UploadError::TransientHttp {
        status: Some(status),
        message: format!("HTTP {status}"),
        retry_after,
    }
}

fn permanent(status: u16) -> UploadError {
    UploadError::PermanentHttp {
        status: Some(status),
        message: format!("HTTP {status}"),
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn inject(&self, fault: Fault) {
        self.state().faults.push(fault);
    }

    /// Expired sessions keep their bytes and hand them to the next session.
    pub fn retain_on_expiry(&self) {
        self.state().retain_on_expiry = true;
    }

    /// The target library does not exist.
    pub fn remove_library(&self) {
        self.state().missing_library = true;
    }

    pub fn session_lifetime(&self, lifetime: chrono::Duration) {
        self.state().session_lifetime = Some(lifetime);
    }

    /// Every request sleeps this long, so overlapping calls can be observed.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn file(&self, remote_path: &str) -> Option<Vec<u8>> {
        self.state().files.get(remote_path).map(|f| f.data.clone())
    }

    pub fn content_type(&self, remote_path: &str) -> Option<String> {
        self.state()
            .files
            .get(remote_path)
            .map(|f| f.content_type.clone())
    }

    pub fn folders(&self) -> Vec<String> {
        self.state().folders.clone()
    }

    pub fn requests(&self) -> Vec<PlannedRequest> {
        self.state().log.clone()
    }

    /// `(start, len)` of every range PUT, in order.
    pub fn range_log(&self) -> Vec<(u64, u64)> {
        self.state().ranges.iter().map(|r| (r.start, r.len)).collect()
    }

    pub fn range_starts(&self) -> Vec<u64> {
        self.state().ranges.iter().map(|r| r.start).collect()
    }

    pub fn content_puts(&self) -> usize {
        self.state().content_calls
    }

    pub fn sessions_created(&self) -> usize {
        self.state().next_session
    }

    pub fn status_queries(&self) -> usize {
        self.state().status_calls
    }

    pub fn cancelled_sessions(&self) -> usize {
        self.state().cancelled
    }

    /// Highest number of requests that were in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        InFlight(&self.active)
    }

    fn expires_at(state: &State) -> Option<chrono::DateTime<Utc>> {
        state.session_lifetime.map(|l| Utc::now() + l)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Transport for MemoryRemote {
    fn check_target<'a>(&'a self, _token: &'a AccessToken) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            if self.state().missing_library {
                return Err(UploadError::Config("document library not found".into()));
            }
            Ok(())
        })
    }

    fn ensure_folder<'a>(
        &'a self,
        _token: &'a AccessToken,
        folder: &'a str,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.enter().await;
            let mut state = self.state();
            state.log.push(PlannedRequest::EnsureFolder {
                folder: folder.to_string(),
            });
            if !state.folders.iter().any(|f| f == folder) {
                state.folders.push(folder.to_string());
            }
            Ok(())
        })
    }

    fn put_content<'a>(
        &'a self,
        _token: &'a AccessToken,
        remote_path: &'a str,
        content_type: &'a str,
        _conflict: ConflictBehavior,
        _size: u64,
        data: Vec<u8>,
    ) -> TransportFuture<'a, UploadedItem> {
        Box::pin(async move {
            let _guard = self.enter().await;
            let mut state = self.state();
            state.content_calls += 1;
            let call = state.content_calls;
            let size = data.len() as u64;
            state.log.push(PlannedRequest::PutContent {
                remote_path: remote_path.to_string(),
                size,
                content_type: content_type.to_string(),
            });

            for fault in &state.faults {
                match *fault {
                    Fault::ContentTransient {
                        call: c,
                        status,
                        retry_after,
                    } if c == call => return Err(transient(status, retry_after)),
                    Fault::ContentPermanent { call: c, status } if c == call => {
                        return Err(permanent(status));
                    }
                    _ => {}
                }
            }

            state.files.insert(
                remote_path.to_string(),
                StoredFile {
                    data,
                    content_type: content_type.to_string(),
                },
            );
            Ok(UploadedItem {
                id: Some(format!("item-{call}")),
                remote_path: remote_path.to_string(),
                size: Some(size),
                web_url: None,
            })
        })
    }

    fn create_session<'a>(
        &'a self,
        _token: &'a AccessToken,
        remote_path: &'a str,
        size: u64,
        _conflict: ConflictBehavior,
    ) -> TransportFuture<'a, SessionInfo> {
        Box::pin(async move {
            let _guard = self.enter().await;
            let mut state = self.state();
            state.log.push(PlannedRequest::CreateSession {
                remote_path: remote_path.to_string(),
                size,
            });
            state.next_session += 1;
            let upload_url = format!("memory://session/{}", state.next_session);
            let data = state.retained.remove(remote_path).unwrap_or_default();
            let expires_at = Self::expires_at(&state);
            state.sessions.insert(
                upload_url.clone(),
                RemoteSession {
                    remote_path: remote_path.to_string(),
                    total: size,
                    data,
                    expired: false,
                },
            );
            Ok(SessionInfo {
                upload_url,
                expires_at,
            })
        })
    }

    fn put_range<'a>(
        &'a self,
        upload_url: &'a str,
        range: ChunkRange,
        total: u64,
        data: Vec<u8>,
    ) -> TransportFuture<'a, RangeAck> {
        Box::pin(async move {
            let _guard = self.enter().await;
            let mut guard = self.state();
            let state = &mut *guard;
            state.range_calls += 1;
            let call = state.range_calls;
            state.ranges.push(range);

            let Some(session) = state.sessions.get_mut(upload_url) else {
                return Err(UploadError::SessionExpired(format!("{upload_url} not found")));
            };
            if session.expired {
                return Err(UploadError::SessionExpired(format!("{upload_url} expired")));
            }
            state.log.push(PlannedRequest::PutRange {
                remote_path: session.remote_path.clone(),
                range,
                total,
            });

            let in_order = range.start == session.data.len() as u64 && total == session.total;
            let mut expire_after = false;
            let mut expiry_due = false;
            for fault in &state.faults {
                match *fault {
                    Fault::RangeTransient {
                        call: c,
                        status,
                        commit,
                    } if c == call => {
                        if commit && in_order {
                            session.data.extend_from_slice(&data);
                        }
                        return Err(transient(status, None));
                    }
                    Fault::RangePermanent { call: c, status } if c == call => {
                        return Err(permanent(status));
                    }
                    Fault::ExpireAfterRange { call: c } if c == call => expire_after = true,
                    Fault::ExpiryDueAfterRange { call: c } if c == call => expiry_due = true,
                    _ => {}
                }
            }

            if !in_order {
                return Err(transient(416, None));
            }
            session.data.extend_from_slice(&data);
            let stored = session.data.len() as u64;

            if stored >= session.total {
                let session = state
                    .sessions
                    .remove(upload_url)
                    .expect("session present");
                let remote_path = session.remote_path.clone();
                state.files.insert(
                    remote_path.clone(),
                    StoredFile {
                        data: session.data,
                        content_type: "application/octet-stream".into(),
                    },
                );
                return Ok(RangeAck::Completed(UploadedItem {
                    id: Some(format!("item-{upload_url}")),
                    remote_path,
                    size: Some(total),
                    web_url: None,
                }));
            }

            if expire_after {
                session.expired = true;
                if state.retain_on_expiry {
                    state
                        .retained
                        .insert(session.remote_path.clone(), session.data.clone());
                }
            }
            let expires_at = if expiry_due {
                Some(Utc::now())
            } else {
                state.session_lifetime.map(|l| Utc::now() + l)
            };
            Ok(RangeAck::Accepted {
                next_expected: Some(stored),
                expires_at,
            })
        })
    }

    fn session_status<'a>(&'a self, upload_url: &'a str) -> TransportFuture<'a, SessionStatus> {
        Box::pin(async move {
            let _guard = self.enter().await;
            let mut state = self.state();
            state.status_calls += 1;
            let retain = state.retain_on_expiry;
            match state.sessions.get(upload_url) {
                Some(s) if !s.expired || retain => Ok(SessionStatus {
                    next_expected: Some(s.data.len() as u64),
                    expires_at: None,
                }),
                _ => Err(UploadError::SessionExpired(format!("{upload_url} not found"))),
            }
        })
    }

    fn cancel_session<'a>(&'a self, upload_url: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state();
            state.cancelled += 1;
            state.sessions.remove(upload_url);
            Ok(())
        })
    }
}

/// Token source that always refuses, counting calls.
#[derive(Default)]
pub struct DeniedTokens {
    pub calls: AtomicUsize,
}

impl TokenSource for DeniedTokens {
    fn get_token(
        &self,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<AccessToken, UploadError>> + Send + '_>,
    > {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(UploadError::Auth("AADSTS7000215: invalid client secret".into()))
        })
    }
}

/// Retry policy without jitter so timings are exact.
pub fn retry_policy() -> RetryPolicy {
    RetryPolicy {
        jitter: 0.0,
        ..RetryPolicy::default()
    }
}

/// Upload context over `remote` with an offline token.
pub fn context(remote: Arc<MemoryRemote>) -> UploadContext {
    let mut ctx = UploadContext::new(Arc::new(OfflineToken::new()), remote);
    ctx.retry = retry_policy();
    ctx
}

/// Writes `data` to `dir/name` and describes it as a walked file.
pub fn local_file(dir: &Path, name: &str, data: &[u8]) -> LocalFile {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, data).unwrap();
    LocalFile {
        path,
        size: data.len() as u64,
        relative_path: name.to_string(),
    }
}

/// Deterministic, non-repeating-per-chunk content.
pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Engine configuration for uploads from `root`.
pub fn engine_config(root: &Path, planner: PlannerConfig, workers: usize) -> EngineConfig {
    EngineConfig {
        credentials: Credentials {
            tenant_id: "tenant".into(),
            client_id: "client".into(),
            client_secret: "secret".into(),
        },
        target: UploadTarget {
            site_url: "https://contoso.sharepoint.com/sites/Ops".into(),
            library: "Documents".into(),
            folder: Some("Backups/2026".into()),
        },
        root: root.to_path_buf(),
        planner,
        retry: retry_policy(),
        walk: WalkOptions::default(),
        conflict: ConflictBehavior::Replace,
        workers,
        dry_run: false,
        verbose: false,
        max_session_renewals: 3,
        session_expiry_margin: Duration::from_secs(30),
    }
}
