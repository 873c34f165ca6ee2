//! Offline stand-ins used when nothing may be sent.
//!
//! [`RecordingTransport`] answers every call locally and records what a real
//! run would have requested; [`OfflineToken`] never contacts the identity
//! provider. The orchestrator and uploaders run unchanged on top of them, so
//! the recorded plan is the one a real run executes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use docpush_transfer::ChunkRange;
use serde::Serialize;

use crate::error::UploadError;
use crate::token::{AccessToken, TokenSource};
use crate::transport::{
    RangeAck, SessionInfo, SessionStatus, Transport, TransportFuture, UploadedItem,
};
use crate::types::ConflictBehavior;

/// A request a real run would issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum PlannedRequest {
    EnsureFolder {
        folder: String,
    },
    PutContent {
        remote_path: String,
        size: u64,
        content_type: String,
    },
    CreateSession {
        remote_path: String,
        size: u64,
    },
    PutRange {
        remote_path: String,
        range: ChunkRange,
        total: u64,
    },
}

impl fmt::Display for PlannedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnsureFolder { folder } => write!(f, "ensure folder {folder}"),
            Self::PutContent {
                remote_path,
                size,
                content_type,
            } => write!(f, "PUT {remote_path} ({size} bytes, {content_type})"),
            Self::CreateSession { remote_path, size } => {
                write!(f, "create upload session {remote_path} ({size} bytes)")
            }
            Self::PutRange {
                remote_path,
                range,
                total,
            } => write!(
                f,
                "PUT range {remote_path} [{}]",
                range.content_range(*total)
            ),
        }
    }
}

/// Transport that records requests instead of sending them.
#[derive(Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<PlannedRequest>>,
    sessions: Mutex<HashMap<String, String>>,
    next_session: AtomicU64,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, in call order.
    pub fn requests(&self) -> Vec<PlannedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn record(&self, request: PlannedRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
    }

    fn session_path(&self, upload_url: &str) -> Result<String, UploadError> {
        self.sessions
            .lock()
            .ok()
            .and_then(|s| s.get(upload_url).cloned())
            .ok_or_else(|| UploadError::SessionExpired(format!("unknown session {upload_url}")))
    }
}

impl Transport for RecordingTransport {
    fn reads_payload(&self) -> bool {
        false
    }

    fn ensure_folder<'a>(
        &'a self,
        _token: &'a AccessToken,
        folder: &'a str,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.record(PlannedRequest::EnsureFolder {
                folder: folder.to_string(),
            });
            Ok(())
        })
    }

    fn put_content<'a>(
        &'a self,
        _token: &'a AccessToken,
        remote_path: &'a str,
        content_type: &'a str,
        _conflict: ConflictBehavior,
        size: u64,
        _data: Vec<u8>,
    ) -> TransportFuture<'a, UploadedItem> {
        Box::pin(async move {
            self.record(PlannedRequest::PutContent {
                remote_path: remote_path.to_string(),
                size,
                content_type: content_type.to_string(),
            });
            Ok(UploadedItem {
                id: None,
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
            self.record(PlannedRequest::CreateSession {
                remote_path: remote_path.to_string(),
                size,
            });
            let n = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
            let upload_url = format!("dry-run://session/{n}");
            if let Ok(mut sessions) = self.sessions.lock() {
                sessions.insert(upload_url.clone(), remote_path.to_string());
            }
            Ok(SessionInfo {
                upload_url,
                expires_at: None,
            })
        })
    }

    fn put_range<'a>(
        &'a self,
        upload_url: &'a str,
        range: ChunkRange,
        total: u64,
        _data: Vec<u8>,
    ) -> TransportFuture<'a, RangeAck> {
        Box::pin(async move {
            let remote_path = self.session_path(upload_url)?;
            self.record(PlannedRequest::PutRange {
                remote_path: remote_path.clone(),
                range,
                total,
            });
            if range.end() >= total {
                return Ok(RangeAck::Completed(UploadedItem {
                    id: None,
                    remote_path,
                    size: Some(total),
                    web_url: None,
                }));
            }
            Ok(RangeAck::Accepted {
                next_expected: Some(range.end()),
                expires_at: None,
            })
        })
    }

    fn session_status<'a>(&'a self, upload_url: &'a str) -> TransportFuture<'a, SessionStatus> {
        Box::pin(async move {
            self.session_path(upload_url)?;
            Ok(SessionStatus::default())
        })
    }

    fn cancel_session<'a>(&'a self, upload_url: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            if let Ok(mut sessions) = self.sessions.lock() {
                sessions.remove(upload_url);
            }
            Ok(())
        })
    }
}

/// Token source that never goes to the network.
#[derive(Debug, Clone)]
pub struct OfflineToken {
    token: AccessToken,
}

impl OfflineToken {
    pub fn new() -> Self {
        Self {
            token: AccessToken::new("offline", DateTime::<Utc>::MAX_UTC),
        }
    }
}

impl Default for OfflineToken {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSource for OfflineToken {
    fn get_token(
        &self,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<AccessToken, UploadError>> + Send + '_>,
    > {
        let token = self.token.clone();
        Box::pin(async move { Ok(token) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_instead_of_sending() {
        let transport = RecordingTransport::new();
        let token = OfflineToken::new().get_token().await.unwrap();

        transport.ensure_folder(&token, "Reports").await.unwrap();
        let session = transport
            .create_session(&token, "Reports/big.bin", 10, ConflictBehavior::Replace)
            .await
            .unwrap();
        let first = transport
            .put_range(&session.upload_url, ChunkRange { start: 0, len: 6 }, 10, vec![0; 6])
            .await
            .unwrap();
        let last = transport
            .put_range(&session.upload_url, ChunkRange { start: 6, len: 4 }, 10, vec![0; 4])
            .await
            .unwrap();

        assert!(matches!(first, RangeAck::Accepted { next_expected: Some(6), .. }));
        assert!(matches!(last, RangeAck::Completed(ref item) if item.remote_path == "Reports/big.bin"));
        assert_eq!(transport.requests().len(), 4);
        assert_eq!(
            transport.requests()[3].to_string(),
            "PUT range Reports/big.bin [bytes 6-9/10]"
        );
    }

    #[tokio::test]
    async fn unknown_session_reports_expiry() {
        let transport = RecordingTransport::new();
        let err = transport.session_status("dry-run://session/9").await.unwrap_err();
        assert!(matches!(err, UploadError::SessionExpired(_)));
    }

    #[test]
    fn planned_request_serializes_with_tag() {
        let json = serde_json::to_value(PlannedRequest::CreateSession {
            remote_path: "a.bin".into(),
            size: 3,
        })
        .unwrap();
        assert_eq!(json["request"], "create_session");
        assert_eq!(json["size"], 3);
    }
}
