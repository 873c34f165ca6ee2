//! Microsoft Graph drive client.
//!
//! Async HTTP client using `reqwest`. Calls against the drive carry the
//! bearer token handed in by the engine; upload-session URLs are
//! pre-authenticated and are called without it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use docpush_transfer::ChunkRange;
use docpush_upload::{
    AccessToken, ConflictBehavior, RangeAck, SessionInfo, SessionStatus, Transport,
    TransportFuture, UploadError, UploadTarget, UploadedItem,
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::GraphError;
use crate::site::SiteRef;
use crate::types::{
    CreateSessionRequest, DriveItem, DrivesResponse, NewFolder, SessionItem, SiteResponse,
    UploadSessionResponse,
};

pub const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Graph client bound to one document library.
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    site: SiteRef,
    library: String,
    drive_id: OnceCell<String>,
}

impl GraphClient {
    /// Creates a client for `target`; the drive is resolved on first use.
    pub fn new(target: &UploadTarget, timeout: Duration) -> Result<Self, GraphError> {
        let site = SiteRef::parse(&target.site_url)?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            site,
            library: target.library.clone(),
            drive_id: OnceCell::new(),
        })
    }

    /// Sets a custom base URL (national clouds, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn site(&self) -> &SiteRef {
        &self.site
    }

    /// Drive id of the target library, resolved once per client.
    pub async fn drive_id(&self, token: &AccessToken) -> Result<&str, GraphError> {
        self.drive_id
            .get_or_try_init(|| self.resolve_drive(token))
            .await
            .map(String::as_str)
    }

    async fn resolve_site(&self, token: &AccessToken) -> Result<String, GraphError> {
        let url = format!(
            "{}/sites/{}:/{}/{}?$select=id",
            self.base_url,
            self.site.host,
            self.site.kind,
            encode_segment(&self.site.name)
        );
        let resp = check(self.http.get(&url).bearer_auth(token.secret()).send().await?).await?;
        let site: SiteResponse = serde_json::from_slice(&resp.bytes().await?)?;
        debug!(site = %self.site, site_id = %site.id, "resolved site");
        Ok(site.id)
    }

    async fn resolve_drive(&self, token: &AccessToken) -> Result<String, GraphError> {
        let site_id = self.resolve_site(token).await?;
        let url = format!("{}/sites/{}/drives", self.base_url, site_id);
        let resp = check(self.http.get(&url).bearer_auth(token.secret()).send().await?).await?;
        let drives: DrivesResponse = serde_json::from_slice(&resp.bytes().await?)?;

        let matches = |name: &Option<String>| name.as_deref() == Some(self.library.as_str());
        if let Some(drive) = drives
            .value
            .iter()
            .find(|d| matches(&d.name) || matches(&d.display_name))
        {
            info!(library = %self.library, drive_id = %drive.id, "resolved document library");
            return Ok(drive.id.clone());
        }

        let available: Vec<&str> = drives
            .value
            .iter()
            .filter_map(|d| d.display_name.as_deref().or(d.name.as_deref()))
            .collect();
        Err(GraphError::NotFound(format!(
            "document library '{}' not found on {}; available: {}",
            self.library,
            self.site,
            available.join(", ")
        )))
    }

    /// URL of the item at `path` (relative to the library root).
    fn item_url(&self, drive_id: &str, path: &str) -> String {
        let encoded = encode_path(path);
        if encoded.is_empty() {
            format!("{}/drives/{drive_id}/root", self.base_url)
        } else {
            format!("{}/drives/{drive_id}/root:/{encoded}", self.base_url)
        }
    }

    /// Looks up an item by path; `None` if it does not exist.
    pub async fn item_by_path(
        &self,
        token: &AccessToken,
        path: &str,
    ) -> Result<Option<DriveItem>, GraphError> {
        let drive_id = self.drive_id(token).await?;
        let url = self.item_url(drive_id, path);
        let resp = self.http.get(&url).bearer_auth(token.secret()).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check(resp).await?;
        Ok(Some(serde_json::from_slice(&resp.bytes().await?)?))
    }

    /// Creates every missing folder along `folder` and returns the last one.
    pub async fn ensure_folder_path(
        &self,
        token: &AccessToken,
        folder: &str,
    ) -> Result<DriveItem, GraphError> {
        let mut current = self
            .item_by_path(token, "")
            .await?
            .ok_or_else(|| GraphError::NotFound("drive root not found".into()))?;

        let mut walked = String::new();
        for segment in folder.split('/').filter(|s| !s.is_empty()) {
            if !walked.is_empty() {
                walked.push('/');
            }
            walked.push_str(segment);

            current = match self.item_by_path(token, &walked).await? {
                Some(item) if item.is_folder() => item,
                Some(_) => {
                    return Err(GraphError::api(
                        409,
                        &format!("'{walked}' exists and is not a folder"),
                        None,
                    ));
                }
                None => self.create_folder(token, &current.id, segment, &walked).await?,
            };
        }
        Ok(current)
    }

    async fn create_folder(
        &self,
        token: &AccessToken,
        parent_id: &str,
        name: &str,
        path: &str,
    ) -> Result<DriveItem, GraphError> {
        let drive_id = self.drive_id(token).await?;
        let url = format!(
            "{}/drives/{drive_id}/items/{parent_id}/children",
            self.base_url
        );
        let body = NewFolder {
            name,
            folder: serde_json::Map::new(),
            conflict_behavior: ConflictBehavior::Fail.as_str(),
        };
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token.secret())
            .json(&body)
            .send()
            .await?;

        // Another worker or user created it first.
        if resp.status() == StatusCode::CONFLICT {
            debug!(folder = %path, "folder appeared concurrently");
            return self
                .item_by_path(token, path)
                .await?
                .ok_or_else(|| GraphError::NotFound(format!("folder '{path}' vanished")));
        }

        let resp = check(resp).await?;
        info!(folder = %path, "created folder");
        Ok(serde_json::from_slice(&resp.bytes().await?)?)
    }

    async fn upload_content(
        &self,
        token: &AccessToken,
        remote_path: &str,
        content_type: &str,
        conflict: ConflictBehavior,
        data: Vec<u8>,
    ) -> Result<DriveItem, GraphError> {
        let drive_id = self.drive_id(token).await?;
        let url = format!(
            "{}:/content?@microsoft.graph.conflictBehavior={}",
            self.item_url(drive_id, remote_path),
            conflict.as_str()
        );
        debug!(remote = %remote_path, bytes = data.len(), "PUT content");
        let resp = self
            .http
            .put(&url)
            .bearer_auth(token.secret())
            .header(CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await?;
        let resp = check(resp).await?;
        Ok(serde_json::from_slice(&resp.bytes().await?)?)
    }

    async fn open_session(
        &self,
        token: &AccessToken,
        remote_path: &str,
        size: u64,
        conflict: ConflictBehavior,
    ) -> Result<UploadSessionResponse, GraphError> {
        let drive_id = self.drive_id(token).await?;
        let url = format!(
            "{}:/createUploadSession",
            self.item_url(drive_id, remote_path)
        );
        let body = CreateSessionRequest {
            item: SessionItem {
                conflict_behavior: conflict.as_str(),
            },
            defer_commit: false,
        };
        debug!(remote = %remote_path, size, "creating upload session");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token.secret())
            .json(&body)
            .send()
            .await?;
        let resp = check(resp).await?;
        Ok(serde_json::from_slice(&resp.bytes().await?)?)
    }

    async fn send_range(
        &self,
        upload_url: &str,
        range: ChunkRange,
        total: u64,
        data: Vec<u8>,
    ) -> Result<RangeAck, GraphError> {
        let resp = self
            .http
            .put(upload_url)
            .header(CONTENT_RANGE, range.content_range(total))
            .body(data)
            .send()
            .await?;
        let resp = check(resp).await?;

        if resp.status() == StatusCode::ACCEPTED {
            let session: UploadSessionResponse = serde_json::from_slice(&resp.bytes().await?)?;
            return Ok(RangeAck::Accepted {
                next_expected: session.next_expected(),
                expires_at: session.expiration_date_time,
            });
        }

        let item: DriveItem = serde_json::from_slice(&resp.bytes().await?)?;
        Ok(RangeAck::Completed(uploaded(item)))
    }

    async fn query_session(&self, upload_url: &str) -> Result<SessionStatus, GraphError> {
        let resp = check(self.http.get(upload_url).send().await?).await?;
        let session: UploadSessionResponse = serde_json::from_slice(&resp.bytes().await?)?;
        Ok(SessionStatus {
            next_expected: session.next_expected(),
            expires_at: session.expiration_date_time,
        })
    }

    async fn delete_session(&self, upload_url: &str) -> Result<(), GraphError> {
        let resp = self.http.delete(upload_url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(resp).await?;
        Ok(())
    }
}

impl Transport for GraphClient {
    fn check_target<'a>(&'a self, token: &'a AccessToken) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.drive_id(token).await?;
            Ok(())
        })
    }

    fn ensure_folder<'a>(
        &'a self,
        token: &'a AccessToken,
        folder: &'a str,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_folder_path(token, folder).await?;
            Ok(())
        })
    }

    fn put_content<'a>(
        &'a self,
        token: &'a AccessToken,
        remote_path: &'a str,
        content_type: &'a str,
        conflict: ConflictBehavior,
        _size: u64,
        data: Vec<u8>,
    ) -> TransportFuture<'a, UploadedItem> {
        Box::pin(async move {
            let item = self
                .upload_content(token, remote_path, content_type, conflict, data)
                .await?;
            Ok(uploaded(item))
        })
    }

    fn create_session<'a>(
        &'a self,
        token: &'a AccessToken,
        remote_path: &'a str,
        size: u64,
        conflict: ConflictBehavior,
    ) -> TransportFuture<'a, SessionInfo> {
        Box::pin(async move {
            let session = self.open_session(token, remote_path, size, conflict).await?;
            let upload_url = session.upload_url.ok_or_else(|| UploadError::PermanentHttp {
                status: None,
                message: format!("upload session for {remote_path} returned no uploadUrl"),
            })?;
            Ok(SessionInfo {
                upload_url,
                expires_at: session.expiration_date_time,
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
            self.send_range(upload_url, range, total, data)
                .await
                .map_err(GraphError::into_session_error)
        })
    }

    fn session_status<'a>(&'a self, upload_url: &'a str) -> TransportFuture<'a, SessionStatus> {
        Box::pin(async move {
            self.query_session(upload_url)
                .await
                .map_err(GraphError::into_session_error)
        })
    }

    fn cancel_session<'a>(&'a self, upload_url: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.delete_session(upload_url)
                .await
                .map_err(GraphError::into_session_error)
        })
    }
}

fn uploaded(item: DriveItem) -> UploadedItem {
    UploadedItem {
        remote_path: item.library_path(),
        id: Some(item.id),
        size: item.size,
        web_url: item.web_url,
    }
}

/// Passes a successful response through; turns any other into an API error.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, GraphError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = parse_retry_after(resp.headers(), Utc::now());
    let body = resp.text().await.unwrap_or_default();
    Err(GraphError::api(status.as_u16(), &body, retry_after))
}

/// Reads `Retry-After` as delta-seconds or an HTTP date.
fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, NON_ALPHANUMERIC).to_string()
}

/// Percent-encodes each `/`-separated segment, dropping empty ones.
fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}
