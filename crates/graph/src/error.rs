//! Graph client errors and their mapping onto the engine taxonomy.

use std::time::Duration;

use docpush_upload::UploadError;

use crate::types::ApiErrorBody;

/// Errors from the Graph client.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid site URL: {0}")]
    InvalidSite(String),

    #[error("{0}")]
    NotFound(String),
}

impl GraphError {
    /// Builds an API error, preferring Graph's `code: message` over raw JSON.
    pub(crate) fn api(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let body = serde_json::from_str::<ApiErrorBody>(body)
            .map(|b| format!("{}: {}", b.error.code, b.error.message))
            .unwrap_or_else(|_| body.trim().to_string());
        Self::Api {
            status,
            body,
            retry_after,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Maps an error from an upload-session URL, where 404 means the session
    /// is gone rather than a missing item.
    pub fn into_session_error(self) -> UploadError {
        match self {
            Self::Api {
                status: 404 | 410,
                body,
                ..
            } => UploadError::SessionExpired(body),
            other => other.into(),
        }
    }
}

/// True for statuses worth retrying.
fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 416 | 429 | 500 | 502 | 503 | 504)
}

impl From<GraphError> for UploadError {
    fn from(err: GraphError) -> Self {
        let message = err.to_string();
        match err {
            GraphError::Http(e) if e.is_builder() => UploadError::PermanentHttp {
                status: None,
                message,
            },
            GraphError::Http(e) => UploadError::TransientHttp {
                status: e.status().map(|s| s.as_u16()),
                message,
                retry_after: None,
            },
            GraphError::Api { status: 401, .. } | GraphError::Auth(_) => UploadError::Auth(message),
            GraphError::Api {
                status,
                retry_after,
                ..
            } if is_transient_status(status) => UploadError::TransientHttp {
                status: Some(status),
                message,
                retry_after,
            },
            GraphError::Api { status, .. } => UploadError::PermanentHttp {
                status: Some(status),
                message,
            },
            GraphError::Json(_) => UploadError::PermanentHttp {
                status: None,
                message,
            },
            GraphError::InvalidSite(_) | GraphError::NotFound(_) => UploadError::Config(message),
        }
    }
}
