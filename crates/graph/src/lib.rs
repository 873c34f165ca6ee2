//! Microsoft Graph client for uploading into a SharePoint document library.
//!
//! Implements the engine's [`Transport`](docpush_upload::Transport) over the
//! drive-item API and its [`TokenFetcher`](docpush_upload::TokenFetcher) over
//! the client-credentials grant.

pub mod auth;
pub mod client;
pub mod error;
pub mod site;
pub mod types;

pub use auth::{ClientCredentials, DEFAULT_AUTHORITY, GRAPH_SCOPE};
pub use client::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT, GraphClient};
pub use error::GraphError;
pub use site::SiteRef;
pub use types::{DriveItem, ParentReference, UploadSessionResponse};

#[cfg(test)]
pub(crate) mod mock;
