//! Upload engine: walk a local tree and push it to a document library.
//!
//! This crate holds the **business logic** only. The HTTP side is reached
//! through the [`Transport`] and [`TokenFetcher`] traits, which the Graph
//! crate implements; tests drive the same code with in-memory fakes.
//!
//! # Pipeline
//!
//! 1. **Walk**: enumerate regular files under the root
//! 2. **Plan**: pick Simple or Chunked per file
//! 3. **Upload**: one PUT, or an upload session with ordered byte ranges
//! 4. **Aggregate**: fold per-file results into a [`Summary`]

pub mod chunked;
pub mod context;
pub mod dry_run;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod simple;
pub mod token;
pub mod transport;
pub mod types;
pub mod walker;

#[cfg(test)]
pub(crate) mod testing;

pub use chunked::{ChunkedUploader, SessionState};
pub use context::{Attempt, EventSink, UploadContext};
pub use dry_run::{OfflineToken, PlannedRequest, RecordingTransport};
pub use error::{ErrorKind, UploadError};
pub use orchestrator::Orchestrator;
pub use retry::{Backoff, RetryPolicy};
pub use simple::SimpleUploader;
pub use token::{AccessToken, TokenFetcher, TokenProvider, TokenSource};
pub use transport::{
    RangeAck, SessionInfo, SessionStatus, Transport, TransportFuture, UploadedItem,
};
pub use types::{
    ConflictBehavior, Credentials, EngineConfig, FailureRecord, Outcome, Summary, TransferResult,
    UploadEvent, UploadTarget, WalkOptions,
};
pub use walker::{FileWalker, count_files};
