//! Single-request upload for small files.

use docpush_transfer::{TransferPlan, detect_content_type};
use tracing::debug;

use crate::context::{Attempt, UploadContext};
use crate::error::UploadError;
use crate::transport::UploadedItem;

/// Writes a whole file with one PUT, retrying transient failures.
pub struct SimpleUploader<'a> {
    ctx: &'a UploadContext,
}

impl<'a> SimpleUploader<'a> {
    pub fn new(ctx: &'a UploadContext) -> Self {
        Self { ctx }
    }

    pub async fn upload(&self, plan: &TransferPlan, remote_path: &str) -> Attempt<UploadedItem> {
        let ctx = self.ctx;
        let file = &plan.file;
        // Read once; every retry resends the same bytes.
        let (data, size) = if ctx.transport.reads_payload() {
            match tokio::fs::read(&file.path).await {
                Ok(data) => {
                    let size = data.len() as u64;
                    (data, size)
                }
                Err(e) => return Attempt::new(Err(UploadError::local_io(&file.path, e)), 0),
            }
        } else {
            (Vec::new(), plan.size())
        };
        let content_type = detect_content_type(&file.path);
        debug!(path = %file.relative_path, size, content_type, "simple upload");

        let (result, retries) = ctx
            .retry
            .run(
                &ctx.cancel,
                |attempt, delay, err| ctx.notify_retry(&file.relative_path, attempt, delay, err),
                || {
                    let data = data.clone();
                    async move {
                        let token = ctx.tokens.get_token().await?;
                        ctx.transport
                            .put_content(&token, remote_path, content_type, ctx.conflict, size, data)
                            .await
                    }
                },
            )
            .await;

        if result.is_ok() {
            ctx.meter.record(size);
        }
        Attempt::new(result, retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{Fault, MemoryRemote, context, local_file};
    use docpush_transfer::{PlannerConfig, checksum_bytes, plan};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn uploads_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = local_file(dir.path(), "notes.txt", b"hello world");
        let remote = Arc::new(MemoryRemote::new());
        let ctx = context(remote.clone());

        let plan = plan(file, &PlannerConfig::default());
        let attempt = SimpleUploader::new(&ctx).upload(&plan, "Docs/notes.txt").await;

        let item = attempt.result.unwrap();
        assert_eq!(item.remote_path, "Docs/notes.txt");
        assert_eq!(attempt.retries, 0);
        assert_eq!(remote.file("Docs/notes.txt").unwrap(), b"hello world");
        assert_eq!(remote.content_type("Docs/notes.txt").as_deref(), Some("text/plain"));
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_skips_content_reads() {
        let recorder = Arc::new(crate::dry_run::RecordingTransport::new());
        let ctx = UploadContext::new(Arc::new(crate::dry_run::OfflineToken::new()), recorder.clone());
        // Never written to disk; only the walked size is used.
        let file = docpush_transfer::LocalFile {
            path: std::path::PathBuf::from("/nonexistent/notes.txt"),
            size: 11,
            relative_path: "notes.txt".into(),
        };

        let plan = plan(file, &PlannerConfig::default());
        let attempt = SimpleUploader::new(&ctx).upload(&plan, "Docs/notes.txt").await;

        assert_eq!(attempt.result.unwrap().size, Some(11));
        assert_eq!(
            recorder.requests(),
            vec![crate::dry_run::PlannedRequest::PutContent {
                remote_path: "Docs/notes.txt".into(),
                size: 11,
                content_type: "text/plain".into(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let file = local_file(dir.path(), "a.bin", &[7u8; 64]);
        let remote = Arc::new(MemoryRemote::new());
        remote.inject(Fault::ContentTransient {
            call: 1,
            status: 503,
            retry_after: None,
        });
        remote.inject(Fault::ContentTransient {
            call: 2,
            status: 429,
            retry_after: Some(Duration::from_secs(3)),
        });
        let ctx = context(remote.clone());

        let plan = plan(file, &PlannerConfig::default());
        let attempt = SimpleUploader::new(&ctx).upload(&plan, "a.bin").await;

        assert!(attempt.result.is_ok());
        assert_eq!(attempt.retries, 2);
        assert_eq!(remote.content_puts(), 3);
        assert_eq!(checksum_bytes(&remote.file("a.bin").unwrap()), checksum_bytes(&[7u8; 64]));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let file = local_file(dir.path(), "a.bin", b"abc");
        let remote = Arc::new(MemoryRemote::new());
        remote.inject(Fault::ContentPermanent { call: 1, status: 403 });
        let ctx = context(remote.clone());

        let plan = plan(file, &PlannerConfig::default());
        let attempt = SimpleUploader::new(&ctx).upload(&plan, "a.bin").await;

        assert_eq!(attempt.result.unwrap_err().kind(), ErrorKind::PermanentHttp);
        assert_eq!(attempt.retries, 0);
        assert_eq!(remote.content_puts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let file = local_file(dir.path(), "a.bin", b"abc");
        let remote = Arc::new(MemoryRemote::new());
        for call in 1..=10 {
            remote.inject(Fault::ContentTransient {
                call,
                status: 500,
                retry_after: None,
            });
        }
        let ctx = context(remote.clone());

        let plan = plan(file, &PlannerConfig::default());
        let attempt = SimpleUploader::new(&ctx).upload(&plan, "a.bin").await;

        assert_eq!(attempt.result.unwrap_err().kind(), ErrorKind::TransientHttp);
        assert_eq!(remote.content_puts(), ctx.retry.max_attempts as usize);
        assert_eq!(attempt.retries, ctx.retry.max_attempts - 1);
    }

    #[tokio::test]
    async fn missing_file_is_local_io() {
        let dir = tempfile::tempdir().unwrap();
        let file = local_file(dir.path(), "gone.txt", b"x");
        std::fs::remove_file(&file.path).unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let ctx = context(remote.clone());

        let plan = plan(file, &PlannerConfig::default());
        let attempt = SimpleUploader::new(&ctx).upload(&plan, "gone.txt").await;

        assert_eq!(attempt.result.unwrap_err().kind(), ErrorKind::LocalIo);
        assert_eq!(remote.content_puts(), 0);
    }
}
