//! Wires the engine to Graph and reports the outcome.

use std::sync::Arc;

use docpush_graph::{ClientCredentials, GraphClient};
use docpush_upload::{
    Orchestrator, Outcome, PlannedRequest, Summary, TokenProvider, UploadEvent,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;

/// JSON report printed with `--json`.
#[derive(Serialize)]
struct Report<'a> {
    summary: &'a Summary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    planned: Vec<PlannedRequest>,
}

/// Runs one upload and returns the process exit status.
pub async fn run(settings: Settings) -> anyhow::Result<i32> {
    let engine = settings.engine;
    let verbose = engine.verbose;

    let mut orchestrator = if engine.dry_run {
        info!(root = %engine.root.display(), "dry run: nothing will be sent");
        Orchestrator::dry_run(engine)
    } else {
        let client = GraphClient::new(&engine.target, settings.timeout)?;
        let fetcher = ClientCredentials::new(engine.credentials.clone(), settings.timeout)?;
        info!(site = %client.site(), library = %engine.target.library, "uploading");
        Orchestrator::new(
            engine,
            Arc::new(TokenProvider::new(Arc::new(fetcher))),
            Arc::new(client),
        )
    };

    let events = orchestrator
        .take_events()
        .map(|rx| tokio::spawn(log_events(rx, verbose)));

    let cancel = orchestrator.cancel_token();
    let interrupt = tokio::spawn(cancel_on_interrupt(cancel.clone()));

    let result = orchestrator.run().await;
    interrupt.abort();

    // Dropping the orchestrator closes the channel; the logger then drains
    // whatever is still buffered.
    let planned = orchestrator.planned_requests();
    drop(orchestrator);
    if let Some(handle) = events {
        match handle.await {
            Ok(logged) => debug!(events = logged, "event log drained"),
            Err(e) => warn!("event logger stopped: {e}"),
        }
    }

    let summary = result?;

    if settings.json {
        let report = Report {
            summary: &summary,
            planned,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&summary, &planned);
    }

    Ok(summary.exit_code())
}

async fn cancel_on_interrupt(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, letting in-flight requests finish");
        cancel.cancel();
    }
}

/// Drains progress events into the log until the channel closes; returns
/// how many were handled.
async fn log_events(mut rx: mpsc::Receiver<UploadEvent>, verbose: bool) -> usize {
    let mut handled = 0;
    while let Some(event) = rx.recv().await {
        handled += 1;
        match event {
            UploadEvent::ChunkAcknowledged { path, acked, total } if verbose => {
                let pct = if total == 0 {
                    100.0
                } else {
                    acked as f64 * 100.0 / total as f64
                };
                info!(path = %path, acked, total, "{pct:.1}% uploaded");
            }
            UploadEvent::SessionRenewed { path, resume_from } => {
                info!(path = %path, resume_from, "upload session renewed");
            }
            other => debug!(event = ?other, "upload event"),
        }
    }
    handled
}

fn print_summary(summary: &Summary, planned: &[PlannedRequest]) {
    if summary.dry_run {
        for request in planned {
            println!("  {request}");
        }
        println!();
    }

    for result in &summary.results {
        match &result.outcome {
            Outcome::Uploaded { remote_path, .. } => {
                println!("uploaded  {} -> {remote_path}", result.path);
            }
            Outcome::Planned { remote_path } => {
                println!("planned   {} -> {remote_path}", result.path);
            }
            Outcome::Failed { .. } => {}
        }
    }

    for failure in &summary.failures {
        println!(
            "FAILED    {} [{}] {} (retries: {})",
            failure.path, failure.kind, failure.message, failure.retries
        );
    }

    let verb = if summary.dry_run { "planned" } else { "uploaded" };
    println!(
        "\n{} {verb}, {} failed, {} skipped, {} bytes, {} retries",
        summary.succeeded, summary.failed, summary.skipped, summary.bytes, summary.retries
    );
    if let Some(fatal) = &summary.fatal {
        println!("aborted: {fatal}");
    }
}
