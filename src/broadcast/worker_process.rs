use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::errors::{AppError, AppResult};
use crate::protocol::{BroadcastRequest, ProgressEvent};
use crate::worker::EventSink;

use super::relay::EventRelay;

/// What the orchestrator knows once the worker has exited cleanly.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub forwarded: usize,
    pub dropped: usize,
    pub done: Option<ProgressEvent>,
}

/// Spawn one worker, hand it the request on stdin and relay its events.
///
/// stdout is relayed while stderr is captured on a separate task, so neither
/// pipe can stall the worker. stderr is only surfaced on a non-zero exit.
pub async fn run_worker<S: EventSink>(
    worker_path: &Path,
    request: &BroadcastRequest,
    surface: S,
) -> AppResult<(RunOutcome, S)> {
    let document = serde_json::to_vec(request)?;
    let run_id = uuid::Uuid::new_v4();

    log::info!(
        "[{}] Spawning worker {} for {} target(s){}",
        run_id,
        worker_path.display(),
        request.targets.len(),
        if request.preview { " (preview)" } else { "" }
    );

    let mut child = Command::new(worker_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::WorkerNotFound {
                    path: worker_path.display().to_string(),
                }
            } else {
                AppError::Io(e)
            }
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Internal("worker stdin was not captured".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Internal("worker stdout was not captured".into()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Internal("worker stderr was not captured".into()))?;

    let stderr_task = tokio::spawn(async move {
        let mut captured = Vec::new();
        if let Err(e) = stderr.read_to_end(&mut captured).await {
            log::warn!("Failed to read worker diagnostics: {}", e);
        }
        String::from_utf8_lossy(&captured).into_owned()
    });

    // Closing stdin marks the end of the request document.
    let write_result = async {
        stdin.write_all(&document).await?;
        stdin.shutdown().await
    }
    .await;
    drop(stdin);
    if let Err(e) = write_result {
        log::warn!("[{}] Failed to write request to worker: {}", run_id, e);
    }

    let mut relay = EventRelay::new(surface);
    if let Err(e) = relay.pump(stdout).await {
        log::warn!("[{}] Worker output stream failed: {}", run_id, e);
    }

    let status = child.wait().await?;
    let diagnostics = stderr_task.await.unwrap_or_else(|e| {
        log::warn!("[{}] Diagnostic capture task failed: {}", run_id, e);
        String::new()
    });

    if !status.success() {
        let code = status.code().unwrap_or(-1);
        log::error!("[{}] Worker exited with code {}", run_id, code);
        return Err(AppError::WorkerFailed {
            code,
            stderr: diagnostics.trim().to_string(),
        });
    }

    if relay.done_event().is_none() {
        log::warn!("[{}] Worker exited without a done event", run_id);
    }
    if relay.dropped() > 0 {
        log::debug!(
            "[{}] Dropped {} unparseable output line(s)",
            run_id,
            relay.dropped()
        );
    }

    let outcome = RunOutcome {
        forwarded: relay.forwarded(),
        dropped: relay.dropped(),
        done: relay.done_event().cloned(),
    };
    Ok((outcome, relay.into_surface()))
}
