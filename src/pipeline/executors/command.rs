//! Shared subprocess plumbing for executor stages that shell out.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{StageError, StageResult};

/// Lines of stderr kept for the failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Substitute `{name}` placeholders in a command template.
pub fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// Run a shell command, honoring cancellation.
///
/// The child is spawned through `sh -c` with piped output. Every output
/// line is appended to `log_path` so operators can read a stage's full log
/// back later; the stderr tail is additionally kept for the failure message
/// on a non-zero exit. Cancellation kills the child and reports
/// [`StageError::Cancelled`].
pub async fn run_command(
    command_line: &str,
    log_path: &Path,
    cancellation: &CancellationToken,
) -> StageResult {
    debug!(command = %command_line, log = %log_path.display(), "spawning stage command");

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let log = Arc::new(Mutex::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await?,
    ));

    let mut child = Command::new("sh")
        .args(["-c", command_line])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| StageError::Failed(format!("failed to spawn command: {e}")))?;

    let stdout_task = child.stdout.take().map(|stdout| {
        let log = log.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("stdout: {line}");
                append_log_line(&log, &line).await;
            }
        })
    });

    let stderr_task = child.stderr.take().map(|stderr| {
        let log = log.clone();
        tokio::spawn(async move {
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("stderr: {line}");
                append_log_line(&log, &line).await;
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail
        })
    });

    let status = tokio::select! {
        status = child.wait() => {
            status.map_err(|e| StageError::Failed(format!("failed to wait on command: {e}")))?
        }
        _ = cancellation.cancelled() => {
            if let Err(e) = child.start_kill() {
                warn!("failed to kill cancelled command: {e}");
            }
            let _ = child.wait().await;
            return Err(StageError::Cancelled);
        }
    };

    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    let stderr_tail = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => VecDeque::new(),
    };

    if let Err(e) = log.lock().await.flush().await {
        warn!(log = %log_path.display(), "failed to flush stage log: {e}");
    }

    if status.success() {
        Ok(())
    } else {
        let tail: Vec<String> = stderr_tail.into_iter().collect();
        Err(StageError::Failed(format!(
            "command exited with {}: {}",
            status,
            tail.join(" | ")
        )))
    }
}

async fn append_log_line(log: &Mutex<fs::File>, line: &str) {
    let mut file = log.lock().await;
    if let Err(e) = file.write_all(line.as_bytes()).await {
        warn!("failed to write stage log line: {e}");
        return;
    }
    let _ = file.write_all(b"\n").await;
}
