use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::Config;
use crate::errors::{AppError, AppResult};

pub const WORKER_BIN_NAME: &str = "broadcast-worker";
pub const CHECK_ENV_FLAG: &str = "--check-env";

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of the pre-flight environment check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EnvironmentReport {
    pub runtime_ok: bool,
    #[serde(default)]
    pub runtime_version: String,
    pub dependency_ok: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl EnvironmentReport {
    pub fn is_ready(&self) -> bool {
        self.runtime_ok && self.dependency_ok
    }

    /// Remediation hint shown next to the warning.
    pub fn remediation(&self) -> Option<&'static str> {
        if !self.runtime_ok {
            Some("Build the worker with: cargo build --release --bin broadcast-worker")
        } else if !self.dependency_ok {
            Some("Check the system TLS configuration (root certificates) and retry")
        } else {
            None
        }
    }
}

/// Check run inside the worker process for `--check-env`.
pub fn probe_local() -> EnvironmentReport {
    let mut report = EnvironmentReport {
        runtime_ok: true,
        runtime_version: env!("CARGO_PKG_VERSION").to_string(),
        ..Default::default()
    };

    match reqwest::Client::builder().build() {
        Ok(_) => report.dependency_ok = true,
        Err(e) => report
            .errors
            .push(format!("HTTP client unavailable: {}", e)),
    }

    report
}

/// Locate the worker executable: config override first, then next to the current binary.
pub fn resolve_worker_path(config: &Config) -> AppResult<PathBuf> {
    if let Some(path) = &config.worker_path {
        return Ok(path.clone());
    }

    let current = std::env::current_exe()?;
    let dir = current
        .parent()
        .ok_or_else(|| AppError::Internal("current executable has no parent directory".into()))?;
    Ok(dir.join(format!("{}{}", WORKER_BIN_NAME, std::env::consts::EXE_SUFFIX)))
}

/// Run `<worker> --check-env` and read its report.
pub async fn probe_worker(worker_path: &Path) -> EnvironmentReport {
    if !worker_path.is_file() {
        return EnvironmentReport {
            errors: vec![format!(
                "Worker executable not found at {}",
                worker_path.display()
            )],
            ..Default::default()
        };
    }

    let output = tokio::time::timeout(
        PROBE_TIMEOUT,
        Command::new(worker_path)
            .arg(CHECK_ENV_FLAG)
            .stdin(Stdio::null())
            .output(),
    )
    .await;

    let output = match output {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return EnvironmentReport {
                errors: vec![format!("Could not run worker: {}", e)],
                ..Default::default()
            }
        }
        Err(_) => {
            return EnvironmentReport {
                errors: vec!["Worker environment check timed out".to_string()],
                ..Default::default()
            }
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    match serde_json::from_str::<EnvironmentReport>(stdout.trim()) {
        Ok(report) => report,
        Err(e) => {
            log::warn!("Unparseable environment report: {}", e);
            EnvironmentReport {
                errors: vec![format!(
                    "Worker returned an invalid environment report (exit {:?}): {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                )],
                ..Default::default()
            }
        }
    }
}
