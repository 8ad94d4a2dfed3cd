use std::io::Write;
use std::path::Path;

use crate::broadcast::{self, RunOutcome};
use crate::config::Config;
use crate::environment::{self, EnvironmentReport};
use crate::errors::{AppError, AppResult};
use crate::profiles::{ProfileStore, ProfilesData};
use crate::protocol::{display_label, ProgressEvent, Target};
use crate::worker::EventSink;

pub const TOKEN_ENV_VAR: &str = "DISCORD_TOKEN";

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub preview: bool,
    pub profile: Option<String>,
    pub token: Option<String>,
    pub save_token: bool,
}

/// Render one progress event as a status line.
pub fn format_event(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::Log { message } => message.clone(),
        ProgressEvent::Progress {
            current,
            total,
            channel_id,
            name,
        } => format!(
            "Sending to {}... ({}/{})",
            display_label(name, channel_id),
            current,
            total
        ),
        ProgressEvent::Success { channel_id, name } => {
            format!("Sent to {}", display_label(name, channel_id))
        }
        ProgressEvent::Error {
            channel_id,
            name,
            message,
        } => format!(
            "Error for {}: {}",
            display_label(name, channel_id),
            message
        ),
        ProgressEvent::Done {
            summary, preview, ..
        } => {
            if *preview {
                format!("Preview complete: {}", summary)
            } else {
                format!("Broadcast complete: {}", summary)
            }
        }
    }
}

/// Terminal surface for relayed events.
pub struct StatusPrinter<W: Write> {
    out: W,
}

impl<W: Write> StatusPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EventSink for StatusPrinter<W> {
    fn emit(&mut self, event: ProgressEvent) -> AppResult<()> {
        writeln!(self.out, "{}", format_event(&event))?;
        self.out.flush()?;
        Ok(())
    }
}

/// Token precedence: explicit flag, then environment, then the saved token.
pub fn resolve_token(explicit: Option<&str>, env_value: Option<&str>, data: &ProfilesData) -> AppResult<String> {
    explicit
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or_else(|| env_value.map(str::trim).filter(|t| !t.is_empty()))
        .map(str::to_string)
        .or_else(|| data.saved_token().map(|t| t.expose().to_string()))
        .ok_or_else(|| AppError::validation("token", "Please enter your Discord User Token."))
}

/// Broadcast the active (or named) profile through one worker run.
pub async fn send_broadcast<P, S>(
    store: &P,
    config: &Config,
    worker_path: &Path,
    options: SendOptions,
    surface: S,
) -> AppResult<(RunOutcome, S)>
where
    P: ProfileStore + ?Sized,
    S: EventSink,
{
    let mut data = store.load()?;

    let profile = match &options.profile {
        Some(name) => data.profile(name)?.clone(),
        None => data.active().clone(),
    };

    let env_token = std::env::var(TOKEN_ENV_VAR).ok();
    let token = resolve_token(options.token.as_deref(), env_token.as_deref(), &data)?;

    // Nothing is persisted unless the request is valid.
    let request = broadcast::build_request(
        &token,
        &profile.targets,
        &profile.global_image,
        options.preview,
        config.delivery_settings(),
    )?;

    // Leaving --save-token off keeps a previously saved token; use `token forget` to purge it.
    if options.save_token {
        data.save_token(&token)?;
        store.save(&data)?;
        log::info!("Token saved");
    }

    broadcast::run_worker(worker_path, &request, surface).await
}

pub fn list_targets(data: &ProfilesData) -> Vec<String> {
    data.active()
        .targets
        .iter()
        .enumerate()
        .map(|(i, t)| format_target(i + 1, t))
        .collect()
}

fn format_target(number: usize, target: &Target) -> String {
    let mut line = format!("Target #{}: {}", number, target.label());
    if !target.role_id.is_empty() {
        line.push_str(&format!(" (mentions role {})", target.role_id));
    }
    if !target.image_path.is_empty() {
        line.push_str(&format!(" [image: {}]", target.image_path));
    }
    line
}

/// Run the worker probe and describe any problem as a persistent warning.
pub async fn check_environment(config: &Config) -> (EnvironmentReport, Option<String>) {
    let report = match environment::resolve_worker_path(config) {
        Ok(path) => environment::probe_worker(&path).await,
        Err(e) => EnvironmentReport {
            errors: vec![format!("Could not locate worker: {}", e)],
            ..Default::default()
        },
    };

    let warning = if report.is_ready() {
        None
    } else {
        let mut text = format!("Warning: {}", report.errors.join(" "));
        if let Some(fix) = report.remediation() {
            text.push_str(&format!("\n  {}", fix));
        }
        Some(text)
    };

    (report, warning)
}
