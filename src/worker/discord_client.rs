use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use std::path::Path;
use std::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

use crate::errors::{AppError, AppResult};
use crate::protocol::{Credential, DeliverySettings, Target};

/// Outbound side of the delivery loop.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Post one message (and its optional attachment) to a channel.
    async fn send_message(
        &self,
        token: &Credential,
        channel_id: &str,
        payload: &MessagePayload,
    ) -> AppResult<()>;
}

/// Discord REST client used by the worker.
///
/// Requests are paced so that consecutive calls are at least
/// `rate_limit_delay_ms` apart. Failed calls are never retried.
pub struct DiscordClient {
    client: Client,
    api_base_url: String,
    min_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl DiscordClient {
    pub fn new(settings: &DeliverySettings) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(concat!("discord-broadcaster/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            min_delay: Duration::from_millis(settings.rate_limit_delay_ms),
            last_request: Mutex::new(None),
        })
    }

    fn messages_url(&self, channel_id: &str) -> String {
        format!("{}/channels/{}/messages", self.api_base_url, channel_id)
    }

    async fn wait_for_rate_limit(&self) {
        let wait_time = {
            match self.last_request.lock() {
                Ok(last_request) => (*last_request).and_then(|last| {
                    let elapsed = last.elapsed();
                    if elapsed < self.min_delay {
                        Some(self.min_delay - elapsed)
                    } else {
                        None
                    }
                }),
                Err(e) => {
                    log::warn!("Failed to acquire rate limiter lock (non-critical): {}", e);
                    None
                }
            }
        }; // MutexGuard is dropped here

        if let Some(wait_time) = wait_time {
            log::debug!("Pacing next request by {:?}", wait_time);
            sleep(wait_time).await;
        }
    }

    fn mark_request(&self) {
        match self.last_request.lock() {
            Ok(mut last_request) => *last_request = Some(Instant::now()),
            Err(e) => log::warn!("Failed to update rate limiter (non-critical): {}", e),
        }
    }
}

#[async_trait]
impl Platform for DiscordClient {
    async fn send_message(
        &self,
        token: &Credential,
        channel_id: &str,
        payload: &MessagePayload,
    ) -> AppResult<()> {
        self.wait_for_rate_limit().await;

        let url = self.messages_url(channel_id);
        let request = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, token.expose());

        let request = match payload.build_form()? {
            Some(form) => request.multipart(form),
            None => request.json(&payload.json_body()),
        };

        log::debug!(
            "POST {} ({})",
            url,
            if payload.has_attachment() { "multipart" } else { "json" }
        );

        let result = request.send().await;
        self.mark_request();
        let response = result?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(classify_failure(status, channel_id, &body))
    }
}

/// Discord JSON error code for "Unknown Channel".
const UNKNOWN_CHANNEL_CODE: u64 = 10003;

/// Map a non-success Discord response to an error class.
///
/// A 400 is only a bad destination when Discord says the channel is unknown;
/// anything else (oversized content, malformed form body) stays an API error.
pub fn classify_failure(status: StatusCode, channel_id: &str, body: &str) -> AppError {
    match status.as_u16() {
        401 | 403 => AppError::Unauthorized {
            status: status.as_u16(),
        },
        404 => AppError::invalid_destination(channel_id, &api_message(body)),
        400 if api_code(body) == Some(UNKNOWN_CHANNEL_CODE) => {
            AppError::invalid_destination(channel_id, &api_message(body))
        }
        429 => AppError::RateLimit {
            retry_after_ms: extract_retry_after(body)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        },
        code => AppError::Api {
            status: code,
            body: api_message(body),
        },
    }
}

/// Prefer Discord's `message` field over the raw body.
fn api_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| json.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(300).collect())
}

fn api_code(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("code")?
        .as_u64()
}

fn extract_retry_after(body: &str) -> Option<Duration> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let seconds = json.get("retry_after")?.as_f64()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Some(Duration::from_secs_f64(seconds))
    } else {
        None
    }
}

/// Message content plus an optional image, ready to send.
#[derive(Debug, Clone)]
pub struct MessagePayload {
    content: String,
    attachment: Option<Attachment>,
}

#[derive(Debug, Clone)]
struct Attachment {
    filename: String,
    data: Vec<u8>,
    mime_type: &'static str,
}

impl MessagePayload {
    pub fn text(content: String) -> Self {
        Self {
            content,
            attachment: None,
        }
    }

    /// Build the payload for a target, reading its attachment from disk.
    pub async fn from_target(target: &Target) -> AppResult<Self> {
        let mut payload = Self::text(target.rendered_content());
        if let Some(path) = target.attachment() {
            payload.add_file(path).await?;
        }
        Ok(payload)
    }

    pub async fn add_file(&mut self, file_path: &Path) -> AppResult<()> {
        let display = file_path.to_string_lossy().to_string();
        let data = tokio::fs::read(file_path)
            .await
            .map_err(|e| AppError::attachment(&display, e))?;
        let filename = file_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        self.attachment = Some(Attachment {
            filename,
            data,
            mime_type: mime_for(file_path),
        });
        Ok(())
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn has_attachment(&self) -> bool {
        self.attachment.is_some()
    }

    fn json_body(&self) -> serde_json::Value {
        serde_json::json!({ "content": self.content })
    }

    fn build_form(&self) -> AppResult<Option<multipart::Form>> {
        let Some(attachment) = &self.attachment else {
            return Ok(None);
        };

        let part = multipart::Part::bytes(attachment.data.clone())
            .file_name(attachment.filename.clone())
            .mime_str(attachment.mime_type)?;

        let form = multipart::Form::new()
            .text("payload_json", self.json_body().to_string())
            .part("files[0]", part);

        Ok(Some(form))
    }
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
