// Wire types shared by the orchestrator and the delivery worker.
//
// The orchestrator writes one `BroadcastRequest` to the worker's stdin and
// closes it. The worker answers with one `ProgressEvent` per stdout line.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::errors::AppResult;

pub const DEFAULT_API_BASE_URL: &str = "https://discord.com/api/v9";

/// User token sent as the `Authorization` header. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Target {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub role_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image_path: String,
}

impl Target {
    pub fn new(channel_id: &str, message: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            message: message.to_string(),
            ..Default::default()
        }
    }

    pub fn attachment(&self) -> Option<&Path> {
        let trimmed = self.image_path.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Path::new(trimmed))
        }
    }

    /// Message text as delivered, with the role mention prepended.
    pub fn rendered_content(&self) -> String {
        let role_id = self.role_id.trim();
        if role_id.is_empty() {
            self.message.clone()
        } else {
            format!("<@&{}> {}", role_id, self.message)
        }
    }

    /// Label used in human-readable status lines.
    pub fn label(&self) -> String {
        display_label(&self.name, &self.channel_id)
    }
}

pub fn display_label(name: &str, channel_id: &str) -> String {
    if name.trim().is_empty() {
        format!("Channel {}", channel_id)
    } else {
        name.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    pub api_base_url: String,
    pub rate_limit_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            rate_limit_delay_ms: 1000,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub token: Credential,
    #[serde(default)]
    pub preview: bool,
    pub targets: Vec<Target>,
    #[serde(default)]
    pub settings: DeliverySettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Log {
        message: String,
    },
    Progress {
        current: usize,
        total: usize,
        channel_id: String,
        #[serde(default)]
        name: String,
    },
    Success {
        channel_id: String,
        #[serde(default)]
        name: String,
    },
    Error {
        channel_id: String,
        #[serde(default)]
        name: String,
        message: String,
    },
    Done {
        summary: String,
        #[serde(default)]
        succeeded: usize,
        #[serde(default)]
        failed: usize,
        #[serde(default)]
        preview: bool,
    },
}

impl ProgressEvent {
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ProgressEvent::Done { .. })
    }

    /// Serialize as one newline-terminated record.
    pub fn to_line(&self) -> AppResult<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Splits a byte stream into complete `\n`-terminated lines.
///
/// Bytes after the last newline stay buffered until more input arrives.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim_end_matches('\r').trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Bytes received after the last newline.
    pub fn remainder(&self) -> &[u8] {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging_matches_wire_format() {
        let event = ProgressEvent::Progress {
            current: 1,
            total: 3,
            channel_id: "123".into(),
            name: "General".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "progress");
        assert_eq!(value["current"], 1);
        assert_eq!(value["total"], 3);

        let done: ProgressEvent =
            serde_json::from_str(r#"{"type":"done","summary":"1 succeeded, 0 failed"}"#).unwrap();
        assert!(done.is_done());
    }

    #[test]
    fn test_to_line_is_newline_terminated_single_line() {
        let line = ProgressEvent::log("multi\nline").to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_decoder_holds_partial_lines() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(br#"{"type":"log","mess"#).is_empty());
        let lines = decoder.push(b"age\":\"hi\"}\n{\"type\":");
        assert_eq!(lines, vec![r#"{"type":"log","message":"hi"}"#.to_string()]);
        assert_eq!(decoder.remainder(), br#"{"type":"#);
    }

    #[test]
    fn test_decoder_skips_blank_lines() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"\n  \r\na\n\nb\n");
        assert_eq!(lines, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_credential_is_redacted_in_debug() {
        let request = BroadcastRequest {
            token: Credential::new("secret-token"),
            preview: true,
            targets: vec![Target::new("1", "hi")],
            settings: DeliverySettings::default(),
        };
        let debug = format!("{:?}", request);
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn test_request_defaults_when_optional_fields_missing() {
        let request: BroadcastRequest = serde_json::from_str(
            r#"{"token":"t","targets":[{"channel_id":"1","message":"hello"}]}"#,
        )
        .unwrap();
        assert!(!request.preview);
        assert_eq!(request.settings, DeliverySettings::default());
        assert!(request.targets[0].attachment().is_none());
    }

    #[test]
    fn test_rendered_content_mentions_role() {
        let mut target = Target::new("1", "Raid tonight");
        assert_eq!(target.rendered_content(), "Raid tonight");
        target.role_id = "987".into();
        assert_eq!(target.rendered_content(), "<@&987> Raid tonight");
    }

    #[test]
    fn test_label_falls_back_to_channel() {
        let mut target = Target::new("42", "x");
        assert_eq!(target.label(), "Channel 42");
        target.name = "News".into();
        assert_eq!(target.label(), "News");
    }
}
