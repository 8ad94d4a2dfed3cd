use std::fmt;
use std::io::Write;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::errors::{AppError, AppResult};
use crate::protocol::{BroadcastRequest, Credential, DeliverySettings, ProgressEvent, Target};
use crate::security::InputValidator;

use super::discord_client::{MessagePayload, Platform};
use super::progress_tracker::DeliverySummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Reading,
    Validating,
    Delivering,
    Finished,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::Reading => "reading",
            WorkerState::Validating => "validating",
            WorkerState::Delivering => "delivering",
            WorkerState::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Receives the worker's progress stream.
pub trait EventSink {
    fn emit(&mut self, event: ProgressEvent) -> AppResult<()>;
}

/// Writes each event as one JSON line and flushes, so the reader sees it immediately.
pub struct LineWriterSink<W: Write> {
    writer: W,
}

impl<W: Write> LineWriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for LineWriterSink<W> {
    fn emit(&mut self, event: ProgressEvent) -> AppResult<()> {
        let line = event.to_line()?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }
}

impl EventSink for Vec<ProgressEvent> {
    fn emit(&mut self, event: ProgressEvent) -> AppResult<()> {
        self.push(event);
        Ok(())
    }
}

/// Builds the outbound client once a request has been validated.
pub type Connector<'a> = Box<dyn FnOnce(&DeliverySettings) -> AppResult<Box<dyn Platform>> + 'a>;

pub struct DeliveryWorker<S: EventSink> {
    state: WorkerState,
    sink: S,
    run_id: String,
}

impl<S: EventSink> DeliveryWorker<S> {
    pub fn new(sink: S) -> Self {
        Self {
            state: WorkerState::Idle,
            sink,
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn transition(&mut self, next: WorkerState) {
        log::debug!("[{}] {} -> {}", self.run_id, self.state, next);
        self.state = next;
    }

    /// Read, validate and deliver one request.
    ///
    /// Errors returned here are fatal: no target was attempted. Target
    /// failures become `error` events and never surface as `Err`.
    pub async fn run<R: AsyncRead + Unpin>(
        &mut self,
        input: R,
        connect: Connector<'_>,
    ) -> AppResult<DeliverySummary> {
        self.transition(WorkerState::Reading);
        let raw = read_request(input).await;

        self.transition(WorkerState::Validating);
        let request = match raw.and_then(|raw| parse_request(&raw)) {
            Ok(request) => request,
            Err(e) => {
                self.transition(WorkerState::Finished);
                return Err(e);
            }
        };

        let platform = if request.preview {
            None
        } else {
            match connect(&request.settings) {
                Ok(platform) => Some(platform),
                Err(e) => {
                    self.transition(WorkerState::Finished);
                    return Err(e);
                }
            }
        };

        self.deliver(&request, platform.as_deref()).await
    }

    /// Attempt every target in order and finish with exactly one `done` event.
    pub async fn deliver(
        &mut self,
        request: &BroadcastRequest,
        platform: Option<&dyn Platform>,
    ) -> AppResult<DeliverySummary> {
        self.transition(WorkerState::Delivering);

        let total = request.targets.len();
        let mut summary = DeliverySummary::new(total, request.preview);

        if request.preview {
            self.sink.emit(ProgressEvent::log(format!(
                "Preview mode: validating {} target(s), no messages will be sent",
                total
            )))?;
        } else {
            self.sink.emit(ProgressEvent::log(format!(
                "Starting broadcast to {} target(s)",
                total
            )))?;
        }

        for (index, target) in request.targets.iter().enumerate() {
            self.sink.emit(ProgressEvent::Progress {
                current: index + 1,
                total,
                channel_id: target.channel_id.clone(),
                name: target.name.clone(),
            })?;

            let outcome = match platform {
                Some(platform) if !request.preview => {
                    deliver_target(platform, &request.token, target).await
                }
                _ => preflight_target(target),
            };

            match outcome {
                Ok(()) => {
                    summary.record_success(target);
                    self.sink.emit(ProgressEvent::Success {
                        channel_id: target.channel_id.clone(),
                        name: target.name.clone(),
                    })?;
                }
                Err(e) => {
                    if !e.is_target_local() {
                        log::error!("[{}] Unexpected failure for {}: {}", self.run_id, target.label(), e);
                    }
                    let message = e.to_string();
                    summary.record_failure(target, message.clone());
                    self.sink.emit(ProgressEvent::Error {
                        channel_id: target.channel_id.clone(),
                        name: target.name.clone(),
                        message,
                    })?;
                }
            }
        }

        self.transition(WorkerState::Finished);
        self.sink.emit(summary.done_event())?;
        log::info!("[{}] {}", self.run_id, summary.summary_text());

        Ok(summary)
    }
}

async fn read_request<R: AsyncRead + Unpin>(mut input: R) -> AppResult<String> {
    let mut raw = Vec::new();
    input.read_to_end(&mut raw).await?;
    // Undecodable bytes are a bad document, not an I/O failure.
    String::from_utf8(raw)
        .map_err(|e| AppError::InvalidRequest(format!("request is not valid UTF-8: {}", e)))
}

/// Structural validation of the request document.
pub fn parse_request(raw: &str) -> AppResult<BroadcastRequest> {
    if raw.trim().is_empty() {
        return Err(AppError::InvalidRequest(
            "no request document received on stdin".to_string(),
        ));
    }

    let request: BroadcastRequest = serde_json::from_str(raw)?;

    if request.token.is_blank() {
        return Err(AppError::InvalidRequest("missing token".to_string()));
    }
    if request.targets.is_empty() {
        return Err(AppError::InvalidRequest(
            "request contains no targets".to_string(),
        ));
    }

    Ok(request)
}

/// Checks that need no network access.
pub fn preflight_target(target: &Target) -> AppResult<()> {
    InputValidator::validate_channel_id(&target.channel_id)?;
    InputValidator::validate_role_id(target.role_id.trim())?;

    if target.message.trim().is_empty() {
        return Err(AppError::validation("message", "message content is empty"));
    }

    if let Some(path) = target.attachment() {
        InputValidator::validate_attachment(&path.to_string_lossy())?;
    }

    Ok(())
}

async fn deliver_target(
    platform: &dyn Platform,
    token: &Credential,
    target: &Target,
) -> AppResult<()> {
    preflight_target(target)?;
    let payload = MessagePayload::from_target(target).await?;
    platform
        .send_message(token, &target.channel_id, &payload)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const CHANNEL_A: &str = "100000000000000001";
    const CHANNEL_B: &str = "100000000000000002";
    const CHANNEL_C: &str = "100000000000000003";

    #[derive(Default)]
    struct RecordingPlatform {
        calls: Mutex<Vec<(String, String)>>,
        fail_channel: Option<String>,
    }

    #[async_trait]
    impl Platform for RecordingPlatform {
        async fn send_message(
            &self,
            _token: &Credential,
            channel_id: &str,
            payload: &MessagePayload,
        ) -> AppResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push((channel_id.to_string(), payload.content().to_string()));
            if self.fail_channel.as_deref() == Some(channel_id) {
                return Err(AppError::invalid_destination(channel_id, "Unknown Channel"));
            }
            Ok(())
        }
    }

    fn no_connect(_: &DeliverySettings) -> AppResult<Box<dyn Platform>> {
        panic!("must not connect")
    }

    fn request(preview: bool, targets: Vec<Target>) -> BroadcastRequest {
        BroadcastRequest {
            token: Credential::new("token"),
            preview,
            targets,
            settings: DeliverySettings::default(),
        }
    }

    fn without_logs(events: Vec<ProgressEvent>) -> Vec<ProgressEvent> {
        events
            .into_iter()
            .filter(|e| !matches!(e, ProgressEvent::Log { .. }))
            .collect()
    }

    #[tokio::test]
    async fn test_second_target_failure_does_not_abort_batch() {
        let platform = RecordingPlatform {
            fail_channel: Some(CHANNEL_B.to_string()),
            ..Default::default()
        };
        let req = request(
            false,
            vec![
                Target::new(CHANNEL_A, "one"),
                Target::new(CHANNEL_B, "two"),
                Target::new(CHANNEL_C, "three"),
            ],
        );

        let mut worker = DeliveryWorker::new(Vec::<ProgressEvent>::new());
        let summary = worker.deliver(&req, Some(&platform)).await.unwrap();
        assert_eq!(worker.state(), WorkerState::Finished);

        let events = without_logs(worker.into_sink());
        let expected = vec![
            ProgressEvent::Progress { current: 1, total: 3, channel_id: CHANNEL_A.into(), name: String::new() },
            ProgressEvent::Success { channel_id: CHANNEL_A.into(), name: String::new() },
            ProgressEvent::Progress { current: 2, total: 3, channel_id: CHANNEL_B.into(), name: String::new() },
            ProgressEvent::Error {
                channel_id: CHANNEL_B.into(),
                name: String::new(),
                message: format!("Invalid destination {}: Unknown Channel", CHANNEL_B),
            },
            ProgressEvent::Progress { current: 3, total: 3, channel_id: CHANNEL_C.into(), name: String::new() },
            ProgressEvent::Success { channel_id: CHANNEL_C.into(), name: String::new() },
            ProgressEvent::Done { summary: "2 succeeded, 1 failed".into(), succeeded: 2, failed: 1, preview: false },
        ];
        assert_eq!(events, expected);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(platform.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_channel_id_fails_locally_without_call() {
        let platform = RecordingPlatform::default();
        let req = request(
            false,
            vec![Target::new(CHANNEL_A, "one"), Target::new("not-an-id", "two")],
        );

        let mut worker = DeliveryWorker::new(Vec::<ProgressEvent>::new());
        let summary = worker.deliver(&req, Some(&platform)).await.unwrap();

        assert_eq!(summary.summary_text(), "1 succeeded, 1 failed");
        assert_eq!(platform.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_preview_never_calls_platform() {
        let platform = RecordingPlatform::default();
        let req = request(
            true,
            vec![Target::new(CHANNEL_A, "one"), Target::new(CHANNEL_B, "two")],
        );

        let mut worker = DeliveryWorker::new(Vec::<ProgressEvent>::new());
        worker.deliver(&req, Some(&platform)).await.unwrap();

        assert!(platform.calls.lock().unwrap().is_empty());
        let events = worker.into_sink();
        assert!(matches!(events.first(), Some(ProgressEvent::Log { .. })));
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Done {
                summary: "2 succeeded, 0 failed".into(),
                succeeded: 2,
                failed: 0,
                preview: true,
            })
        );
        assert_eq!(events.iter().filter(|e| matches!(e, ProgressEvent::Success { .. })).count(), 2);
    }

    #[tokio::test]
    async fn test_every_target_gets_progress_then_one_outcome() {
        let platform = RecordingPlatform {
            fail_channel: Some(CHANNEL_A.to_string()),
            ..Default::default()
        };
        let targets: Vec<Target> = [CHANNEL_A, "bad", CHANNEL_B, CHANNEL_A, CHANNEL_C]
            .iter()
            .map(|id| Target::new(id, "msg"))
            .collect();
        let total = targets.len();
        let req = request(false, targets);

        let mut worker = DeliveryWorker::new(Vec::<ProgressEvent>::new());
        worker.deliver(&req, Some(&platform)).await.unwrap();
        let events = without_logs(worker.into_sink());

        assert_eq!(events.iter().filter(|e| e.is_done()).count(), 1);
        assert!(events.last().unwrap().is_done());

        let per_target = &events[..events.len() - 1];
        assert_eq!(per_target.len(), total * 2);
        for (i, pair) in per_target.chunks(2).enumerate() {
            match &pair[0] {
                ProgressEvent::Progress { current, total: t, .. } => {
                    assert_eq!(*current, i + 1);
                    assert_eq!(*t, total);
                }
                other => panic!("expected progress, got {:?}", other),
            }
            assert!(matches!(
                pair[1],
                ProgressEvent::Success { .. } | ProgressEvent::Error { .. }
            ));
        }
    }

    #[tokio::test]
    async fn test_run_rejects_malformed_document_without_events() {
        let mut worker = DeliveryWorker::new(Vec::<ProgressEvent>::new());
        let err = worker
            .run(&b"{\"token\":"[..], Box::new(no_connect))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Json(_)));
        assert_eq!(worker.state(), WorkerState::Finished);
        assert!(worker.into_sink().is_empty());
    }

    #[tokio::test]
    async fn test_run_rejects_non_utf8_document() {
        let mut worker = DeliveryWorker::new(Vec::<ProgressEvent>::new());
        let err = worker
            .run(&b"{\"token\":\"t\xff\",\"targets\":[]}"[..], Box::new(no_connect))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert_eq!(crate::worker::exit_code(&err), 2);
        assert!(worker.into_sink().is_empty());
    }

    #[tokio::test]
    async fn test_run_rejects_missing_token_and_empty_targets() {
        let mut worker = DeliveryWorker::new(Vec::<ProgressEvent>::new());
        let err = worker
            .run(
                &br#"{"token":" ","targets":[{"channel_id":"1","message":"x"}]}"#[..],
                Box::new(no_connect),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));

        let mut worker = DeliveryWorker::new(Vec::<ProgressEvent>::new());
        let err = worker
            .run(&br#"{"token":"t","targets":[]}"#[..], Box::new(no_connect))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_run_preview_skips_connector() {
        let mut worker = DeliveryWorker::new(Vec::<ProgressEvent>::new());
        let doc = format!(
            r#"{{"token":"t","preview":true,"targets":[{{"channel_id":"{}","message":"x"}}]}}"#,
            CHANNEL_A
        );
        let summary = worker.run(doc.as_bytes(), Box::new(no_connect)).await.unwrap();
        assert_eq!(summary.successful, vec![CHANNEL_A.to_string()]);
    }

    #[test]
    fn test_line_writer_sink_writes_one_line_per_event() {
        let mut sink = LineWriterSink::new(Vec::new());
        sink.emit(ProgressEvent::log("hello")).unwrap();
        sink.emit(ProgressEvent::Success { channel_id: "1".into(), name: String::new() })
            .unwrap();
        let written = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r#""type":"log""#));
    }
}
