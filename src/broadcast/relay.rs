use tokio::io::{AsyncRead, AsyncReadExt};

use crate::errors::AppResult;
use crate::protocol::{LineDecoder, ProgressEvent};
use crate::worker::EventSink;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Forwards the worker's stdout to an interactive surface as events arrive.
pub struct EventRelay<S: EventSink> {
    decoder: LineDecoder,
    surface: S,
    forwarded: usize,
    dropped: usize,
    last_done: Option<ProgressEvent>,
}

impl<S: EventSink> EventRelay<S> {
    pub fn new(surface: S) -> Self {
        Self {
            decoder: LineDecoder::new(),
            surface,
            forwarded: 0,
            dropped: 0,
            last_done: None,
        }
    }

    /// Feed a raw chunk; complete lines are parsed and forwarded immediately.
    pub fn feed(&mut self, chunk: &[u8]) {
        for line in self.decoder.push(chunk) {
            self.handle_line(&line);
        }
    }

    fn handle_line(&mut self, line: &str) {
        let event = match serde_json::from_str::<ProgressEvent>(line) {
            Ok(event) => event,
            Err(e) => {
                self.dropped += 1;
                log::warn!("Failed to parse worker output ({}): {}", e, line);
                return;
            }
        };

        if event.is_done() {
            self.last_done = Some(event.clone());
        }

        if let Err(e) = self.surface.emit(event) {
            log::warn!("Failed to display progress event (non-critical): {}", e);
        }
        self.forwarded += 1;
    }

    /// Called at end of stream. A trailing line without `\n` is discarded.
    pub fn finish(&mut self) {
        let remainder = self.decoder.remainder();
        if !remainder.iter().all(u8::is_ascii_whitespace) {
            self.dropped += 1;
            log::warn!(
                "Discarding unterminated worker output: {}",
                String::from_utf8_lossy(remainder)
            );
        }
    }

    pub async fn pump<R: AsyncRead + Unpin>(&mut self, mut reader: R) -> AppResult<()> {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let read = reader.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            self.feed(&buf[..read]);
        }
        self.finish();
        Ok(())
    }

    pub fn forwarded(&self) -> usize {
        self.forwarded
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn done_event(&self) -> Option<&ProgressEvent> {
        self.last_done.as_ref()
    }

    pub fn into_surface(self) -> S {
        self.surface
    }
}
