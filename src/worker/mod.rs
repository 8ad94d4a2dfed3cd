// Delivery worker - reads one broadcast request from stdin and streams
// progress events to stdout, one JSON object per line.

pub mod delivery;
pub mod discord_client;
pub mod progress_tracker;

pub use delivery::{DeliveryWorker, EventSink, LineWriterSink, WorkerState};
pub use discord_client::{DiscordClient, MessagePayload, Platform};
pub use progress_tracker::DeliverySummary;

use crate::errors::AppError;

/// Exit status for a fatal worker error.
pub fn exit_code(error: &AppError) -> i32 {
    match error {
        AppError::Json(_) | AppError::InvalidRequest(_) => 2,
        _ => 1,
    }
}
