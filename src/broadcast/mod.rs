// Orchestrator side of a broadcast: build and validate the request, spawn the
// worker and relay its progress stream.

pub mod relay;
pub mod request;
pub mod worker_process;

pub use relay::EventRelay;
pub use request::build_request;
pub use worker_process::{run_worker, RunOutcome};

use std::path::Path;

use crate::errors::AppResult;
use crate::protocol::{DeliverySettings, Target};
use crate::worker::EventSink;

/// Raw input for one broadcast, as entered by the user.
#[derive(Debug, Clone)]
pub struct BroadcastInput<'a> {
    pub token: &'a str,
    pub targets: &'a [Target],
    pub global_image: &'a str,
    pub preview: bool,
    pub settings: DeliverySettings,
}

/// Validate, then run exactly one worker. Nothing is spawned if validation fails.
pub async fn start_broadcast<S: EventSink>(
    worker_path: &Path,
    input: BroadcastInput<'_>,
    surface: S,
) -> AppResult<(RunOutcome, S)> {
    let request = build_request(
        input.token,
        input.targets,
        input.global_image,
        input.preview,
        input.settings,
    )?;
    run_worker(worker_path, &request, surface).await
}
