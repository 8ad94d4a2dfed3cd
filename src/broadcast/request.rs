use crate::errors::{AppError, AppResult};
use crate::protocol::{BroadcastRequest, Credential, DeliverySettings, Target};
use crate::security::InputValidator;

/// Turn raw form fields into a request the worker can run.
///
/// Fails as a whole: if any target is invalid, no request is produced and no
/// worker should be spawned. Only read-only filesystem checks are performed.
pub fn build_request(
    token: &str,
    targets: &[Target],
    global_image: &str,
    preview: bool,
    settings: DeliverySettings,
) -> AppResult<BroadcastRequest> {
    let token = token.trim();
    InputValidator::validate_token(token)?;

    if targets.is_empty() {
        return Err(AppError::validation(
            "targets",
            "Please add at least one target.",
        ));
    }

    let global_image = InputValidator::sanitize_stored_path(global_image);

    let mut prepared = Vec::with_capacity(targets.len());
    for (index, raw) in targets.iter().enumerate() {
        let number = index + 1;

        let channel_id = raw.channel_id.trim();
        if channel_id.is_empty() {
            return Err(AppError::validation(
                "channel_id",
                &format!("Target #{} is missing a Channel ID.", number),
            ));
        }

        let message = raw.message.trim();
        if message.is_empty() {
            return Err(AppError::validation(
                "message",
                &format!("Target #{} has empty message content.", number),
            ));
        }

        let mut image_path = InputValidator::sanitize_stored_path(&raw.image_path);
        if image_path.is_empty() && !global_image.is_empty() {
            image_path = global_image.clone();
        }

        if !image_path.is_empty() {
            if let Err(e) = InputValidator::validate_image_path(&image_path) {
                log::warn!("Target #{} has an unusable image: {}", number, e);
                return Err(e);
            }
        }

        prepared.push(Target {
            channel_id: channel_id.to_string(),
            role_id: raw.role_id.trim().to_string(),
            message: message.to_string(),
            name: raw.name.trim().to_string(),
            image_path,
        });
    }

    Ok(BroadcastRequest {
        token: Credential::new(token),
        preview,
        targets: prepared,
        settings,
    })
}
