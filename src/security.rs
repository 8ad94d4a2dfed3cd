use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::errors::{AppError, AppResult};

pub const ACCEPTED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Discord's upload cap for non-boosted accounts
pub const MAX_ATTACHMENT_SIZE: u64 = 25 * 1024 * 1024;

fn snowflake_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{17,20}$").expect("snowflake pattern is valid"))
}

pub struct InputValidator;

impl InputValidator {
    pub fn validate_token(token: &str) -> AppResult<()> {
        if token.trim().is_empty() {
            return Err(AppError::validation(
                "token",
                "Please enter your Discord User Token.",
            ));
        }

        if token.chars().any(char::is_whitespace) {
            return Err(AppError::validation("token", "Token must not contain whitespace"));
        }

        Ok(())
    }

    pub fn is_snowflake(id: &str) -> bool {
        snowflake_pattern().is_match(id)
    }

    pub fn validate_channel_id(channel_id: &str) -> AppResult<()> {
        if channel_id.trim().is_empty() {
            return Err(AppError::invalid_destination(channel_id, "missing channel id"));
        }
        if !Self::is_snowflake(channel_id) {
            return Err(AppError::invalid_destination(
                channel_id,
                "channel id must be a 17-20 digit Discord id",
            ));
        }
        Ok(())
    }

    pub fn validate_role_id(role_id: &str) -> AppResult<()> {
        if role_id.is_empty() || Self::is_snowflake(role_id) {
            Ok(())
        } else {
            Err(AppError::validation(
                "role_id",
                "Role id must be a 17-20 digit Discord id",
            ))
        }
    }

    pub fn is_accepted_image_extension(path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .map(|ext| ACCEPTED_IMAGE_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// Checks an attachment path with read-only stat calls only.
    pub fn validate_image_path(path: &str) -> AppResult<()> {
        if path.trim().is_empty() {
            return Err(AppError::validation("image_path", "File path cannot be empty"));
        }

        let path_obj = Path::new(path);

        if !path_obj.exists() {
            return Err(AppError::file_not_found(path));
        }

        if !path_obj.is_file() {
            return Err(AppError::validation("image_path", "Path is not a file"));
        }

        if !Self::is_accepted_image_extension(path_obj) {
            return Err(AppError::invalid_file_type(path));
        }

        Ok(())
    }

    /// Attachment check the worker runs right before uploading.
    pub fn validate_attachment(path: &str) -> AppResult<u64> {
        Self::validate_image_path(path).map_err(|e| AppError::attachment(path, e))?;

        let metadata = std::fs::metadata(path).map_err(|e| AppError::attachment(path, e))?;
        if metadata.len() > MAX_ATTACHMENT_SIZE {
            return Err(AppError::attachment(path, "file too large (max 25MB)"));
        }

        Ok(metadata.len())
    }

    /// Stored image paths written by older builds sometimes hold these literals.
    pub fn sanitize_stored_path(path: &str) -> String {
        let trimmed = path.trim();
        if trimmed == "undefined" || trimmed == "null" {
            String::new()
        } else {
            trimmed.to_string()
        }
    }
}
