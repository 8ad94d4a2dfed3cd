use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::config;
use crate::errors::{AppError, AppResult};
use crate::protocol::{Credential, Target};
use crate::security::InputValidator;

pub const DEFAULT_PROFILE: &str = "Default";

static EMPTY_PROFILE: Profile = Profile {
    targets: Vec::new(),
    global_image: String::new(),
};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Profile {
    pub targets: Vec<Target>,
    #[serde(default)]
    pub global_image: String,
}

/// On-disk profile shape. Older builds stored a bare list of targets.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StoredProfile {
    Legacy(Vec<Target>),
    Current {
        #[serde(default)]
        targets: Vec<Target>,
        #[serde(default)]
        global_image: String,
    },
}

impl From<StoredProfile> for Profile {
    fn from(stored: StoredProfile) -> Self {
        let (targets, global_image) = match stored {
            StoredProfile::Legacy(targets) => (targets, String::new()),
            StoredProfile::Current {
                targets,
                global_image,
            } => (targets, global_image),
        };

        Profile {
            targets: targets
                .into_iter()
                .map(|mut t| {
                    t.image_path = InputValidator::sanitize_stored_path(&t.image_path);
                    t
                })
                .collect(),
            global_image: InputValidator::sanitize_stored_path(&global_image),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedToken {
    pub token: Credential,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct StoredProfiles {
    #[serde(default)]
    profiles: BTreeMap<String, StoredProfile>,
    #[serde(default = "default_profile_name", alias = "activeProfile")]
    active_profile: String,
    #[serde(default)]
    token: Option<SavedToken>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

fn default_profile_name() -> String {
    DEFAULT_PROFILE.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfilesData {
    pub profiles: BTreeMap<String, Profile>,
    pub active_profile: String,
    pub token: Option<SavedToken>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for ProfilesData {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(DEFAULT_PROFILE.to_string(), Profile::default());
        Self {
            profiles,
            active_profile: DEFAULT_PROFILE.to_string(),
            token: None,
            updated_at: None,
        }
    }
}

impl From<StoredProfiles> for ProfilesData {
    fn from(stored: StoredProfiles) -> Self {
        let mut data = ProfilesData {
            profiles: stored
                .profiles
                .into_iter()
                .map(|(name, profile)| (name, profile.into()))
                .collect(),
            active_profile: stored.active_profile,
            token: stored.token,
            updated_at: stored.updated_at,
        };
        data.ensure_consistent();
        data
    }
}

impl ProfilesData {
    /// Decode a stored document, migrating legacy profile shapes.
    pub fn from_json(raw: &str) -> AppResult<Self> {
        let stored: StoredProfiles = serde_json::from_str(raw)?;
        Ok(stored.into())
    }

    fn ensure_consistent(&mut self) {
        self.profiles
            .entry(DEFAULT_PROFILE.to_string())
            .or_default();
        if !self.profiles.contains_key(&self.active_profile) {
            log::warn!(
                "Active profile '{}' does not exist, falling back to {}",
                self.active_profile,
                DEFAULT_PROFILE
            );
            self.active_profile = DEFAULT_PROFILE.to_string();
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn profile(&self, name: &str) -> AppResult<&Profile> {
        self.profiles
            .get(name)
            .ok_or_else(|| AppError::Profile(format!("Profile \"{}\" does not exist", name)))
    }

    pub fn active(&self) -> &Profile {
        self.profiles
            .get(&self.active_profile)
            .or_else(|| self.profiles.get(DEFAULT_PROFILE))
            .unwrap_or(&EMPTY_PROFILE)
    }

    fn active_mut(&mut self) -> &mut Profile {
        self.ensure_consistent();
        self.profiles
            .entry(self.active_profile.clone())
            .or_default()
    }

    pub fn switch(&mut self, name: &str) -> AppResult<()> {
        self.profile(name)?;
        self.active_profile = name.to_string();
        Ok(())
    }

    /// Store targets and image under `name` (overwriting) and make it active.
    pub fn save_as(&mut self, name: &str, targets: Vec<Target>, global_image: &str) -> AppResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::validation("name", "Profile name cannot be empty"));
        }

        self.profiles.insert(
            name.to_string(),
            Profile {
                targets,
                global_image: global_image.trim().to_string(),
            },
        );
        self.active_profile = name.to_string();
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> AppResult<()> {
        if name == DEFAULT_PROFILE {
            return Err(AppError::Profile(
                "Cannot delete the Default profile.".to_string(),
            ));
        }
        if self.profiles.remove(name).is_none() {
            return Err(AppError::Profile(format!(
                "Profile \"{}\" does not exist",
                name
            )));
        }

        self.active_profile = DEFAULT_PROFILE.to_string();
        self.ensure_consistent();
        Ok(())
    }

    pub fn add_target(&mut self, target: Target) -> usize {
        let profile = self.active_mut();
        profile.targets.push(target);
        profile.targets.len()
    }

    /// Remove a target by its 1-based position in the active profile.
    pub fn remove_target(&mut self, number: usize) -> AppResult<Target> {
        let profile = self.active_mut();
        if number == 0 || number > profile.targets.len() {
            return Err(AppError::validation(
                "target",
                &format!("Target #{} does not exist", number),
            ));
        }
        Ok(profile.targets.remove(number - 1))
    }

    pub fn set_global_image(&mut self, path: &str) {
        self.active_mut().global_image = InputValidator::sanitize_stored_path(path);
    }

    pub fn save_token(&mut self, token: &str) -> AppResult<()> {
        let token = token.trim();
        InputValidator::validate_token(token)?;
        self.token = Some(SavedToken {
            token: Credential::new(token),
            saved_at: Utc::now(),
        });
        Ok(())
    }

    pub fn forget_token(&mut self) -> bool {
        self.token.take().is_some()
    }

    pub fn saved_token(&self) -> Option<&Credential> {
        self.token.as_ref().map(|saved| &saved.token)
    }
}

/// Persistence for profiles and the saved token.
pub trait ProfileStore {
    fn load(&self) -> AppResult<ProfilesData>;
    fn save(&self, data: &ProfilesData) -> AppResult<()>;
}

fn decode_or_default(raw: &str) -> ProfilesData {
    ProfilesData::from_json(raw).unwrap_or_else(|e| {
        log::warn!("Failed to parse stored profiles: {}. Using defaults.", e);
        ProfilesData::default()
    })
}

fn encode(data: &ProfilesData) -> AppResult<String> {
    let mut data = data.clone();
    data.updated_at = Some(Utc::now());
    Ok(serde_json::to_string_pretty(&data)?)
}

/// JSON file under the config directory.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn open_default() -> AppResult<Self> {
        Ok(Self::new(config::get_config_directory()?.join("profiles.json")))
    }
}

impl ProfileStore for JsonFileStore {
    fn load(&self) -> AppResult<ProfilesData> {
        if !self.path.exists() {
            return Ok(ProfilesData::default());
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(decode_or_default(&raw))
    }

    fn save(&self, data: &ProfilesData) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, encode(data)?)?;

        // The file may hold a token
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600)) {
                log::warn!("Failed to restrict permissions on {}: {}", self.path.display(), e);
            }
        }

        log::debug!("Profiles saved to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store holding the serialized document.
#[derive(Default)]
pub struct MemoryStore {
    raw: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn with_raw(raw: &str) -> Self {
        Self {
            raw: Mutex::new(Some(raw.to_string())),
        }
    }

    pub fn raw(&self) -> Option<String> {
        self.raw.lock().ok().and_then(|raw| raw.clone())
    }
}

impl ProfileStore for MemoryStore {
    fn load(&self) -> AppResult<ProfilesData> {
        let raw = self
            .raw
            .lock()
            .map_err(|e| AppError::Internal(format!("profile store lock poisoned: {}", e)))?;
        Ok(raw.as_deref().map(decode_or_default).unwrap_or_default())
    }

    fn save(&self, data: &ProfilesData) -> AppResult<()> {
        let encoded = encode(data)?;
        let mut raw = self
            .raw
            .lock()
            .map_err(|e| AppError::Internal(format!("profile store lock poisoned: {}", e)))?;
        *raw = Some(encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_list_profile_is_migrated() {
        let raw = r#"{
            "profiles": {
                "Default": [],
                "Raids": [
                    {"channel_id": "1", "role_id": "2", "message": "go", "image_path": "undefined"}
                ],
                "News": {"targets": [{"channel_id": "3", "message": "hi"}], "global_image": "/tmp/a.png"}
            },
            "activeProfile": "Raids"
        }"#;

        let data = ProfilesData::from_json(raw).unwrap();
        assert_eq!(data.active_profile, "Raids");

        let raids = data.profile("Raids").unwrap();
        assert_eq!(raids.targets.len(), 1);
        assert_eq!(raids.targets[0].image_path, "");
        assert_eq!(raids.global_image, "");

        assert_eq!(data.profile("News").unwrap().global_image, "/tmp/a.png");
    }

    #[test]
    fn test_missing_default_and_dangling_active_are_repaired() {
        let data = ProfilesData::from_json(r#"{"profiles": {"A": []}, "active_profile": "Gone"}"#)
            .unwrap();
        assert_eq!(data.active_profile, DEFAULT_PROFILE);
        assert!(data.profile(DEFAULT_PROFILE).is_ok());
    }

    #[test]
    fn test_default_profile_cannot_be_deleted() {
        let mut data = ProfilesData::default();
        let err = data.delete(DEFAULT_PROFILE).unwrap_err();
        assert_eq!(err.to_string(), "Profile error: Cannot delete the Default profile.");
    }

    #[test]
    fn test_save_as_then_delete_returns_to_default() {
        let mut data = ProfilesData::default();
        data.save_as("Weekly", vec![Target::new("1", "hi")], " /tmp/x.png ")
            .unwrap();
        assert_eq!(data.active_profile, "Weekly");
        assert_eq!(data.active().global_image, "/tmp/x.png");

        data.delete("Weekly").unwrap();
        assert_eq!(data.active_profile, DEFAULT_PROFILE);
        assert!(data.profile("Weekly").is_err());
    }

    #[test]
    fn test_target_add_and_remove() {
        let mut data = ProfilesData::default();
        assert_eq!(data.add_target(Target::new("1", "a")), 1);
        assert_eq!(data.add_target(Target::new("2", "b")), 2);
        assert!(data.remove_target(3).is_err());
        assert_eq!(data.remove_target(1).unwrap().channel_id, "1");
        assert_eq!(data.active().targets[0].channel_id, "2");
    }

    #[test]
    fn test_token_save_and_forget() {
        let mut data = ProfilesData::default();
        data.save_token(" abc ").unwrap();
        assert_eq!(data.saved_token().unwrap().expose(), "abc");
        assert!(data.forget_token());
        assert!(!data.forget_token());
        assert!(data.saved_token().is_none());
    }

    #[test]
    fn test_memory_store_round_trips_through_current_shape() {
        let store = MemoryStore::with_raw(r#"{"profiles": {"Default": [{"channel_id": "9", "message": "m"}]}}"#);
        let mut data = store.load().unwrap();
        data.set_global_image("/img/banner.gif");
        store.save(&data).unwrap();

        let raw = store.raw().unwrap();
        assert!(raw.contains("\"global_image\": \"/img/banner.gif\""));
        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.active().targets[0].channel_id, "9");
        assert!(reloaded.updated_at.is_some());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        fs::write(&path, "[oops").unwrap();

        let store = JsonFileStore::new(path);
        assert_eq!(store.load().unwrap(), ProfilesData::default());
    }
}
