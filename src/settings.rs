//! Dictation settings storage
//!
//! Handles saving and loading recognition settings to a JSON file in the
//! user config directory. Settings are read at session start, so changes
//! only affect sessions started afterwards.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use zeroize::Zeroize;

/// Environment variable consulted when the settings file has no API key
const API_KEY_ENV: &str = "DEEPGRAM_API_KEY";

/// Recognition settings, stored flat so they stay editable as plain JSON
///
/// The boolean toggles are passed through to the recognition service
/// verbatim; unsupported combinations are the service's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DictationSettings {
    pub api_key: String,
    pub model: String,
    pub language: String,
    pub smart_format: bool,
    pub punctuation: bool,
    pub paragraphs: bool,
    pub utterances: bool,
    pub filler_words: bool,
    pub summarize: bool,
    pub topic_detection: bool,
    pub intent_detection: bool,
    pub sentiment: bool,
}

impl Default for DictationSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "nova-2".to_string(),
            language: "en-US".to_string(),
            smart_format: false,
            punctuation: false,
            paragraphs: false,
            utterances: false,
            filler_words: false,
            summarize: false,
            topic_detection: false,
            intent_detection: false,
            sentiment: false,
        }
    }
}

/// API key held for the duration of a session
pub struct ApiKey(String);

impl ApiKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Drop for ApiKey {
    fn drop(&mut self) {
        // Clear API key from memory
        self.0.zeroize();
    }
}

impl DictationSettings {
    /// Resolve the API key from the settings file or the environment
    pub fn resolve_api_key(&self) -> Result<ApiKey, SettingsError> {
        if !self.api_key.is_empty() {
            return Ok(ApiKey(self.api_key.clone()));
        }
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.is_empty() => Ok(ApiKey(key)),
            _ => Err(SettingsError::MissingApiKey),
        }
    }
}

/// Get the settings file path
fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("voicenote").join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or can't be read
pub(crate) fn load_settings() -> DictationSettings {
    let Some(path) = settings_path() else {
        return DictationSettings::default();
    };
    load_from(&path)
}

fn load_from(path: &Path) -> DictationSettings {
    if !path.exists() {
        return DictationSettings::default();
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                error!("Failed to parse settings: {}", e);
                DictationSettings::default()
            }
        },
        Err(e) => {
            error!("Failed to read settings file: {}", e);
            DictationSettings::default()
        }
    }
}

/// Save settings to disk
pub(crate) fn save_settings(settings: &DictationSettings) -> Result<(), SettingsError> {
    let path = settings_path().ok_or(SettingsError::NoConfigDir)?;
    save_to(settings, &path)
}

fn save_to(settings: &DictationSettings, path: &Path) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            info!("Created settings directory: {:?}", parent);
        }
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;
    info!("Saved settings to: {:?}", path);

    Ok(())
}

/// Write a default settings file if none exists and return its path
pub(crate) fn ensure_default_settings() -> Result<PathBuf, SettingsError> {
    let path = settings_path().ok_or(SettingsError::NoConfigDir)?;
    if !path.exists() {
        save_settings(&DictationSettings::default())?;
    }
    Ok(path)
}

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Could not find config directory")]
    NoConfigDir,

    #[error("No API key configured - add one to settings.json or set {API_KEY_ENV}")]
    MissingApiKey,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
