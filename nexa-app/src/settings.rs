//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use nexa_core::session::{DEFAULT_LIVE_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE_NAME};
use nexa_core::{ClientConfig, LiveConfig};
use serde::{Deserialize, Serialize};

use crate::model_profiles::{AiModel, CHAT_TEMPERATURE};
use crate::state::{Language, SystemMode};

pub const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub api_key: Option<String>,
    pub model: AiModel,
    pub mode: SystemMode,
    pub language: Language,
    pub voice_name: String,
    pub live_model: String,
    pub preferred_input_device: Option<String>,
    pub temperature: f32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: AiModel::default(),
            mode: SystemMode::default(),
            language: Language::default(),
            voice_name: DEFAULT_VOICE_NAME.into(),
            live_model: DEFAULT_LIVE_MODEL.into(),
            preferred_input_device: None,
            temperature: CHAT_TEMPERATURE,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.api_key = normalize_optional(self.api_key.as_deref());
        self.preferred_input_device = normalize_optional(self.preferred_input_device.as_deref());
        self.voice_name = normalize_or(&self.voice_name, DEFAULT_VOICE_NAME);
        self.live_model = normalize_live_model(&self.live_model);
        self.temperature = if self.temperature.is_finite() {
            self.temperature.clamp(0.0, 2.0)
        } else {
            CHAT_TEMPERATURE
        };
    }

    /// API key from the environment, falling back to the settings file. The
    /// environment value is never written back to disk.
    pub fn resolved_api_key(&self) -> Option<String> {
        API_KEY_ENV_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok())
            .and_then(|key| normalize_optional(Some(&key)))
            .or_else(|| self.api_key.clone())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            preferred_input_device: self.preferred_input_device.clone(),
            live: LiveConfig {
                model: self.live_model.clone(),
                voice_name: self.voice_name.clone(),
                system_instruction: DEFAULT_SYSTEM_INSTRUCTION.into(),
            },
            ..ClientConfig::default()
        }
    }
}

fn normalize_optional(raw: Option<&str>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn normalize_or(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        fallback.into()
    } else {
        trimmed.into()
    }
}

/// Accepts both `models/<id>` and the bare id.
pub fn normalize_live_model(raw: &str) -> String {
    let trimmed = raw.trim();
    let bare = trimmed.strip_prefix("models/").unwrap_or(trimmed);
    normalize_or(bare, DEFAULT_LIVE_MODEL)
}

pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("NEXA")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("nexa")
    }
}

pub fn default_settings_path() -> PathBuf {
    default_data_dir().join("settings.json")
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("absent.json"));
        assert_eq!(settings.model, AiModel::Gemini3Flash);
        assert_eq!(settings.mode, SystemMode::PersonalAssistant);
        assert_eq!(settings.voice_name, "Kore");
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn partial_file_fills_in_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"model":"GEMINI_3_PRO_THINKING","apiKey":"  ","voiceName":"","liveModel":"models/custom","temperature":9}"#,
        )
        .unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.model, AiModel::Gemini3ProThinking);
        assert!(settings.api_key.is_none());
        assert_eq!(settings.voice_name, DEFAULT_VOICE_NAME);
        assert_eq!(settings.live_model, "custom");
        assert_eq!(settings.temperature, 2.0);
    }

    #[test]
    fn save_then_load_preserves_choices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = AppSettings {
            language: Language::Korean,
            preferred_input_device: Some("USB Mic".into()),
            ..AppSettings::default()
        };
        save_settings(&path, &settings).unwrap();

        let loaded = load_settings(&path);
        assert_eq!(loaded.language, Language::Korean);
        assert_eq!(loaded.preferred_input_device.as_deref(), Some("USB Mic"));
    }

    #[test]
    fn client_config_carries_voice_selection() {
        let settings = AppSettings {
            voice_name: "Puck".into(),
            preferred_input_device: Some("Desk".into()),
            ..AppSettings::default()
        };
        let config = settings.client_config();
        assert_eq!(config.live.voice_name, "Puck");
        assert_eq!(config.live.model, DEFAULT_LIVE_MODEL);
        assert_eq!(config.preferred_input_device.as_deref(), Some("Desk"));
        assert_eq!(config.frame_len, 4096);
    }
}
