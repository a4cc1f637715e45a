//! Listener configuration (JSON file in the user config directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::audio::{StreamFormat, FRAME_SAMPLES, SAMPLE_RATE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ListenerConfig {
    /// Acoustic model (HMM) directory.
    pub acoustic_model: PathBuf,
    pub language_model: PathBuf,
    /// Default pronunciation dictionary.
    pub dictionary: PathBuf,
    /// Pre-built numbers dictionary; the built-in digit grammar is used
    /// when this does not exist.
    pub numbers_dictionary: Option<PathBuf>,
    pub lang: String,
    pub sample_rate: u32,
    pub frame_samples: usize,
    /// Bounded wait when joining background listening threads.
    pub join_timeout_ms: u64,
    pub confirm_listening: bool,
    pub start_listening_sound: Option<PathBuf>,
    pub preferred_input_device: Option<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            acoustic_model: PathBuf::from("model/en-us/hmm"),
            language_model: PathBuf::from("model/en-us/en-us.lm"),
            dictionary: PathBuf::from("model/en-us/basic.dic"),
            numbers_dictionary: None,
            lang: "en-us".into(),
            sample_rate: SAMPLE_RATE,
            frame_samples: FRAME_SAMPLES,
            join_timeout_ms: 1_000,
            confirm_listening: false,
            start_listening_sound: None,
            preferred_input_device: None,
        }
    }
}

impl ListenerConfig {
    pub fn normalize(&mut self) {
        self.lang = normalize_lang(&self.lang);
        self.sample_rate = self.sample_rate.clamp(8_000, 48_000);
        self.frame_samples = self.frame_samples.clamp(128, 8_192);
        self.join_timeout_ms = self.join_timeout_ms.clamp(10, 30_000);
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.numbers_dictionary = self
            .numbers_dictionary
            .take()
            .filter(|p| !p.as_os_str().is_empty());
        self.start_listening_sound = self
            .start_listening_sound
            .take()
            .filter(|p| !p.as_os_str().is_empty());
    }

    pub fn stream_format(&self) -> StreamFormat {
        StreamFormat::new(self.sample_rate, self.frame_samples)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Override fields from `HARK_LANG`, `HARK_HMM`, `HARK_LM` and `HARK_DICT`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(lang) = std::env::var("HARK_LANG") {
            self.lang = normalize_lang(&lang);
        }
        if let Some(hmm) = std::env::var_os("HARK_HMM") {
            self.acoustic_model = PathBuf::from(hmm);
        }
        if let Some(lm) = std::env::var_os("HARK_LM") {
            self.language_model = PathBuf::from(lm);
        }
        if let Some(dict) = std::env::var_os("HARK_DICT") {
            self.dictionary = PathBuf::from(dict);
        }
    }
}

pub fn normalize_lang(raw: &str) -> String {
    let lang = raw.trim().to_ascii_lowercase().replace('_', "-");
    if lang.is_empty() {
        "en-us".into()
    } else {
        lang
    }
}

pub fn default_config_path() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("hark")
        .join("config.json")
}

/// Read `path`, falling back to defaults when it is missing or invalid.
pub fn load_config(path: &Path) -> ListenerConfig {
    let mut config = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<ListenerConfig>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), "invalid config, using defaults: {e}");
            ListenerConfig::default()
        }),
        Err(_) => ListenerConfig::default(),
    };
    config.normalize();
    config
}

pub fn save_config(path: &Path, config: &ListenerConfig) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults_and_normalizes() {
        let raw = r#"{"lang":" EN_GB ","frameSamples":4,"confirmListening":true}"#;
        let mut config: ListenerConfig = serde_json::from_str(raw).unwrap();
        config.normalize();
        assert_eq!(config.lang, "en-gb");
        assert_eq!(config.frame_samples, 128);
        assert!(config.confirm_listening);
        assert_eq!(config.sample_rate, 16_000);
        assert_eq!(config.join_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn missing_or_invalid_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            load_config(&dir.path().join("absent.json")),
            ListenerConfig::default()
        );

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert_eq!(load_config(&bad), ListenerConfig::default());
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = ListenerConfig {
            numbers_dictionary: Some(PathBuf::from("numbers.dic")),
            join_timeout_ms: 250,
            ..ListenerConfig::default()
        };
        save_config(&path, &config).unwrap();
        assert_eq!(load_config(&path), config);
    }
}
