use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{LivevoxError, Result};

fn default_live_endpoint() -> String {
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string()
}

fn default_live_model() -> String {
    "gemini-2.5-flash-native-audio-preview-09-2025".to_string()
}

fn default_live_instruction() -> String {
    "You are Dr. Setzer's helpful voice assistant. Keep answers concise and friendly.".to_string()
}

const fn default_frame_size() -> usize {
    4096
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_chat_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}

fn default_video_model() -> String {
    "veo-3.1-fast-generate-preview".to_string()
}

fn default_chat_instruction() -> String {
    "You are a helpful medical practice assistant for Dr. Setzer. You can answer general \
     questions about hours, location, and services. Do not provide medical advice."
        .to_string()
}

fn default_video_prompt_prefix() -> String {
    "Educational medical animation, realistic, high quality, clear, 1080p: ".to_string()
}

const fn default_video_poll_secs() -> u64 {
    5
}

/// Environment variables consulted, in order, when `api_key` is not set.
const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub api_key: Option<String>,

    #[serde(default)]
    pub live: LiveConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    #[serde(default = "default_live_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_live_model")]
    pub model: String,

    #[serde(default = "default_live_instruction")]
    pub system_instruction: String,

    pub voice: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: default_live_endpoint(),
            model: default_live_model(),
            system_instruction: default_live_instruction(),
            voice: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub input_device: Option<String>,

    pub output_device: Option<String>,

    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            frame_size: default_frame_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    #[serde(default = "default_image_model")]
    pub image_model: String,

    #[serde(default = "default_video_model")]
    pub video_model: String,

    #[serde(default = "default_chat_instruction")]
    pub chat_system_instruction: String,

    #[serde(default = "default_video_prompt_prefix")]
    pub video_prompt_prefix: String,

    #[serde(default = "default_video_poll_secs")]
    pub video_poll_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            chat_model: default_chat_model(),
            image_model: default_image_model(),
            video_model: default_video_model(),
            chat_system_instruction: default_chat_instruction(),
            video_prompt_prefix: default_video_prompt_prefix(),
            video_poll_secs: default_video_poll_secs(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LivevoxError::Config(format!(
                "config file not found: {}; run `livevox init` or use --config to specify a path",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            LivevoxError::Config(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml_ng::from_str(&contents).map_err(|e| {
            LivevoxError::Config(format!(
                "failed to parse config file {}: {e}",
                path.display()
            ))
        })?;

        if config.audio.frame_size == 0 {
            return Err(LivevoxError::Config(
                "audio.frame_size must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }

    #[must_use]
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        config_dir.join("livevox/config.yaml")
    }

    /// Resolve the API key from the config file, then the environment.
    pub fn api_key(&self) -> Result<String> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.trim().to_string());
        }

        API_KEY_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                LivevoxError::Config(format!(
                    "no API key: set api_key in the config file or export {}",
                    API_KEY_VARS.join(" / ")
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config: Config =
            serde_yaml_ng::from_str("{}").unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(config.audio.frame_size, 4096);
        assert_eq!(config.live.model, "gemini-2.5-flash-native-audio-preview-09-2025");
        assert!(config.live.system_instruction.contains("Dr. Setzer"));
        assert_eq!(config.inference.video_poll_secs, 5);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn parse_full_config() {
        let yaml = r#"
api_key: "abc123"

live:
  endpoint: "wss://example.test/live"
  model: my-live-model
  system_instruction: "Be brief."
  voice: Aoede

audio:
  input_device: "USB Mic"
  output_device: "Speakers"
  frame_size: 2048

inference:
  base_url: "https://example.test/v1"
  chat_model: chat-x
  image_model: image-x
  video_model: video-x
  chat_system_instruction: "Answer questions."
  video_prompt_prefix: ""
  video_poll_secs: 2
"#;
        let config: Config =
            serde_yaml_ng::from_str(yaml).unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(config.api_key.as_deref(), Some("abc123"));
        assert_eq!(config.live.endpoint, "wss://example.test/live");
        assert_eq!(config.live.voice.as_deref(), Some("Aoede"));
        assert_eq!(config.audio.input_device.as_deref(), Some("USB Mic"));
        assert_eq!(config.audio.output_device.as_deref(), Some("Speakers"));
        assert_eq!(config.audio.frame_size, 2048);
        assert_eq!(config.inference.chat_model, "chat-x");
        assert_eq!(config.inference.video_prompt_prefix, "");
        assert_eq!(config.inference.video_poll_secs, 2);
    }

    #[test]
    fn missing_config_file_gives_error() {
        let result = Config::load(Path::new("/nonexistent/config.yaml"));
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("config file not found"));
    }

    #[test]
    fn zero_frame_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "audio:\n  frame_size: 0\n").unwrap_or_else(|e| panic!("{e}"));

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("frame_size"));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "api_key: from-file\n").unwrap_or_else(|e| panic!("{e}"));

        let config = Config::load(&path).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(config.api_key().unwrap_or_else(|e| panic!("{e}")), "from-file");
    }
}
