//! TOML configuration file loading
//!
//! Supports `~/.config/vesper/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VesperConfigFile {
    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// LLM configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Calendar, planner and initiative configuration
    #[serde(default)]
    pub agenda: AgendaFileConfig,

    /// Memory formation configuration
    #[serde(default)]
    pub memory: MemoryFileConfig,

    /// Event queue configuration
    #[serde(default)]
    pub queue: QueueFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable microphone input
    pub enabled: Option<bool>,

    /// Wake phrases (e.g. ["hey vesper"])
    pub wake_words: Option<Vec<String>>,

    /// RMS level above which a frame counts as speech for wake spotting
    pub wake_energy_threshold: Option<f32>,

    /// STT provider ("whisper" or "deepgram")
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: Option<String>,

    /// STT request timeout in seconds
    pub stt_timeout_secs: Option<u64>,

    /// TTS provider ("openai", "elevenlabs" or "command")
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// Local TTS program for the "command" provider (e.g. "espeak-ng")
    pub tts_command: Option<String>,

    /// Argument template for the local TTS program
    pub tts_args: Option<Vec<String>>,

    /// Per-sentence synthesis timeout in seconds
    pub tts_timeout_secs: Option<u64>,

    /// RMS level below which a frame counts as silence while recording
    pub silence_threshold: Option<f32>,

    /// Silence after speech that ends a recording, in milliseconds
    pub silence_timeout_ms: Option<u64>,

    /// Hard cap on a recording, in seconds
    pub max_recording_secs: Option<u64>,

    /// Minimum speech for an utterance to be transcribed, in milliseconds
    pub min_speech_ms: Option<u64>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// OpenAI-compatible API base URL
    pub base_url: Option<String>,

    /// Model identifier (e.g. "gpt-4o-mini")
    pub model: Option<String>,

    /// Max tokens per reply
    pub max_tokens: Option<u32>,

    /// Persona instructions placed at the top of the system prompt
    pub system_prompt: Option<String>,

    /// History messages kept for prompts
    pub max_history: Option<usize>,

    /// Connect timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// One configured desire
#[derive(Debug, Clone, Deserialize)]
pub struct DesireFileConfig {
    pub description: String,
    #[serde(default = "default_intensity")]
    pub intensity: f32,
}

const fn default_intensity() -> f32 {
    0.5
}

/// Agenda configuration
#[derive(Debug, Default, Deserialize)]
pub struct AgendaFileConfig {
    /// JSON calendar file
    pub calendar_path: Option<String>,

    /// How far ahead of an entry to alert, in minutes
    pub calendar_lead_mins: Option<u64>,

    /// Calendar poll interval in seconds
    pub calendar_poll_secs: Option<u64>,

    /// Planner poll interval in seconds
    pub planner_poll_secs: Option<u64>,

    /// Base interval between initiatives, in minutes (0 disables)
    pub initiative_interval_mins: Option<u64>,

    /// Random extra delay added to each initiative interval, in minutes
    pub initiative_jitter_mins: Option<u64>,

    /// Desires seeded at startup
    pub desires: Option<Vec<DesireFileConfig>>,
}

/// Memory formation configuration
#[derive(Debug, Default, Deserialize)]
pub struct MemoryFileConfig {
    pub enabled: Option<bool>,

    /// Minimum seconds between memory formation runs
    pub min_interval_secs: Option<u64>,

    /// Memories included in each prompt
    pub max_in_prompt: Option<usize>,
}

/// Event queue configuration
#[derive(Debug, Default, Deserialize)]
pub struct QueueFileConfig {
    pub capacity: Option<usize>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
    /// Key for `llm.base_url` when it is not `OpenAI`
    pub llm: Option<String>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is invalid
pub fn parse_config(content: &str) -> Result<VesperConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file
///
/// With an explicit `path` a missing or invalid file is an error. Without
/// one, the standard path is tried and problems fall back to defaults.
///
/// # Errors
///
/// Returns error if an explicit config file cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<VesperConfigFile> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config = parse_config(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(VesperConfigFile::default());
    };

    if !path.exists() {
        return Ok(VesperConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(VesperConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(VesperConfigFile::default())
        }
    }
}

/// Return the config file path: `~/.config/vesper/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("vesper").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_partial_file() {
        let config = parse_config(
            r#"
            [voice]
            wake_words = ["hey vesper", "ok vesper"]
            tts_speed = 1.25

            [[agenda.desires]]
            description = "ask how the day went"
            "#,
        )
        .unwrap();

        assert_eq!(config.voice.wake_words.unwrap().len(), 2);
        assert_eq!(config.voice.tts_speed, Some(1.25));
        assert!(config.voice.enabled.is_none());
        let desires = config.agenda.desires.unwrap();
        assert!((desires[0].intensity - 0.5).abs() < f32::EPSILON);
        assert!(config.llm.model.is_none());
    }

    #[test]
    fn test_unknown_section_rejected() {
        assert!(matches!(parse_config("[server]\nport = 1"), Err(Error::Toml(_))));
    }

    #[test]
    fn test_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[queue]\ncapacity = 8\n").unwrap();
        let config = load_config_file(Some(file.path())).unwrap();
        assert_eq!(config.queue.capacity, Some(8));

        let missing = Path::new("/nonexistent/vesper.toml");
        assert!(matches!(load_config_file(Some(missing)), Err(Error::Config(_))));
    }
}
