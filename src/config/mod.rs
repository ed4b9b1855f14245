//! Configuration management for Vesper
//!
//! Precedence: environment > TOML file > defaults.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::voice::{RecordingLimits, SttProvider, TtsProvider};
use crate::{Error, Result};

use self::file::{DesireFileConfig, VesperConfigFile};

/// Vesper runtime configuration
#[derive(Debug)]
pub struct Config {
    /// Path to data directory (database, calendar)
    pub data_dir: PathBuf,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Text generation configuration
    pub llm: LlmConfig,

    /// Agenda producers configuration
    pub agenda: AgendaConfig,

    /// Memory formation configuration
    pub memory: MemoryConfig,

    /// Maximum queued events
    pub queue_capacity: usize,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Which synthesizer speaks replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutput {
    /// A cloud TTS API
    Cloud(TtsProvider),
    /// A local program and its argument template
    Command { program: String, args: Vec<String> },
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable microphone input
    pub enabled: bool,

    /// Wake phrases
    pub wake_words: Vec<String>,

    /// RMS level above which a frame counts as speech for wake spotting
    pub wake_energy_threshold: f32,

    /// STT backend
    pub stt_provider: SttProvider,

    /// STT model
    pub stt_model: String,

    /// STT request timeout
    pub stt_timeout: Duration,

    /// Speech output backend
    pub output: SpeechOutput,

    /// TTS model (cloud providers)
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier
    pub tts_speed: f32,

    /// Per-sentence synthesis timeout
    pub tts_timeout: Duration,

    /// Utterance recording limits
    pub recording: RecordingLimits,
}

/// Text generation configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL
    pub base_url: String,
    /// Model identifier
    pub model: String,
    /// Max tokens per reply
    pub max_tokens: u32,
    /// Persona instructions
    pub system_prompt: String,
    /// History messages kept for prompts
    pub max_history: usize,
    /// Connect timeout
    pub timeout: Duration,
}

/// Agenda configuration
#[derive(Debug, Clone)]
pub struct AgendaConfig {
    /// JSON calendar file
    pub calendar_path: PathBuf,
    /// Alert lead window
    pub calendar_lead: Duration,
    /// Calendar poll interval
    pub calendar_poll: Duration,
    /// Planner poll interval
    pub planner_poll: Duration,
    /// Base initiative interval; `None` disables initiatives
    pub initiative_interval: Option<Duration>,
    /// Random extra initiative delay
    pub initiative_jitter: Duration,
    /// Desires seeded at startup
    pub desires: Vec<DesireFileConfig>,
}

/// Memory formation configuration
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub enabled: bool,
    /// Minimum time between formation runs
    pub min_interval: Duration,
    /// Memories included in each prompt
    pub max_in_prompt: usize,
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, TTS, default LLM)
    pub openai: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<SecretString>,

    /// Key for a non-`OpenAI` LLM endpoint
    pub llm: Option<SecretString>,
}

impl ApiKeys {
    fn copy(key: Option<&SecretString>) -> Option<SecretString> {
        key.map(|k| SecretString::from(k.expose_secret().to_string()))
    }

    /// Key for the configured STT provider
    #[must_use]
    pub fn stt(&self, provider: SttProvider) -> Option<SecretString> {
        match provider {
            SttProvider::Whisper => Self::copy(self.openai.as_ref()),
            SttProvider::Deepgram => Self::copy(self.deepgram.as_ref()),
        }
    }

    /// Key for the configured TTS provider
    #[must_use]
    pub fn tts(&self, provider: TtsProvider) -> Option<SecretString> {
        match provider {
            TtsProvider::OpenAI => Self::copy(self.openai.as_ref()),
            TtsProvider::ElevenLabs => Self::copy(self.elevenlabs.as_ref()),
        }
    }

    /// Key for the LLM endpoint; falls back to the `OpenAI` key
    #[must_use]
    pub fn llm(&self) -> Option<SecretString> {
        Self::copy(self.llm.as_ref().or(self.openai.as_ref()))
    }
}

/// Return the data directory: `~/.local/share/vesper` on Linux
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from(".vesper"), |d| d.data_dir().join("vesper"))
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are Vesper, a warm and concise voice assistant \
running on the user's own computer.";

fn parse_tts(name: &str) -> Result<Option<TtsProvider>> {
    match name.trim().to_lowercase().as_str() {
        "openai" => Ok(Some(TtsProvider::OpenAI)),
        "elevenlabs" => Ok(Some(TtsProvider::ElevenLabs)),
        "command" => Ok(None),
        other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
    }
}

fn secret(value: Option<String>) -> Option<SecretString> {
    value.filter(|v| !v.trim().is_empty()).map(SecretString::from)
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unusable or a value is invalid
    pub fn load(config_path: Option<&Path>, disable_voice: bool) -> Result<Self> {
        let fc = file::load_config_file(config_path)?;
        let config = Self::resolve(fc, |name| std::env::var(name).ok(), disable_voice)?;

        if disable_voice {
            tracing::info!("voice explicitly disabled via --disable-voice");
        }

        Ok(config)
    }

    /// Merge `env` over the file config over defaults
    ///
    /// # Errors
    ///
    /// Returns error if a provider name or value is invalid
    #[allow(clippy::too_many_lines)]
    pub fn resolve(
        fc: VesperConfigFile,
        env: impl Fn(&str) -> Option<String>,
        disable_voice: bool,
    ) -> Result<Self> {
        let env_u64 = |name: &str| env(name).and_then(|s| s.trim().parse::<u64>().ok());

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: secret(env("OPENAI_API_KEY").or(fc.api_keys.openai)),
            elevenlabs: secret(env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs)),
            deepgram: secret(env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram)),
            llm: secret(env("VESPER_LLM_API_KEY").or(fc.api_keys.llm)),
        };

        // Voice config (env > toml > default)
        let v = fc.voice;
        let voice_enabled = !disable_voice
            && env("VESPER_VOICE_ENABLED")
                .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
                .or(v.enabled)
                .unwrap_or(true);

        let wake_words = env("VESPER_WAKE_WORDS")
            .map(|s| s.split(',').map(|w| w.trim().to_string()).collect::<Vec<_>>())
            .or(v.wake_words)
            .unwrap_or_else(|| vec!["hey vesper".to_string()]);
        let wake_words: Vec<String> = wake_words.into_iter().filter(|w| !w.is_empty()).collect();
        if voice_enabled && wake_words.is_empty() {
            return Err(Error::Config("at least one wake word is required".to_string()));
        }

        let stt_provider = SttProvider::parse(
            &env("VESPER_STT_PROVIDER")
                .or(v.stt_provider)
                .unwrap_or_else(|| "whisper".to_string()),
        )?;
        let stt_model = env("VESPER_STT_MODEL").or(v.stt_model).unwrap_or_else(|| {
            match stt_provider {
                SttProvider::Whisper => "whisper-1",
                SttProvider::Deepgram => "nova-2",
            }
            .to_string()
        });

        let tts_name = env("VESPER_TTS_PROVIDER")
            .or(v.tts_provider)
            .unwrap_or_else(|| "openai".to_string());
        let output = match parse_tts(&tts_name)? {
            Some(provider) => SpeechOutput::Cloud(provider),
            None => SpeechOutput::Command {
                program: env("VESPER_TTS_COMMAND")
                    .or(v.tts_command)
                    .unwrap_or_else(|| "espeak-ng".to_string()),
                args: v.tts_args.unwrap_or_default(),
            },
        };
        let default_tts_model = if output == SpeechOutput::Cloud(TtsProvider::ElevenLabs) {
            "eleven_turbo_v2"
        } else {
            "tts-1"
        };
        let tts_model = env("VESPER_TTS_MODEL")
            .or(v.tts_model)
            .unwrap_or_else(|| default_tts_model.to_string());

        let tts_speed = v.tts_speed.unwrap_or(1.0);
        if !(0.25..=4.0).contains(&tts_speed) {
            return Err(Error::Config(format!(
                "tts_speed must be between 0.25 and 4.0, got {tts_speed}"
            )));
        }

        let defaults = RecordingLimits::default();
        let recording = RecordingLimits {
            silence_threshold: v.silence_threshold.unwrap_or(defaults.silence_threshold),
            silence_timeout: v
                .silence_timeout_ms
                .map_or(defaults.silence_timeout, Duration::from_millis),
            max_duration: v
                .max_recording_secs
                .map_or(defaults.max_duration, Duration::from_secs),
            min_speech: v
                .min_speech_ms
                .map_or(defaults.min_speech, Duration::from_millis),
        };

        let voice = VoiceConfig {
            enabled: voice_enabled,
            wake_words,
            wake_energy_threshold: v.wake_energy_threshold.unwrap_or(defaults.silence_threshold),
            stt_provider,
            stt_model,
            stt_timeout: Duration::from_secs(v.stt_timeout_secs.unwrap_or(15)),
            output,
            tts_model,
            tts_voice: env("VESPER_TTS_VOICE")
                .or(v.tts_voice)
                .unwrap_or_else(|| "alloy".to_string()),
            tts_speed,
            tts_timeout: Duration::from_secs(v.tts_timeout_secs.unwrap_or(20)),
            recording,
        };

        // LLM config (env > toml > default)
        let l = fc.llm;
        let llm = LlmConfig {
            base_url: env("VESPER_LLM_BASE_URL")
                .or(l.base_url)
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: env("VESPER_LLM_MODEL")
                .or(l.model)
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            max_tokens: l.max_tokens.unwrap_or(400),
            system_prompt: l
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_history: l.max_history.unwrap_or(20),
            timeout: Duration::from_secs(l.timeout_secs.unwrap_or(10)),
        };

        // Data directory (env > default)
        let data_dir = env("VESPER_DATA_DIR").map_or_else(default_data_dir, PathBuf::from);

        // Agenda (toml > default)
        let a = fc.agenda;
        let initiative_mins = env_u64("VESPER_INITIATIVE_MINS")
            .or(a.initiative_interval_mins)
            .unwrap_or(45);
        let agenda = AgendaConfig {
            calendar_path: a
                .calendar_path
                .map_or_else(|| data_dir.join("calendar.json"), PathBuf::from),
            calendar_lead: Duration::from_secs(a.calendar_lead_mins.unwrap_or(10) * 60),
            calendar_poll: Duration::from_secs(a.calendar_poll_secs.unwrap_or(30).max(1)),
            planner_poll: Duration::from_secs(a.planner_poll_secs.unwrap_or(5).max(1)),
            initiative_interval: (initiative_mins > 0)
                .then(|| Duration::from_secs(initiative_mins * 60)),
            initiative_jitter: Duration::from_secs(a.initiative_jitter_mins.unwrap_or(15) * 60),
            desires: a.desires.unwrap_or_default(),
        };

        let m = fc.memory;
        let memory = MemoryConfig {
            enabled: m.enabled.unwrap_or(true),
            min_interval: Duration::from_secs(m.min_interval_secs.unwrap_or(120)),
            max_in_prompt: m.max_in_prompt.unwrap_or(8),
        };

        let queue_capacity = env_u64("VESPER_QUEUE_CAPACITY")
            .and_then(|n| usize::try_from(n).ok())
            .or(fc.queue.capacity)
            .unwrap_or(32)
            .max(1);

        Ok(Self {
            data_dir,
            voice,
            llm,
            agenda,
            memory,
            queue_capacity,
            api_keys,
        })
    }

    /// Path of the `SQLite` database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("vesper.db")
    }
}
