//! Text-to-speech (TTS) processing
//!
//! Synthesizers are only driven through [`crate::speech::OrderedSpeechSink`],
//! which owns ordering and the per-call deadline.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::playback::{AudioPlayback, play_cancellable};
use crate::{Error, Result};

/// Voice parameters for a synthesis call
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    /// Voice identifier (provider specific)
    pub voice: String,
    /// Speed multiplier (1.0 = normal)
    pub speed: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice: "alloy".to_string(),
            speed: 1.0,
        }
    }
}

/// Speaks text aloud, resolving once playback has finished
///
/// Dropping the returned future must abort the work in progress.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize and play `text`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the output device is gone, otherwise a
    /// per-call failure
    async fn speak(&self, text: &str, voice: &VoiceParams) -> Result<()>;
}

/// TTS provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAI,
    ElevenLabs,
}

/// Synthesizes speech with a cloud API and plays the MP3 result
pub struct CloudSynthesizer {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    provider: TtsProvider,
}

impl CloudSynthesizer {
    /// Create a cloud synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(provider: TtsProvider, api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!(
                "API key required for {provider:?} TTS"
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider,
        })
    }

    /// Synthesize text to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>> {
        match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text, voice).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text, voice).await,
        }
    }

    /// Synthesize using `OpenAI` TTS
    async fn synthesize_openai(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &voice.voice,
            speed: voice.speed,
            response_format: "mp3",
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Synthesize using `ElevenLabs` TTS
    async fn synthesize_elevenlabs(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}",
            voice.voice
        );

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .json(&ElevenLabsRequest {
                text,
                model_id: &self.model,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for CloudSynthesizer {
    async fn speak(&self, text: &str, voice: &VoiceParams) -> Result<()> {
        let mp3 = self.synthesize(text, voice).await?;
        tracing::debug!(bytes = mp3.len(), "synthesized speech");

        // cpal devices are not Send; open the speaker on the blocking thread
        play_cancellable(move |cancel| AudioPlayback::new()?.play_mp3(&mp3, cancel)).await
    }
}

/// Speaks through a local TTS program (e.g. `espeak-ng`, `say`, `piper`)
///
/// Argument templates may use `{text}`, `{voice}` and `{rate}`. The child
/// process is killed when the synthesis future is dropped.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandSynthesizer {
    /// Locate `program` on `PATH`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the program cannot be found
    pub fn new(program: &str, args: Vec<String>) -> Result<Self> {
        let program = which::which(program)
            .map_err(|e| Error::Device(format!("TTS program {program} not found: {e}")))?;
        Ok(Self { program, args })
    }

    /// Expand the argument template for one call
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn render_args(&self, text: &str, voice: &VoiceParams) -> Vec<String> {
        let rate = ((175.0 * voice.speed).round() as u32).to_string();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                a.replace("{voice}", &voice.voice)
                    .replace("{rate}", &rate)
                    .replace("{text}", text)
            })
            .collect();

        if self.args.iter().any(|a| a.contains("{text}")) {
            args
        } else {
            args.into_iter().chain(std::iter::once(text.to_string())).collect()
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn speak(&self, text: &str, voice: &VoiceParams) -> Result<()> {
        let status = tokio::process::Command::new(&self.program)
            .args(self.render_args(text, voice))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::Device(format!("failed to run TTS program: {e}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Tts(format!(
                "{} exited with {status}",
                self.program.display()
            )))
        }
    }
}
