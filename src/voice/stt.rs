//! Speech-to-text (STT) processing

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use super::{capture::samples_to_wav, dsp};
use crate::{Error, Result};

/// Streaming transcription session used by the audio thread
///
/// Frames are fed while recording; [`Transcriber::transcription`] is called
/// once recording has stopped.
pub trait Transcriber: Send {
    /// Sample rate expected by [`Transcriber::process_audio`]
    fn sample_rate(&self) -> u32;

    /// Discard any buffered audio and start a new session
    fn reset(&mut self);

    /// Feed one frame at [`Transcriber::sample_rate`]
    fn process_audio(&mut self, frame: &[i16]);

    /// Whether enough audio is buffered to be worth transcribing
    fn has_minimum_audio(&self) -> bool;

    /// Duration of buffered audio in milliseconds
    fn buffered_audio_duration_ms(&self) -> u64;

    /// Finalize the session and return the transcript
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails or times out
    fn transcription(&mut self) -> Result<String>;
}

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SttProvider {
    Whisper,
    Deepgram,
}

impl SttProvider {
    /// Parse a provider name from configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unknown names
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Buffers an utterance and transcribes it with a cloud API on finalize
pub struct CloudTranscriber {
    client: reqwest::blocking::Client,
    api_key: SecretString,
    model: String,
    provider: SttProvider,
    sample_rate: u32,
    min_audio_ms: u64,
    buffer: Vec<i16>,
}

impl CloudTranscriber {
    /// Create a transcriber for `provider`
    ///
    /// `timeout` bounds the whole finalize request.
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the client cannot be built
    pub fn new(
        provider: SttProvider,
        api_key: SecretString,
        model: String,
        sample_rate: u32,
        min_audio_ms: u64,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!(
                "API key required for {provider:?} transcription"
            )));
        }

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            provider,
            sample_rate,
            min_audio_ms,
            buffer: Vec::new(),
        })
    }

    /// Transcribe using `OpenAI` Whisper
    fn transcribe_whisper(&self, wav: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting Whisper transcription");

        let form = reqwest::blocking::multipart::Form::new()
            .part(
                "file",
                reqwest::blocking::multipart::Part::bytes(wav)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json()?;
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    fn transcribe_deepgram(&self, wav: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Token {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "audio/wav")
            .body(wav)
            .send()
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json()?;

        Ok(result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default())
    }
}

impl Transcriber for CloudTranscriber {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }

    fn process_audio(&mut self, frame: &[i16]) {
        self.buffer.extend_from_slice(frame);
    }

    fn has_minimum_audio(&self) -> bool {
        self.buffered_audio_duration_ms() >= self.min_audio_ms
    }

    fn buffered_audio_duration_ms(&self) -> u64 {
        dsp::duration_ms(self.buffer.len(), self.sample_rate)
    }

    fn transcription(&mut self) -> Result<String> {
        let samples = std::mem::take(&mut self.buffer);
        let wav = samples_to_wav(&samples, self.sample_rate)?;

        let transcript = match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(wav)?,
            SttProvider::Deepgram => self.transcribe_deepgram(wav)?,
        };

        let transcript = transcript.trim().to_string();
        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

fn map_request_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        tracing::warn!("transcription request timed out");
        Error::Stt(format!("request timed out: {e}"))
    } else {
        tracing::error!(error = %e, "transcription request failed");
        Error::Http(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcriber() -> CloudTranscriber {
        CloudTranscriber::new(
            SttProvider::Whisper,
            SecretString::from("sk-test".to_string()),
            "whisper-1".to_string(),
            16_000,
            250,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(SttProvider::parse("Whisper").unwrap(), SttProvider::Whisper);
        assert_eq!(SttProvider::parse("deepgram").unwrap(), SttProvider::Deepgram);
        assert!(SttProvider::parse("nope").is_err());
    }

    #[test]
    fn test_missing_key_rejected() {
        let result = CloudTranscriber::new(
            SttProvider::Deepgram,
            SecretString::from(String::new()),
            "nova-2".to_string(),
            16_000,
            250,
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_buffer_accounting() {
        let mut stt = transcriber();
        assert!(!stt.has_minimum_audio());

        stt.process_audio(&[0; 3200]);
        assert_eq!(stt.buffered_audio_duration_ms(), 200);
        assert!(!stt.has_minimum_audio());

        stt.process_audio(&[0; 1600]);
        assert!(stt.has_minimum_audio());

        stt.reset();
        assert_eq!(stt.buffered_audio_duration_ms(), 0);
    }
}
