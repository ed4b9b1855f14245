//! Audio capture from microphone

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use super::dsp;
use crate::{Error, Result};

/// Chunks buffered between the audio callback and the reader before drops
const CHANNEL_DEPTH: usize = 256;

/// Reads with no data for this long mean the device has stalled
const READ_STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocking source of mono 16-bit PCM frames
///
/// Owned by exactly one thread; implementations need not be `Send`.
pub trait Microphone {
    /// Native sample rate of the frames returned by [`Microphone::read_frame`]
    fn sample_rate(&self) -> u32;

    /// Fill `frame` completely, blocking until enough audio is available
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the device has failed or was disconnected
    fn read_frame(&mut self, frame: &mut [i16]) -> Result<()>;
}

/// Captures audio from the default input device
pub struct CpalMicrophone {
    sample_rate: u32,
    chunks: Receiver<Vec<i16>>,
    pending: Vec<i16>,
    // Dropping the stream releases the device
    _stream: Stream,
}

impl CpalMicrophone {
    /// Open the default input device at its native rate and start capturing
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if no usable input device exists
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string()))?;

        let supported = device
            .default_input_config()
            .map_err(|e| Error::Device(e.to_string()))?;

        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.config();
        let channels = usize::from(config.channels);
        let sample_rate = config.sample_rate.0;

        let (tx, rx) = mpsc::sync_channel::<Vec<i16>>(CHANNEL_DEPTH);

        let stream = match sample_format {
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    forward_chunk(&tx, downmix_i16(data, channels));
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            ),
            _ => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    forward_chunk(&tx, dsp::f32_to_i16(&downmix_f32(data, channels)));
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            ),
        }
        .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio capture started"
        );

        Ok(Self {
            sample_rate,
            chunks: rx,
            pending: Vec::new(),
            _stream: stream,
        })
    }
}

impl Microphone for CpalMicrophone {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frame(&mut self, frame: &mut [i16]) -> Result<()> {
        while self.pending.len() < frame.len() {
            let chunk = self
                .chunks
                .recv_timeout(READ_STALL_TIMEOUT)
                .map_err(|e| Error::Device(format!("microphone stopped delivering audio: {e}")))?;
            self.pending.extend_from_slice(&chunk);
        }

        frame.copy_from_slice(&self.pending[..frame.len()]);
        self.pending.drain(..frame.len());
        Ok(())
    }
}

fn forward_chunk(tx: &SyncSender<Vec<i16>>, chunk: Vec<i16>) {
    match tx.try_send(chunk) {
        Ok(()) | Err(TrySendError::Disconnected(_)) => {}
        Err(TrySendError::Full(_)) => {
            tracing::trace!("capture reader behind, dropping audio chunk");
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn downmix_i16(data: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn downmix_f32(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Encode 16-bit mono samples as WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo() {
        assert_eq!(downmix_i16(&[100, 300, -50, 50], 2), vec![200, 0]);
        let mono = downmix_f32(&[0.5, 0.25, 1.0, 0.0], 2);
        assert!((mono[0] - 0.375).abs() < f32::EPSILON);
        assert!((mono[1] - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_downmix_mono_passthrough() {
        assert_eq!(downmix_i16(&[1, 2, 3], 1), vec![1, 2, 3]);
    }
}
