//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Slack added on top of the clip length before playback is abandoned
const PLAYBACK_GRACE: Duration = Duration::from_millis(500);

/// How often a playing clip checks for completion or cancellation
const PLAYBACK_POLL: Duration = Duration::from_millis(20);

/// Why a playback wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaybackEnd {
    Finished,
    Cancelled,
    TimedOut,
}

fn wait_for_playback(
    finished: &AtomicBool,
    cancel: &AtomicBool,
    deadline: Instant,
) -> PlaybackEnd {
    loop {
        if finished.load(Ordering::Acquire) {
            return PlaybackEnd::Finished;
        }
        if cancel.load(Ordering::Acquire) {
            return PlaybackEnd::Cancelled;
        }
        if Instant::now() >= deadline {
            return PlaybackEnd::TimedOut;
        }
        std::thread::sleep(PLAYBACK_POLL);
    }
}

/// Raises the flag when dropped
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Run blocking playback on a blocking thread
///
/// `play` receives a cancel flag that is raised when the returned future
/// is dropped, so a timed-out caller also silences the speaker.
///
/// # Errors
///
/// Returns the error from `play`, or an error if the blocking task panics
pub async fn play_cancellable<F>(play: F) -> Result<()>
where
    F: FnOnce(&AtomicBool) -> Result<()> + Send + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let _guard = CancelOnDrop(Arc::clone(&cancel));

    tokio::task::spawn_blocking(move || play(&cancel))
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
}

/// Plays audio to the default output device
///
/// Blocking; call from a blocking thread, never from an async task.
pub struct AudioPlayback {
    device: Device,
    config: StreamConfig,
}

impl AudioPlayback {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if no output device can be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()))?;

        let rate = SampleRate(PLAYBACK_SAMPLE_RATE);
        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Device(e.to_string()))?
            .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| Error::Device("no suitable output config found".to_string()))?;

        let config = supported_config.with_sample_rate(rate).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { device, config })
    }

    /// Play MP3 bytes and wait for playback to finish or `cancel` to be raised
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub fn play_mp3(&self, mp3_data: &[u8], cancel: &AtomicBool) -> Result<()> {
        let samples = decode_mp3(mp3_data)?;
        self.play_samples(samples, cancel)
    }

    /// Play mono f32 samples at [`PLAYBACK_SAMPLE_RATE`] and wait
    ///
    /// Raising `cancel` stops the stream early.
    ///
    /// # Errors
    ///
    /// Returns error if the output stream cannot be built
    pub fn play_samples(&self, samples: Vec<f32>, cancel: &AtomicBool) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let channels = usize::from(self.config.channels);
        let sample_count = samples.len();
        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);

            self.device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut pos = position.load(Ordering::Relaxed);
                        for frame in data.chunks_mut(channels) {
                            let sample = samples.get(pos).copied().unwrap_or_else(|| {
                                finished.store(true, Ordering::Release);
                                0.0
                            });
                            frame.fill(sample);
                            if pos < samples.len() {
                                pos += 1;
                            }
                        }
                        position.store(pos, Ordering::Relaxed);
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Device(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Device(e.to_string()))?;

        let clip = Duration::from_millis(
            (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE),
        );
        let end = wait_for_playback(&finished, cancel, Instant::now() + clip + PLAYBACK_GRACE);

        drop(stream);
        match end {
            PlaybackEnd::Finished => tracing::debug!(samples = sample_count, "playback complete"),
            PlaybackEnd::Cancelled => tracing::debug!(samples = sample_count, "playback cancelled"),
            PlaybackEnd::TimedOut => {
                tracing::warn!(samples = sample_count, "playback did not finish in time");
            }
        }

        Ok(())
    }
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the stream is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}
