//! Sample-rate conversion and silence detection for 16-bit PCM

/// Resample a frame from `input_rate` to `output_rate`
///
/// Nearest-neighbour index mapping, no interpolation. Equal rates return the
/// input unchanged.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resample(input: &[i16], input_rate: u32, output_rate: u32) -> Vec<i16> {
    if input_rate == output_rate || input_rate == 0 {
        return input.to_vec();
    }

    let output_len =
        (input.len() as f64 * f64::from(output_rate) / f64::from(input_rate)).round() as usize;
    resample_to_len(input, output_len)
}

/// Map `input` onto exactly `output_len` samples
///
/// `output[i] = input[round(i * input_len / output_len)]`, clamped to the
/// last input sample.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resample_to_len(input: &[i16], output_len: usize) -> Vec<i16> {
    if input.is_empty() {
        return vec![0; output_len];
    }
    if input.len() == output_len {
        return input.to_vec();
    }

    let ratio = input.len() as f64 / output_len as f64;
    let last = input.len() - 1;

    (0..output_len)
        .map(|i| {
            let idx = (i as f64 * ratio).round() as usize;
            input[idx.min(last)]
        })
        .collect()
}

/// Root-mean-square energy of 16-bit samples
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn rms(frame: &[i16]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = frame
        .iter()
        .map(|&s| {
            let s = f64::from(s);
            s * s
        })
        .sum();

    (sum_squares / frame.len() as f64).sqrt() as f32
}

/// True iff the frame's RMS is below `threshold`
#[must_use]
pub fn is_silent(frame: &[i16], threshold: f32) -> bool {
    rms(frame) < threshold
}

/// Duration in milliseconds of `samples` at `sample_rate`
#[must_use]
pub fn duration_ms(samples: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (samples as u64 * 1000) / u64::from(sample_rate)
}

/// Convert normalized f32 samples to i16
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// Convert i16 samples to normalized f32
#[must_use]
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}
