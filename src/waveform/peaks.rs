use serde::{Deserialize, Serialize};

/// Fixed-rate waveform peaks for one audio file, as cached on disk and
/// served to clients.
///
/// `sample_rate` is the peaks-per-second resolution the peaks were computed
/// at, not the sample rate of the source audio. `length` always equals
/// `peaks.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeaksArtifact {
    pub peaks: Vec<f32>,
    pub duration: f64,
    pub sample_rate: u32,
    pub length: usize,
}

impl PeaksArtifact {
    pub fn new(peaks: Vec<f32>, duration: f64, sample_rate: u32) -> Self {
        let length = peaks.len();
        PeaksArtifact {
            peaks,
            duration,
            sample_rate,
            length,
        }
    }
}

/// Number of peaks an audio of the given duration folds down to.
pub fn total_peak_count(duration: f64, peaks_per_second: u32) -> usize {
    (duration * peaks_per_second as f64).ceil() as usize
}

/// Folds decoded mono samples into per-bucket peak amplitudes.
///
/// Produces exactly `ceil(duration * peaks_per_second)` values in `[0, 1]`,
/// rounded to 4 decimal places. Buckets that fall past the end of the sample
/// buffer come out as 0, and an empty buffer yields all-zero peaks.
pub fn peaks_from_samples(samples: &[f32], duration: f64, peaks_per_second: u32) -> Vec<f32> {
    let total_peaks = total_peak_count(duration, peaks_per_second);
    if total_peaks == 0 {
        return Vec::new();
    }
    if samples.is_empty() {
        return vec![0.0; total_peaks];
    }

    let samples_per_bucket = std::cmp::max(1, samples.len() / total_peaks);

    (0..total_peaks)
        .map(|bucket| {
            let start = bucket * samples_per_bucket;
            if start >= samples.len() {
                return 0.0;
            }
            let end = std::cmp::min(start + samples_per_bucket, samples.len());
            let max_amplitude = samples[start..end]
                .iter()
                .fold(0.0f32, |acc, sample| acc.max(sample.abs()));
            round_peak(max_amplitude)
        })
        .collect()
}

/// Folds interleaved `(min, max)` signed 8-bit extrema pairs into peak
/// amplitudes. A trailing element without a partner is dropped.
pub fn peaks_from_extrema(data: &[i32]) -> Vec<f32> {
    data.chunks_exact(2)
        .map(|pair| {
            let magnitude = pair[0].unsigned_abs().max(pair[1].unsigned_abs());
            round_peak(magnitude as f32 / 128.0)
        })
        .collect()
}

fn round_peak(value: f32) -> f32 {
    let clamped = value.min(1.0);
    (clamped * 10_000.0).round() / 10_000.0
}
