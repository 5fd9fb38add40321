use super::spectral::{self, HOP_LENGTH, N_CHROMA, N_FFT, N_MELS, TOP_DB};
use super::tempo;
use crate::fingerprint::Fingerprint;

pub const N_MFCC: usize = 13;
/// Samples per zero-crossing frame.
const ZCR_FRAME: usize = 2048;
/// Magnitudes at or below this count as zero when looking for sign changes.
const ZCR_THRESHOLD: f32 = 1e-10;

/// Frame-wise feature sequences for one signal.
pub struct FrameFeatures {
    /// `[frame][coefficient]`
    pub mfcc: Vec<Vec<f32>>,
    /// `[frame][pitch class]`, C first
    pub chroma: Vec<Vec<f32>>,
    pub spectral_centroid: Vec<f32>,
    pub zero_crossing_rate: Vec<f32>,
    pub tempo: f64,
}

/// Compute every frame-wise feature of a mono signal at `sr`.
pub fn frame_features(y: &[f32], sr: u32) -> FrameFeatures {
    let magnitude = spectral::stft_magnitude(y, N_FFT, HOP_LENGTH);
    let power = spectral::power(&magnitude);

    let mel_fb = spectral::mel_filterbank(sr, N_FFT, N_MELS, 0.0, sr as f64 / 2.0);
    let mel_db = spectral::power_to_db(&spectral::apply_filterbank(&mel_fb, &power), TOP_DB);
    let mfcc = mel_db
        .iter()
        .map(|frame| spectral::dct_ortho(frame, N_MFCC))
        .collect();

    let tuning = spectral::estimate_tuning(&power, sr, N_FFT, N_CHROMA);
    let chroma_fb = spectral::chroma_filterbank(sr, N_FFT, N_CHROMA, tuning);
    let mut chroma = spectral::apply_filterbank(&chroma_fb, &power);
    for frame in chroma.iter_mut() {
        let peak = frame.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        if peak > f32::MIN_POSITIVE {
            frame.iter_mut().for_each(|v| *v /= peak);
        }
    }

    let freqs = spectral::fft_frequencies(sr, N_FFT);
    let spectral_centroid = magnitude
        .iter()
        .map(|frame| spectral_centroid(frame, &freqs))
        .collect();

    let envelope = tempo::onset_strength(&mel_db);

    FrameFeatures {
        mfcc,
        chroma,
        spectral_centroid,
        zero_crossing_rate: zero_crossing_rate(y, ZCR_FRAME, HOP_LENGTH),
        tempo: tempo::estimate_tempo(&envelope, sr),
    }
}

/// Collapse frame-wise features into the fixed-length fingerprint.
pub fn summarize(f: &FrameFeatures) -> Fingerprint {
    let (mfcc_mean, mfcc_std) = mean_std(f.mfcc.iter().flatten().copied());
    let (chroma_mean, chroma_std) = mean_std(f.chroma.iter().flatten().copied());
    let (centroid_mean, centroid_std) = mean_std(f.spectral_centroid.iter().copied());
    let (zcr_mean, zcr_std) = mean_std(f.zero_crossing_rate.iter().copied());

    Fingerprint {
        mfcc_mean,
        mfcc_std,
        chroma_mean,
        chroma_std,
        spectral_centroid_mean: centroid_mean,
        spectral_centroid_std: centroid_std,
        zero_crossing_rate_mean: zcr_mean,
        zero_crossing_rate_std: zcr_std,
        tempo: f.tempo,
    }
}

/// Magnitude-weighted mean frequency of one frame; 0 for silence.
fn spectral_centroid(frame: &[f32], freqs: &[f32]) -> f32 {
    let total: f64 = frame.iter().map(|&m| m as f64).sum();
    if total <= f64::MIN_POSITIVE {
        return 0.0;
    }
    let weighted: f64 = frame
        .iter()
        .zip(freqs)
        .map(|(&m, &f)| m as f64 * f as f64)
        .sum();
    (weighted / total) as f32
}

/// Fraction of sign changes per frame. Frames are centered with edge padding.
pub fn zero_crossing_rate(y: &[f32], frame_len: usize, hop: usize) -> Vec<f32> {
    if y.is_empty() {
        return Vec::new();
    }
    let pad = frame_len / 2;
    let first = y[0];
    let last = y[y.len() - 1];
    let padded: Vec<f32> = std::iter::repeat_n(first, pad)
        .chain(y.iter().copied())
        .chain(std::iter::repeat_n(last, pad))
        .collect();

    let negative: Vec<bool> = padded.iter().map(|&v| v < -ZCR_THRESHOLD).collect();
    let n_frames = 1 + (padded.len() - frame_len) / hop;
    (0..n_frames)
        .map(|t| {
            let frame = &negative[t * hop..t * hop + frame_len];
            let crossings = frame.windows(2).filter(|w| w[0] != w[1]).count();
            crossings as f32 / frame_len as f32
        })
        .collect()
}

/// Mean and population standard deviation, accumulated in f64.
fn mean_std(values: impl Iterator<Item = f32> + Clone) -> (f64, f64) {
    let (n, sum) = values
        .clone()
        .fold((0usize, 0.0f64), |(n, s), v| (n + 1, s + v as f64));
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / n as f64;
    let variance = values
        .map(|v| {
            let diff = v as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / n as f64;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22050;

    fn tone(freq: f32, secs: f32) -> Vec<f32> {
        let n = (SR as f32 * secs) as usize;
        (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    #[test]
    fn test_mean_std_pools_everything() {
        let rows = [vec![1.0f32, 2.0], vec![3.0, 4.0]];
        let (mean, std) = mean_std(rows.iter().flatten().copied());
        assert!((mean - 2.5).abs() < 1e-12);
        // population std of 1,2,3,4
        assert!((std - 1.25f64.sqrt()).abs() < 1e-12);
        assert_eq!(mean_std(std::iter::empty()), (0.0, 0.0));
    }

    #[test]
    fn test_zcr_of_alternating_signal() {
        let y: Vec<f32> = (0..4096).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let zcr = zero_crossing_rate(&y, 2048, 512);
        assert_eq!(zcr.len(), 1 + 4096 / 512);
        let mid = zcr[zcr.len() / 2];
        assert!((mid - 2047.0 / 2048.0).abs() < 1e-6);
    }

    #[test]
    fn test_zcr_ignores_tiny_values() {
        let y = vec![1e-12f32, -1e-12, 1e-12, -1e-12, 0.0];
        let zcr = zero_crossing_rate(&y, 4, 2);
        assert!(zcr.iter().all(|&z| z == 0.0));
    }

    #[test]
    fn test_centroid_tracks_tone_frequency() {
        let features = frame_features(&tone(2000.0, 1.0), SR);
        let (mean, _) = mean_std(features.spectral_centroid.iter().copied());
        assert!((mean - 2000.0).abs() < 150.0, "centroid = {}", mean);
    }

    #[test]
    fn test_frame_counts_agree() {
        let y = tone(440.0, 0.75);
        let f = frame_features(&y, SR);
        let frames = 1 + y.len() / HOP_LENGTH;
        assert_eq!(f.mfcc.len(), frames);
        assert_eq!(f.chroma.len(), frames);
        assert_eq!(f.spectral_centroid.len(), frames);
        assert_eq!(f.zero_crossing_rate.len(), frames);
        assert!(f.mfcc.iter().all(|c| c.len() == N_MFCC));
        assert!(f.chroma.iter().all(|c| c.len() == N_CHROMA));
    }

    #[test]
    fn test_chroma_frames_are_max_normalized() {
        let f = frame_features(&tone(261.63, 0.5), SR);
        for frame in &f.chroma {
            let peak = frame.iter().cloned().fold(0.0f32, f32::max);
            assert!((peak - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_silence_summarizes_to_finite_values() {
        let fp = summarize(&frame_features(&vec![0.0; 11025], SR));
        assert!(fp.to_array().iter().all(|v| v.is_finite()));
        assert_eq!(fp.tempo, 0.0);
        assert_eq!(fp.chroma_mean, 0.0);
        assert_eq!(fp.spectral_centroid_mean, 0.0);
    }
}
