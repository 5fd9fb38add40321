//! Short-time spectra and the filterbanks built on them.
//!
//! Spectrograms are stored frame-major: `frames[t][bin]`, with
//! `n_fft / 2 + 1` bins per frame.

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;

pub const N_FFT: usize = 2048;
pub const HOP_LENGTH: usize = 512;
pub const N_MELS: usize = 128;
pub const N_CHROMA: usize = 12;

/// Floor for power values before taking logs.
const AMIN: f32 = 1e-10;
/// Dynamic range kept below the loudest bin, in dB.
pub const TOP_DB: f32 = 80.0;

/// Periodic Hann window.
pub fn hann(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos())
        .collect()
}

/// Magnitude STFT with centered frames (zero padding of `n_fft / 2` on both ends).
pub fn stft_magnitude(y: &[f32], n_fft: usize, hop: usize) -> Vec<Vec<f32>> {
    if y.is_empty() {
        return Vec::new();
    }
    let pad = n_fft / 2;
    let mut padded = vec![0.0f32; y.len() + 2 * pad];
    padded[pad..pad + y.len()].copy_from_slice(y);

    let window = hann(n_fft);
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);
    let n_bins = n_fft / 2 + 1;
    let n_frames = 1 + (padded.len() - n_fft) / hop;

    let mut buf = vec![Complex::new(0.0f32, 0.0); n_fft];
    let mut frames = Vec::with_capacity(n_frames);
    for t in 0..n_frames {
        let start = t * hop;
        for (slot, (&s, &w)) in buf
            .iter_mut()
            .zip(padded[start..start + n_fft].iter().zip(window.iter()))
        {
            *slot = Complex::new(s * w, 0.0);
        }
        fft.process(&mut buf);
        frames.push(buf[..n_bins].iter().map(|c| c.norm()).collect());
    }
    frames
}

pub fn power(magnitude: &[Vec<f32>]) -> Vec<Vec<f32>> {
    magnitude
        .iter()
        .map(|frame| frame.iter().map(|m| m * m).collect())
        .collect()
}

/// Center frequency of each FFT bin.
pub fn fft_frequencies(sr: u32, n_fft: usize) -> Vec<f32> {
    (0..=n_fft / 2)
        .map(|i| i as f32 * sr as f32 / n_fft as f32)
        .collect()
}

// Slaney mel scale: linear below 1 kHz, logarithmic above.
const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

pub fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Triangular mel filterbank, `n_mels` rows of `n_fft / 2 + 1` weights,
/// each row area-normalized (Slaney).
pub fn mel_filterbank(sr: u32, n_fft: usize, n_mels: usize, fmin: f64, fmax: f64) -> Vec<Vec<f32>> {
    let fft_freqs = fft_frequencies(sr, n_fft);
    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let hz_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lo, center, hi) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
            let enorm = 2.0 / (hi - lo);
            fft_freqs
                .iter()
                .map(|&f| {
                    let f = f as f64;
                    let lower = (f - lo) / (center - lo);
                    let upper = (hi - f) / (hi - center);
                    (lower.min(upper).max(0.0) * enorm) as f32
                })
                .collect()
        })
        .collect()
}

/// Apply a `[band][bin]` filterbank to each `[bin]` frame.
pub fn apply_filterbank(bank: &[Vec<f32>], frames: &[Vec<f32>]) -> Vec<Vec<f32>> {
    frames
        .iter()
        .map(|frame| {
            bank.iter()
                .map(|row| row.iter().zip(frame).map(|(w, x)| w * x).sum())
                .collect()
        })
        .collect()
}

/// Power to decibels (reference 1.0), floored at `top_db` below the
/// loudest value of the whole spectrogram.
pub fn power_to_db(frames: &[Vec<f32>], top_db: f32) -> Vec<Vec<f32>> {
    let mut db: Vec<Vec<f32>> = frames
        .iter()
        .map(|frame| frame.iter().map(|&p| 10.0 * p.max(AMIN).log10()).collect())
        .collect();
    let peak = db
        .iter()
        .flat_map(|f| f.iter().copied())
        .fold(f32::NEG_INFINITY, f32::max);
    if peak.is_finite() {
        let floor = peak - top_db;
        for v in db.iter_mut().flat_map(|f| f.iter_mut()) {
            *v = v.max(floor);
        }
    }
    db
}

/// Orthonormal DCT-II of `x`, keeping the first `n_out` coefficients.
pub fn dct_ortho(x: &[f32], n_out: usize) -> Vec<f32> {
    let n = x.len();
    if n == 0 {
        return vec![0.0; n_out];
    }
    let nf = n as f64;
    (0..n_out)
        .map(|k| {
            let sum: f64 = x
                .iter()
                .enumerate()
                .map(|(i, &v)| {
                    let angle = std::f64::consts::PI * k as f64 * (2 * i + 1) as f64 / (2.0 * nf);
                    v as f64 * angle.cos()
                })
                .sum();
            let scale = if k == 0 { (1.0 / nf).sqrt() } else { (2.0 / nf).sqrt() };
            (sum * scale) as f32
        })
        .collect()
}

/// Chroma filterbank, `n_chroma` rows of `n_fft / 2 + 1` weights.
///
/// Each FFT bin spreads a Gaussian bump over the pitch classes; columns are
/// L2-normalized, weighted by a Gaussian over octaves centered on octave 5
/// (two octaves wide), and rows start at C. `tuning` is the deviation from
/// A440 in fractions of a chroma bin.
pub fn chroma_filterbank(
    sr: u32,
    n_fft: usize,
    n_chroma: usize,
    tuning: f64,
) -> Vec<Vec<f32>> {
    const CENTER_OCTAVE: f64 = 5.0;
    const OCTAVE_WIDTH: f64 = 2.0;

    let n_bins = n_fft / 2 + 1;
    let nc = n_chroma as f64;
    let a0 = 440.0 * 2f64.powf(tuning / nc) / 16.0;

    // Fractional chroma bin of every FFT bin; DC gets a made-up value
    // 1.5 octaves below bin 1.
    let mut frqbins: Vec<f64> = (1..n_fft)
        .map(|i| nc * (i as f64 * sr as f64 / n_fft as f64 / a0).log2())
        .collect();
    let dc = frqbins.first().copied().unwrap_or(0.0) - 1.5 * nc;
    frqbins.insert(0, dc);

    let widths: Vec<f64> = (0..frqbins.len())
        .map(|i| {
            if i + 1 < frqbins.len() {
                (frqbins[i + 1] - frqbins[i]).max(1.0)
            } else {
                1.0
            }
        })
        .collect();

    let half = (nc / 2.0).round();
    let mut wts = vec![vec![0.0f64; n_bins]; n_chroma];
    for (c, row) in wts.iter_mut().enumerate() {
        for (b, w) in row.iter_mut().enumerate() {
            let d = (frqbins[b] - c as f64 + half + 10.0 * nc).rem_euclid(nc) - half;
            *w = (-0.5 * (2.0 * d / widths[b]).powi(2)).exp();
        }
    }

    for b in 0..n_bins {
        let norm = wts.iter().map(|row| row[b] * row[b]).sum::<f64>().sqrt();
        let oct = frqbins[b] / nc;
        let octave_weight = (-0.5 * ((oct - CENTER_OCTAVE) / OCTAVE_WIDTH).powi(2)).exp();
        for row in wts.iter_mut() {
            if norm > 1e-10 {
                row[b] /= norm;
            }
            row[b] *= octave_weight;
        }
    }

    // Rows were built starting at A; rotate so row 0 is C.
    let shift = 3 * (n_chroma / 12);
    (0..n_chroma)
        .map(|c| {
            wts[(c + shift) % n_chroma]
                .iter()
                .map(|&w| w as f32)
                .collect()
        })
        .collect()
}

/// Lowest and highest frequencies considered when tracking pitches.
const PITCH_FMIN: f64 = 150.0;
const PITCH_FMAX: f64 = 4000.0;
/// Peaks must reach this fraction of the frame maximum.
const PITCH_THRESHOLD: f32 = 0.1;
/// Histogram resolution for tuning, in fractions of a bin.
const TUNING_RESOLUTION: f64 = 0.01;

/// Estimate how far a recording sits from A440, in fractions of a chroma
/// bin within `[-0.5, 0.5)`, from a `[frame][bin]` power spectrogram.
///
/// Spectral peaks between 150 Hz and 4 kHz are refined by parabolic
/// interpolation; peaks at or above the median peak strength vote in a
/// histogram of their deviation from the equal-tempered grid. Returns 0
/// when no peaks are found.
pub fn estimate_tuning(
    power: &[Vec<f32>],
    sr: u32,
    n_fft: usize,
    bins_per_octave: usize,
) -> f64 {
    let fmax = PITCH_FMAX.min(sr as f64 / 2.0);
    let freqs = fft_frequencies(sr, n_fft);

    let mut peaks: Vec<(f64, f64)> = Vec::new();
    for frame in power {
        let n = frame.len();
        if n < 3 {
            continue;
        }
        let reference = PITCH_THRESHOLD * frame.iter().fold(0.0f32, |m, &v| m.max(v));
        let gated: Vec<f32> = frame
            .iter()
            .map(|&v| if v > reference { v } else { 0.0 })
            .collect();

        for i in 1..n {
            let f = freqs[i] as f64;
            if f < PITCH_FMIN || f >= fmax {
                continue;
            }
            let rises = gated[i] > gated[i - 1];
            let holds = i + 1 == n || gated[i] >= gated[i + 1];
            if !(rises && holds) {
                continue;
            }

            let (shift, skew) = if i + 1 < n {
                let prev = frame[i - 1] as f64;
                let cur = frame[i] as f64;
                let next = frame[i + 1] as f64;
                let avg = 0.5 * (next - prev);
                let curv = 2.0 * cur - next - prev;
                let curv = if curv.abs() < f32::MIN_POSITIVE as f64 {
                    curv + 1.0
                } else {
                    curv
                };
                let shift = avg / curv;
                (shift, 0.5 * avg * shift)
            } else {
                (0.0, 0.0)
            };
            let pitch = (i as f64 + shift) * sr as f64 / n_fft as f64;
            if pitch > 0.0 {
                peaks.push((pitch, frame[i] as f64 + skew));
            }
        }
    }

    if peaks.is_empty() {
        return 0.0;
    }
    let mut mags: Vec<f64> = peaks.iter().map(|&(_, m)| m).collect();
    mags.sort_by(|a, b| a.total_cmp(b));
    let mid = mags.len() / 2;
    let threshold = if mags.len() % 2 == 0 {
        0.5 * (mags[mid - 1] + mags[mid])
    } else {
        mags[mid]
    };

    let pitches: Vec<f64> = peaks
        .iter()
        .filter(|&&(_, m)| m >= threshold)
        .map(|&(p, _)| p)
        .collect();
    pitch_tuning(&pitches, bins_per_octave)
}

/// Most common deviation of `frequencies` from the equal-tempered grid.
fn pitch_tuning(frequencies: &[f64], bins_per_octave: usize) -> f64 {
    let n_bins = (1.0 / TUNING_RESOLUTION).ceil() as usize;
    let edge = |j: usize| -0.5 + j as f64 / n_bins as f64;

    let mut counts = vec![0usize; n_bins];
    let mut any = false;
    for &f in frequencies.iter().filter(|&&f| f > 0.0) {
        any = true;
        let octs = (f / (440.0 / 16.0)).log2();
        let mut residual = (bins_per_octave as f64 * octs).rem_euclid(1.0);
        if residual >= 0.5 {
            residual -= 1.0;
        }
        let mut j = (((residual + 0.5) * n_bins as f64).floor() as usize).min(n_bins - 1);
        if j > 0 && residual < edge(j) {
            j -= 1;
        } else if j + 1 < n_bins && residual >= edge(j + 1) {
            j += 1;
        }
        counts[j] += 1;
    }
    if !any {
        return 0.0;
    }

    let mut best = 0;
    for (j, &c) in counts.iter().enumerate() {
        if c > counts[best] {
            best = j;
        }
    }
    edge(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, sr: u32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    #[test]
    fn test_frame_count_is_centered() {
        let y = vec![0.0; 22050];
        let s = stft_magnitude(&y, N_FFT, HOP_LENGTH);
        assert_eq!(s.len(), 1 + 22050 / HOP_LENGTH);
        assert_eq!(s[0].len(), N_FFT / 2 + 1);
    }

    #[test]
    fn test_stft_peak_at_tone_bin() {
        let sr = 22050;
        let y = tone(1000.0, sr, 8192);
        let s = stft_magnitude(&y, N_FFT, HOP_LENGTH);
        let frame = &s[s.len() / 2];
        let peak = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        let expected = (1000.0 * N_FFT as f32 / sr as f32).round() as usize;
        assert!(peak.abs_diff(expected) <= 1, "peak bin {} vs {}", peak, expected);
    }

    #[test]
    fn test_mel_scale_roundtrip() {
        for hz in [0.0, 440.0, 999.0, 1000.0, 4000.0, 11025.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_mel_filterbank_shape_and_nonnegative() {
        let fb = mel_filterbank(22050, N_FFT, N_MELS, 0.0, 11025.0);
        assert_eq!(fb.len(), N_MELS);
        assert!(fb.iter().all(|row| row.len() == N_FFT / 2 + 1));
        assert!(fb.iter().flatten().all(|&w| w >= 0.0));
        // Every filter covers at least one bin.
        assert!(fb.iter().all(|row| row.iter().any(|&w| w > 0.0)));
    }

    #[test]
    fn test_power_to_db_floors_at_top_db() {
        let frames = vec![vec![1.0, 1e-12], vec![0.1, 0.0]];
        let db = power_to_db(&frames, 80.0);
        assert!((db[0][0] - 0.0).abs() < 1e-6);
        assert!((db[1][0] + 10.0).abs() < 1e-4);
        assert!((db[0][1] + 80.0).abs() < 1e-4);
        assert!((db[1][1] + 80.0).abs() < 1e-4);
    }

    #[test]
    fn test_dct_of_constant_is_dc_only() {
        let c = dct_ortho(&[2.0; 16], 4);
        assert!((c[0] - 2.0 * 4.0).abs() < 1e-5);
        assert!(c[1..].iter().all(|v| v.abs() < 1e-5));
    }

    #[test]
    fn test_chroma_of_a440_peaks_at_a() {
        let sr = 22050;
        let fb = chroma_filterbank(sr, N_FFT, N_CHROMA, 0.0);
        let s = power(&stft_magnitude(&tone(440.0, sr, 8192), N_FFT, HOP_LENGTH));
        let chroma = apply_filterbank(&fb, &s);
        let frame = &chroma[chroma.len() / 2];
        let peak = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        // C=0, C#=1, ... A=9
        assert_eq!(peak, 9);
    }

    #[test]
    fn test_tuning_of_concert_pitch_is_near_zero() {
        let sr = 22050;
        let s = power(&stft_magnitude(&tone(440.0, sr, 16384), N_FFT, HOP_LENGTH));
        let tuning = estimate_tuning(&s, sr, N_FFT, N_CHROMA);
        assert!(tuning.abs() <= 0.06, "tuning = {}", tuning);
    }

    #[test]
    fn test_tuning_detects_a_quarter_tone_sharp() {
        let sr = 22050;
        // 25 cents above A440.
        let freq = 440.0 * 2f32.powf(0.25 / 12.0);
        let s = power(&stft_magnitude(&tone(freq, sr, 16384), N_FFT, HOP_LENGTH));
        let tuning = estimate_tuning(&s, sr, N_FFT, N_CHROMA);
        assert!((tuning - 0.25).abs() <= 0.06, "tuning = {}", tuning);
    }

    #[test]
    fn test_tuning_of_silence_is_zero() {
        let frames = vec![vec![0.0f32; N_FFT / 2 + 1]; 10];
        assert_eq!(estimate_tuning(&frames, 22050, N_FFT, N_CHROMA), 0.0);
    }

    #[test]
    fn test_pitch_tuning_histogram() {
        // Two votes at +0.1 of a bin, one at -0.3.
        let up = 440.0 * 2f64.powf(0.1 / 12.0);
        let down = 440.0 * 2f64.powf(-0.3 / 12.0);
        let t = pitch_tuning(&[up, up, down, 0.0], 12);
        assert!((t - 0.1).abs() < 0.011, "tuning = {}", t);
        assert_eq!(pitch_tuning(&[], 12), 0.0);
    }

    #[test]
    fn test_tuning_shifts_chroma_weights() {
        let sr = 22050;
        let flat = chroma_filterbank(sr, N_FFT, N_CHROMA, 0.0);
        let sharp = chroma_filterbank(sr, N_FFT, N_CHROMA, 0.3);
        assert_eq!(sharp.len(), N_CHROMA);
        assert!(flat.iter().zip(&sharp).any(|(a, b)| a != b));
    }
}
