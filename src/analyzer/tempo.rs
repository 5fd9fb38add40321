//! Global tempo estimation from an onset-strength envelope.
//!
//! The envelope is the half-wave rectified first difference of the log-mel
//! spectrogram, averaged over bands. Tempo comes from the autocorrelation
//! tempogram of that envelope, averaged over time and weighted by a
//! log-normal prior around 120 BPM.

use super::spectral::{HOP_LENGTH, N_FFT};
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;

/// Length of each autocorrelation window, in seconds.
const AC_SIZE_SECS: f64 = 8.0;
const START_BPM: f64 = 120.0;
/// Prior width, in octaves.
const STD_BPM: f64 = 1.0;
const MAX_TEMPO: f64 = 320.0;

/// Onset strength per frame from a `[frame][band]` dB mel spectrogram.
///
/// Output has one value per spectrogram frame, aligned so that value `t`
/// describes the change arriving at frame `t`.
pub fn onset_strength(mel_db: &[Vec<f32>]) -> Vec<f32> {
    let n = mel_db.len();
    if n == 0 {
        return Vec::new();
    }

    let flux: Vec<f32> = mel_db
        .windows(2)
        .map(|pair| {
            let (prev, cur) = (&pair[0], &pair[1]);
            let bands = cur.len().max(1) as f32;
            cur.iter()
                .zip(prev)
                .map(|(c, p)| (c - p).max(0.0))
                .sum::<f32>()
                / bands
        })
        .collect();

    // One frame for the lag, plus the centering offset of the STFT.
    let pad = 1 + N_FFT / (2 * HOP_LENGTH);
    let mut env = vec![0.0f32; pad];
    env.extend(flux);
    env.truncate(n);
    env.resize(n, 0.0);
    env
}

/// BPM corresponding to each autocorrelation lag (lag 0 is infinite).
fn lag_to_bpm(lag: usize, sr: u32) -> f64 {
    60.0 * sr as f64 / (HOP_LENGTH as f64 * lag as f64)
}

/// Onset frames per autocorrelation window: 344 at 22.05 kHz / 512.
fn tempogram_window(sr: u32) -> usize {
    ((AC_SIZE_SECS * sr as f64 / HOP_LENGTH as f64).floor() as usize).max(2)
}

/// Time-averaged autocorrelation tempogram, `win` lags long.
fn global_tempogram(env: &[f32], win: usize) -> Vec<f64> {
    let half = win / 2;
    let window = super::spectral::hann(win);

    let n_fft = 2 * win;
    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n_fft);
    let inverse = planner.plan_fft_inverse(n_fft);

    let mut padded = vec![0.0f32; env.len() + 2 * half];
    padded[half..half + env.len()].copy_from_slice(env);

    let mut acc = vec![0.0f64; win];
    let mut buf = vec![Complex::new(0.0f64, 0.0); n_fft];
    for t in 0..env.len() {
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = if i < win {
                Complex::new((padded[t + i] * window[i]) as f64, 0.0)
            } else {
                Complex::new(0.0, 0.0)
            };
        }
        forward.process(&mut buf);
        for c in buf.iter_mut() {
            *c = Complex::new(c.norm_sqr(), 0.0);
        }
        inverse.process(&mut buf);

        let peak = buf[..win].iter().map(|c| c.re.abs()).fold(0.0, f64::max);
        if peak > 1e-12 {
            for (a, c) in acc.iter_mut().zip(&buf[..win]) {
                *a += c.re / peak;
            }
        }
    }

    let frames = env.len().max(1) as f64;
    acc.iter_mut().for_each(|a| *a /= frames);
    acc
}

/// Estimate a single tempo in BPM. Returns 0 when the envelope is silent.
pub fn estimate_tempo(env: &[f32], sr: u32) -> f64 {
    if !env.iter().any(|&v| v > 0.0) {
        return 0.0;
    }

    let tg = global_tempogram(env, tempogram_window(sr));
    let mut best: Option<(usize, f64)> = None;
    for (lag, &strength) in tg.iter().enumerate().skip(1) {
        let bpm = lag_to_bpm(lag, sr);
        if bpm > MAX_TEMPO {
            continue;
        }
        let log_prior = -0.5 * ((bpm.log2() - START_BPM.log2()) / STD_BPM).powi(2);
        let score = (1e6 * strength.max(0.0)).ln_1p() + log_prior;
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((lag, score));
        }
    }

    best.map(|(lag, _)| lag_to_bpm(lag, sr)).unwrap_or(0.0)
}
