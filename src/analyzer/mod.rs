pub mod decode;
pub mod features;
pub mod resample;
pub mod spectral;
pub mod tempo;

use crate::fingerprint::{Fingerprint, FingerprintCollection};
use decode::AudioSignal;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Every recording is analyzed at this rate, whatever its source rate.
pub const TARGET_SAMPLE_RATE: u32 = 22_050;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Decode error: {0}")]
    Decode(#[from] decode::DecodeError),
    #[error("Resample error: {0}")]
    Resample(#[from] resample::ResampleError),
    #[error("No audio samples")]
    EmptySignal,
}

/// A recording that could not be turned into a fingerprint.
#[derive(Error, Debug)]
#[error("{}: {source}", path.display())]
pub struct ExtractionError {
    pub path: PathBuf,
    #[source]
    pub source: AnalyzeError,
}

/// Fingerprint one audio file.
///
/// Used by both batch extraction and single-file prediction so that
/// training and inference see identical features.
pub fn extract(path: &Path) -> Result<Fingerprint, ExtractionError> {
    log::debug!(
        "Extracting: {}",
        path.file_name().and_then(|f| f.to_str()).unwrap_or("?")
    );
    let wrap = |source: AnalyzeError| ExtractionError {
        path: path.to_path_buf(),
        source,
    };

    let audio = decode::load_audio(path).map_err(|e| wrap(e.into()))?;
    fingerprint_signal(&audio).map_err(wrap)
}

/// Resample to the analysis rate and compute the fingerprint.
pub fn fingerprint_signal(audio: &AudioSignal) -> Result<Fingerprint, AnalyzeError> {
    if audio.samples.is_empty() || audio.sample_rate == 0 {
        return Err(AnalyzeError::EmptySignal);
    }
    let y = resample::resample(&audio.samples, audio.sample_rate, TARGET_SAMPLE_RATE)?;
    log::trace!(
        "{:.2}s at {} Hz -> {} samples",
        audio.duration_secs(),
        audio.sample_rate,
        y.len()
    );
    let frames = features::frame_features(&y, TARGET_SAMPLE_RATE);
    Ok(features::summarize(&frames))
}

pub struct ExtractResult {
    pub fingerprints: FingerprintCollection,
    pub failures: Vec<ExtractionError>,
}

/// Fingerprint every file in `files` in parallel.
///
/// Files are processed in chunks on a dedicated rayon pool; results keep the
/// order of `files`. Unreadable recordings are logged and skipped, never
/// aborting the batch.
pub fn extract_files(files: &[PathBuf], jobs: usize) -> ExtractResult {
    let mut result = ExtractResult {
        fingerprints: FingerprintCollection::new(),
        failures: Vec::new(),
    };
    if files.is_empty() {
        log::info!("No audio files to extract");
        return result;
    }

    let jobs = jobs.max(1);
    log::info!("Extracting {} files with {} workers", files.len(), jobs);

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );

    let pool = match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
        Ok(pool) => Some(pool),
        Err(e) => {
            log::warn!("Could not build worker pool ({}), extracting serially", e);
            None
        }
    };

    // Bounded chunks keep memory flat on large directories.
    for chunk in files.chunks(jobs * 2) {
        let run = || {
            use rayon::prelude::*;
            chunk
                .par_iter()
                .map(|path| {
                    let r = extract(path);
                    pb.inc(1);
                    r
                })
                .collect::<Vec<_>>()
        };
        let outcomes = match &pool {
            Some(pool) => pool.install(run),
            None => chunk
                .iter()
                .map(|path| {
                    let r = extract(path);
                    pb.inc(1);
                    r
                })
                .collect(),
        };

        for (path, outcome) in chunk.iter().zip(outcomes) {
            match outcome {
                Ok(fp) => result.fingerprints.push(display_name(path), fp),
                Err(e) => {
                    log::warn!("Skipping {}", e);
                    result.failures.push(e);
                }
            }
        }
        pb.set_message(format!(
            "{} ok, {} failed",
            result.fingerprints.len(),
            result.failures.len()
        ));
    }

    pb.finish_with_message(format!(
        "Done: {} extracted, {} failed",
        result.fingerprints.len(),
        result.failures.len()
    ));
    result
}

/// Identifier stored in the fingerprint table: the file name.
fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
