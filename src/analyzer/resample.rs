use rubato::{FftFixedIn, Resampler};
use thiserror::Error;

/// Input frames handed to the resampler per call.
const CHUNK_SIZE: usize = 1024;

#[derive(Error, Debug)]
pub enum ResampleError {
    #[error("resampler setup failed: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),
    #[error("resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

/// Resample mono audio from `from_rate` to `to_rate`.
///
/// The output has exactly `ceil(len * to_rate / from_rate)` samples,
/// with the resampler's group delay trimmed from the front.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, ResampleError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, 2, 1)?;

    let expected =
        (samples.len() as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize;
    let delay = resampler.output_delay();
    let wanted = delay + expected;
    let mut out = Vec::with_capacity(wanted + CHUNK_SIZE);

    let mut pos = 0;
    loop {
        let need = resampler.input_frames_next();
        if pos + need > samples.len() {
            break;
        }
        let input: [&[f32]; 1] = [&samples[pos..pos + need]];
        let block = resampler.process(&input[..], None)?;
        out.extend_from_slice(&block[0]);
        pos += need;
    }
    if pos < samples.len() {
        let tail: [&[f32]; 1] = [&samples[pos..]];
        let block = resampler.process_partial(Some(&tail[..]), None)?;
        out.extend_from_slice(&block[0]);
    }
    // Flush the delay line with silence until the tail is out.
    while out.len() < wanted {
        let block = resampler.process_partial::<&[f32]>(None, None)?;
        if block[0].is_empty() {
            break;
        }
        out.extend_from_slice(&block[0]);
    }

    let end = wanted.min(out.len());
    let start = delay.min(end);
    let mut trimmed = out[start..end].to_vec();
    trimmed.resize(expected, 0.0);
    Ok(trimmed)
}
