use std::path::Path;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),
    #[error("FLAC decode error: {0}")]
    Flac(#[from] claxon::Error),
    #[error("symphonia decode error: {0}")]
    Symphonia(#[from] SymphoniaError),
    #[error("No audio track")]
    NoTrack,
    #[error("Unknown sample rate")]
    UnknownSampleRate,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded audio, downmixed to one channel.
#[derive(Debug, Clone)]
pub struct AudioSignal {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioSignal {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f64 / self.sample_rate as f64
        }
    }
}

/// Load an audio file as mono: hound for WAV, claxon for FLAC,
/// symphonia for everything else.
pub fn load_audio(path: &Path) -> Result<AudioSignal, DecodeError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "wav" => load_wav(path),
        "flac" => load_flac(path),
        _ if crate::SUPPORTED_EXTENSIONS.contains(&ext.as_str()) => load_symphonia(path, &ext),
        _ => Err(DecodeError::UnsupportedFormat(ext)),
    }
}

fn load_wav(path: &Path) -> Result<AudioSignal, DecodeError> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(AudioSignal {
        samples: downmix_interleaved(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

fn load_flac(path: &Path) -> Result<AudioSignal, DecodeError> {
    let mut reader = claxon::FlacReader::open(path)?;
    let info = reader.streaminfo();
    let channels = info.channels.max(1) as usize;
    let scale = 1.0 / (1i64 << (info.bits_per_sample.max(1) - 1)) as f32;

    let mut interleaved = Vec::with_capacity(info.samples.unwrap_or(0) as usize * channels);
    for sample in reader.samples() {
        interleaved.push(sample? as f32 * scale);
    }

    Ok(AudioSignal {
        samples: downmix_interleaved(&interleaved, channels),
        sample_rate: info.sample_rate,
    })
}

fn load_symphonia(path: &Path, ext: &str) -> Result<AudioSignal, DecodeError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(ext);

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                sample_rate.get_or_insert(decoded.spec().rate);
                append_mono(&decoded, &mut samples);
            }
            // Corrupt frames are skipped; the rest of the stream is still usable.
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("{}: skipping bad packet: {}", path.display(), e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(AudioSignal {
        samples,
        sample_rate: sample_rate.ok_or(DecodeError::UnknownSampleRate)?,
    })
}

/// Average every channel of a decoded buffer into `out`.
fn append_mono(buffer: &AudioBufferRef, out: &mut Vec<f32>) {
    macro_rules! mix {
        ($buf:expr, $conv:expr) => {{
            let chans = $buf.spec().channels.count().max(1);
            let frames = $buf.frames();
            out.reserve(frames);
            for f in 0..frames {
                let mut acc = 0.0f32;
                for c in 0..chans {
                    acc += $conv($buf.chan(c)[f]);
                }
                out.push(acc / chans as f32);
            }
        }};
    }

    match buffer {
        AudioBufferRef::F32(buf) => mix!(buf, |s: f32| s),
        AudioBufferRef::F64(buf) => mix!(buf, |s: f64| s as f32),
        AudioBufferRef::S32(buf) => mix!(buf, |s: i32| s as f32 / 2_147_483_648.0),
        AudioBufferRef::S24(buf) => mix!(buf, |s: symphonia::core::sample::i24| {
            s.inner() as f32 / 8_388_608.0
        }),
        AudioBufferRef::S16(buf) => mix!(buf, |s: i16| s as f32 / 32_768.0),
        AudioBufferRef::S8(buf) => mix!(buf, |s: i8| s as f32 / 128.0),
        AudioBufferRef::U32(buf) => mix!(buf, |s: u32| (s as f64 / 2_147_483_648.0 - 1.0) as f32),
        AudioBufferRef::U24(buf) => mix!(buf, |s: symphonia::core::sample::u24| {
            s.inner() as f32 / 8_388_608.0 - 1.0
        }),
        AudioBufferRef::U16(buf) => mix!(buf, |s: u16| s as f32 / 32_768.0 - 1.0),
        AudioBufferRef::U8(buf) => mix!(buf, |s: u8| s as f32 / 128.0 - 1.0),
    }
}

fn downmix_interleaved(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, sample_rate: u32, frames: &[Vec<i16>]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut w = hound::WavWriter::create(path, spec).unwrap();
        for frame in frames {
            for &s in frame {
                w.write_sample(s).unwrap();
            }
        }
        w.finalize().unwrap();
    }

    #[test]
    fn test_downmix_averages_channels() {
        let mono = downmix_interleaved(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
        assert_eq!(downmix_interleaved(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_load_stereo_wav_as_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 2, 8000, &[vec![16384, 0], vec![-16384, -16384]]);

        let signal = load_audio(&path).unwrap();
        assert_eq!(signal.sample_rate, 8000);
        assert_eq!(signal.samples.len(), 2);
        assert!((signal.samples[0] - 0.25).abs() < 1e-6);
        assert!((signal.samples[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_corrupt_wav_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"definitely not a RIFF file").unwrap();
        assert!(matches!(load_audio(&path), Err(DecodeError::Wav(_))));
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let err = load_audio(Path::new("notes.txt")).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(ref e) if e == "txt"));
    }
}
