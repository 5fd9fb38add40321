use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of scalars in a fingerprint.
pub const DIM: usize = 9;

/// Column order shared by the fingerprint table, the normalizer and the model.
pub const FIELD_NAMES: [&str; DIM] = [
    "mfcc_mean",
    "mfcc_std",
    "chroma_mean",
    "chroma_std",
    "spectral_centroid_mean",
    "spectral_centroid_std",
    "zero_crossing_rate_mean",
    "zero_crossing_rate_std",
    "tempo",
];

#[derive(Error, Debug, PartialEq)]
#[error("fingerprint needs {DIM} values, got {0}")]
pub struct DimensionError(pub usize);

/// Fixed-length summary of one recording.
///
/// Each `_mean`/`_std` pair pools a frame-wise feature over every frame
/// (and every coefficient, for MFCC and chroma) of the signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub mfcc_mean: f64,
    pub mfcc_std: f64,
    pub chroma_mean: f64,
    pub chroma_std: f64,
    pub spectral_centroid_mean: f64,
    pub spectral_centroid_std: f64,
    pub zero_crossing_rate_mean: f64,
    pub zero_crossing_rate_std: f64,
    pub tempo: f64,
}

impl Fingerprint {
    /// Values in `FIELD_NAMES` order.
    pub fn to_array(&self) -> [f64; DIM] {
        [
            self.mfcc_mean,
            self.mfcc_std,
            self.chroma_mean,
            self.chroma_std,
            self.spectral_centroid_mean,
            self.spectral_centroid_std,
            self.zero_crossing_rate_mean,
            self.zero_crossing_rate_std,
            self.tempo,
        ]
    }

    pub fn from_array(v: [f64; DIM]) -> Self {
        Self {
            mfcc_mean: v[0],
            mfcc_std: v[1],
            chroma_mean: v[2],
            chroma_std: v[3],
            spectral_centroid_mean: v[4],
            spectral_centroid_std: v[5],
            zero_crossing_rate_mean: v[6],
            zero_crossing_rate_std: v[7],
            tempo: v[8],
        }
    }

    pub fn from_slice(values: &[f64]) -> Result<Self, DimensionError> {
        let arr: [f64; DIM] = values
            .try_into()
            .map_err(|_| DimensionError(values.len()))?;
        Ok(Self::from_array(arr))
    }
}

/// One row of the fingerprint table.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintRecord {
    pub filename: String,
    pub fingerprint: Fingerprint,
}

/// Ordered fingerprints of a batch of recordings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FingerprintCollection {
    records: Vec<FingerprintRecord>,
}

impl FingerprintCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &'static [&'static str] {
        &FIELD_NAMES
    }

    pub fn push(&mut self, filename: impl Into<String>, fingerprint: Fingerprint) {
        self.records.push(FingerprintRecord {
            filename: filename.into(),
            fingerprint,
        });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[FingerprintRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &FingerprintRecord> {
        self.records.iter()
    }

    /// Numeric columns only, row-major.
    pub fn matrix(&self) -> Vec<[f64; DIM]> {
        self.records.iter().map(|r| r.fingerprint.to_array()).collect()
    }
}

impl FromIterator<FingerprintRecord> for FingerprintCollection {
    fn from_iter<I: IntoIterator<Item = FingerprintRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_order_matches_field_names() {
        let fp = Fingerprint {
            mfcc_mean: 0.0,
            mfcc_std: 1.0,
            chroma_mean: 2.0,
            chroma_std: 3.0,
            spectral_centroid_mean: 4.0,
            spectral_centroid_std: 5.0,
            zero_crossing_rate_mean: 6.0,
            zero_crossing_rate_std: 7.0,
            tempo: 8.0,
        };
        let arr = fp.to_array();
        for (i, v) in arr.iter().enumerate() {
            assert_eq!(*v, i as f64, "field {} out of order", FIELD_NAMES[i]);
        }
        assert_eq!(Fingerprint::from_array(arr), fp);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert_eq!(Fingerprint::from_slice(&[1.0; 8]), Err(DimensionError(8)));
        assert_eq!(Fingerprint::from_slice(&[1.0; 10]), Err(DimensionError(10)));
        assert!(Fingerprint::from_slice(&[1.0; DIM]).is_ok());
    }

    #[test]
    fn test_collection_keeps_insertion_order() {
        let mut c = FingerprintCollection::new();
        c.push("b.wav", Fingerprint::default());
        c.push("a.wav", Fingerprint { tempo: 120.0, ..Fingerprint::default() });
        assert_eq!(c.len(), 2);
        assert_eq!(c.records()[0].filename, "b.wav");
        assert_eq!(c.matrix()[1][8], 120.0);
        assert_eq!(c.fields().len(), DIM);
    }
}
