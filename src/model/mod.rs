//! Fitting and applying the clustering model.
//!
//! Two artifacts come out of a fit: the [`Normalizer`] and the
//! [`ClusterModel`]. Both are JSON files, loaded back independently and
//! borrowed by [`predict`] at inference time.

pub mod kmeans;
pub mod normalizer;
pub mod predict;

pub use kmeans::{ClusterModel, KmeansOptions};
pub use normalizer::Normalizer;
pub use predict::{Prediction, predict, predict_detailed};

use crate::fingerprint::{DIM, FIELD_NAMES, FingerprintCollection};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("{what} not found at {}; run `{step}` first", path.display())]
    InputMissing {
        what: &'static str,
        path: PathBuf,
        step: &'static str,
    },
    #[error("Cannot fit on an empty collection")]
    EmptyInput,
    #[error("Need at least {k} fingerprints to form {k} clusters, got {rows}")]
    InsufficientData { rows: usize, k: usize },
    #[error("Cluster count must be at least 1")]
    InvalidK,
    #[error("Model declares k = {k} but stores {found} centroids")]
    CentroidCount { k: usize, found: usize },
    #[error("Training label {label} is out of range for k = {k}")]
    LabelOutOfRange { label: usize, k: usize },
    #[error("Expected {expected} dimensions, found {found}")]
    ShapeMismatch { expected: usize, found: usize },
    #[error("Field order mismatch: expected {expected:?}, found {found:?}")]
    FieldOrder {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;

/// Fail unless `fields` is exactly the fingerprint column order.
pub(crate) fn check_fields(fields: &[String]) -> Result<()> {
    if fields.len() != DIM {
        return Err(ModelError::ShapeMismatch {
            expected: DIM,
            found: fields.len(),
        });
    }
    if fields.iter().zip(FIELD_NAMES).any(|(a, b)| a != b) {
        return Err(ModelError::FieldOrder {
            expected: FIELD_NAMES.iter().map(|s| s.to_string()).collect(),
            found: fields.to_vec(),
        });
    }
    Ok(())
}

/// Fit the normalizer on `collection`, then k-means on the normalized rows.
pub fn fit_patterns(
    collection: &FingerprintCollection,
    options: &KmeansOptions,
) -> Result<(Normalizer, ClusterModel)> {
    let normalizer = Normalizer::fit(collection)?;
    let rows = normalizer.transform_all(collection)?;
    let model = ClusterModel::fit(&rows, options)?;
    Ok((normalizer, model))
}

/// Write an artifact as pretty JSON, creating parent directories.
pub fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

fn load_json<T: DeserializeOwned>(
    path: &Path,
    what: &'static str,
    step: &'static str,
) -> Result<T> {
    if !path.exists() {
        return Err(ModelError::InputMissing {
            what,
            path: path.to_path_buf(),
            step,
        });
    }
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

impl Normalizer {
    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_json(path, "Normalizer", "fit")
    }
}

impl ClusterModel {
    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }

    /// Load and validate a saved model.
    pub fn load(path: &Path) -> Result<Self> {
        let model: Self = load_json(path, "Cluster model", "fit")?;
        model.validate()?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;

    fn two_groups() -> FingerprintCollection {
        let mut c = FingerprintCollection::new();
        let groups = [(-1.0, 90.0), (1.0, 160.0)];
        for (g, &(level, tempo)) in groups.iter().enumerate() {
            for i in 0..4 {
                let jitter = i as f64 * 0.01;
                let mut v = [level + jitter; DIM];
                v[8] = tempo + jitter;
                c.push(format!("g{}_{}.wav", g, i), Fingerprint::from_array(v));
            }
        }
        c
    }

    #[test]
    fn test_two_tight_groups_split_cleanly() {
        let c = two_groups();
        let options = KmeansOptions {
            k: 2,
            ..KmeansOptions::default()
        };
        let (_, model) = fit_patterns(&c, &options).unwrap();

        let first = model.labels[0];
        let second = model.labels[4];
        assert_ne!(first, second);
        assert!(model.labels[..4].iter().all(|&l| l == first));
        assert!(model.labels[4..].iter().all(|&l| l == second));
        assert!(first < 2 && second < 2);
    }

    #[test]
    fn test_artifacts_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let c = two_groups();
        let options = KmeansOptions {
            k: 2,
            ..Default::default()
        };
        let (normalizer, model) = fit_patterns(&c, &options).unwrap();

        let npath = dir.path().join("nested").join("normalizer.json");
        let mpath = dir.path().join("model.json");
        normalizer.save(&npath).unwrap();
        model.save(&mpath).unwrap();

        let normalizer2 = Normalizer::load(&npath).unwrap();
        let model2 = ClusterModel::load(&mpath).unwrap();
        assert_eq!(normalizer2.mean, normalizer.mean);
        assert_eq!(normalizer2.std, normalizer.std);
        assert_eq!(model2.centroids, model.centroids);
        assert_eq!(model2.labels, model.labels);

        for r in c.iter() {
            let x = r.fingerprint.to_array();
            let a = normalizer.transform(&x).unwrap();
            let b = normalizer2.transform(&x).unwrap();
            for (u, v) in a.iter().zip(b.iter()) {
                assert!((u - v).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_missing_artifact_is_input_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = Normalizer::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ModelError::InputMissing { step: "fit", .. }));
        assert!(err.to_string().contains("run `fit` first"));
    }

    #[test]
    fn test_inconsistent_model_file_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let options = KmeansOptions {
            k: 2,
            ..Default::default()
        };
        let (_, mut model) = fit_patterns(&two_groups(), &options).unwrap();
        model.k = 3;
        model.save(&path).unwrap();

        let err = ClusterModel::load(&path).unwrap_err();
        assert!(matches!(err, ModelError::CentroidCount { k: 3, found: 2 }));
    }

    #[test]
    fn test_fit_requires_k_rows() {
        let mut c = FingerprintCollection::new();
        for i in 0..3 {
            c.push(format!("{}.wav", i), Fingerprint::from_array([i as f64; DIM]));
        }
        let err = fit_patterns(&c, &KmeansOptions::default()).unwrap_err();
        assert!(matches!(err, ModelError::InsufficientData { rows: 3, k: 4 }));
    }
}
