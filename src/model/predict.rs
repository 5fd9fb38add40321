use super::{ClusterModel, Normalizer, Result};
use crate::fingerprint::Fingerprint;

/// Cluster assignment for one fingerprint, with the distance to every
/// centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub cluster: usize,
    /// Euclidean distance in normalized space, indexed by cluster id.
    pub distances: Vec<f64>,
}

/// Assign `fingerprint` to the nearest centroid of `model`.
pub fn predict(
    fingerprint: &Fingerprint,
    normalizer: &Normalizer,
    model: &ClusterModel,
) -> Result<usize> {
    predict_detailed(fingerprint, normalizer, model).map(|p| p.cluster)
}

/// Like [`predict`], also reporting per-centroid distances.
///
/// The fingerprint goes through the training normalizer unchanged; ties
/// between equally near centroids resolve to the lowest cluster id.
pub fn predict_detailed(
    fingerprint: &Fingerprint,
    normalizer: &Normalizer,
    model: &ClusterModel,
) -> Result<Prediction> {
    model.validate()?;

    let z = normalizer.transform(&fingerprint.to_array())?;
    let (cluster, _) = model.nearest(&z);
    let distances = model
        .centroids
        .iter()
        .map(|c| {
            c.iter()
                .zip(z.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
                .sqrt()
        })
        .collect();

    Ok(Prediction { cluster, distances })
}
