use super::{ModelError, Result, check_fields};
use crate::fingerprint::{DIM, FIELD_NAMES, FingerprintCollection};
use serde::{Deserialize, Serialize};

/// Per-dimension z-score transform fitted on a training collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    pub fields: Vec<String>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl Normalizer {
    /// Mean and population standard deviation of every column.
    pub fn fit(collection: &FingerprintCollection) -> Result<Self> {
        if collection.is_empty() {
            return Err(ModelError::EmptyInput);
        }
        let rows = collection.matrix();
        let n = rows.len() as f64;

        let mut mean = vec![0.0_f64; DIM];
        for row in &rows {
            for (m, &v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut var = vec![0.0_f64; DIM];
        for row in &rows {
            for (d, &v) in row.iter().enumerate() {
                let diff = v - mean[d];
                var[d] += diff * diff;
            }
        }
        let std = var.iter().map(|v| (v / n).sqrt()).collect();

        Ok(Self {
            fields: FIELD_NAMES.iter().map(|s| s.to_string()).collect(),
            mean,
            std,
        })
    }

    /// `(x - mean) / std` per dimension. A constant column (std = 0) is only
    /// centered.
    pub fn transform(&self, x: &[f64]) -> Result<[f64; DIM]> {
        self.check_shape()?;
        if x.len() != DIM {
            return Err(ModelError::ShapeMismatch {
                expected: DIM,
                found: x.len(),
            });
        }
        let mut out = [0.0; DIM];
        for d in 0..DIM {
            let scale = if self.std[d] > 0.0 { self.std[d] } else { 1.0 };
            out[d] = (x[d] - self.mean[d]) / scale;
        }
        Ok(out)
    }

    /// Transform every row of a collection, in order.
    pub fn transform_all(&self, collection: &FingerprintCollection) -> Result<Vec<[f64; DIM]>> {
        collection
            .iter()
            .map(|r| self.transform(&r.fingerprint.to_array()))
            .collect()
    }

    fn check_shape(&self) -> Result<()> {
        check_fields(&self.fields)?;
        for len in [self.mean.len(), self.std.len()] {
            if len != DIM {
                return Err(ModelError::ShapeMismatch {
                    expected: DIM,
                    found: len,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;

    fn collection(rows: &[[f64; DIM]]) -> FingerprintCollection {
        let mut c = FingerprintCollection::new();
        for (i, r) in rows.iter().enumerate() {
            c.push(format!("{}.wav", i), Fingerprint::from_array(*r));
        }
        c
    }

    #[test]
    fn test_fit_on_empty_fails() {
        assert!(matches!(
            Normalizer::fit(&FingerprintCollection::new()),
            Err(ModelError::EmptyInput)
        ));
    }

    #[test]
    fn test_transformed_columns_have_zero_mean_unit_std() {
        let c = collection(&[
            [10.0, 100.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 60.0],
            [20.0, 200.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 120.0],
            [30.0, 300.0, 4.0, 0.0, 0.0, 0.0, 0.0, 0.0, 180.0],
        ]);
        let norm = Normalizer::fit(&c).unwrap();
        let z = norm.transform_all(&c).unwrap();

        for d in [0usize, 1, 2, 8] {
            let mean: f64 = z.iter().map(|r| r[d]).sum::<f64>() / 3.0;
            let var: f64 = z.iter().map(|r| (r[d] - mean).powi(2)).sum::<f64>() / 3.0;
            assert!(mean.abs() < 1e-12);
            assert!((var - 1.0).abs() < 1e-12);
        }
        // Same shape, different scale: identical normalized values.
        assert!((z[0][0] - z[0][1]).abs() < 1e-12);
    }

    #[test]
    fn test_constant_column_is_centered_not_divided() {
        let c = collection(&[[5.0; DIM], [5.0; DIM]]);
        let norm = Normalizer::fit(&c).unwrap();
        assert!(norm.std.iter().all(|&s| s == 0.0));

        let z = norm.transform(&[7.0; DIM]).unwrap();
        assert!(z.iter().all(|&v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn test_wrong_length_is_shape_mismatch() {
        let norm = Normalizer::fit(&collection(&[[1.0; DIM]])).unwrap();
        assert!(matches!(
            norm.transform(&[1.0; 4]),
            Err(ModelError::ShapeMismatch { expected: DIM, found: 4 })
        ));
    }

    #[test]
    fn test_reordered_fields_rejected() {
        let mut norm = Normalizer::fit(&collection(&[[1.0; DIM]])).unwrap();
        norm.fields.swap(0, 1);
        assert!(matches!(
            norm.transform(&[1.0; DIM]),
            Err(ModelError::FieldOrder { .. })
        ));
    }
}
