//! Landmark vectors.
//!
//! Landmark vectors are produced outside this service by a hand/pose
//! detector: keypoints are expressed relative to an anchor (wrist for hands,
//! elbow midpoint for the upper body) and flattened. The layout of the
//! default 138-dimensional vector is two hands of 21 points (126 values)
//! followed by both shoulders and elbows (12 values). This module only
//! validates and aggregates such vectors.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default landmark vector dimension (2 × 21 hand points + 4 pose points, xyz).
pub const DEFAULT_LANDMARK_DIM: usize = 138;

/// A validated landmark feature vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LandmarkVector(Vec<f32>);

impl LandmarkVector {
    /// Validate `values` against the expected dimension.
    pub fn new(values: Vec<f32>, expected_dim: usize) -> Result<Self> {
        if values.len() != expected_dim {
            return Err(Error::InvalidInput(format!(
                "Expected {}D landmark vector, got {}D",
                expected_dim,
                values.len()
            )));
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(Error::InvalidInput(format!(
                "Landmark component {} is not a finite number",
                idx
            )));
        }
        Ok(Self(values))
    }

    /// Parse a JSON array of numbers.
    pub fn from_json(raw: &str, expected_dim: usize) -> Result<Self> {
        let values: Vec<f32> = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidInput(format!("Invalid landmark JSON: {}", e)))?;
        Self::new(values, expected_dim)
    }

    /// True when nothing was detected (all components zero).
    ///
    /// Blank vectors have no direction, so they are never searched.
    pub fn is_blank(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

/// One frame record written by the landmark extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandmarkFrame {
    /// Source video or image
    pub file: String,
    /// Frame index within the source
    #[serde(default)]
    pub frame: u64,
    /// Seconds from the start of the source
    #[serde(default)]
    pub timestamp: f64,
    /// Sign label
    pub label: String,
    /// Landmark features
    pub vector: Vec<f32>,
    /// Declared vector length
    #[serde(default)]
    pub dimension: Option<usize>,
    /// `original` or `mirror`
    #[serde(default = "default_augmentation")]
    pub augmentation: String,
}

fn default_augmentation() -> String {
    "original".to_string()
}

impl LandmarkFrame {
    /// Validate the record and return its vector.
    pub fn validated_vector(&self, expected_dim: usize) -> Result<LandmarkVector> {
        if let Some(declared) = self.dimension {
            if declared != self.vector.len() {
                return Err(Error::InvalidInput(format!(
                    "{} frame {}: declared dimension {} but vector has {}",
                    self.file,
                    self.frame,
                    declared,
                    self.vector.len()
                )));
            }
        }
        LandmarkVector::new(self.vector.clone(), expected_dim)
    }

    /// Key identifying this frame as a point source.
    pub fn source_key(&self) -> String {
        format!("{}#{}:{}", self.file, self.frame, self.augmentation)
    }
}

/// Component-wise mean of equally sized vectors.
///
/// Returns `None` for an empty input or mismatched lengths.
pub fn mean_vector<V: AsRef<[f32]>>(vectors: &[V]) -> Option<Vec<f32>> {
    let first = vectors.first()?.as_ref();
    let dim = first.len();
    let mut sum = vec![0.0f32; dim];
    for v in vectors {
        let v = v.as_ref();
        if v.len() != dim {
            return None;
        }
        for (acc, x) in sum.iter_mut().zip(v) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    sum.iter_mut().for_each(|x| *x /= n);
    Some(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_dimension() {
        let err = LandmarkVector::new(vec![0.1; 10], DEFAULT_LANDMARK_DIM).unwrap_err();
        assert!(err.to_string().contains("Expected 138D"));
    }

    #[test]
    fn test_rejects_non_finite() {
        let mut values = vec![0.1; 4];
        values[2] = f32::NAN;
        assert!(LandmarkVector::new(values, 4).is_err());
    }

    #[test]
    fn test_blank_detection() {
        let blank = LandmarkVector::new(vec![0.0; 4], 4).unwrap();
        assert!(blank.is_blank());

        let real = LandmarkVector::new(vec![0.0, 0.2, 0.0, 0.0], 4).unwrap();
        assert!(!real.is_blank());
    }

    #[test]
    fn test_from_json() {
        let v = LandmarkVector::from_json("[0.5, -0.25, 1]", 3).unwrap();
        assert_eq!(v.as_slice(), &[0.5, -0.25, 1.0]);

        assert!(LandmarkVector::from_json("not json", 3).is_err());
    }

    #[test]
    fn test_frame_record_parses_extractor_output() {
        let raw = r#"{
            "file": "videos/hello.mp4",
            "frame": 12,
            "timestamp": 0.4,
            "label": "hello",
            "vector": [0.1, 0.2, 0.3],
            "dimension": 3,
            "augmentation": "mirror"
        }"#;
        let frame: LandmarkFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.label, "hello");
        assert_eq!(frame.validated_vector(3).unwrap().dim(), 3);
        assert_eq!(frame.source_key(), "videos/hello.mp4#12:mirror");
    }

    #[test]
    fn test_frame_declared_dimension_mismatch() {
        let frame = LandmarkFrame {
            file: "a.mp4".into(),
            frame: 0,
            timestamp: 0.0,
            label: "a".into(),
            vector: vec![0.1, 0.2],
            dimension: Some(3),
            augmentation: default_augmentation(),
        };
        assert!(frame.validated_vector(2).is_err());
    }

    #[test]
    fn test_mean_vector() {
        let mean = mean_vector(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(mean, vec![2.0, 3.0]);

        assert!(mean_vector::<Vec<f32>>(&[]).is_none());
        assert!(mean_vector(&[vec![1.0], vec![1.0, 2.0]]).is_none());
    }
}
