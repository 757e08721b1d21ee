use crate::identity::Identity;
use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face location in (top, right, bottom, left) pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceLocation {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceLocation {
    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        Self {
            top: bbox.y as i32,
            right: (bbox.x + bbox.width) as i32,
            bottom: (bbox.y + bbox.height) as i32,
            left: bbox.x as i32,
        }
    }

    /// Map a location found in a frame resized by `factor` back to the
    /// original frame.
    pub fn upscale(self, factor: f32) -> Self {
        let back = |v: i32| (v as f32 / factor) as i32;
        Self {
            top: back(self.top),
            right: back(self.right),
            bottom: back(self.bottom),
            left: back(self.left),
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model_version: None }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A face found in a frame together with its embedding. Never persisted.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// An enrolled reference face.
#[derive(Debug, Clone)]
pub struct EnrolledFace {
    pub identity: Identity,
    pub embedding: Embedding,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9, landmarks: None }
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.3, 0.4, 0.5]);
        assert!(a.euclidean_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_known() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_symmetric() {
        let a = Embedding::new(vec![1.0, -2.0, 0.5]);
        let b = Embedding::new(vec![-0.5, 0.25, 2.0]);
        assert_eq!(a.euclidean_distance(&b), b.euclidean_distance(&a));
    }

    #[test]
    fn test_location_from_bbox() {
        let loc = FaceLocation::from_bbox(&bbox(10.0, 20.0, 30.0, 40.0));
        assert_eq!(loc, FaceLocation { top: 20, right: 40, bottom: 60, left: 10 });
        assert_eq!(loc.width(), 30);
        assert_eq!(loc.height(), 40);
    }

    #[test]
    fn test_location_upscale_quarter() {
        let loc = FaceLocation { top: 10, right: 50, bottom: 60, left: 20 };
        assert_eq!(
            loc.upscale(0.25),
            FaceLocation { top: 40, right: 200, bottom: 240, left: 80 }
        );
    }

    #[test]
    fn test_bbox_area_negative_extent() {
        assert_eq!(bbox(0.0, 0.0, -5.0, 10.0).area(), 0.0);
        assert_eq!(bbox(0.0, 0.0, 5.0, 10.0).area(), 50.0);
    }
}
