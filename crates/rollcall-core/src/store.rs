//! In-memory table of enrolled face embeddings.

use crate::analyzer::FaceAnalyzer;
use crate::enrollment::EnrollmentImage;
use crate::types::{DetectedFace, EnrolledFace};

/// Reference embeddings, one per enrollee image with a detectable face.
///
/// Built once before the live loop starts and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct EncodingStore {
    faces: Vec<EnrolledFace>,
}

/// Counts reported after building a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub enrolled: usize,
    pub no_face: usize,
    pub failed: usize,
    pub dimension_mismatch: usize,
}

impl EncodingStore {
    /// Embed every enrollment image with `analyzer`.
    ///
    /// Images with no face, an analyzer failure, or an embedding whose
    /// dimension disagrees with the first enrolled face are skipped and
    /// logged. When an image holds several faces the largest one is used.
    pub fn build<A>(analyzer: &mut A, images: &[EnrollmentImage]) -> (Self, BuildReport)
    where
        A: FaceAnalyzer + ?Sized,
    {
        let mut faces: Vec<EnrolledFace> = Vec::with_capacity(images.len());
        let mut report = BuildReport::default();

        for entry in images {
            let detected = match analyzer.detect_and_embed(&entry.image) {
                Ok(detected) => detected,
                Err(e) => {
                    tracing::error!(path = %entry.path.display(), error = %e, "error encoding enrollment image");
                    report.failed += 1;
                    continue;
                }
            };

            let count = detected.len();
            let Some(face) = select_enrollment_face(detected) else {
                tracing::warn!(path = %entry.path.display(), "no face detected in enrollment image");
                report.no_face += 1;
                continue;
            };
            if count > 1 {
                tracing::info!(path = %entry.path.display(), faces = count, "several faces in enrollment image, using the largest");
            }

            if let Some(first) = faces.first() {
                let expected = first.embedding.dimension();
                if face.embedding.dimension() != expected {
                    tracing::warn!(
                        path = %entry.path.display(),
                        expected,
                        got = face.embedding.dimension(),
                        "embedding dimension mismatch, skipping"
                    );
                    report.dimension_mismatch += 1;
                    continue;
                }
            }

            faces.push(EnrolledFace {
                identity: entry.identity.clone(),
                embedding: face.embedding,
            });
            report.enrolled += 1;
        }

        tracing::info!(
            enrolled = report.enrolled,
            no_face = report.no_face,
            failed = report.failed,
            "encoding store built"
        );

        (Self { faces }, report)
    }

    pub fn from_faces(faces: Vec<EnrolledFace>) -> Self {
        Self { faces }
    }

    pub fn faces(&self) -> &[EnrolledFace] {
        &self.faces
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Embedding dimension shared by every entry, `None` when empty.
    pub fn dimension(&self) -> Option<usize> {
        self.faces.first().map(|f| f.embedding.dimension())
    }
}

/// Pick the canonical face of an enrollment image: largest box area, then
/// highest confidence, then earliest in detector order.
fn select_enrollment_face(detected: Vec<DetectedFace>) -> Option<DetectedFace> {
    detected.into_iter().reduce(|best, face| {
        let ordering = face
            .bbox
            .area()
            .total_cmp(&best.bbox.area())
            .then(face.bbox.confidence.total_cmp(&best.bbox.confidence));
        if ordering.is_gt() {
            face
        } else {
            best
        }
    })
}
