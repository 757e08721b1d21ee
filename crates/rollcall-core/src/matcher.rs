//! Per-frame recognition: downsample, detect, embed, nearest neighbour.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::config::Config;
use crate::identity::Identity;
use crate::store::EncodingStore;
use crate::types::{Embedding, EnrolledFace, FaceLocation};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::borrow::Cow;

/// Nearest enrolled face to a probe embedding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    pub index: usize,
    pub distance: f32,
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the nearest enrolled face, `None` for an empty gallery.
    pub distance: Option<f32>,
    /// Gallery index of the accepted face.
    pub index: Option<usize>,
}

/// Strategy for finding the nearest enrolled face.
pub trait Matcher {
    fn nearest(&self, probe: &Embedding, gallery: &[EnrolledFace]) -> Option<Nearest>;

    /// Accept the nearest face iff its distance is within `threshold`.
    fn compare(&self, probe: &Embedding, gallery: &[EnrolledFace], threshold: f32) -> MatchResult {
        match self.nearest(probe, gallery) {
            Some(n) if n.distance <= threshold => MatchResult {
                matched: true,
                distance: Some(n.distance),
                index: Some(n.index),
            },
            nearest => MatchResult {
                matched: false,
                distance: nearest.map(|n| n.distance),
                index: None,
            },
        }
    }
}

/// Exhaustive Euclidean argmin over the whole gallery.
///
/// Exact ties go to the lowest index; NaN distances never win. Entries of a
/// different dimension than the probe are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn nearest(&self, probe: &Embedding, gallery: &[EnrolledFace]) -> Option<Nearest> {
        let mut best: Option<Nearest> = None;
        for (index, face) in gallery.iter().enumerate() {
            if face.embedding.dimension() != probe.dimension() {
                continue;
            }
            let distance = probe.euclidean_distance(&face.embedding);
            if distance.is_nan() {
                continue;
            }
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Nearest { index, distance });
            }
        }
        best
    }
}

/// One face found in a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    /// Location in full-frame coordinates.
    pub location: FaceLocation,
    /// Distance to the nearest enrolled face.
    pub distance: Option<f32>,
    /// The accepted identity; `None` means Unknown.
    pub identity: Option<Identity>,
}

impl Recognition {
    pub fn is_known(&self) -> bool {
        self.identity.is_some()
    }

    /// Overlay label, e.g. `ALICE (1)` or `Unknown (N/A)`.
    pub fn label(&self) -> String {
        match &self.identity {
            Some(identity) => identity.label(),
            None => "Unknown (N/A)".to_string(),
        }
    }
}

/// Runs the detect → embed → match pipeline on frames.
#[derive(Debug, Clone)]
pub struct FrameMatcher<M = EuclideanMatcher> {
    threshold: f32,
    downsample_factor: f32,
    matcher: M,
}

impl FrameMatcher<EuclideanMatcher> {
    pub fn new(threshold: f32, downsample_factor: f32) -> Self {
        Self::with_matcher(threshold, downsample_factor, EuclideanMatcher)
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.distance_threshold, config.downsample_factor)
    }
}

impl<M: Matcher> FrameMatcher<M> {
    pub fn with_matcher(threshold: f32, downsample_factor: f32, matcher: M) -> Self {
        Self {
            threshold,
            downsample_factor,
            matcher,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Recognise every face in `frame` against `store`.
    pub fn match_frame<A>(
        &self,
        analyzer: &mut A,
        frame: &RgbImage,
        store: &EncodingStore,
    ) -> Result<Vec<Recognition>, AnalyzerError>
    where
        A: FaceAnalyzer + ?Sized,
    {
        let small = downsample(frame, self.downsample_factor);
        let detected = analyzer.detect_and_embed(&small)?;

        Ok(detected
            .into_iter()
            .map(|face| {
                let result = self.matcher.compare(&face.embedding, store.faces(), self.threshold);
                let identity = result.index.map(|i| store.faces()[i].identity.clone());
                Recognition {
                    location: FaceLocation::from_bbox(&face.bbox).upscale(self.downsample_factor),
                    distance: result.distance,
                    identity,
                }
            })
            .collect())
    }
}

/// Shrink both dimensions by `factor`; a factor of 1.0 or more borrows the frame.
fn downsample(frame: &RgbImage, factor: f32) -> Cow<'_, RgbImage> {
    if factor >= 1.0 {
        return Cow::Borrowed(frame);
    }
    let w = ((frame.width() as f32 * factor).round() as u32).max(1);
    let h = ((frame.height() as f32 * factor).round() as u32).max(1);
    Cow::Owned(imageops::resize(frame, w, h, FilterType::Triangle))
}
