//! rollcall-core — Face recognition and attendance engine.
//!
//! Decodes enrollees from image filenames, builds a reference set of face
//! embeddings, matches faces in live frames against it, and keeps a CSV
//! attendance ledger with one row per person per day.

pub mod alignment;
pub mod analyzer;
pub mod config;
pub mod detector;
pub mod enrollment;
pub mod identity;
pub mod ledger;
pub mod matcher;
pub mod recognizer;
pub mod store;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxAnalyzer};
pub use config::{default_model_dir, Config, ConfigError};
pub use enrollment::{read_enrollment_dir, EnrollmentError, EnrollmentImage};
pub use identity::Identity;
pub use ledger::{AttendanceLedger, AttendanceRecord, LedgerError, Upsert};
pub use matcher::{EuclideanMatcher, FrameMatcher, MatchResult, Matcher, Recognition};
pub use store::{BuildReport, EncodingStore};
pub use types::{BoundingBox, DetectedFace, Embedding, EnrolledFace, FaceLocation};
