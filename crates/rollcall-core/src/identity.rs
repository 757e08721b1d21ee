//! Identities encoded in enrollment filenames.
//!
//! An enrollment image is named `<rollno>_<Display_Name><ext>`. The roll
//! number is optional; when the first underscore-separated token is not all
//! digits the whole stem is the display name and the roll number is `N/A`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Roll number recorded for identities whose filename carries none.
pub const NO_ROLL_NUMBER: &str = "N/A";

/// File extensions accepted as enrollment images (compared lowercase).
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "bmp", "tiff"];

/// Extensions accepted for new enrollments. Narrower than what is read back.
pub const ENROLL_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "bmp"];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentityError {
    #[error("display name must contain only letters and spaces: {0:?}")]
    InvalidName(String),
    #[error("roll number must contain only digits: {0:?}")]
    InvalidRollNumber(String),
    #[error("unsupported image extension: {0:?}")]
    UnsupportedExtension(String),
}

/// A known person: roll number plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub roll_number: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(roll_number: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            roll_number: roll_number.into(),
            display_name: display_name.into(),
        }
    }

    /// Decode an identity from a filename stem such as `23_jane_doe`.
    pub fn from_stem(stem: &str) -> Self {
        let parts: Vec<&str> = stem.split('_').collect();
        let first = parts[0];

        if is_roll_number(first) {
            Self {
                roll_number: first.to_string(),
                display_name: title_case(&parts[1..].join(" ")),
            }
        } else {
            Self {
                roll_number: NO_ROLL_NUMBER.to_string(),
                display_name: title_case(&parts.join(" ")),
            }
        }
    }

    /// Decode an identity from an enrollment file path.
    ///
    /// Returns `None` when the path has no UTF-8 stem.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_stem()?.to_str().map(Self::from_stem)
    }

    pub fn has_roll_number(&self) -> bool {
        self.roll_number != NO_ROLL_NUMBER
    }

    /// Canonical filename stem for this identity.
    pub fn file_stem(&self) -> String {
        let name = self.display_name.replace(' ', "_");
        if self.has_roll_number() {
            format!("{}_{}", self.roll_number, name)
        } else {
            name
        }
    }

    /// Canonical filename with the given extension (with or without the dot).
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.file_stem(), extension.trim_start_matches('.'))
    }

    /// Label used for overlays and logs: upper-cased name plus roll number.
    pub fn label(&self) -> String {
        format!("{} ({})", self.display_name.to_uppercase(), self.roll_number)
    }

    /// Build the identity for a new enrollment, validating both fields the
    /// way enrollment uploads are validated.
    pub fn for_enrollment(roll_number: &str, display_name: &str) -> Result<Self, IdentityError> {
        let roll_number = roll_number.trim();
        let display_name = display_name.trim();

        if !is_roll_number(roll_number) {
            return Err(IdentityError::InvalidRollNumber(roll_number.to_string()));
        }
        if display_name.is_empty()
            || !display_name
                .chars()
                .all(|c| c.is_ascii_alphabetic() || c.is_whitespace())
        {
            return Err(IdentityError::InvalidName(display_name.to_string()));
        }

        let words: Vec<&str> = display_name.split_whitespace().collect();
        Ok(Self::new(roll_number, title_case(&words.join(" "))))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.roll_number)
    }
}

/// Whether `path` carries one of the recognised image extensions.
pub fn is_image_path(path: &Path) -> bool {
    image_extension(path).is_some()
}

/// The lowercase image extension of `path`, if recognised.
pub fn image_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// The lowercase extension of `path` if it may be enrolled.
pub fn enroll_extension(path: &Path) -> Option<String> {
    image_extension(path).filter(|ext| ENROLL_EXTENSIONS.contains(&ext.as_str()))
}

fn is_roll_number(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

/// Upper-case the first letter of every run of letters and lower-case the
/// rest of the run.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}
