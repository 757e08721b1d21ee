//! Enrollment directory decoding.
//!
//! Every recognised image file in the enrollment directory is one enrollee;
//! the identity comes from the filename, the pixels from the file.

use crate::identity::{self, Identity, IdentityError};
use image::RgbImage;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("enrollment directory unreadable: {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid enrollment: {0}")]
    Identity(#[from] IdentityError),
    #[error("already enrolled: {0}")]
    AlreadyExists(PathBuf),
    #[error("failed to copy enrollment image: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded enrollment image and the identity named by its filename.
#[derive(Debug, Clone)]
pub struct EnrollmentImage {
    pub identity: Identity,
    pub path: PathBuf,
    pub image: RgbImage,
}

/// List the image files in `dir`, sorted by filename.
fn image_files(dir: &Path) -> Result<Vec<PathBuf>, EnrollmentError> {
    let unreadable = |source| EnrollmentError::Unreadable {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        if path.is_file() && identity::is_image_path(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Identities of everyone in the enrollment directory, without decoding pixels.
pub fn list_identities(dir: &Path) -> Result<Vec<(PathBuf, Identity)>, EnrollmentError> {
    Ok(image_files(dir)?
        .into_iter()
        .filter_map(|path| Identity::from_path(&path).map(|id| (path, id)))
        .collect())
}

/// Decode every enrollment image in `dir`.
///
/// Files that fail to decode are skipped with a warning. Only an unreadable
/// directory is an error.
pub fn read_enrollment_dir(dir: &Path) -> Result<Vec<EnrollmentImage>, EnrollmentError> {
    let files = image_files(dir)?;
    tracing::info!(dir = %dir.display(), count = files.len(), "found enrollment images");

    let mut images = Vec::with_capacity(files.len());
    for path in files {
        let Some(identity) = Identity::from_path(&path) else {
            tracing::warn!(path = %path.display(), "skipping enrollment image with non-UTF-8 name");
            continue;
        };
        match image::open(&path) {
            Ok(decoded) => images.push(EnrollmentImage {
                identity,
                image: decoded.to_rgb8(),
                path,
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not load enrollment image");
            }
        }
    }

    Ok(images)
}

/// Copy `source` into `dir` under the canonical filename for `identity`.
///
/// Returns the destination path. Never overwrites an existing enrollment.
pub fn enroll_image(dir: &Path, source: &Path, identity: &Identity) -> Result<PathBuf, EnrollmentError> {
    let extension = identity::enroll_extension(source).ok_or_else(|| {
        IdentityError::UnsupportedExtension(
            source
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )
    })?;

    fs::create_dir_all(dir)?;
    let dest = dir.join(identity.file_name(&extension));
    let mut input = File::open(source)?;
    let mut output = match OpenOptions::new().write(true).create_new(true).open(&dest) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(EnrollmentError::AlreadyExists(dest))
        }
        Err(e) => return Err(e.into()),
    };

    if let Err(e) = io::copy(&mut input, &mut output) {
        drop(output);
        let _ = fs::remove_file(&dest);
        return Err(e.into());
    }
    tracing::info!(identity = %identity, path = %dest.display(), "enrolled image");
    Ok(dest)
}
