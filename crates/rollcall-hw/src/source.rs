//! Frame sources: anything that yields RGB frames one at a time.

use crate::frame::Frame;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("frame read failed: {0}")]
    ReadFailed(String),
    #[error("end of stream")]
    EndOfStream,
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A blocking producer of frames.
///
/// `read_frame` returns `EndOfStream` when a finite source is exhausted; any
/// other error is a failed read the caller may retry or give up on. There is
/// no read timeout: a device that stops delivering frames blocks the caller.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Short human-readable name for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        (**self).read_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Replays the image files of a directory in lexicographic order.
pub struct ImageSequence {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

const SEQUENCE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "tiff"];

impl ImageSequence {
    pub fn open(dir: &Path) -> Result<Self, CaptureError> {
        let io_err = |source| CaptureError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| SEQUENCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if path.is_file() && is_image {
                files.push(path);
            }
        }
        files.sort();

        tracing::info!(dir = %dir.display(), frames = files.len(), "opened image sequence");
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let Some(path) = self.files.get(self.next) else {
            return Err(CaptureError::EndOfStream);
        };
        let sequence = self.next as u32;
        self.next += 1;

        let image = image::open(path)
            .map_err(|source| CaptureError::Decode {
                path: path.clone(),
                source,
            })?
            .to_rgb8();
        Ok(Frame::new(image, sequence))
    }

    fn describe(&self) -> String {
        format!("image sequence {}", self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, shade: u8) {
        RgbImage::from_pixel(4, 3, Rgb([shade, shade, shade]))
            .save_with_format(dir.join(name), ImageFormat::Png)
            .unwrap();
    }

    #[test]
    fn test_sequence_plays_in_name_order_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "002.png", 20);
        write_png(dir.path(), "001.png", 10);
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let mut seq = ImageSequence::open(dir.path()).unwrap();
        assert_eq!(seq.len(), 2);

        let first = seq.read_frame().unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.image.get_pixel(0, 0).0, [10, 10, 10]);
        assert_eq!((first.width(), first.height()), (4, 3));

        let second = seq.read_frame().unwrap();
        assert_eq!(second.image.get_pixel(0, 0).0, [20, 20, 20]);

        assert!(matches!(seq.read_frame(), Err(CaptureError::EndOfStream)));
        assert!(matches!(seq.read_frame(), Err(CaptureError::EndOfStream)));
    }

    #[test]
    fn test_undecodable_frame_is_a_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();

        let mut seq = ImageSequence::open(dir.path()).unwrap();
        assert!(matches!(seq.read_frame(), Err(CaptureError::Decode { .. })));
        assert!(matches!(seq.read_frame(), Err(CaptureError::EndOfStream)));
    }

    #[test]
    fn test_missing_directory() {
        assert!(matches!(
            ImageSequence::open(Path::new("/nonexistent/frames")),
            Err(CaptureError::Io { .. })
        ));
    }
}
