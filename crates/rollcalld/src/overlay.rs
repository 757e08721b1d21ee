//! Annotated snapshot of a processed frame.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use rollcall_core::Recognition;
use std::path::Path;

const KNOWN: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN: Rgb<u8> = Rgb([255, 0, 0]);

/// Height of the filled label band along the bottom edge of each box.
const LABEL_BAND_HEIGHT: u32 = 35;

/// Draw a box per recognition: green for enrolled faces, red for unknown,
/// each with a filled band along its bottom edge where the label sits.
pub fn annotate(frame: &RgbImage, recognitions: &[Recognition]) -> RgbImage {
    let mut canvas = frame.clone();
    for recognition in recognitions {
        let loc = recognition.location;
        let color = if recognition.is_known() { KNOWN } else { UNKNOWN };
        let width = loc.width().max(1) as u32;
        let height = loc.height().max(1) as u32;

        draw_hollow_rect_mut(&mut canvas, Rect::at(loc.left, loc.top).of_size(width, height), color);

        let band = LABEL_BAND_HEIGHT.min(height);
        let band_top = loc.bottom - band as i32;
        draw_filled_rect_mut(&mut canvas, Rect::at(loc.left, band_top).of_size(width, band), color);

        tracing::debug!(label = %recognition.label(), ?loc, "overlay box");
    }
    canvas
}

/// Annotate `frame` and write it to `path`; the format follows the extension.
pub fn write_snapshot(
    path: &Path,
    frame: &RgbImage,
    recognitions: &[Recognition],
) -> Result<(), image::ImageError> {
    annotate(frame, recognitions).save(path)
}
