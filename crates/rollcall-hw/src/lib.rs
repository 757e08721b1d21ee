//! rollcall-hw — Frame capture for the attendance loop.
//!
//! Provides V4L2 camera access producing RGB frames, and a directory replay
//! source with the same interface.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use source::{CaptureError, FrameSource, ImageSequence};
