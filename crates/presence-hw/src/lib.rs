//! presence-hw - Camera capture for the attendance terminal.
//!
//! Provides V4L2-based camera access and grayscale frame conversion.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
