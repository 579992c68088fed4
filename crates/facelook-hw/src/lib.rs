//! facelook-hw — Camera capture for the live recognition loop.
//!
//! Provides V4L2-based camera access producing RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream, PixelFormat};
pub use frame::{Frame, FrameError};
