//! rollcall-hw: Hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access and conversion of the negotiated
//! pixel format into RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, PixelFormat};
pub use frame::Frame;
