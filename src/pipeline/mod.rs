#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod compositor;
#[cfg(feature = "camera-nokhwa")]
pub mod rgb_converter;

// Re-exports for convenience
#[cfg(feature = "camera-nokhwa")]
pub use camera::{CameraStream, list_cameras, start_camera_stream};
pub use compositor::{FramePipeline, recv_latest_frame, start_frame_compositor};
