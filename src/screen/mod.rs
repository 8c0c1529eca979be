pub mod synthetic;
pub mod viewer;

/// JPEG quality (1-100) for simulator frames.
pub const JPEG_QUALITY: u8 = 80;
/// Default simulator frame size, a 16:9 phone preview.
pub const DEFAULT_SIM_WIDTH: u32 = 640;
pub const DEFAULT_SIM_HEIGHT: u32 = 360;
/// Default simulator frame rate.
pub const DEFAULT_SIM_FPS: u32 = 10;
