//! Capture-device traits and the raw frame types they produce.

use armgate_types::GateError;
use serde::{Deserialize, Serialize};

/// Memory layout of the pixels a device hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelLayout {
    /// Interleaved blue-green-red, 3 bytes per pixel. What most UVC
    /// webcams deliver through the usual capture stacks.
    #[default]
    Bgr24,
    /// Interleaved red-green-blue, 3 bytes per pixel.
    Rgb24,
    /// Three full-resolution planes, R then G then B.
    PlanarRgb,
}

impl PixelLayout {
    /// Bytes needed for one `width` x `height` frame.
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }
}

/// A raw image frame returned by a capture device, before encoding.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Layout of `data`.
    pub layout: PixelLayout,
    /// Raw pixel data.
    pub data: Vec<u8>,
}

/// Static description of one camera, keyed by the role it plays
/// (e.g. `"top"` or `"wrist"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub role: String,
    /// Device node or FIFO to read raw frames from. `None` selects the
    /// simulated camera.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub layout: PixelLayout,
}

impl DeviceDescriptor {
    /// A descriptor for the simulated camera.
    pub fn simulated(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            path: None,
            width: None,
            height: None,
            layout: PixelLayout::default(),
        }
    }
}

/// An open connection to image-capture hardware.
pub trait CaptureDevice: Send {
    /// Role this device was opened for.
    fn role(&self) -> &str;

    /// Perform one blocking read.
    ///
    /// Returns `Ok(None)` when the device answered but produced no frame.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::CaptureFailed`] when the read itself fails.
    fn read_frame(&mut self) -> Result<Option<RawFrame>, GateError>;

    /// Release the underlying handle. Called exactly once by the owner.
    fn close(&mut self) {}
}

/// Opens [`CaptureDevice`]s from their descriptors.
pub trait DeviceOpener: Send + Sync {
    /// # Errors
    ///
    /// Returns [`GateError::DeviceUnavailable`] when the device is absent or
    /// already claimed by another process.
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn CaptureDevice>, GateError>;
}
