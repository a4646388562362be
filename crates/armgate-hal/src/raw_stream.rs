//! Raw-frame camera backed by a device node or FIFO.
//!
//! Each read pulls exactly one `width * height * 3` byte frame in the
//! descriptor's layout. A short read at end-of-stream means "no frame".

use std::fs::File;
use std::io::{ErrorKind, Read};

use armgate_types::GateError;

use crate::camera::{CaptureDevice, DeviceDescriptor, DeviceOpener, PixelLayout, RawFrame};
use crate::sim::SimCamera;

pub struct RawStreamCamera {
    role: String,
    file: File,
    width: u32,
    height: u32,
    layout: PixelLayout,
}

impl RawStreamCamera {
    /// Open the stream at `descriptor.path`.
    ///
    /// # Errors
    ///
    /// - [`GateError::DeviceMisconfigured`] – no path or no frame size.
    /// - [`GateError::DeviceUnavailable`] – the path cannot be opened.
    pub fn open(descriptor: &DeviceDescriptor) -> Result<Self, GateError> {
        let (Some(path), Some(width), Some(height)) =
            (&descriptor.path, descriptor.width, descriptor.height)
        else {
            return Err(GateError::DeviceMisconfigured(descriptor.role.clone()));
        };
        let file = File::open(path).map_err(|e| GateError::DeviceUnavailable {
            role: descriptor.role.clone(),
            details: format!("{path}: {e}"),
        })?;
        Ok(Self {
            role: descriptor.role.clone(),
            file,
            width,
            height,
            layout: descriptor.layout,
        })
    }
}

impl CaptureDevice for RawStreamCamera {
    fn role(&self) -> &str {
        &self.role
    }

    fn read_frame(&mut self) -> Result<Option<RawFrame>, GateError> {
        let mut data = vec![0u8; self.layout.frame_len(self.width, self.height)];
        match self.file.read_exact(&mut data) {
            Ok(()) => Ok(Some(RawFrame {
                width: self.width,
                height: self.height,
                layout: self.layout,
                data,
            })),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(GateError::CaptureFailed(format!(
                "read from {} camera failed: {e}",
                self.role
            ))),
        }
    }
}

/// Opens a [`RawStreamCamera`] when the descriptor names a path and falls
/// back to a [`SimCamera`] otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceNodeOpener;

impl DeviceOpener for DeviceNodeOpener {
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn CaptureDevice>, GateError> {
        match descriptor.path {
            Some(_) => Ok(Box::new(RawStreamCamera::open(descriptor)?)),
            None => Ok(Box::new(SimCamera::new(descriptor))),
        }
    }
}
