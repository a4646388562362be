//! [`SimOpener`] – in-process stand-in camera for CI and bench runs.
//!
//! Every device it opens is a [`SimCamera`] that renders a deterministic
//! gradient in the descriptor's pixel layout, so the whole capture path
//! (lock, read, layout conversion, PNG encoding) runs without hardware.
//!
//! | Descriptor field | Stub behaviour |
//! |---|---|
//! | `width` / `height` | Frame size; defaults to 64×48 when unset. |
//! | `layout` | Layout the raw buffer is produced in. |
//! | `path` | Ignored. |

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use armgate_types::GateError;

use crate::camera::{CaptureDevice, DeviceDescriptor, DeviceOpener, PixelLayout, RawFrame};

const DEFAULT_WIDTH: u32 = 64;
const DEFAULT_HEIGHT: u32 = 48;

// ─────────────────────────────────────────────────────────────────────────────
// Stub camera
// ─────────────────────────────────────────────────────────────────────────────

/// Synthetic camera producing a red/green gradient with a frame-counter
/// blue channel.
pub struct SimCamera {
    role: String,
    width: u32,
    height: u32,
    layout: PixelLayout,
    frames: u8,
}

impl SimCamera {
    pub fn new(descriptor: &DeviceDescriptor) -> Self {
        Self {
            role: descriptor.role.clone(),
            width: descriptor.width.unwrap_or(DEFAULT_WIDTH),
            height: descriptor.height.unwrap_or(DEFAULT_HEIGHT),
            layout: descriptor.layout,
            frames: 0,
        }
    }

    fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let r = (x * 255 / self.width.max(1)) as u8;
        let g = (y * 255 / self.height.max(1)) as u8;
        [r, g, self.frames]
    }
}

impl CaptureDevice for SimCamera {
    fn role(&self) -> &str {
        &self.role
    }

    fn read_frame(&mut self) -> Result<Option<RawFrame>, GateError> {
        let pixels: Vec<[u8; 3]> = (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| (x, y)))
            .map(|(x, y)| self.pixel(x, y))
            .collect();

        let data = match self.layout {
            PixelLayout::Rgb24 => pixels.iter().flatten().copied().collect(),
            PixelLayout::Bgr24 => pixels.iter().flat_map(|[r, g, b]| [*b, *g, *r]).collect(),
            PixelLayout::PlanarRgb => (0..3)
                .flat_map(|c| pixels.iter().map(move |px| px[c]))
                .collect(),
        };
        self.frames = self.frames.wrapping_add(1);

        Ok(Some(RawFrame {
            width: self.width,
            height: self.height,
            layout: self.layout,
            data,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Opener
// ─────────────────────────────────────────────────────────────────────────────

/// [`DeviceOpener`] that always succeeds with a [`SimCamera`] and counts how
/// many times it was asked to open.
#[derive(Default, Clone)]
pub struct SimOpener {
    opens: Arc<AtomicUsize>,
}

impl SimOpener {
    /// Number of successful `open` calls so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl DeviceOpener for SimOpener {
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn CaptureDevice>, GateError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimCamera::new(descriptor)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
