//! `armgate-hal` – capture hardware abstraction.
//!
//! # Modules
//!
//! - [`camera`] – [`CaptureDevice`] / [`DeviceOpener`] traits, raw frame
//!   types and per-role [`DeviceDescriptor`]s.
//! - [`capture`] – [`CaptureManager`]: the single owner of the open camera
//!   handle, with lazy open, blocking PNG capture and idempotent release.
//! - [`convert`] – stateless pixel-layout conversion and PNG encoding.
//! - [`raw_stream`] – camera reading raw frames from a device node or FIFO.
//! - [`sim`] – synthetic camera for CI and bench runs.

pub mod camera;
pub mod capture;
pub mod convert;
pub mod raw_stream;
pub mod sim;

pub use camera::{CaptureDevice, DeviceDescriptor, DeviceOpener, PixelLayout, RawFrame};
pub use capture::CaptureManager;
pub use raw_stream::{DeviceNodeOpener, RawStreamCamera};
pub use sim::{SimCamera, SimOpener};
