//! [`CaptureManager`] – single-owner lifecycle for the capture device.
//!
//! The camera can be opened exactly once system-wide, so the manager owns
//! the only handle. It opens lazily on the first capture, serves blocking
//! reads, and closes on an explicit [`CaptureManager::release`].
//!
//! The check-and-open sequence and every read run under the manager's own
//! mutex. That lock is unrelated to the actuator execution lock, so a
//! capture never waits on a running motion.
//!
//! `release` is meant for orderly shutdown only: the front end must stop
//! issuing captures before calling it. A capture arriving after release
//! would simply reopen the device.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use armgate_hal::{CaptureManager, DeviceDescriptor, sim::SimOpener};
//!
//! let manager = CaptureManager::new(
//!     "top",
//!     [DeviceDescriptor::simulated("top")],
//!     Arc::new(SimOpener::default()),
//! );
//! let png = manager.capture_frame().unwrap();
//! assert!(png.starts_with(b"\x89PNG"));
//! manager.release();
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use armgate_types::GateError;
use tracing::{debug, info, instrument};

use crate::camera::{CaptureDevice, DeviceDescriptor, DeviceOpener};
use crate::convert::encode_png;

type Slot = Option<Box<dyn CaptureDevice>>;

/// Owner of the one capture [`CaptureDevice`] handle.
pub struct CaptureManager {
    role: String,
    descriptors: HashMap<String, DeviceDescriptor>,
    opener: Arc<dyn DeviceOpener>,
    handle: Mutex<Slot>,
}

impl CaptureManager {
    /// Create a manager that will open the device registered for `role`.
    /// Nothing is opened until the first capture.
    pub fn new(
        role: impl Into<String>,
        descriptors: impl IntoIterator<Item = DeviceDescriptor>,
        opener: Arc<dyn DeviceOpener>,
    ) -> Self {
        Self {
            role: role.into(),
            descriptors: descriptors
                .into_iter()
                .map(|d| (d.role.clone(), d))
                .collect(),
            opener,
            handle: Mutex::new(None),
        }
    }

    /// Role of the device this manager serves.
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Whether a device handle is currently open.
    pub fn is_open(&self) -> bool {
        self.slot().is_some()
    }

    /// Open the device if it is not open yet. Idempotent.
    ///
    /// # Errors
    ///
    /// - [`GateError::DeviceMisconfigured`] – no descriptor for the role.
    /// - [`GateError::DeviceUnavailable`] – the opener could not claim it.
    pub fn ensure_open(&self) -> Result<(), GateError> {
        let mut slot = self.slot();
        self.open_locked(&mut slot)
    }

    /// Capture one frame and return it PNG-encoded.
    ///
    /// Blocks for the duration of the device read; call it from a blocking
    /// worker, not from an async task.
    #[instrument(skip(self), fields(role = %self.role))]
    pub fn capture_frame(&self) -> Result<Vec<u8>, GateError> {
        let frame = {
            let mut slot = self.slot();
            self.open_locked(&mut slot)?;
            let device = slot
                .as_mut()
                .ok_or_else(|| GateError::CaptureFailed("device handle missing".to_string()))?;
            device.read_frame()?
        };

        let frame = frame.ok_or_else(|| {
            GateError::CaptureFailed(format!("failed to read from {} camera", self.role))
        })?;
        let png = encode_png(&frame)?;
        debug!(
            width = frame.width,
            height = frame.height,
            bytes = png.len(),
            "frame captured"
        );
        Ok(png)
    }

    /// Close the device if open. Calling it again is a no-op.
    pub fn release(&self) {
        let mut slot = self.slot();
        if let Some(mut device) = slot.take() {
            device.close();
            info!(role = %self.role, "capture device released");
        }
    }

    fn open_locked(&self, slot: &mut Slot) -> Result<(), GateError> {
        if slot.is_some() {
            return Ok(());
        }
        let descriptor = self
            .descriptors
            .get(&self.role)
            .ok_or_else(|| GateError::DeviceMisconfigured(self.role.clone()))?;
        let device = self.opener.open(descriptor)?;
        info!(role = %self.role, path = ?descriptor.path, "capture device opened");
        *slot = Some(device);
        Ok(())
    }

    // A panic inside a device read poisons the mutex; the slot itself is
    // still a valid Option, so keep serving.
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{PixelLayout, RawFrame};
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ------------------------------------------------------------------
    // Test doubles
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct Counters {
        opens: AtomicUsize,
        closes: AtomicUsize,
    }

    struct CountingCamera {
        role: String,
        counters: Arc<Counters>,
        empty: bool,
    }

    impl CaptureDevice for CountingCamera {
        fn role(&self) -> &str {
            &self.role
        }
        fn read_frame(&mut self) -> Result<Option<RawFrame>, GateError> {
            if self.empty {
                return Ok(None);
            }
            Ok(Some(RawFrame {
                width: 2,
                height: 2,
                layout: PixelLayout::Bgr24,
                data: vec![7u8; 12],
            }))
        }
        fn close(&mut self) {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingOpener {
        counters: Arc<Counters>,
        empty: bool,
        fail: bool,
    }

    impl DeviceOpener for CountingOpener {
        fn open(&self, d: &DeviceDescriptor) -> Result<Box<dyn CaptureDevice>, GateError> {
            if self.fail {
                return Err(GateError::DeviceUnavailable {
                    role: d.role.clone(),
                    details: "claimed by another process".to_string(),
                });
            }
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingCamera {
                role: d.role.clone(),
                counters: Arc::clone(&self.counters),
                empty: self.empty,
            }))
        }
    }

    fn manager(empty: bool, fail: bool) -> (CaptureManager, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let opener = CountingOpener {
            counters: Arc::clone(&counters),
            empty,
            fail,
        };
        let mgr = CaptureManager::new(
            "top",
            [DeviceDescriptor::simulated("top")],
            Arc::new(opener),
        );
        (mgr, counters)
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[test]
    fn nothing_is_opened_at_construction() {
        let (mgr, counters) = manager(false, false);
        assert!(!mgr.is_open());
        assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn ensure_open_is_idempotent() {
        let (mgr, counters) = manager(false, false);
        for _ in 0..5 {
            mgr.ensure_open().unwrap();
        }
        assert!(mgr.is_open());
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn capture_opens_lazily_and_reuses_handle() {
        let (mgr, counters) = manager(false, false);
        let png = mgr.capture_frame().unwrap();
        assert!(png.starts_with(b"\x89PNG"));
        mgr.capture_frame().unwrap();
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let (mgr, counters) = manager(false, false);
        mgr.release(); // never opened: no-op
        mgr.ensure_open().unwrap();
        mgr.release();
        mgr.release();
        assert!(!mgr.is_open());
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_descriptor_is_misconfigured() {
        let counters = Arc::new(Counters::default());
        let mgr = CaptureManager::new(
            "top",
            [DeviceDescriptor::simulated("wrist")],
            Arc::new(CountingOpener {
                counters,
                empty: false,
                fail: false,
            }),
        );
        assert_eq!(
            mgr.capture_frame().unwrap_err(),
            GateError::DeviceMisconfigured("top".to_string())
        );
    }

    #[test]
    fn open_failure_is_device_unavailable_and_leaves_slot_empty() {
        let (mgr, _) = manager(false, true);
        let err = mgr.ensure_open().unwrap_err();
        assert!(matches!(err, GateError::DeviceUnavailable { .. }));
        assert!(!mgr.is_open());
    }

    #[test]
    fn empty_read_is_capture_failed() {
        let (mgr, _) = manager(true, false);
        assert!(matches!(
            mgr.capture_frame(),
            Err(GateError::CaptureFailed(_))
        ));
        // The handle stays open; a failed read does not tear it down.
        assert!(mgr.is_open());
    }

    #[test]
    fn concurrent_first_captures_open_once() {
        let (mgr, counters) = manager(false, false);
        let mgr = Arc::new(mgr);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mgr = Arc::clone(&mgr);
                std::thread::spawn(move || mgr.capture_frame().map(|_| ()))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    }
}
