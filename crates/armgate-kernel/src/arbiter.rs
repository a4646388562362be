//! [`ExecutionArbiter`] – at most one physical operation in flight.
//!
//! [`ExecutionArbiter::execute`] is the only path from a request to the arm:
//!
//! 1. **Resolve** the name in the [`OperationRegistry`] and validate the
//!    parameters. Unknown names and bad parameters fail here, before the
//!    lock is touched, so a malformed request never waits behind a motion.
//! 2. **Acquire** the process-wide execution lock. `tokio::sync::Mutex` hands
//!    the lock out in arrival order; there is no priority and no timeout.
//! 3. **Run** the operation on a blocking worker via
//!    [`tokio::task::spawn_blocking`]. The lock guard moves into the worker,
//!    so it stays held until the runner returns even if the caller stops
//!    waiting.
//! 4. **Release** when the worker finishes, on success, failure or panic.
//! 5. **Translate** runner failures and panics into
//!    [`GateError::OperationFailed`].
//!
//! There is deliberately no way to abort a running operation: an arm should
//! not be stopped mid-stroke by a dropped request. A runner that never
//! returns holds the lock forever.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use armgate_kernel::{ExecutionArbiter, OperationRegistry, SimulatedRunner};
//! use armgate_types::OperationParams;
//!
//! # tokio_test::block_on(async {
//! let registry = OperationRegistry::slicing_workflow(|spec| {
//!     Arc::new(SimulatedRunner::new(spec.completion).with_time_scale(0.0))
//! })
//! .unwrap();
//! let arbiter = ExecutionArbiter::new(Arc::new(registry));
//!
//! let out = arbiter
//!     .execute("run_pick_and_place", &OperationParams::new())
//!     .await
//!     .unwrap();
//! assert_eq!(out, "COMPLETED: Pick and place finished.");
//! # });
//! ```

use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Instant;

use armgate_types::{GateError, OperationParams};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};

use crate::registry::OperationRegistry;

type InFlight = Arc<StdMutex<Option<String>>>;

/// Proof of holding the execution lock. Records the running operation's
/// name while alive and clears it on drop, before the lock is released.
struct ExecutionTicket {
    _guard: OwnedMutexGuard<()>,
    in_flight: InFlight,
}

impl ExecutionTicket {
    fn new(guard: OwnedMutexGuard<()>, in_flight: InFlight, name: &str) -> Self {
        *lock_name(&in_flight) = Some(name.to_string());
        Self {
            _guard: guard,
            in_flight,
        }
    }
}

impl Drop for ExecutionTicket {
    fn drop(&mut self) {
        *lock_name(&self.in_flight) = None;
    }
}

fn lock_name(slot: &InFlight) -> MutexGuard<'_, Option<String>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serialises every actuator operation through one lock.
///
/// Cheap to clone; clones share the lock and the registry.
#[derive(Clone)]
pub struct ExecutionArbiter {
    registry: Arc<OperationRegistry>,
    lock: Arc<Mutex<()>>,
    in_flight: InFlight,
}

impl ExecutionArbiter {
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        Self {
            registry,
            lock: Arc::new(Mutex::new(())),
            in_flight: Arc::new(StdMutex::new(None)),
        }
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Name of the operation currently holding the lock, if any.
    pub fn in_flight(&self) -> Option<String> {
        lock_name(&self.in_flight).clone()
    }

    /// Resolve, wait for the lock, run, release.
    ///
    /// # Errors
    ///
    /// - [`GateError::UnknownOperation`] – name not registered (lock untouched).
    /// - [`GateError::InvalidParameters`] – schema violation (lock untouched).
    /// - [`GateError::OperationFailed`] – the runner failed or panicked.
    #[instrument(skip(self, params), fields(operation = %name))]
    pub async fn execute(&self, name: &str, params: &OperationParams) -> Result<String, GateError> {
        let descriptor = self
            .registry
            .resolve(name)
            .ok_or_else(|| GateError::UnknownOperation(name.to_string()))?;
        let resolved = descriptor.resolve_params(params)?;
        let runner = descriptor.runner();

        let queued = Instant::now();
        let guard = Arc::clone(&self.lock).lock_owned().await;
        let ticket = ExecutionTicket::new(guard, Arc::clone(&self.in_flight), name);
        info!(
            waited_ms = queued.elapsed().as_millis() as u64,
            episodes = resolved.num_episodes,
            episode_time_s = resolved.episode_time_s,
            "execution lock acquired"
        );

        let started = Instant::now();
        let outcome = tokio::task::spawn_blocking(move || {
            let _ticket = ticket;
            runner.run(&resolved)
        })
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let message = match outcome {
            Ok(Ok(result)) => {
                info!(elapsed_ms, "operation completed");
                return Ok(result);
            }
            Ok(Err(e)) => e.to_string(),
            Err(join) if join.is_panic() => "operation panicked".to_string(),
            Err(join) => format!("operation worker cancelled: {join}"),
        };

        let err = GateError::OperationFailed {
            operation: name.to_string(),
            message,
        };
        warn!(elapsed_ms, kind = err.kind(), error = %err, "operation failed");
        Err(err)
    }
}
