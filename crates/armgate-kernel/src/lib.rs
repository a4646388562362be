//! `armgate-kernel` – operation registry and execution arbitration.
//!
//! It does not move the arm itself; it decides which operation may run and
//! makes sure only one does at a time.
//!
//! # Modules
//!
//! - [`registry`] – [`OperationRegistry`][registry::OperationRegistry]: the
//!   fixed name → [`OperationDescriptor`][registry::OperationDescriptor]
//!   table, with parameter validation into
//!   [`PolicyParams`][registry::PolicyParams] and the built-in
//!   [`SLICING_WORKFLOW`][registry::SLICING_WORKFLOW] catalog.
//! - [`arbiter`] – [`ExecutionArbiter`][arbiter::ExecutionArbiter]: the
//!   single process-wide execution lock and the blocking-worker bridge.
//! - [`runner`] – [`OperationRunner`][runner::OperationRunner] plus the
//!   simulated and external-command runners.

pub mod arbiter;
pub mod registry;
pub mod runner;

pub use arbiter::ExecutionArbiter;
pub use registry::{
    OperationDescriptor, OperationRegistry, OperationSpec, PolicyParams, RegistryBuilder,
    SLICING_WORKFLOW,
};
pub use runner::{CommandRunner, OperationRunner, RunnerError, SimulatedRunner};
