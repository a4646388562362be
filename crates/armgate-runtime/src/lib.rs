//! `armgate-runtime` – request dispatch and process plumbing.
//!
//! # Modules
//!
//! - [`dispatcher`] – [`Dispatcher`][dispatcher::Dispatcher]: turns
//!   inbound tool calls into capture, operation and observation requests and
//!   formats the structured replies. Also publishes the agent-facing tool
//!   descriptors and a status snapshot.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber, optionally exporting spans over OTLP when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

pub mod dispatcher;
pub mod telemetry;

pub use dispatcher::{CAPTURE_TOOL, Dispatcher};
