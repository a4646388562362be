//! [`Dispatcher`] – the request-facing side of the dispatch core.
//!
//! Every inbound tool call lands on one of four methods and leaves as a
//! structured response; errors are never surfaced as Rust errors here.
//!
//! | call | goes to | reply |
//! |------|---------|-------|
//! | [`capture`][Dispatcher::capture] | [`CaptureManager`] | [`CaptureResponse`] |
//! | [`execute_operation`][Dispatcher::execute_operation] | [`ExecutionArbiter`] | [`OperationResponse`] |
//! | [`record_observation`][Dispatcher::record_observation] | [`ObservationLog`] | [`ObservationResponse`] |
//! | [`shutdown`][Dispatcher::shutdown] | [`CaptureManager::release`] | – |
//!
//! Captures and operations take different locks, so an agent can look at
//! the table while the arm is moving. All blocking work (device reads,
//! runners, file writes) runs on `spawn_blocking` workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use armgate_hal::CaptureManager;
use armgate_kernel::ExecutionArbiter;
use armgate_memory::{Analysis, ObservationLog};
use armgate_types::{
    CaptureResponse, GateError, ObservationResponse, OperationParams, OperationResponse,
    StatusResponse,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Name of the capture tool advertised to the agent.
pub const CAPTURE_TOOL: &str = "capture_scene";

pub struct Dispatcher {
    camera: Arc<CaptureManager>,
    arbiter: ExecutionArbiter,
    log: Arc<ObservationLog>,
    accepting: AtomicBool,
    // Captures hold a read guard; shutdown takes the write guard so the
    // device is released only after in-flight captures have drained.
    captures: RwLock<()>,
}

impl Dispatcher {
    pub fn new(
        camera: Arc<CaptureManager>,
        arbiter: ExecutionArbiter,
        log: Arc<ObservationLog>,
    ) -> Self {
        Self {
            camera,
            arbiter,
            log,
            accepting: AtomicBool::new(true),
            captures: RwLock::new(()),
        }
    }

    pub fn arbiter(&self) -> &ExecutionArbiter {
        &self.arbiter
    }

    pub fn observation_log(&self) -> &ObservationLog {
        &self.log
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    // ── capture ──────────────────────────────────────────────────────────────

    /// Grab one frame and return it as base64 PNG.
    pub async fn capture(&self) -> CaptureResponse {
        match self.capture_png().await {
            Ok(png) => CaptureResponse::success(STANDARD.encode(png)),
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "capture failed");
                CaptureResponse::error(&e)
            }
        }
    }

    /// Raw PNG bytes of one frame.
    ///
    /// # Errors
    ///
    /// [`GateError::ShuttingDown`] after [`shutdown`][Self::shutdown], or
    /// whatever [`CaptureManager::capture_frame`] reports.
    pub async fn capture_png(&self) -> Result<Vec<u8>, GateError> {
        let _active = self.captures.read().await;
        if !self.is_accepting() {
            return Err(GateError::ShuttingDown);
        }
        let camera = Arc::clone(&self.camera);
        tokio::task::spawn_blocking(move || camera.capture_frame())
            .await
            .map_err(|e| GateError::CaptureFailed(format!("capture worker failed: {e}")))?
    }

    // ── operations ───────────────────────────────────────────────────────────

    /// Run a registered operation to completion. Waits behind any operation
    /// already in flight.
    pub async fn execute_operation(&self, name: &str, params: &OperationParams) -> OperationResponse {
        match self.arbiter.execute(name, params).await {
            Ok(result) => OperationResponse::completed(name, result),
            Err(e) => OperationResponse::error(name, &e),
        }
    }

    // ── observations ─────────────────────────────────────────────────────────

    /// Persist a base64 image together with its analysis and index it in
    /// the master log.
    pub async fn record_observation(
        &self,
        image_b64: &str,
        analysis_status: &str,
        analysis_description: &str,
        operation: Option<&str>,
    ) -> ObservationResponse {
        match self
            .store_observation(image_b64, analysis_status, analysis_description, operation)
            .await
        {
            Ok(key) => ObservationResponse::success(key),
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "observation not recorded");
                ObservationResponse::error(&e)
            }
        }
    }

    async fn store_observation(
        &self,
        image_b64: &str,
        analysis_status: &str,
        analysis_description: &str,
        operation: Option<&str>,
    ) -> Result<String, GateError> {
        let image = STANDARD
            .decode(image_b64.trim())
            .map_err(|e| GateError::InvalidImage(e.to_string()))?;
        if image.is_empty() {
            return Err(GateError::InvalidImage("empty image payload".to_string()));
        }

        let log = Arc::clone(&self.log);
        let analysis = Analysis::new(analysis_status, analysis_description);
        let operation = operation.map(str::to_string);
        let key = tokio::task::spawn_blocking(move || {
            log.observe(&image, &analysis, operation.as_deref())
        })
        .await
        .map_err(|e| GateError::PersistenceFailed(format!("observation worker failed: {e}")))??;
        Ok(key.to_string())
    }

    // ── lifecycle ────────────────────────────────────────────────────────────

    /// Stop accepting captures, wait for in-flight ones, release the device.
    /// Operations already running are left to finish on their own.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let _drained = self.captures.write().await;
        let camera = Arc::clone(&self.camera);
        if let Err(e) = tokio::task::spawn_blocking(move || camera.release()).await {
            warn!(error = %e, "capture device release did not complete");
        }
        info!(busy_with = ?self.arbiter.in_flight(), "dispatcher shut down");
    }

    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            status: "ok".to_string(),
            busy_with: self.arbiter.in_flight(),
            camera_open: self.camera.is_open(),
            accepting: self.is_accepting(),
        }
    }

    /// Function-tool descriptors for the conversational agent: the capture
    /// tool followed by one entry per registered operation.
    pub fn tool_definitions(&self) -> Vec<Value> {
        let capture = json!({
            "type": "function",
            "name": CAPTURE_TOOL,
            "description": format!(
                "Capture an image from the robot's {} camera to see the current state of \
                 the table, where objects are, or whether the last action worked.",
                self.camera.role()
            ),
            "parameters": {
                "type": "object",
                "properties": {},
                "required": [],
            },
        });

        std::iter::once(capture)
            .chain(self.arbiter.registry().iter().map(|op| {
                json!({
                    "type": "function",
                    "name": op.name(),
                    "description": op.description(),
                    "parameters": op.parameter_schema(),
                })
            }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armgate_hal::{DeviceDescriptor, SimOpener};
    use armgate_kernel::{
        OperationDescriptor, OperationRegistry, PolicyParams, RunnerError, SimulatedRunner,
    };
    use armgate_memory::MasterLogEntry;
    use armgate_types::{OperationStatus, ParamValue, ResponseStatus};
    use std::collections::HashSet;
    use std::time::{Duration, Instant};

    const UNIT: Duration = Duration::from_millis(100);

    struct Fixture {
        _dir: tempfile::TempDir,
        opener: SimOpener,
        dispatcher: Arc<Dispatcher>,
    }

    /// Sleeps one `UNIT` per second of `episode_time_s`.
    fn sleeping_runner(
        result: &'static str,
    ) -> Arc<dyn armgate_kernel::OperationRunner> {
        Arc::new(move |p: &PolicyParams| -> Result<String, RunnerError> {
            std::thread::sleep(UNIT.mul_f64(p.episode_time_s));
            Ok(result.to_string())
        })
    }

    fn fixture(registry: OperationRegistry) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let opener = SimOpener::default();
        let camera = Arc::new(CaptureManager::new(
            "top",
            [DeviceDescriptor::simulated("top")],
            Arc::new(opener.clone()),
        ));
        let log = Arc::new(ObservationLog::open(dir.path(), "gpt-4o").unwrap());
        let arbiter = ExecutionArbiter::new(Arc::new(registry));
        Fixture {
            _dir: dir,
            opener,
            dispatcher: Arc::new(Dispatcher::new(camera, arbiter, log)),
        }
    }

    fn pick_and_place_stub() -> OperationRegistry {
        OperationRegistry::slicing_workflow(|spec| {
            if spec.name == "run_pick_and_place" {
                sleeping_runner("done")
            } else {
                Arc::new(SimulatedRunner::new(spec.completion).with_time_scale(0.0))
            }
        })
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn executes_registered_operation_end_to_end() {
        let fx = fixture(pick_and_place_stub());
        let params = OperationParams::from([("episode_time_s".to_string(), ParamValue::Int(1))]);
        let start = Instant::now();
        let resp = fx
            .dispatcher
            .execute_operation("run_pick_and_place", &params)
            .await;
        // One unit, not the 25-unit default.
        let elapsed = start.elapsed();
        assert!(elapsed >= UNIT);
        assert!(elapsed < UNIT * 10, "default episode time was used: {elapsed:?}");
        assert_eq!(resp.status, OperationStatus::Completed);
        assert_eq!(resp.operation_name, "run_pick_and_place");
        assert_eq!(resp.result.as_deref(), Some("done"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unknown_operation_is_an_error_response() {
        let fx = fixture(pick_and_place_stub());
        let resp = fx
            .dispatcher
            .execute_operation("run_dance", &OperationParams::new())
            .await;
        assert_eq!(resp.status, OperationStatus::Error);
        assert_eq!(resp.message.as_deref(), Some("Unknown operation run_dance"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn invalid_parameters_are_an_error_response() {
        let fx = fixture(pick_and_place_stub());
        let params = OperationParams::from([("num_episodes".to_string(), ParamValue::Int(0))]);
        let resp = fx
            .dispatcher
            .execute_operation("run_pick_and_place", &params)
            .await;
        assert_eq!(resp.status, OperationStatus::Error);
        assert!(resp.message.unwrap().contains("num_episodes"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn capture_is_not_blocked_by_running_operation() {
        let slow: Arc<dyn armgate_kernel::OperationRunner> =
            Arc::new(|_: &PolicyParams| -> Result<String, RunnerError> {
                std::thread::sleep(Duration::from_secs(2));
                Ok("slow".to_string())
            });
        let registry = OperationRegistry::builder()
            .register(OperationDescriptor::new(
                "run_slow",
                "slow",
                PolicyParams {
                    model_id: "m".to_string(),
                    num_episodes: 1,
                    episode_time_s: 1.0,
                    task_description: "t".to_string(),
                },
                slow,
            ))
            .build()
            .unwrap();
        let fx = fixture(registry);

        let d = Arc::clone(&fx.dispatcher);
        let running = tokio::spawn(async move {
            d.execute_operation("run_slow", &OperationParams::new()).await
        });
        while fx.dispatcher.status().busy_with.is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let start = Instant::now();
        let resp = fx.dispatcher.capture().await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(resp.status, ResponseStatus::Success);
        let png = STANDARD.decode(resp.image.unwrap()).unwrap();
        assert!(png.starts_with(b"\x89PNG"));
        assert_eq!(fx.dispatcher.status().busy_with.as_deref(), Some("run_slow"));

        assert_eq!(running.await.unwrap().status, OperationStatus::Completed);
        assert!(fx.dispatcher.status().busy_with.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_captures_open_device_once() {
        let fx = fixture(pick_and_place_stub());
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let d = Arc::clone(&fx.dispatcher);
                tokio::spawn(async move { d.capture().await })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap().status, ResponseStatus::Success);
        }
        assert_eq!(fx.opener.open_count(), 1);
        assert!(fx.dispatcher.status().camera_open);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_observations_get_distinct_keys() {
        let fx = fixture(pick_and_place_stub());
        let image = STANDARD.encode(b"\x89PNG fake");
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let d = Arc::clone(&fx.dispatcher);
                let image = image.clone();
                tokio::spawn(async move {
                    d.record_observation(&image, "success", &format!("frame {i}"), None)
                        .await
                })
            })
            .collect();

        let mut keys = HashSet::new();
        for h in handles {
            let resp = h.await.unwrap();
            assert_eq!(resp.status, ResponseStatus::Success);
            keys.insert(resp.timestamp_key.unwrap());
        }
        assert_eq!(keys.len(), 5);

        let raw = std::fs::read_to_string(fx.dispatcher.observation_log().master_log_path()).unwrap();
        let lines: Vec<MasterLogEntry> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 5);
    }

    #[tokio::test]
    async fn bad_base64_is_rejected() {
        let fx = fixture(pick_and_place_stub());
        let resp = fx
            .dispatcher
            .record_observation("not base64!!", "success", "x", None)
            .await;
        assert_eq!(resp.status, ResponseStatus::Error);
        assert!(resp.message.unwrap().starts_with("Invalid image payload"));

        let empty = fx.dispatcher.record_observation("", "success", "x", None).await;
        assert_eq!(empty.status, ResponseStatus::Error);
    }

    #[tokio::test]
    async fn shutdown_releases_camera_and_refuses_captures() {
        let fx = fixture(pick_and_place_stub());
        assert_eq!(fx.dispatcher.capture().await.status, ResponseStatus::Success);
        assert!(fx.dispatcher.status().camera_open);

        fx.dispatcher.shutdown().await;
        let status = fx.dispatcher.status();
        assert!(!status.camera_open);
        assert!(!status.accepting);

        let resp = fx.dispatcher.capture().await;
        assert_eq!(resp.status, ResponseStatus::Error);
        assert_eq!(
            resp.message.as_deref(),
            Some("Camera capture error: Dispatcher is shutting down")
        );
        assert_eq!(fx.opener.open_count(), 1);

        // Idempotent.
        fx.dispatcher.shutdown().await;
    }

    #[test]
    fn tool_definitions_list_capture_then_operations() {
        let fx = fixture(pick_and_place_stub());
        let tools = fx.dispatcher.tool_definitions();
        let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(
            names,
            vec![
                "capture_scene",
                "run_pick_and_place",
                "run_transfer_slices",
                "run_use_slicer"
            ]
        );
        assert!(tools.iter().all(|t| t["type"] == "function"));
        assert_eq!(
            tools[3]["parameters"]["properties"]["episode_time_s"]["default"],
            35.0
        );
        assert!(tools[0]["description"].as_str().unwrap().contains("top camera"));
        assert_eq!(tools[0]["parameters"]["properties"], json!({}));
    }
}
