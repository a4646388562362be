//! `armgate-cli` – operator shell for the arm dispatch core.
//!
//! 1. Loads `~/.armgate/config.toml`, running a short first-run setup when
//!    the file is absent.
//! 2. Builds the [`Dispatcher`]: capture manager, operation registry with a
//!    runner per operation, execution arbiter and observation log.
//! 3. Drops the operator into a REPL (`/help` lists commands).
//! 4. On `/quit` or Ctrl-C stops accepting captures and releases the camera.
//!    An operation already moving the arm is allowed to finish.

mod config;
mod repl;

use armgate_hal::{CaptureManager, DeviceNodeOpener};
use armgate_kernel::{
    CommandRunner, ExecutionArbiter, OperationRegistry, OperationRunner, OperationSpec,
    SimulatedRunner,
};
use armgate_memory::ObservationLog;
use armgate_runtime::{Dispatcher, telemetry};
use armgate_types::GateError;
use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use crate::config::Config;

fn main() {
    let _telemetry = telemetry::init_tracing("armgate");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_setup(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            Config::default()
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    let dispatcher = match build_dispatcher(&cfg) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            eprintln!("{}: {}", "Startup failed".red(), e);
            std::process::exit(1);
        }
    };
    print_summary(&cfg, &dispatcher);

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – press Enter to finish shutting down …"
                .yellow()
                .bold()
        );
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    repl::run(&dispatcher, runtime.handle(), shutdown);

    runtime.block_on(dispatcher.shutdown());
    if let Some(op) = dispatcher.status().busy_with {
        println!(
            "  {} waiting for {} to finish before exiting …",
            "…".yellow(),
            op.bold()
        );
    }
    // Dropping the runtime waits for blocking workers, so a running
    // operation completes before the process exits.
    drop(runtime);
    println!("{}", "  ✓ ArmGate stopped.".green());
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

/// External program when one is configured for `spec`, the simulator
/// otherwise.
fn runner_for(cfg: &Config, spec: &OperationSpec) -> Arc<dyn OperationRunner> {
    match cfg
        .command_for(spec.name)
        .and_then(|argv| CommandRunner::from_argv(argv, spec.completion))
    {
        Some(runner) => Arc::new(runner),
        None => Arc::new(SimulatedRunner::new(spec.completion).with_time_scale(cfg.sim_time_scale)),
    }
}

fn build_dispatcher(cfg: &Config) -> Result<Dispatcher, GateError> {
    let registry = OperationRegistry::slicing_workflow(|spec| runner_for(cfg, spec))?;
    for name in cfg.operations.keys() {
        if registry.resolve(name).is_none() {
            warn!(operation = %name, "configured operation is not registered; ignoring");
        }
    }

    let camera = Arc::new(CaptureManager::new(
        cfg.capture_role.as_str(),
        cfg.device_descriptors(),
        Arc::new(DeviceNodeOpener),
    ));
    let log = Arc::new(ObservationLog::open(&cfg.log_dir, cfg.vision_model.as_str())?);
    info!(
        operations = registry.len(),
        log_dir = %cfg.log_dir.display(),
        "dispatcher ready"
    );
    Ok(Dispatcher::new(
        camera,
        ExecutionArbiter::new(Arc::new(registry)),
        log,
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// First-run setup
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_setup() -> Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║        ArmGate First-Run Setup       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found. Press Enter to accept a default.\n");

    let mut cfg = Config::default();

    let log_dir = prompt_line(
        &format!("  Observation log directory [{}]: ", cfg.log_dir.display()),
        &cfg.log_dir.to_string_lossy(),
    );
    cfg.log_dir = log_dir.into();

    let device = prompt_line(
        &format!("  Raw frame device for the {} camera (blank = simulated): ", cfg.capture_role),
        "",
    );
    if !device.is_empty() {
        let width = prompt_line("  Frame width [640]: ", "640").parse().unwrap_or(640);
        let height = prompt_line("  Frame height [480]: ", "480").parse().unwrap_or(480);
        let camera = cfg.cameras.entry(cfg.capture_role.clone()).or_default();
        camera.path = Some(device);
        camera.width = Some(width);
        camera.height = Some(height);
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    _                  ___       _       "#.bold().cyan());
    println!("{}", r#"   /_\  _ _ _ __  ___ / __|__ _ | |_ ___ "#.bold().cyan());
    println!("{}", r#"  / _ \| '_| '  \|___| (_ / _` ||  _/ -_)"#.bold().cyan());
    println!("{}", r#" /_/ \_\_| |_|_|_|     \___\__,_| \__\___|"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "ArmGate".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Command dispatch for a tabletop robot arm");
    println!();
}

fn print_summary(cfg: &Config, dispatcher: &Dispatcher) {
    let ops = dispatcher.arbiter().registry();
    println!("  Capture role : {}", cfg.capture_role.yellow());
    println!("  Vision logs  : {}", cfg.log_dir.display().to_string().yellow());
    for op in ops.iter() {
        let mode = if cfg.command_for(op.name()).is_some() {
            "external".green()
        } else {
            format!("simulated x{}", cfg.sim_time_scale).dimmed()
        };
        println!("  {:<20} {}", op.name().bold(), mode);
    }
    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{msg}");
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armgate_types::{OperationParams, OperationStatus, ResponseStatus};

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            log_dir: dir.join("vision_logs"),
            sim_time_scale: 0.0,
            ..Config::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn default_config_wires_simulated_workcell() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = build_dispatcher(&test_config(dir.path())).unwrap();

        assert_eq!(
            dispatcher.arbiter().registry().names(),
            vec!["run_pick_and_place", "run_transfer_slices", "run_use_slicer"]
        );

        let resp = dispatcher
            .execute_operation("run_transfer_slices", &OperationParams::new())
            .await;
        assert_eq!(resp.status, OperationStatus::Completed);
        assert_eq!(resp.result.as_deref(), Some("COMPLETED: Transfer finished."));

        let capture = dispatcher.capture().await;
        assert_eq!(capture.status, ResponseStatus::Success);
        dispatcher.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn configured_command_replaces_simulator() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.operations.insert(
            "run_use_slicer".to_string(),
            config::OperationConfig {
                command: vec!["false".to_string()],
            },
        );
        let dispatcher = build_dispatcher(&cfg).unwrap();

        let resp = dispatcher
            .execute_operation("run_use_slicer", &OperationParams::new())
            .await;
        assert_eq!(resp.status, OperationStatus::Error);
        assert!(resp.message.unwrap().starts_with("Operation run_use_slicer failed"));

        let resp = dispatcher
            .execute_operation("run_pick_and_place", &OperationParams::new())
            .await;
        assert_eq!(resp.status, OperationStatus::Completed);
    }

    #[test]
    fn unwritable_log_dir_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let cfg = Config {
            log_dir: blocker.join("logs"),
            ..Config::default()
        };
        assert!(matches!(
            build_dispatcher(&cfg),
            Err(GateError::PersistenceFailed(_))
        ));
    }
}
