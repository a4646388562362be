//! Operation runners – the opaque units that actually drive the arm.
//!
//! A runner is blocking: it returns only once the physical motion is over.
//! The [`ExecutionArbiter`][crate::arbiter::ExecutionArbiter] always calls it
//! from a blocking worker thread while holding the execution lock.
//!
//! Two runners ship with the crate:
//! - [`SimulatedRunner`] sleeps for the requested episode time and reports
//!   success; used on the bench and in CI.
//! - [`CommandRunner`] launches an external inference program and waits for
//!   it to exit.

use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::registry::PolicyParams;

/// How much of a failing program's stderr is kept in the error message.
const STDERR_TAIL_CHARS: usize = 500;

/// Failures raised by a runner. The arbiter wraps them into
/// [`GateError::OperationFailed`][armgate_types::GateError::OperationFailed].
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{0}")]
    Fault(String),
}

/// A blocking, long-running physical operation.
pub trait OperationRunner: Send + Sync {
    /// Run to completion and return a human-readable result.
    fn run(&self, params: &PolicyParams) -> Result<String, RunnerError>;
}

impl<F> OperationRunner for F
where
    F: Fn(&PolicyParams) -> Result<String, RunnerError> + Send + Sync,
{
    fn run(&self, params: &PolicyParams) -> Result<String, RunnerError> {
        self(params)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SimulatedRunner
// ─────────────────────────────────────────────────────────────────────────────

/// Stands in for the arm: sleeps `num_episodes * episode_time_s * time_scale`
/// seconds, then reports `completion`.
#[derive(Debug, Clone)]
pub struct SimulatedRunner {
    completion: String,
    time_scale: f64,
}

impl SimulatedRunner {
    pub fn new(completion: impl Into<String>) -> Self {
        Self {
            completion: completion.into(),
            time_scale: 1.0,
        }
    }

    /// Scale simulated durations, e.g. `0.01` to run a 25 s episode in 250 ms.
    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = time_scale;
        self
    }

    pub fn duration_for(&self, params: &PolicyParams) -> Result<Duration, RunnerError> {
        let secs = f64::from(params.num_episodes) * params.episode_time_s * self.time_scale;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| RunnerError::Fault(format!("invalid simulated duration {secs}: {e}")))
    }
}

impl OperationRunner for SimulatedRunner {
    fn run(&self, params: &PolicyParams) -> Result<String, RunnerError> {
        let duration = self.duration_for(params)?;
        info!(
            model_id = %params.model_id,
            episodes = params.num_episodes,
            duration_ms = duration.as_millis() as u64,
            "simulated run started"
        );
        thread::sleep(duration);
        Ok(self.completion.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CommandRunner
// ─────────────────────────────────────────────────────────────────────────────

/// Runs an external inference program, passing the resolved parameters as
/// flags:
///
/// ```text
/// <program> <args..> --model-id <id> --num-episodes <n> --episode-time-s <t> --task <text>
/// ```
///
/// Exit status 0 reports `completion`; anything else is a failure carrying
/// the tail of stderr.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    args: Vec<String>,
    completion: String,
}

impl CommandRunner {
    /// Build from an argv vector. Returns `None` when `argv` is empty.
    pub fn from_argv(argv: &[String], completion: impl Into<String>) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            completion: completion.into(),
        })
    }

    /// Full argument list for one invocation.
    pub fn command_args(&self, params: &PolicyParams) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend([
            "--model-id".to_string(),
            params.model_id.clone(),
            "--num-episodes".to_string(),
            params.num_episodes.to_string(),
            "--episode-time-s".to_string(),
            params.episode_time_s.to_string(),
            "--task".to_string(),
            params.task_description.clone(),
        ]);
        args
    }
}

impl OperationRunner for CommandRunner {
    fn run(&self, params: &PolicyParams) -> Result<String, RunnerError> {
        let args = self.command_args(params);
        debug!(program = %self.program, ?args, "launching inference program");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| RunnerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(self.completion.clone());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let trimmed = stderr.trim();
        let skip = trimmed.chars().count().saturating_sub(STDERR_TAIL_CHARS);
        Err(RunnerError::Exit {
            program: self.program.clone(),
            status: output.status.to_string(),
            stderr: trimmed.chars().skip(skip).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn params(episodes: u32, secs: f64) -> PolicyParams {
        PolicyParams {
            model_id: "m".to_string(),
            num_episodes: episodes,
            episode_time_s: secs,
            task_description: "slice".to_string(),
        }
    }

    #[test]
    fn simulated_runner_scales_duration() {
        let runner = SimulatedRunner::new("ok").with_time_scale(0.01);
        let d = runner.duration_for(&params(2, 5.0)).unwrap();
        assert_eq!(d, Duration::from_millis(100));
    }

    #[test]
    fn simulated_runner_sleeps_and_reports_completion() {
        let runner = SimulatedRunner::new("COMPLETED: test").with_time_scale(0.001);
        let start = Instant::now();
        let out = runner.run(&params(1, 50.0)).unwrap();
        assert_eq!(out, "COMPLETED: test");
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn negative_scale_is_a_fault() {
        let runner = SimulatedRunner::new("ok").with_time_scale(-1.0);
        assert!(matches!(runner.run(&params(1, 1.0)), Err(RunnerError::Fault(_))));
    }

    #[test]
    fn command_args_append_parameters() {
        let argv = vec!["python".to_string(), "infer.py".to_string()];
        let runner = CommandRunner::from_argv(&argv, "done").unwrap();
        let args = runner.command_args(&params(2, 12.5));
        assert_eq!(
            args,
            vec![
                "infer.py",
                "--model-id",
                "m",
                "--num-episodes",
                "2",
                "--episode-time-s",
                "12.5",
                "--task",
                "slice"
            ]
        );
    }

    #[test]
    fn empty_argv_builds_nothing() {
        assert!(CommandRunner::from_argv(&[], "done").is_none());
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let argv = vec!["/nonexistent/armgate-policy".to_string()];
        let runner = CommandRunner::from_argv(&argv, "done").unwrap();
        assert!(matches!(runner.run(&params(1, 1.0)), Err(RunnerError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn command_exit_status_maps_to_result() {
        let ok = CommandRunner::from_argv(&["true".to_string()], "finished").unwrap();
        assert_eq!(ok.run(&params(1, 1.0)).unwrap(), "finished");

        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo motor overload >&2; exit 3".to_string(),
        ];
        let failing = CommandRunner::from_argv(&argv, "finished").unwrap();
        match failing.run(&params(1, 1.0)) {
            Err(RunnerError::Exit { stderr, .. }) => assert_eq!(stderr, "motor overload"),
            other => panic!("expected exit error, got {other:?}"),
        }
    }
}
