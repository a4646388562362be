//! REPL – the operator shell.
//!
//! Supported slash-commands:
//!   /help                        – show this list
//!   /status                      – busy / camera / accepting snapshot
//!   /ops                         – registered operations and their defaults
//!   /tools                       – tool descriptors handed to the agent
//!   /capture [file]              – save one frame as PNG
//!   /run <op> [key=value ...]    – run an operation in the background
//!   /observe <status> [op=<name>] <text>
//!                                – capture a frame and log it with an analysis
//!   /quit | /exit                – stop accepting requests and exit

use armgate_runtime::Dispatcher;
use armgate_types::{OperationParams, OperationStatus, ParamValue, ResponseStatus};
use colored::Colorize;
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;

/// A parsed shell line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Status,
    Ops,
    Tools,
    Capture(Option<PathBuf>),
    Run {
        operation: String,
        params: OperationParams,
    },
    Observe {
        status: String,
        operation: Option<String>,
        description: String,
    },
    Quit,
}

/// Parse one line. `Err` carries a message for the operator.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    match head {
        "/help" => Ok(Command::Help),
        "/status" => Ok(Command::Status),
        "/ops" => Ok(Command::Ops),
        "/tools" => Ok(Command::Tools),
        "/capture" => Ok(Command::Capture(words.next().map(PathBuf::from))),
        "/run" => {
            let operation = words
                .next()
                .ok_or_else(|| "usage: /run <op> [key=value ...]".to_string())?
                .to_string();
            let params = words.map(parse_param).collect::<Result<_, _>>()?;
            Ok(Command::Run { operation, params })
        }
        "/observe" => {
            let usage = || "usage: /observe <status> [op=<name>] <text>".to_string();
            let status = words.next().ok_or_else(usage)?.to_string();
            let mut rest: Vec<&str> = words.collect();
            let operation = rest
                .first()
                .and_then(|w| w.strip_prefix("op="))
                .filter(|op| !op.is_empty())
                .map(str::to_string);
            if operation.is_some() {
                rest.remove(0);
            }
            if rest.is_empty() {
                return Err(usage());
            }
            Ok(Command::Observe {
                status,
                operation,
                description: rest.join(" "),
            })
        }
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("Unknown command '{other}'")),
    }
}

/// `key=value`; integers and floats are typed, anything else is a string.
fn parse_param(pair: &str) -> Result<(String, ParamValue), String> {
    let (key, value) = pair
        .split_once('=')
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{pair}'"))?;
    let value = if let Ok(n) = value.parse::<i64>() {
        ParamValue::Int(n)
    } else if let Ok(f) = value.parse::<f64>() {
        ParamValue::Float(f)
    } else {
        ParamValue::Str(value.to_string())
    };
    Ok((key.to_string(), value))
}

/// Entry point for the interactive shell.
///
/// `shutdown` is polled each iteration; when set the shell exits. Operations
/// started with `/run` keep running on `handle` after the prompt returns.
pub fn run(dispatcher: &Arc<Dispatcher>, handle: &Handle, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "armgate>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Ok(Command::Help) => cmd_help(),
            Ok(Command::Status) => print_json(&dispatcher.status()),
            Ok(Command::Ops) => cmd_ops(dispatcher),
            Ok(Command::Tools) => print_json(&dispatcher.tool_definitions()),
            Ok(Command::Capture(path)) => cmd_capture(dispatcher, handle, path),
            Ok(Command::Run { operation, params }) => {
                cmd_run(dispatcher, handle, operation, params)
            }
            Ok(Command::Observe {
                status,
                operation,
                description,
            }) => cmd_observe(dispatcher, handle, &status, operation.as_deref(), &description),
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Err(msg) => println!(
                "{} Type {} for available commands.",
                msg.red(),
                "/help".bold()
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "ArmGate Commands".bold().underline());
    println!("  {}                      – execution and camera state", "/status".bold().cyan());
    println!("  {}                         – registered operations", "/ops".bold().cyan());
    println!("  {}                       – agent tool descriptors", "/tools".bold().cyan());
    println!("  {}              – save one frame as PNG", "/capture [file]".bold().cyan());
    println!("  {}    – run an operation in the background", "/run <op> [key=value ...]".bold().cyan());
    println!("  {} – capture and log an observation", "/observe <status> [op=<name>] <text>".bold().cyan());
    println!("  {}                 – exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_ops(dispatcher: &Dispatcher) {
    println!("{}", "Operations".bold().underline());
    for op in dispatcher.arbiter().registry().iter() {
        let d = op.defaults();
        println!("  {}", op.name().bold().cyan());
        println!("    {}", op.description().dimmed());
        println!(
            "    model_id={} num_episodes={} episode_time_s={}",
            d.model_id.yellow(),
            d.num_episodes,
            d.episode_time_s
        );
        println!("    task_description=\"{}\"", d.task_description);
    }
}

fn cmd_capture(dispatcher: &Dispatcher, handle: &Handle, path: Option<PathBuf>) {
    let path = path.unwrap_or_else(|| {
        PathBuf::from(format!(
            "capture_{}.png",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ))
    });
    match handle.block_on(dispatcher.capture_png()) {
        Ok(png) => match std::fs::write(&path, &png) {
            Ok(()) => println!(
                "{} {} ({} bytes)",
                "✓ Saved".green(),
                path.display().to_string().bold(),
                png.len()
            ),
            Err(e) => println!("{}: {}", "Error writing image".red(), e),
        },
        Err(e) => println!("{}: {}", "Capture failed".red(), e),
    }
}

fn cmd_run(dispatcher: &Arc<Dispatcher>, handle: &Handle, operation: String, params: OperationParams) {
    if let Some(busy) = dispatcher.status().busy_with {
        println!("  {} {} is running; queued behind it.", "…".yellow(), busy.bold());
    } else {
        println!("  {} {}", "▶ Starting".green(), operation.bold());
    }
    let dispatcher = Arc::clone(dispatcher);
    handle.spawn(async move {
        let resp = dispatcher.execute_operation(&operation, &params).await;
        match resp.status {
            OperationStatus::Completed => println!(
                "\n  {} {}: {}",
                "✓".green().bold(),
                resp.operation_name.bold(),
                resp.result.unwrap_or_default()
            ),
            OperationStatus::Error => println!(
                "\n  {} {}",
                "✗".red().bold(),
                resp.message.unwrap_or_default().red()
            ),
        }
    });
}

fn cmd_observe(
    dispatcher: &Dispatcher,
    handle: &Handle,
    status: &str,
    operation: Option<&str>,
    description: &str,
) {
    let capture = handle.block_on(dispatcher.capture());
    let Some(image) = capture.image else {
        println!("{}", capture.message.unwrap_or_default().red());
        return;
    };
    let resp = handle.block_on(dispatcher.record_observation(&image, status, description, operation));
    match resp.status {
        ResponseStatus::Success => println!(
            "{} {}",
            "✓ Logged observation".green(),
            resp.timestamp_key.unwrap_or_default().bold()
        ),
        ResponseStatus::Error => println!("{}", resp.message.unwrap_or_default().red()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => println!("{}: {}", "Serialization error".red(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse_command("/help"), Ok(Command::Help));
        assert_eq!(parse_command("/status"), Ok(Command::Status));
        assert_eq!(parse_command("/exit"), Ok(Command::Quit));
        assert_eq!(parse_command("/capture"), Ok(Command::Capture(None)));
        assert_eq!(
            parse_command("/capture table.png"),
            Ok(Command::Capture(Some(PathBuf::from("table.png"))))
        );
    }

    #[test]
    fn run_params_are_typed() {
        let cmd = parse_command(
            "/run run_use_slicer num_episodes=2 episode_time_s=12.5 model_id=lab/slicer_v2",
        )
        .unwrap();
        let Command::Run { operation, params } = cmd else {
            panic!("expected run");
        };
        assert_eq!(operation, "run_use_slicer");
        assert_eq!(params["num_episodes"], ParamValue::Int(2));
        assert_eq!(params["episode_time_s"], ParamValue::Float(12.5));
        assert_eq!(params["model_id"], ParamValue::Str("lab/slicer_v2".to_string()));
    }

    #[test]
    fn run_rejects_malformed_input() {
        assert!(parse_command("/run").is_err());
        assert!(parse_command("/run run_use_slicer episodes").is_err());
        assert!(parse_command("/run run_use_slicer =3").is_err());
    }

    #[test]
    fn observe_takes_optional_operation() {
        assert_eq!(
            parse_command("/observe success op=run_use_slicer carrot sliced into 6 pieces"),
            Ok(Command::Observe {
                status: "success".to_string(),
                operation: Some("run_use_slicer".to_string()),
                description: "carrot sliced into 6 pieces".to_string(),
            })
        );
        assert_eq!(
            parse_command("/observe failure board is empty"),
            Ok(Command::Observe {
                status: "failure".to_string(),
                operation: None,
                description: "board is empty".to_string(),
            })
        );
        assert!(parse_command("/observe success").is_err());
        assert!(parse_command("/observe success op=run_use_slicer").is_err());
    }

    #[test]
    fn unknown_command_is_reported() {
        assert_eq!(
            parse_command("/dance"),
            Err("Unknown command '/dance'".to_string())
        );
    }
}
