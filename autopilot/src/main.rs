//! Autopilot CLI.
//!
//! Runs the agent loop in the foreground against Gemini. Confirmation prompts
//! are answered on stdin; closing stdin stops the run.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use autopilot::console::PromptTracker;
use autopilot::controller::{ControlError, RunController};
use autopilot::core::types::{Decision, RunStatus};
use autopilot::exit_codes;
use autopilot::io::config::load_config;
use autopilot::io::gemini::{GeminiFactory, list_models};
use autopilot::io::init::{AgentPaths, InitOptions, init_workspace};
use autopilot::io::transcript_log::load_transcript;
use autopilot::logging;
use autopilot::looping::RunEnvironment;
use autopilot::tools::sandbox::build_image;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(
    name = "autopilot",
    version,
    about = "Goal-driven coding agent with human confirmation"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.autopilot/` with a default config and empty documents.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the agent until it finishes or stdin is closed.
    Run {
        /// What the agent should accomplish.
        #[arg(short, long)]
        goal: String,
        /// Model identifier (defaults to the configured model).
        #[arg(short, long)]
        model: Option<String>,
        /// Skip confirmation prompts.
        #[arg(long)]
        auto_approve: bool,
    },
    /// Print a persisted transcript.
    Transcript {
        /// Run id, e.g. `run-20250101T120000Z`.
        run_id: String,
    },
    /// List models that support content generation.
    Models,
    /// Build the sandbox image from the configured Dockerfile.
    BuildSandbox,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run {
            goal,
            model,
            auto_approve,
        } => cmd_run(&root, &goal, model.as_deref(), auto_approve),
        Command::Transcript { run_id } => cmd_transcript(&root, &run_id),
        Command::Models => cmd_models(&root),
        Command::BuildSandbox => cmd_build_sandbox(&root),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<()> {
    let paths = init_workspace(root, &InitOptions { force })?;
    println!("Initialized {}", paths.agent_dir.display());
    Ok(())
}

fn cmd_run(root: &Path, goal: &str, model: Option<&str>, auto_approve: bool) -> Result<()> {
    if goal.trim().is_empty() {
        bail!("goal must not be empty");
    }
    let paths = AgentPaths::new(root);
    let config = load_config(&paths.config_path)?;
    let env = RunEnvironment::for_workspace(paths.clone(), &config)?;
    let factory = Arc::new(GeminiFactory::new(&config));
    let controller = RunController::with_config(env, factory, &config);

    let started = controller.start(goal, model, auto_approve.then_some(true))?;
    println!("Started {}", started.run_id);

    let lines = spawn_stdin_reader();
    let mut stdin_open = true;
    let mut last_output = String::new();
    let mut prompts = PromptTracker::new();

    loop {
        let state = controller.status();
        if state.last_tool_output != last_output {
            println!("{}", state.last_tool_output);
            last_output = state.last_tool_output.clone();
        }
        if matches!(state.status, RunStatus::Stopped | RunStatus::Idle) {
            break;
        }
        if let Some(prompt) = prompts.observe(&state) {
            print!("{prompt} [y/n] ");
            std::io::stdout().flush().context("flush stdout")?;
        }

        if !stdin_open {
            thread::sleep(POLL_INTERVAL);
            continue;
        }
        match lines.recv_timeout(POLL_INTERVAL) {
            Ok(line) => {
                if prompts.awaiting().is_none() {
                    eprintln!("No confirmation is pending; input ignored.");
                    continue;
                }
                match line.parse::<Decision>() {
                    Ok(decision) => {
                        prompts.answer(&controller, decision)?;
                    }
                    Err(err) => eprintln!("{err}"),
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                stdin_open = false;
                println!("stdin closed; stopping run");
                match controller.stop() {
                    Ok(outcome) if !outcome.joined => {
                        eprintln!("warning: loop thread did not stop in time");
                    }
                    Ok(_) | Err(ControlError::NotRunning) => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
    }

    let state = controller.status();
    let run_id = state.run_id.unwrap_or_default();
    println!(
        "Run {run_id} {} after {} iteration(s){}",
        state.status,
        state.iteration,
        if state.completed { " (task complete)" } else { "" }
    );
    println!("Transcript: {}", paths.transcript_path(&run_id).display());
    Ok(())
}

/// Forward stdin lines on a channel; the sender drops at EOF.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn cmd_transcript(root: &Path, run_id: &str) -> Result<()> {
    let path: PathBuf = AgentPaths::new(root).transcript_path(run_id);
    let transcript = load_transcript(&path)?;
    let payload =
        serde_json::to_string_pretty(&transcript.to_records()).context("serialize transcript")?;
    println!("{payload}");
    Ok(())
}

fn cmd_models(root: &Path) -> Result<()> {
    let config = load_config(&AgentPaths::new(root).config_path)?;
    for name in list_models(&config.gemini)? {
        println!("{name}");
    }
    Ok(())
}

fn cmd_build_sandbox(root: &Path) -> Result<()> {
    let config = load_config(&AgentPaths::new(root).config_path)?;
    build_image(root, &config.sandbox)?;
    println!("Built {}", config.sandbox.image);
    Ok(())
}
