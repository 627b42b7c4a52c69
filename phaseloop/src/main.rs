//! Phase-driven agent control CLI.
//!
//! Inspects task state under `.phaseloop/`: loop detection over an action
//! history, the phase machine of a task snapshot, and the budget decision.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use phaseloop::core::loop_detector::LoopDetector;
use phaseloop::core::types::ActionRecord;
use phaseloop::exit_codes;
use phaseloop::io::config::{AgentConfig, load_config, write_config};
use phaseloop::io::task_state::load_task_state;
use phaseloop::logging;
use phaseloop::session::TaskSession;

const CONFIG_PATH: &str = ".phaseloop/config.toml";

#[derive(Parser)]
#[command(
    name = "phaseloop",
    version,
    about = "Phase machine, loop detector and adaptive budget for coding agents"
)]
struct Cli {
    /// Config file (defaults apply when missing).
    #[arg(long, global = true, default_value = CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.phaseloop/config.toml` with default settings.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run loop detection over a JSON array of action records.
    Detect { history: PathBuf },
    /// Show the phase machine of a task snapshot.
    Phase { task: PathBuf },
    /// Decide whether a task snapshot may take another step.
    Budget { task: PathBuf },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Detect { history } => cmd_detect(&cli.config, &history),
        Command::Phase { task } => cmd_phase(&cli.config, &task),
        Command::Budget { task } => cmd_budget(&cli.config, &task),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if !force && config_path.exists() {
        println!("{} already exists (use --force to overwrite)", config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &AgentConfig::default())
        .with_context(|| format!("write {}", config_path.display()))?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_detect(config_path: &Path, history_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let history = load_history(history_path)?;
    let detection = LoopDetector::new(config.loop_detection).check(&history);
    match detection.loop_type {
        Some(loop_type) if detection.detected => {
            println!(
                "{loop_type} (confidence {:.2}): {}",
                detection.confidence, detection.description
            );
            for suggestion in &detection.suggestions {
                println!("- {suggestion}");
            }
            Ok(exit_codes::LOOP)
        }
        _ => {
            println!("no loop detected ({} records)", history.len());
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_phase(config_path: &Path, task_path: &Path) -> Result<i32> {
    let session = load_session(config_path, task_path)?;
    let machine = session.machine();
    let context = session.phase_context();

    println!("task: {}", session.task_id());
    println!("phase: {}", machine.current_phase());
    println!("steps in phase: {}", machine.steps_in_phase());
    let history: Vec<&str> = machine.phase_history().iter().map(|p| p.as_str()).collect();
    println!("history: {}", history.join(" -> "));
    match machine.should_auto_transition(&context) {
        Some(next) => println!("suggested: {next}"),
        None => println!("suggested: none"),
    }
    for transition in machine.get_available_transitions(&context) {
        println!(
            "available: {} -> {} ({})",
            transition.from, transition.to, transition.description
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_budget(config_path: &Path, task_path: &Path) -> Result<i32> {
    let mut session = load_session(config_path, task_path)?;
    let decision = session.check_continue();
    println!("{}", decision.reason);
    println!(
        "steps: {}/{} (remaining {})",
        session.steps_taken(),
        session.budget().current_budget(),
        session.budget().remaining(session.steps_taken())
    );
    for suggestion in session.budget().get_loop_suggestions() {
        println!("- {suggestion}");
    }
    Ok(if decision.should_continue {
        exit_codes::OK
    } else {
        exit_codes::STOP
    })
}

fn load_history(path: &Path) -> Result<Vec<ActionRecord>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let history: Vec<ActionRecord> =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    if history.windows(2).any(|pair| pair[0].step >= pair[1].step) {
        bail!("{}: steps must be strictly increasing", path.display());
    }
    Ok(history)
}

fn load_session(config_path: &Path, task_path: &Path) -> Result<TaskSession> {
    let config = load_config(config_path)?;
    let snapshot = load_task_state(task_path)?;
    let session = TaskSession::from_snapshot(snapshot, &config)
        .with_context(|| format!("restore task {}", task_path.display()))?;
    Ok(session)
}
