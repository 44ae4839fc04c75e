//! `handlink` – drive a hand controller from the command line.
//!
//! Loads `~/.handlink/config.toml` (or `--config PATH`), connects to the hand
//! driver (rosbridge, or an in-process simulation with `--sim`), attaches a
//! [`HandController`] to a simulated robot and runs the host loop until
//! Ctrl-C:
//!
//! ```text
//! handlink [--sim] [--config PATH] [--init-config] [--reset] [--move a,b,c,d]
//! ```

mod config;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use clap::Parser;
use colored::Colorize;
use handlink_controller::{Controller, HandController};
use handlink_hal::{Robot, SimRobot};
use handlink_middleware::{HandService, RosbridgeHandService, SimHandService};
use handlink_types::HandError;
use tracing::{error, info, warn};

#[derive(Parser, Debug, Clone, Default, PartialEq)]
#[command(name = "handlink")]
#[command(version, about = "Mirror a remote hand driver into a simulated robot")]
struct Args {
    /// Use the in-process simulated hand driver instead of rosbridge
    #[arg(long)]
    sim: bool,

    /// Config file (default: ~/.handlink/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a default config file if none exists
    #[arg(long)]
    init_config: bool,

    /// Reset the hand once connected
    #[arg(long)]
    reset: bool,

    /// Move the hand to these positions once connected, e.g. 1.0,1.5,2,0.25
    #[arg(long = "move", value_delimiter = ',', allow_hyphen_values = true)]
    move_to: Option<Vec<f64>>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _guard = telemetry::init_tracing("handlink");

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "handlink stopped");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), HandError> {
    let path = args.config.clone().unwrap_or_else(config::config_path);
    if args.init_config && !path.exists() {
        config::save_to(&config::Config::default(), &path)?;
        println!("  {} wrote default config to {}", "✓".green(), path.display());
    }
    let cfg = config::load(Some(&path))?;
    cfg.validate()?;
    info!(config = ?cfg, "configuration loaded");

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| HandError::Transport(format!("cannot start Tokio runtime: {e}")))?;

    let service: Arc<dyn HandService> = if args.sim {
        info!("using simulated hand driver");
        Arc::new(SimHandService::new(cfg.dof_indices.len()))
    } else {
        Arc::new(runtime.block_on(RosbridgeHandService::connect(
            &cfg.rosbridge_url,
            &cfg.namespace,
        ))?)
    };

    let robot = Arc::new(SimRobot::new("handlink", cfg.robot_dof_count));
    let mut controller =
        HandController::new(service, runtime.handle().clone(), cfg.controller_config());
    controller.init(robot.clone(), cfg.dof_indices.clone(), 0);

    if args.reset {
        controller.reset(0);
    }
    if let Some(values) = &args.move_to {
        if values.len() != cfg.dof_indices.len() {
            return Err(HandError::Config(format!(
                "--move needs {} values, got {}",
                cfg.dof_indices.len(),
                values.len()
            )));
        }
        if !controller.set_desired(values, None) {
            warn!("move command was not accepted");
        }
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || shutdown_flag.store(true, Ordering::SeqCst)) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    host_loop(&mut controller, robot.as_ref(), &cfg, &shutdown);
    info!("shutting down");
    Ok(())
}

/// Step the controller at the configured rate until `shutdown` is raised.
fn host_loop(
    controller: &mut HandController,
    robot: &dyn Robot,
    cfg: &config::Config,
    shutdown: &AtomicBool,
) {
    let period = cfg.step_period();
    let mut last_values = robot.dof_values();
    let mut last_done = controller.is_done();
    let mut last_tick = Instant::now();

    info!(hz = cfg.step_hz, "host loop running; Ctrl-C to stop");
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        controller.simulation_step(now.duration_since(last_tick).as_secs_f64());
        last_tick = now;

        let values = robot.dof_values();
        if values != last_values {
            let hand: Vec<f64> = cfg.dof_indices.iter().map(|&i| values[i]).collect();
            info!(positions = ?hand, "hand moved");
            last_values = values;
        }
        let done = controller.is_done();
        if done != last_done {
            info!(done, "hand completion changed");
            last_done = done;
        }

        std::thread::sleep(period.saturating_sub(now.elapsed()));
    }
}
