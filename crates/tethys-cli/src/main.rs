//! `tethys` – runs the vehicle stack against simulated hardware.
//!
//! 1. Loads `~/.tethys/calibration.toml` (or `$TETHYS_CONFIG`), writing the
//!    defaults on first run.  An invalid calibration aborts startup.
//! 2. Arms a simulated thruster bank at neutral and starts the actuator and
//!    control loops, with a simulated plant feeding pressure and attitude.
//! 3. Reads operator input from the console (see [`console`]).
//! 4. On **Ctrl-C**, `quit` or EOF, stops every loop and parks the thrusters
//!    at neutral.
//!
//! `--direct` skips the control loop: raw `{"t1": ..}` PWM commands typed at
//! the console go straight to the safety layer.

mod config;
mod console;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use colored::Colorize;
use tracing::{error, warn};

use tethys_hal::{SimPlant, SimThruster};
use tethys_middleware::{EventBus, Topic, TopicReceiver};
use tethys_runtime::{SharedState, SupervisorOptions, init_tracing, spawn, spawn_sim_sensors};
use tethys_types::{Calibration, EventPayload, TethysError};

struct Args {
    direct: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args { direct: false };
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--direct" => args.direct = true,
            "-h" | "--help" => {
                println!("usage: tethys [--direct]");
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument '{other}'")),
        }
    }
    Ok(args)
}

fn main() -> ExitCode {
    let _tracing = init_tracing("tethys");

    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{}: {e}", "Error".red());
            return ExitCode::FAILURE;
        }
    };

    print_banner();

    let path = config::config_path();
    let cal = match config::load_or_init(&path) {
        Ok(loaded) => {
            let verb = if loaded.created { "written to" } else { "loaded from" };
            println!("  Calibration {} {}", verb, path.display().to_string().bold());
            loaded.calibration
        }
        Err(e) => {
            error!(error = %e, path = %path.display(), "calibration rejected");
            eprintln!("{}: {e}", "Calibration error".red().bold());
            return ExitCode::FAILURE;
        }
    };

    match run(&cal, args.direct) {
        Ok(()) => {
            println!("{}", "  ✓ Thrusters parked at neutral.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "vehicle startup failed");
            eprintln!("{}: {e}", "Startup error".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(cal: &Calibration, direct: bool) -> Result<(), TethysError> {
    let shared = Arc::new(SharedState::new());
    let bus = EventBus::default();

    // Subscribe before spawning so the startup alerts are not missed.
    let alerts = bus.subscribe_to(Topic::SystemAlerts);

    let ctrlc_shared = Arc::clone(&shared);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – parking thrusters …".yellow().bold());
        ctrlc_shared.stop();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    let plant = SimPlant::from_calibration(cal)?;
    let (bank, monitors) = SimThruster::bank();
    let sensors = spawn_sim_sensors(
        plant,
        monitors,
        Arc::clone(&shared),
        Duration::from_secs_f32(1.0 / cal.timing.actuator_hz),
    )?;

    let options = SupervisorOptions {
        control_enabled: !direct,
    };
    let vehicle = match spawn(cal, bank, Arc::clone(&shared), bus, options) {
        Ok(v) => v,
        Err(e) => {
            shared.stop();
            let _ = sensors.join();
            return Err(e);
        }
    };
    spawn_alert_printer(alerts);

    if direct {
        println!("  Mode: {}", "direct PWM".bold().yellow());
    } else {
        println!("  Mode: {}", "closed loop".bold().green());
    }
    println!("  Type {} for a list of commands.\n", "help".bold().cyan());

    let (tx, rx) = mpsc::channel();
    if let Err(e) = console::spawn_reader(tx) {
        warn!(error = %e, "console unavailable; waiting for Ctrl-C");
    }
    console::serve(&rx, &vehicle, direct);

    vehicle.shutdown();
    if sensors.join().is_err() {
        warn!("sim sensor thread panicked");
    }
    Ok(())
}

fn spawn_alert_printer(mut alerts: TopicReceiver) {
    let spawned = thread::Builder::new()
        .name("tethys-alerts".into())
        .spawn(move || {
            while let Some(event) = alerts.blocking_recv() {
                match event.payload {
                    EventPayload::LinkLost { silent_ms } => println!(
                        "\n{} link lost after {silent_ms} ms, thrusters at neutral",
                        "⚠".yellow().bold()
                    ),
                    EventPayload::LinkRestored => {
                        println!("\n{} link restored", "✓".green().bold())
                    }
                    EventPayload::SensorFault { reason } => {
                        println!("\n{} sensor fault: {reason}", "⚠".yellow().bold())
                    }
                    EventPayload::AllocationDegraded { group, working } => println!(
                        "\n{} {group} group degraded: {working}/4 thrusters working",
                        "⚠".yellow().bold()
                    ),
                    EventPayload::Telemetry(_) => {}
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "alert printer unavailable");
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"  ______     __  __              "#.bold().cyan());
    println!("{}", r#" /_  __/__  / /_/ /_  __  _______"#.bold().cyan());
    println!("{}", r#"  / / / _ \/ __/ __ \/ / / / ___/"#.bold().cyan());
    println!("{}", r#" / / /  __/ /_/ / / / /_/ (__  ) "#.bold().cyan());
    println!("{}", r#"/_/  \___/\__/_/ /_/\__, /____/  "#.bold().cyan());
    println!("{}", r#"                   /____/        "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Tethys".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Eight-thruster vehicle control (simulated hardware)");
    println!();
}
