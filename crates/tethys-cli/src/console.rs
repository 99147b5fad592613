//! Operator console – stands in for the joystick collaborator.
//!
//! One command per line on stdin:
//!
//! ```text
//!   <surge> <sway> <heave> <roll> <pitch> <yaw>   stick input, each in [-1, 1]
//!   {"t1": 1600, ...}                             raw PWM command (direct mode)
//!   stop                                          zero the stick
//!   fail <n> | restore <n>                        mark thruster n (1-8) failed / working
//!   hold <depth|roll|pitch|yaw> <on|off>          toggle closed-loop hold
//!   status                                        print the latest telemetry
//!   help
//!   quit | exit
//! ```

use std::io::{self, BufRead, Write};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use colored::Colorize;
use tracing::warn;

use tethys_kernel::CommandSink;
use tethys_runtime::{ControlRequest, SharedState, VehicleHandle};
use tethys_types::{Axis, MotionDemand, THRUSTER_COUNT, TelemetryReport};

const POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Demand(MotionDemand),
    RawPwm(String),
    Request(ControlRequest),
    Status,
    Help,
    Quit,
}

/// Parse one console line.  Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if line.starts_with('{') {
        return Ok(Some(Command::RawPwm(line.to_string())));
    }

    let words: Vec<&str> = line.split_whitespace().collect();
    let cmd = match words.as_slice() {
        ["help"] => Command::Help,
        ["status"] => Command::Status,
        ["quit"] | ["exit"] => Command::Quit,
        ["stop"] => Command::Demand(MotionDemand::default()),
        ["fail", n] => Command::Request(ControlRequest::SetThrusterWorking {
            index: parse_thruster(n)?,
            working: false,
        }),
        ["restore", n] => Command::Request(ControlRequest::SetThrusterWorking {
            index: parse_thruster(n)?,
            working: true,
        }),
        ["hold", axis, state] => Command::Request(ControlRequest::SetAxisEnabled {
            axis: parse_axis(axis)?,
            enabled: parse_switch(state)?,
        }),
        values if values.len() == 6 => Command::Demand(parse_demand(values)?),
        _ => return Err(format!("unrecognised input '{line}'")),
    };
    Ok(Some(cmd))
}

fn parse_demand(values: &[&str]) -> Result<MotionDemand, String> {
    let mut v = [0.0f32; 6];
    for (slot, raw) in v.iter_mut().zip(values) {
        *slot = raw
            .parse()
            .map_err(|_| format!("'{raw}' is not a number"))?;
    }
    let [surge, sway, heave, roll, pitch, yaw] = v;
    Ok(MotionDemand {
        surge,
        sway,
        heave,
        roll,
        pitch,
        yaw,
    }
    .clamped())
}

fn parse_thruster(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(n) if (1..=THRUSTER_COUNT).contains(&n) => Ok(n - 1),
        _ => Err(format!("thruster must be 1-{THRUSTER_COUNT}, got '{raw}'")),
    }
}

fn parse_axis(raw: &str) -> Result<Axis, String> {
    Axis::ALL
        .into_iter()
        .find(|a| a.to_string().eq_ignore_ascii_case(raw))
        .ok_or_else(|| format!("unknown axis '{raw}'"))
}

fn parse_switch(raw: &str) -> Result<bool, String> {
    match raw {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(format!("expected on/off, got '{raw}'")),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Loop
// ────────────────────────────────────────────────────────────────────────────

/// Spawn the stdin reader.  Parsed commands are forwarded over `tx`; the
/// reader sends [`Command::Quit`] on EOF and exits once the receiver is gone.
pub fn spawn_reader(tx: Sender<Command>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("tethys-console".into())
        .spawn(move || {
            let stdin = io::stdin();
            let mut stdout = io::stdout();
            loop {
                print!("{} ", "tethys>".bold().cyan());
                stdout.flush().ok();

                let mut line = String::new();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) => {
                        let _ = tx.send(Command::Quit);
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        eprintln!("{}: {e}", "Read error".red());
                        let _ = tx.send(Command::Quit);
                        return;
                    }
                }

                match parse_line(&line) {
                    Ok(None) => {}
                    Ok(Some(cmd)) => {
                        if tx.send(cmd).is_err() {
                            return;
                        }
                    }
                    Err(e) => println!("{} {e}. Type {} for commands.", "✗".red(), "help".bold()),
                }
            }
        })
}

/// Serve console commands on the calling thread until `quit`, EOF, or the
/// vehicle is stopped (Ctrl-C).
pub fn serve(rx: &Receiver<Command>, vehicle: &VehicleHandle, direct: bool) {
    let shared = vehicle.shared();
    let sink = vehicle.command_sink();
    while shared.is_running() {
        match rx.recv_timeout(POLL) {
            Ok(Command::Quit) => break,
            Ok(cmd) => execute(cmd, vehicle, shared, &sink, direct),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    shared.stop();
}

fn execute(
    cmd: Command,
    vehicle: &VehicleHandle,
    shared: &SharedState,
    sink: &CommandSink,
    direct: bool,
) {
    match cmd {
        Command::Demand(d) => {
            if direct {
                println!("{} stick input is ignored in direct mode", "!".yellow());
            }
            shared.set_demand(d);
        }
        Command::RawPwm(raw) => {
            if !direct {
                println!(
                    "{} raw PWM is only accepted in --direct mode",
                    "!".yellow()
                );
                return;
            }
            if let Err(e) = sink.apply_json(&raw) {
                println!("{} {e}", "✗".red());
            }
        }
        Command::Request(req) => {
            if let Err(e) = vehicle.request(req) {
                warn!(error = %e, "request rejected");
                println!("{} {e}", "✗".red());
            }
        }
        Command::Status => match shared.telemetry() {
            Some(report) => print_report(&report),
            None if direct => println!("  targets {:?}", vehicle.pwm_state().targets()),
            None => println!("  no telemetry yet"),
        },
        Command::Help => print_help(),
        Command::Quit => {}
    }
}

fn print_report(r: &TelemetryReport) {
    println!(
        "  {} depth {:.2} m  {:.1} mbar  {:.1} °C",
        format!("{:?}", r.mode).bold(),
        r.depth_m,
        r.pressure_mbar,
        r.temperature_c
    );
    println!("  target  {:?}", r.target_pwm);
    println!("  current {:?}", r.current_pwm);
    for a in &r.axes {
        println!(
            "  {:<6} setpoint {:>8.3}  measured {:>8.3}  out {:>6.3}",
            a.axis.to_string(),
            a.setpoint,
            a.measurement,
            a.output
        );
    }
}

fn print_help() {
    println!();
    println!("{}", "Tethys Console".bold().underline());
    println!("  {}  stick input in [-1, 1]", "surge sway heave roll pitch yaw".bold().cyan());
    println!("  {}  raw PWM command (--direct)", "{\"t1\": 1600, ...}".bold().cyan());
    println!("  {}  zero the stick", "stop".bold().cyan());
    println!("  {}  mark a thruster failed / working", "fail N | restore N".bold().cyan());
    println!("  {}  toggle closed-loop hold", "hold AXIS on|off".bold().cyan());
    println!("  {}  latest telemetry", "status".bold().cyan());
    println!("  {}  exit", "quit | exit".bold().cyan());
    println!();
}
