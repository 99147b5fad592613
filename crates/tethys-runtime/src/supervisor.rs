//! Vehicle supervisor – spawns and owns the actuator and control threads.
//!
//! ```text
//!  operator ─▶ SharedState ─▶ control thread ─▶ CommandSink ─▶ PwmState.target
//!  sensors  ─▶ SharedState ─┘        │                              │
//!                                    ▼                              ▼
//!                            EventBus (telemetry)        actuator thread ─▶ thrusters
//!                                                         (ramp + watchdog)
//! ```
//!
//! The actuator thread is started first and its guard forces every thruster
//! to neutral before the control thread exists.  Both threads poll the shared
//! `running` flag; on shutdown the control thread writes neutral targets and
//! the actuator thread parks every thruster at neutral before exiting.
//!
//! In direct mode the control thread is not started at all and targets come
//! only from external commands submitted through
//! [`VehicleHandle::command_sink`].

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use tethys_hal::Thruster;
use tethys_kernel::{
    ActuatorGuard, CommandSink, CommandWatchdog, ModeTransition, PwmLimits, PwmState,
};
use tethys_middleware::{EventBus, Topic};
use tethys_types::{
    ActuatorMode, Axis, Calibration, Event, EventPayload, PwmCommand, TelemetryReport,
    TethysError, THRUSTER_COUNT,
};

use crate::control_loop::ControlLoop;
use crate::shared::SharedState;

const CONTROL_SOURCE: &str = "tethys-runtime::control";
const ACTUATOR_SOURCE: &str = "tethys-runtime::actuator";

/// Longest timestep handed to the controllers after a run of skipped ticks.
const MAX_DT: f32 = 0.5;

/// Runtime reconfiguration requests served by the control thread between
/// ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlRequest {
    SetThrusterWorking { index: usize, working: bool },
    SetAxisEnabled { axis: Axis, enabled: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Run the closed-loop controller.  When `false` only external commands
    /// drive the thrusters.
    pub control_enabled: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            control_enabled: true,
        }
    }
}

/// Handle to a running vehicle.
pub struct VehicleHandle {
    shared: Arc<SharedState>,
    sink: CommandSink,
    requests: Option<Sender<ControlRequest>>,
    actuator: JoinHandle<()>,
    control: Option<JoinHandle<()>>,
}

impl VehicleHandle {
    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Entry point for an external command channel.
    pub fn command_sink(&self) -> CommandSink {
        self.sink.clone()
    }

    pub fn pwm_state(&self) -> &Arc<PwmState> {
        self.sink.state()
    }

    /// Queue a reconfiguration for the control thread.
    ///
    /// # Errors
    ///
    /// Returns [`TethysError::Configuration`] in direct mode and
    /// [`TethysError::Channel`] once the control thread has exited.
    pub fn request(&self, req: ControlRequest) -> Result<(), TethysError> {
        let tx = self
            .requests
            .as_ref()
            .ok_or_else(|| TethysError::Configuration("control loop is disabled".into()))?;
        tx.send(req)
            .map_err(|_| TethysError::Channel("control thread has exited".into()))
    }

    /// Stop both loops and wait for their final neutral writes.
    pub fn shutdown(self) {
        self.shared.stop();
        if let Some(control) = self.control {
            if control.join().is_err() {
                error!("control thread panicked");
            }
        }
        if self.actuator.join().is_err() {
            error!("actuator thread panicked");
        }
        info!("vehicle loops stopped");
    }
}

/// Validate `cal`, arm the thrusters at neutral and start the vehicle loops.
///
/// # Errors
///
/// - [`TethysError::Configuration`] for an invalid calibration or thruster
///   bank.
/// - [`TethysError::HardwareFault`] if a thread cannot be spawned.
pub fn spawn(
    cal: &Calibration,
    thrusters: Vec<Box<dyn Thruster>>,
    shared: Arc<SharedState>,
    bus: EventBus,
    options: SupervisorOptions,
) -> Result<VehicleHandle, TethysError> {
    cal.validate()?;

    let limits = PwmLimits::from_calibration(cal);
    let state = Arc::new(PwmState::new(limits.neutral));
    let watchdog = Arc::new(CommandWatchdog::new(Duration::from_millis(
        cal.timing.command_timeout_ms,
    )));
    let guard = ActuatorGuard::new(thrusters, state, watchdog, limits)?;
    let sink = guard.command_sink();

    let control_loop = if options.control_enabled {
        let cl = ControlLoop::from_calibration(cal)?;
        for (group, working) in cl.allocator().degraded_groups() {
            publish_fault(&bus, CONTROL_SOURCE, &TethysError::AllocationDegenerate { group, working });
        }
        Some(cl)
    } else {
        None
    };

    let actuator = {
        let shared = Arc::clone(&shared);
        let bus = bus.clone();
        let period = period_of(cal.timing.actuator_hz);
        spawn_named("tethys-actuator", move || run_actuator(guard, shared, bus, period))?
    };

    let (requests, control) = match control_loop {
        Some(cl) => {
            let (tx, rx) = mpsc::channel();
            let ctl_shared = Arc::clone(&shared);
            let ctl_sink = sink.clone();
            let period = period_of(cal.timing.control_hz);
            let handle = spawn_named("tethys-control", move || {
                run_control(cl, ctl_shared, ctl_sink, bus, rx, period)
            });
            match handle {
                Ok(h) => (Some(tx), Some(h)),
                Err(e) => {
                    shared.stop();
                    let _ = actuator.join();
                    return Err(e);
                }
            }
        }
        None => (None, None),
    };

    info!(
        control = options.control_enabled,
        control_hz = cal.timing.control_hz,
        actuator_hz = cal.timing.actuator_hz,
        "vehicle loops started"
    );
    Ok(VehicleHandle {
        shared,
        sink,
        requests,
        actuator,
        control,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Loops
// ────────────────────────────────────────────────────────────────────────────

fn run_actuator(mut guard: ActuatorGuard, shared: Arc<SharedState>, bus: EventBus, period: Duration) {
    let mut next = Instant::now();
    while shared.is_running() {
        let report = guard.step();
        shared.set_mode(report.mode);
        match report.transition {
            Some(ModeTransition::LinkLost { silent }) => {
                let silent_ms = silent.as_millis() as u64;
                publish_fault(&bus, ACTUATOR_SOURCE, &TethysError::LinkLoss { silent_ms });
            }
            Some(ModeTransition::LinkRestored) => {
                bus.publish_to(
                    Topic::SystemAlerts,
                    Event::new(ACTUATOR_SOURCE, EventPayload::LinkRestored),
                );
            }
            None => {}
        }
        next += period;
        sleep_until(&mut next);
    }
    guard.park();
    shared.set_mode(guard.mode());
}

fn run_control(
    mut cl: ControlLoop,
    shared: Arc<SharedState>,
    sink: CommandSink,
    bus: EventBus,
    requests: Receiver<ControlRequest>,
    period: Duration,
) {
    let mut last_ok = Instant::now();
    let mut next = last_ok + period;
    let mut sensor_fault = false;

    while shared.is_running() {
        sleep_until(&mut next);
        next += period;

        for req in requests.try_iter() {
            apply_request(&mut cl, &bus, req);
        }

        let now = Instant::now();
        let dt = now.duration_since(last_ok).as_secs_f32().min(MAX_DT);
        let sensors = shared.sensors();

        match cl.tick(&shared.demand(), sensors.as_ref(), now, dt) {
            Ok(out) => {
                last_ok = now;
                sink.apply(&PwmCommand::from_pulses(out.pwm));
                if std::mem::take(&mut sensor_fault) {
                    info!("sensor input recovered");
                }
                let (pressure_mbar, temperature_c) = sensors
                    .map(|s| (s.reading.pressure_mbar, s.reading.temperature_c))
                    .unwrap_or_default();
                let report = TelemetryReport {
                    forces: out.forces,
                    target_pwm: out.pwm,
                    current_pwm: sink.state().currents(),
                    pressure_mbar,
                    temperature_c,
                    depth_m: out.depth_m,
                    axes: out.axes,
                    mode: shared.mode(),
                };
                shared.set_telemetry(report.clone());
                bus.publish_to(
                    Topic::Telemetry,
                    Event::new(CONTROL_SOURCE, EventPayload::Telemetry(report)),
                );
            }
            Err(fault @ TethysError::SensorFault(_)) => {
                if !sensor_fault {
                    warn!(error = %fault, "sensor fault, holding previous targets");
                    publish_fault(&bus, CONTROL_SOURCE, &fault);
                } else {
                    debug!(error = %fault, "control tick skipped");
                }
                sensor_fault = true;
                refresh_telemetry(&shared, &sink, &bus);
            }
            Err(e) => {
                warn!(error = %e, "control tick skipped");
                refresh_telemetry(&shared, &sink, &bus);
            }
        }
    }

    sink.apply_neutral();
    info!("control loop stopped");
}

fn apply_request(cl: &mut ControlLoop, bus: &EventBus, req: ControlRequest) {
    match req {
        ControlRequest::SetThrusterWorking { index, working } => {
            match cl.set_thruster_working(index, working) {
                Ok(degraded) => {
                    info!(thruster = index + 1, working, "thruster mask updated");
                    for (group, working) in degraded {
                        publish_fault(
                            bus,
                            CONTROL_SOURCE,
                            &TethysError::AllocationDegenerate { group, working },
                        );
                    }
                }
                Err(e) => warn!(error = %e, "thruster mask update rejected"),
            }
        }
        ControlRequest::SetAxisEnabled { axis, enabled } => {
            cl.set_axis_enabled(axis, enabled);
            info!(%axis, enabled, "axis control updated");
        }
    }
}

/// Bring the last report up to date with the actuator after a skipped
/// tick, so telemetry follows a switch to Neutral-Hold even while no tick
/// succeeds.
fn refresh_telemetry(shared: &SharedState, sink: &CommandSink, bus: &EventBus) {
    let Some(mut report) = shared.telemetry() else {
        return;
    };
    report.mode = shared.mode();
    report.target_pwm = sink.state().targets();
    report.current_pwm = sink.state().currents();
    if report.mode == ActuatorMode::NeutralHold {
        report.forces = [0.0; THRUSTER_COUNT];
    }
    shared.set_telemetry(report.clone());
    bus.publish_to(
        Topic::Telemetry,
        Event::new(CONTROL_SOURCE, EventPayload::Telemetry(report)),
    );
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

fn publish_fault(bus: &EventBus, source: &str, fault: &TethysError) {
    if let Some(payload) = fault.to_alert() {
        bus.publish_to(Topic::SystemAlerts, Event::new(source, payload));
    }
}

/// Sleep until `next`.  A loop that fell behind restarts its schedule from
/// now instead of bursting to catch up.
pub(crate) fn sleep_until(next: &mut Instant) {
    let now = Instant::now();
    if *next > now {
        thread::sleep(*next - now);
    } else {
        *next = now;
    }
}

fn period_of(hz: f32) -> Duration {
    Duration::from_secs_f32(1.0 / hz)
}

fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>, TethysError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| TethysError::HardwareFault {
            component: name.to_string(),
            details: e.to_string(),
        })
}
