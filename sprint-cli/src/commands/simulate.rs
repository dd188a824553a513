//! Run a host and a companion against each other in-process.
//!
//! Both devices share one accelerated clock and talk over a loopback link.
//! A simulated runner feeds distance to the host during rep phases, and the
//! link can be cut for a stretch of the session to exercise queueing and
//! reconnection.

use anyhow::{Context, Result};
use sprintsync_client::{
    Clock, LinkControl, LoopbackTransport, ScaledClock, SessionController, SessionHandle,
};
use sprintsync_core::WorkoutEvent;
use sprintsync_types::{DeviceRole, Phase, SessionConfig, Timestamp, WorkoutSnapshot};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};

use super::clock_text;
use crate::config::{Config, SimulationSection};

/// Real time between runner steps.
const STEP: Duration = Duration::from_millis(20);

/// Real time allowed for the companion to join.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the simulate command.
pub async fn run(config: &Config) -> Result<()> {
    let session = config
        .session
        .to_session_config()
        .context("Invalid [session] configuration")?;
    let sim = &config.simulation;
    if !sim.runner_speed_mps.is_finite() || sim.runner_speed_mps <= 0.0 {
        anyhow::bail!("runner_speed_mps must be positive");
    }

    let clock = ScaledClock::new(sim.time_scale);
    let scale = clock.scale();
    let start = clock.now();
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());

    let (host_link, companion_link, link) = LoopbackTransport::pair();
    let host = SessionController::start(
        session.clone(),
        config.sync.controller_config(DeviceRole::Host, scale),
        host_link,
        Arc::clone(&shared),
    )?;
    let companion = SessionController::start(
        session.clone(),
        config.sync.controller_config(DeviceRole::Companion, scale),
        companion_link,
        shared,
    )?;

    let joined = host.snapshot().session;
    let mut companion_view = companion.snapshots();
    tokio::time::timeout(JOIN_TIMEOUT, companion_view.wait_for(|s| s.session == joined))
        .await
        .context("Companion did not join the session")?
        .context("Companion stopped")?;

    println!(
        "Session {} with {} reps at {}x speed",
        joined,
        session.total_reps(),
        scale
    );
    println!();

    let mut events = [
        (DeviceRole::Host, host.events()),
        (DeviceRole::Companion, companion.events()),
    ];
    host.play().await?;

    let budget = real_budget(&session, sim, &clock);
    let outcome = drive(&host, &companion, &link, &clock, start, sim, &mut events, budget).await;

    host.shutdown().await.ok();
    companion.shutdown().await.ok();

    let snapshot = outcome?;
    println!();
    print_summary(&snapshot, clock.now().millis_since(start));
    Ok(())
}

/// Step the runner and the link until both replicas agree on a finished
/// session.
#[allow(clippy::too_many_arguments)]
async fn drive(
    host: &SessionHandle,
    companion: &SessionHandle,
    link: &LinkControl,
    clock: &ScaledClock,
    start: Timestamp,
    sim: &SimulationSection,
    events: &mut [(DeviceRole, broadcast::Receiver<WorkoutEvent>)],
    budget: Duration,
) -> Result<WorkoutSnapshot> {
    let deadline = Instant::now().checked_add(budget);
    let mut ticker = tokio::time::interval(STEP);
    let mut odometer_m = 0.0;
    let mut last = clock.now();
    let mut outage = sim.link_drop_at_secs.map(|at| Outage::new(at, sim.link_drop_secs));

    loop {
        ticker.tick().await;
        let now = clock.now();
        let elapsed_ms = now.millis_since(start);

        if let Some(outage) = outage.as_mut() {
            outage.step(link, elapsed_ms);
        }

        let snapshot = host.snapshot();
        if snapshot.phase.is_rep_phase() && snapshot.is_running {
            let dt_secs = now.millis_since(last) as f64 / 1000.0;
            odometer_m += sim.runner_speed_mps * dt_secs;
            host.distance(odometer_m).await?;
        }
        last = now;

        for (role, rx) in events.iter_mut() {
            drain(*role, rx, elapsed_ms);
        }

        let host_view = host.snapshot();
        if host_view.phase.is_terminal() && host_view == companion.snapshot() {
            return Ok(host_view);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            anyhow::bail!(
                "Replicas did not converge within {:?} (host at {}, companion at {})",
                budget,
                host_view.phase,
                companion.snapshot().phase
            );
        }
    }
}

/// A single scheduled link cut.
struct Outage {
    down_at_ms: u64,
    up_at_ms: u64,
    down: bool,
    done: bool,
}

impl Outage {
    fn new(at_secs: u64, for_secs: u64) -> Self {
        Self {
            down_at_ms: at_secs * 1000,
            up_at_ms: (at_secs + for_secs) * 1000,
            down: false,
            done: false,
        }
    }

    fn step(&mut self, link: &LinkControl, elapsed_ms: u64) {
        if self.done {
            return;
        }
        if !self.down && elapsed_ms >= self.down_at_ms {
            link.set_reachable(false);
            self.down = true;
            println!("[{}] link      down", clock_text(elapsed_ms / 1000));
        }
        if self.down && elapsed_ms >= self.up_at_ms {
            link.set_reachable(true);
            self.done = true;
            println!("[{}] link      up", clock_text(elapsed_ms / 1000));
        }
    }
}

/// Print every event `role` has emitted since the last step.
fn drain(role: DeviceRole, rx: &mut broadcast::Receiver<WorkoutEvent>, elapsed_ms: u64) {
    loop {
        match rx.try_recv() {
            Ok(event) => {
                if let Some(line) = describe(&event) {
                    println!("[{}] {:<9} {}", clock_text(elapsed_ms / 1000), role, line);
                }
            }
            Err(TryRecvError::Lagged(missed)) => {
                tracing::warn!(%role, missed, "Event printer lagged");
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return,
        }
    }
}

fn describe(event: &WorkoutEvent) -> Option<String> {
    match event {
        WorkoutEvent::PhaseChanged { from, to, rep_index } if to.is_rep_phase() => {
            Some(format!("{} -> {} (rep {})", from.title(), to.title(), rep_index))
        }
        WorkoutEvent::PhaseChanged { from, to, .. } => {
            Some(format!("{} -> {}", from.title(), to.title()))
        }
        WorkoutEvent::RepCompleted(record) => Some(match record.time_secs {
            Some(secs) => format!(
                "rep {} done: {:.0} m in {:.1} s",
                record.rep_index, record.distance_m, secs
            ),
            None => format!("rep {} closed without a time", record.rep_index),
        }),
        WorkoutEvent::SessionFinished { outcome } => Some(format!("session {:?}", outcome)),
        WorkoutEvent::Countdown { .. } => None,
    }
}

/// Real time the session may take before the run is declared stuck.
fn real_budget(session: &SessionConfig, sim: &SimulationSection, clock: &ScaledClock) -> Duration {
    let timed: u64 = session
        .plan
        .iter()
        .filter_map(|&phase| session.duration_secs(phase))
        .map(u64::from)
        .sum();
    let rests = if session.is_planned(Phase::Sprint) {
        u64::from(session.sprint.reps.saturating_sub(1)) * u64::from(session.sprint.rest_secs)
    } else {
        0
    };
    let running: f64 = session
        .plan
        .iter()
        .filter_map(|&phase| session.block(phase))
        .map(|(reps, distance_m)| f64::from(reps) * distance_m / sim.runner_speed_mps)
        .sum();
    let outage = sim.link_drop_at_secs.map_or(0, |_| sim.link_drop_secs);

    let simulated = timed.saturating_add(rests).saturating_add(outage) as f64 + running;
    let padded = Duration::try_from_secs_f64(simulated * 2.0 + 60.0).unwrap_or(Duration::MAX);
    clock.real_duration(padded).saturating_add(Duration::from_secs(10))
}

fn print_summary(snapshot: &WorkoutSnapshot, elapsed_ms: u64) {
    println!(
        "Session {} after {} simulated; replicas converged at version {}",
        snapshot.phase,
        clock_text(elapsed_ms / 1000),
        snapshot.version
    );
    println!();
    println!("  Rep  Phase     Distance  Time");
    for record in &snapshot.completed_reps {
        let time = record
            .time_secs
            .map_or_else(|| "-".to_string(), |secs| format!("{:.1} s", secs));
        println!(
            "  {:>3}  {:<8}  {:>6.1} m  {}",
            record.rep_index,
            record.kind.title(),
            record.distance_m,
            time
        );
    }
}
