//! Workout state machine.
//!
//! [`WorkoutStateMachine::apply`] is the single mutation entry point for a
//! replica. It takes an [`Input`] and the current instant and returns the
//! [`Action`]s the caller must carry out (publish the new snapshot, notify
//! listeners). It performs no I/O, so the whole session can be replayed in a
//! unit test without a runtime.
//!
//! Phase routing follows the session's plan: every "next phase" is the next
//! *planned* phase, so unplanned phases are skipped over.

use sprintsync_types::{
    Command, DeviceRole, Phase, RepRecord, SessionConfig, SessionId, Timestamp, WorkoutSnapshot,
};

use crate::reconcile::{ReconcilerConfig, ReplicaReconciler};
use crate::{PhaseClock, RepLedger, RepTracker, Stopwatch, WorkoutError};

/// Remaining-seconds marks that produce a [`WorkoutEvent::Countdown`].
pub const COUNTDOWN_WARNINGS: [u32; 5] = [10, 5, 3, 2, 1];

/// One reading from the positioning collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceUpdate {
    /// Cumulative distance covered in the session, in meters.
    pub odometer_m: f64,
    /// When the reading was taken.
    pub at: Timestamp,
}

/// Everything that can change a replica.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// A user command issued on this device.
    Command(Command),
    /// Periodic clock tick (about once per second).
    Tick,
    /// New distance reading.
    Distance(DistanceUpdate),
    /// Snapshot received from the peer.
    Remote(WorkoutSnapshot),
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Ran through the last planned phase.
    Completed,
    /// Halted by `stop`.
    Aborted,
}

/// Notifications for presentation, audio and recording collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkoutEvent {
    /// The phase changed.
    PhaseChanged {
        /// Previous phase.
        from: Phase,
        /// New phase.
        to: Phase,
        /// Rep index after the change.
        rep_index: u32,
    },
    /// A rep entered the ledger. Fired once per rep on each device, and
    /// again if the peer's timed entry supersedes a local untimed one.
    RepCompleted(RepRecord),
    /// A countdown crossed a warning mark.
    Countdown {
        /// The timed phase counting down.
        phase: Phase,
        /// Seconds left at the mark.
        remaining_secs: u32,
    },
    /// The session reached a terminal phase.
    SessionFinished {
        /// Completed or aborted.
        outcome: Outcome,
    },
}

/// Instructions for the owner of the state machine.
///
/// These are instructions, not side effects. The client interprets them and
/// performs the actual I/O.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Local state changed; show it and send it to the peer.
    Publish(WorkoutSnapshot),
    /// Send this snapshot to the peer to correct it; also show it locally.
    Rebroadcast(WorkoutSnapshot),
    /// Local view changed without a new version; show it, do not send.
    Refresh(WorkoutSnapshot),
    /// Notify listeners.
    EmitEvent(WorkoutEvent),
}

/// One device's replica of the workout.
#[derive(Debug, Clone)]
pub struct WorkoutStateMachine {
    config: SessionConfig,
    role: DeviceRole,
    snapshot: WorkoutSnapshot,
    clock: PhaseClock,
    stopwatch: Stopwatch,
    tracker: RepTracker,
    ledger: RepLedger,
    reconciler: ReplicaReconciler,
    odometer_m: f64,
    baseline_m: f64,
}

impl WorkoutStateMachine {
    /// Start a new session at `warmup`, not yet running.
    pub fn new(config: SessionConfig, role: DeviceRole, at: Timestamp) -> Result<Self, WorkoutError> {
        Self::with_session(config, role, SessionId::new(), at)
    }

    /// Join an existing session announced by the peer.
    pub fn with_session(
        config: SessionConfig,
        role: DeviceRole,
        session: SessionId,
        at: Timestamp,
    ) -> Result<Self, WorkoutError> {
        config.validate()?;
        let warmup_secs = config.warmup_secs;
        let mut clock = PhaseClock::new();
        clock.arm(warmup_secs)?;

        Ok(Self {
            snapshot: WorkoutSnapshot::initial(session, config.total_reps(), warmup_secs, role, at),
            config,
            role,
            clock,
            stopwatch: Stopwatch::new(),
            tracker: RepTracker::new(role),
            ledger: RepLedger::new(),
            reconciler: ReplicaReconciler::default(),
            odometer_m: 0.0,
            baseline_m: 0.0,
        })
    }

    /// Replace the reconciliation tuning.
    pub fn with_reconciler(mut self, config: ReconcilerConfig) -> Self {
        self.reconciler = ReplicaReconciler::new(config);
        self
    }

    /// The current replicated state.
    pub fn snapshot(&self) -> &WorkoutSnapshot {
        &self.snapshot
    }

    /// The session's config.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// This replica's role.
    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.snapshot.phase
    }

    /// Current session.
    pub fn session(&self) -> SessionId {
        self.snapshot.session
    }

    /// The phase countdown.
    pub fn clock(&self) -> &PhaseClock {
        &self.clock
    }

    /// Whether the open rep is the last of its block.
    pub fn is_final_rep(&self) -> bool {
        self.tracker.is_open() && self.tracker.is_final_rep()
    }

    /// Apply one input.
    ///
    /// On error the replica is unchanged and nothing must be published.
    pub fn apply(&mut self, input: Input, at: Timestamp) -> Result<Vec<Action>, WorkoutError> {
        match input {
            Input::Command(command) => self.on_command(command, at),
            Input::Tick => self.on_tick(at),
            Input::Distance(update) => self.on_distance(update, at),
            Input::Remote(remote) => self.on_remote(remote, at),
        }
    }

    fn on_command(&mut self, command: Command, at: Timestamp) -> Result<Vec<Action>, WorkoutError> {
        let phase = self.snapshot.phase;
        let illegal = WorkoutError::IllegalTransition { command, phase };
        let mut events = Vec::new();

        match command {
            Command::Reset if phase.is_terminal() => self.reset_session(at, &mut events)?,
            Command::Reset => return Err(illegal),
            _ if phase.is_terminal() => return Err(illegal),
            Command::AddTime { .. } if !phase.is_timed() => return Err(illegal),
            Command::AddTime { secs } => self.add_time(secs)?,
            Command::Play if self.snapshot.is_running => return Err(illegal),
            Command::Play => self.set_running(true, at),
            Command::Pause if !self.snapshot.is_running => return Err(illegal),
            Command::Pause => self.set_running(false, at),
            Command::Skip => self.exit_phase(at, true, &mut events)?,
            Command::Stop => self.stop(at, &mut events)?,
        }

        tracing::debug!(
            %command,
            from = %phase,
            to = %self.snapshot.phase,
            role = %self.role,
            "Command applied"
        );
        Ok(self.commit(Some(command), at, events))
    }

    fn on_tick(&mut self, at: Timestamp) -> Result<Vec<Action>, WorkoutError> {
        let phase = self.snapshot.phase;
        if !self.snapshot.is_running || !phase.is_timed() {
            return Ok(Vec::new());
        }

        let before = self.clock.remaining();
        let after = self.clock.tick(at);
        if after == before {
            return Ok(Vec::new());
        }

        let mut events: Vec<WorkoutEvent> = COUNTDOWN_WARNINGS
            .iter()
            .filter(|mark| before > **mark && after <= **mark)
            .map(|mark| WorkoutEvent::Countdown {
                phase,
                remaining_secs: *mark,
            })
            .collect();

        if self.clock.expired() {
            self.exit_phase(at, false, &mut events)?;
            return Ok(self.commit(None, at, events));
        }

        // The countdown is re-derived on each replica; it only travels with
        // the next real mutation.
        self.snapshot.phase_time_remaining_secs = after;
        let mut actions: Vec<Action> = events.into_iter().map(Action::EmitEvent).collect();
        actions.insert(0, Action::Refresh(self.snapshot.clone()));
        Ok(actions)
    }

    fn on_distance(&mut self, update: DistanceUpdate, at: Timestamp) -> Result<Vec<Action>, WorkoutError> {
        if !update.odometer_m.is_finite() {
            return Ok(Vec::new());
        }
        self.odometer_m = self.odometer_m.max(update.odometer_m);
        if !self.snapshot.phase.is_rep_phase() || !self.tracker.is_open() {
            return Ok(Vec::new());
        }

        let before = self.tracker.distance_m();
        let reached = self
            .tracker
            .record_distance((update.odometer_m - self.baseline_m).max(0.0));

        let mut events = Vec::new();
        if reached && self.snapshot.is_running {
            self.exit_phase(update.at, false, &mut events)?;
        } else if self.tracker.distance_m() == before {
            return Ok(Vec::new());
        }
        Ok(self.commit(None, at, events))
    }

    fn on_remote(&mut self, remote: WorkoutSnapshot, at: Timestamp) -> Result<Vec<Action>, WorkoutError> {
        let mut events = Vec::new();
        if self.stopped_by(&remote) && self.snapshot.phase.is_rep_phase() && self.tracker.is_open() {
            // The peer's stop closes our open rep too; the merge carries it
            // back to the peer.
            self.close_rep(at, true, &mut events)?;
            self.snapshot.completed_reps = self.ledger.to_vec();
        }

        let merge = self.reconciler.merge(&self.snapshot, &remote);
        if merge.snapshot == self.snapshot {
            let view = merge.rebroadcast.then(|| Action::Rebroadcast(merge.snapshot));
            return Ok(view
                .into_iter()
                .chain(events.into_iter().map(Action::EmitEvent))
                .collect());
        }

        let previous_phase = self.snapshot.phase;
        let previous_ledger = std::mem::take(&mut self.ledger);
        let same_session = merge.snapshot.session == self.snapshot.session;

        if merge.adopted() {
            self.restore(merge.snapshot.clone(), at);
        } else {
            self.ledger = RepLedger::from_records(&merge.snapshot.completed_reps);
            self.snapshot = merge.snapshot.clone();
        }

        if self.snapshot.phase != previous_phase {
            events.push(WorkoutEvent::PhaseChanged {
                from: previous_phase,
                to: self.snapshot.phase,
                rep_index: self.snapshot.rep_index,
            });
        }
        events.extend(
            self.ledger
                .iter()
                .filter(|record| !same_session || previous_ledger.get(record.rep_index) != Some(*record))
                .cloned()
                .map(WorkoutEvent::RepCompleted),
        );
        if self.snapshot.phase != previous_phase {
            if let Some(outcome) = outcome_of(self.snapshot.phase) {
                events.push(WorkoutEvent::SessionFinished { outcome });
            }
        }

        if self.snapshot.phase.is_rep_phase() && self.ledger.contains(self.snapshot.rep_index) {
            // The merged ledger already holds the rep this phase is on.
            self.pass_recorded_rep(at, &mut events)?;
            return Ok(self.commit(None, at, events));
        }

        let view = if merge.rebroadcast {
            Action::Rebroadcast(self.snapshot.clone())
        } else {
            Action::Refresh(self.snapshot.clone())
        };
        Ok(std::iter::once(view)
            .chain(events.into_iter().map(Action::EmitEvent))
            .collect())
    }

    /// Whether `remote` is a stop that will override this replica.
    fn stopped_by(&self, remote: &WorkoutSnapshot) -> bool {
        remote.is_stop_originated()
            && remote.session == self.snapshot.session
            && !self.snapshot.is_stopped()
    }

    fn add_time(&mut self, secs: u32) -> Result<(), WorkoutError> {
        if secs == 0 {
            return Err(WorkoutError::InvalidDuration);
        }
        self.clock.add_time(secs);
        Ok(())
    }

    fn set_running(&mut self, running: bool, at: Timestamp) {
        self.snapshot.is_running = running;
        self.snapshot.is_paused = !running;
        if running {
            self.clock.resume(at);
            if self.tracker.is_open() {
                self.stopwatch.resume(at);
            }
        } else {
            self.clock.pause(at);
            self.stopwatch.pause(at);
        }
    }

    /// Force the current phase's exit condition.
    fn exit_phase(
        &mut self,
        at: Timestamp,
        skipped: bool,
        events: &mut Vec<WorkoutEvent>,
    ) -> Result<(), WorkoutError> {
        let phase = self.snapshot.phase;
        match phase {
            Phase::Warmup | Phase::Stretch | Phase::Cooldown => {
                self.enter_phase(self.config.next_planned_after(phase), at, events)
            }
            Phase::Resting => self.enter_phase(Phase::Sprint, at, events),
            Phase::Drill | Phase::Strides | Phase::Sprint => {
                self.close_rep(at, skipped, events)?;
                self.leave_rep(phase, at, events)
            }
            Phase::Completed | Phase::Aborted => Err(WorkoutError::IllegalTransition {
                command: Command::Skip,
                phase,
            }),
        }
    }

    /// Route out of a closed rep: next rep, rest, or the next planned phase.
    fn leave_rep(
        &mut self,
        phase: Phase,
        at: Timestamp,
        events: &mut Vec<WorkoutEvent>,
    ) -> Result<(), WorkoutError> {
        if self.tracker.is_final_rep() {
            self.enter_phase(self.config.next_planned_after(phase), at, events)
        } else if phase == Phase::Sprint {
            self.enter_phase(Phase::Resting, at, events)
        } else {
            self.begin_rep(at);
            Ok(())
        }
    }

    /// Move past a rep the peer has already recorded, without a second entry.
    fn pass_recorded_rep(&mut self, at: Timestamp, events: &mut Vec<WorkoutEvent>) -> Result<(), WorkoutError> {
        let phase = self.snapshot.phase;
        tracing::debug!(
            rep_index = self.snapshot.rep_index,
            %phase,
            "Rep already recorded by peer; moving on"
        );
        self.tracker.abandon_rep();
        self.stopwatch.reset();
        self.leave_rep(phase, at, events)
    }

    fn enter_phase(
        &mut self,
        to: Phase,
        at: Timestamp,
        events: &mut Vec<WorkoutEvent>,
    ) -> Result<(), WorkoutError> {
        let from = self.snapshot.phase;
        self.snapshot.phase = to;
        self.clock.clear();
        self.stopwatch.reset();

        if to.is_timed() {
            let secs = self.config.duration_secs(to).unwrap_or(0);
            if self.snapshot.is_running {
                self.clock.start(secs, at)?;
            } else {
                self.clock.arm(secs)?;
            }
        } else if to.is_rep_phase() {
            if from != Phase::Resting {
                let (reps, _) = self.config.block(to).unwrap_or((0, 0.0));
                self.tracker.enter_block(to, reps, self.config.rep_offset(to));
            }
            self.begin_rep(at);
        } else {
            self.snapshot.is_running = false;
            self.snapshot.is_paused = false;
        }

        events.push(WorkoutEvent::PhaseChanged {
            from,
            to,
            rep_index: self.snapshot.rep_index,
        });
        if let Some(outcome) = outcome_of(to) {
            tracing::info!(?outcome, session = %self.snapshot.session, "Session finished");
            events.push(WorkoutEvent::SessionFinished { outcome });
        }
        Ok(())
    }

    fn begin_rep(&mut self, at: Timestamp) {
        let (_, target_m) = self.config.block(self.tracker.kind()).unwrap_or((0, 0.0));
        self.snapshot.rep_index = self.tracker.begin_rep(target_m);
        self.snapshot.set_rep = self.tracker.current_rep();
        self.baseline_m = self.odometer_m;
        if self.snapshot.is_running {
            self.stopwatch.start(at);
        } else {
            self.stopwatch.reset();
        }
    }

    fn close_rep(
        &mut self,
        at: Timestamp,
        skipped: bool,
        events: &mut Vec<WorkoutEvent>,
    ) -> Result<(), WorkoutError> {
        let time_secs = (!skipped).then(|| self.stopwatch.elapsed_ms(at) as f64 / 1000.0);
        let record = self.tracker.complete_rep(time_secs, at)?;
        self.stopwatch.reset();
        if self.ledger.append(record.clone()) {
            events.push(WorkoutEvent::RepCompleted(record));
        }
        Ok(())
    }

    fn stop(&mut self, at: Timestamp, events: &mut Vec<WorkoutEvent>) -> Result<(), WorkoutError> {
        if self.snapshot.phase.is_rep_phase() && self.tracker.is_open() {
            self.close_rep(at, true, events)?;
        }
        self.enter_phase(Phase::Aborted, at, events)
    }

    fn reset_session(&mut self, at: Timestamp, events: &mut Vec<WorkoutEvent>) -> Result<(), WorkoutError> {
        let from = self.snapshot.phase;
        let version = self.snapshot.version;

        self.clock.arm(self.config.warmup_secs)?;
        self.stopwatch.reset();
        self.tracker = RepTracker::new(self.role);
        self.ledger = RepLedger::new();
        self.baseline_m = self.odometer_m;
        self.snapshot = WorkoutSnapshot::initial(
            SessionId::new(),
            self.config.total_reps(),
            self.config.warmup_secs,
            self.role,
            at,
        );
        self.snapshot.version = version;

        tracing::info!(session = %self.snapshot.session, "New session after reset");
        events.push(WorkoutEvent::PhaseChanged {
            from,
            to: Phase::Warmup,
            rep_index: 1,
        });
        Ok(())
    }

    /// Rebuild clocks and trackers from an adopted snapshot.
    fn restore(&mut self, snapshot: WorkoutSnapshot, at: Timestamp) {
        self.ledger = RepLedger::from_records(&snapshot.completed_reps);
        self.clock.clear();
        self.stopwatch.reset();
        self.tracker = RepTracker::new(self.role);

        let phase = snapshot.phase;
        if phase.is_timed() {
            let duration = self.config.duration_secs(phase).unwrap_or(0);
            self.clock.restore(
                duration,
                snapshot.phase_time_remaining_secs,
                snapshot.is_running,
                at,
            );
        }

        if phase.is_rep_phase() || phase == Phase::Resting {
            if let Some((kind, set_rep)) = self.config.locate_rep(snapshot.rep_index) {
                let (reps, target_m) = self.config.block(kind).unwrap_or((0, 0.0));
                let open = phase.is_rep_phase() && !self.ledger.contains(snapshot.rep_index);
                self.tracker.enter_block(kind, reps, self.config.rep_offset(kind));
                self.tracker
                    .restore(set_rep, target_m, snapshot.distance_traveled_m, open);
                if open {
                    self.stopwatch
                        .restore(snapshot.rep_elapsed_ms, snapshot.is_running, at);
                    self.baseline_m = self.odometer_m - snapshot.distance_traveled_m;
                }
            }
        }

        self.snapshot = snapshot;
    }

    /// Stamp a local mutation: new version, fresh derived fields.
    fn commit(&mut self, command: Option<Command>, at: Timestamp, events: Vec<WorkoutEvent>) -> Vec<Action> {
        self.reconciler.note_local_mutation();

        let open = self.tracker.is_open() && self.snapshot.phase.is_rep_phase();
        let snap = &mut self.snapshot;
        snap.phase_time_remaining_secs = if snap.phase.is_timed() {
            self.clock.remaining()
        } else {
            0
        };
        snap.distance_traveled_m = if open { self.tracker.distance_m() } else { 0.0 };
        snap.rep_elapsed_ms = if open { self.stopwatch.elapsed_ms(at) } else { 0 };
        snap.completed_reps = self.ledger.to_vec();
        snap.last_command = command;
        snap.last_source = self.role;
        snap.version = snap.version.next();
        snap.updated_at = at;

        std::iter::once(Action::Publish(self.snapshot.clone()))
            .chain(events.into_iter().map(Action::EmitEvent))
            .collect()
    }
}

fn outcome_of(phase: Phase) -> Option<Outcome> {
    match phase {
        Phase::Completed => Some(Outcome::Completed),
        Phase::Aborted => Some(Outcome::Aborted),
        _ => None,
    }
}
