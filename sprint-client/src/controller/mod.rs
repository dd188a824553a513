//! SessionController - one actor per device owning the workout replica.
//!
//! ```text
//! SessionHandle ──mpsc──▶ SessionActor ──▶ MessageChannel ──▶ peer
//!      ▲                    │   ▲
//!      └─ watch/broadcast ──┘   └── Scheduler (tick, reconnect)
//! ```
//!
//! The actor is the single place the [`WorkoutStateMachine`] is mutated:
//! user commands, distance readings, peer envelopes and timer events are
//! processed one at a time, in arrival order.

mod actor;
mod commands;
mod handle;

pub use commands::{ControllerConfig, ControllerError};
pub use handle::SessionHandle;

use std::sync::Arc;

use sprintsync_core::WorkoutStateMachine;
use sprintsync_types::SessionConfig;
use tokio::sync::{broadcast, mpsc, watch};

use crate::channel::MessageChannel;
use crate::clock::Clock;
use crate::scheduler::{Scheduled, Scheduler};
use crate::transport::Transport;
use actor::{Inboxes, SessionActor};

const COMMAND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 256;

/// Starts session controllers.
pub struct SessionController;

impl SessionController {
    /// Validate `session`, spawn the actor for this device and return its
    /// handle. Must be called from within a tokio runtime.
    ///
    /// The host announces the session to the companion as soon as the link
    /// comes up; a companion that has not been used yet joins it.
    pub fn start<T: Transport + 'static>(
        session: SessionConfig,
        config: ControllerConfig,
        transport: T,
        clock: Arc<dyn Clock>,
    ) -> Result<SessionHandle, ControllerError> {
        let started_at = clock.now();
        let machine = WorkoutStateMachine::new(session, config.role, started_at)?
            .with_reconciler(config.reconciler);

        let (scheduler, scheduled_rx) = Scheduler::new();
        let mut channel = MessageChannel::new(
            transport,
            config.device_id,
            config.role,
            config.channel.clone(),
            scheduler.clone(),
            Arc::clone(&clock),
        );
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        channel.on_receive(move |envelope| {
            let _ = inbound_tx.send(envelope);
        });

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot().clone());
        let (event_tx, _) = broadcast::channel(EVENT_QUEUE);
        let status_rx = channel.subscribe_status();
        let ticker = scheduler.every(config.tick_interval, Scheduled::Tick);

        let handle = SessionHandle::new(
            config.role,
            config.device_id,
            cmd_tx,
            snapshot_rx,
            status_rx,
            event_tx.clone(),
        );

        let actor = SessionActor {
            machine,
            reconciler: config.reconciler,
            channel,
            clock,
            started_at,
            snapshots: snapshot_tx,
            events: event_tx,
        };
        let inboxes = Inboxes {
            cmd_rx,
            inbound_rx,
            scheduled_rx,
            ticker,
        };
        tokio::spawn(actor.run(inboxes));

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::MockTransport;
    use sprintsync_core::{Outcome, WorkoutEvent, WorkoutError};
    use sprintsync_types::{
        Command, DeviceId, DeviceRole, Envelope, Message, Phase, SessionStart, Timestamp, Version,
        WorkoutSnapshot,
    };
    use std::time::Duration;

    fn config() -> SessionConfig {
        SessionConfig::sprints(3, 40.0, 60).with_plan(vec![
            Phase::Warmup,
            Phase::Sprint,
            Phase::Cooldown,
        ])
    }

    fn start(role: DeviceRole, transport: &MockTransport, clock: &ManualClock) -> SessionHandle {
        let controller =
            ControllerConfig::new(role).with_tick_interval(Duration::from_millis(20));
        SessionController::start(config(), controller, transport.clone(), Arc::new(clock.clone()))
            .unwrap()
    }

    async fn wait_for<F>(handle: &SessionHandle, pred: F) -> WorkoutSnapshot
    where
        F: Fn(&WorkoutSnapshot) -> bool,
    {
        let mut rx = handle.snapshots();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| pred(s)))
            .await
            .expect("timed out")
            .expect("controller stopped");
        snapshot.clone()
    }

    // ===========================================
    // Local commands
    // ===========================================

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let transport = MockTransport::new();
        let clock = ManualClock::new(Timestamp::from_millis(0));
        let result = SessionController::start(
            SessionConfig::sprints(0, 40.0, 60),
            ControllerConfig::new(DeviceRole::Host),
            transport,
            Arc::new(clock),
        );
        assert!(matches!(result, Err(ControllerError::Workout(_))));
    }

    #[tokio::test]
    async fn command_returns_local_snapshot() {
        let transport = MockTransport::new();
        let clock = ManualClock::new(Timestamp::from_millis(1_000));
        let handle = start(DeviceRole::Host, &transport, &clock);

        let snapshot = handle.play().await.unwrap();

        assert!(snapshot.is_running);
        assert_eq!(snapshot.phase, Phase::Warmup);
        assert_eq!(snapshot.version, Version::new(1));
        assert_eq!(handle.snapshot(), snapshot);
    }

    #[tokio::test]
    async fn illegal_command_surfaces_error() {
        let transport = MockTransport::new();
        let clock = ManualClock::new(Timestamp::from_millis(0));
        let handle = start(DeviceRole::Host, &transport, &clock);

        let err = handle.pause().await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Workout(WorkoutError::IllegalTransition { .. })
        ));
    }

    #[tokio::test]
    async fn add_time_extends_current_countdown() {
        let transport = MockTransport::new();
        let clock = ManualClock::new(Timestamp::from_millis(0));
        let handle = start(DeviceRole::Host, &transport, &clock);
        handle.play().await.unwrap();

        clock.advance(Duration::from_secs(30));
        handle.tick().await.unwrap();
        wait_for(&handle, |s| s.phase_time_remaining_secs == 270).await;

        let snapshot = handle.add_time(60).await.unwrap();
        assert_eq!(snapshot.phase, Phase::Warmup);
        assert_eq!(snapshot.phase_time_remaining_secs, 330);
        assert_eq!(snapshot.last_command, Some(Command::AddTime { secs: 60 }));
    }

    #[tokio::test]
    async fn published_snapshots_reach_transport() {
        let transport = MockTransport::new();
        let clock = ManualClock::new(Timestamp::from_millis(0));
        let handle = start(DeviceRole::Host, &transport, &clock);

        handle.play().await.unwrap();
        handle.skip().await.unwrap();
        assert_eq!(handle.pending_count().await.unwrap(), 0);

        let versions: Vec<u64> = transport
            .sent_messages()
            .iter()
            .filter_map(|m| match m {
                Message::Snapshot(s) => Some(s.version.value()),
                _ => None,
            })
            .collect();
        assert_eq!(versions, vec![1, 2]);
        assert!(transport
            .sent_messages()
            .iter()
            .any(|m| matches!(m, Message::SessionStart(_))));
    }

    #[tokio::test]
    async fn ticks_follow_the_clock() {
        let transport = MockTransport::new();
        let clock = ManualClock::new(Timestamp::from_millis(0));
        let handle = start(DeviceRole::Host, &transport, &clock);
        handle.play().await.unwrap();

        clock.advance(Duration::from_secs(30));
        handle.tick().await.unwrap();

        let snapshot = wait_for(&handle, |s| s.phase_time_remaining_secs == 270).await;
        assert_eq!(snapshot.version, Version::new(1));
    }

    #[tokio::test]
    async fn distance_completes_rep_and_emits_event() {
        let transport = MockTransport::new();
        let clock = ManualClock::new(Timestamp::from_millis(0));
        let handle = start(DeviceRole::Host, &transport, &clock);
        let mut events = handle.events();

        handle.play().await.unwrap();
        let snapshot = handle.skip().await.unwrap();
        assert_eq!(snapshot.phase, Phase::Sprint);

        clock.advance(Duration::from_millis(5_400));
        handle.distance(40.0).await.unwrap();

        let snapshot = wait_for(&handle, |s| s.phase == Phase::Resting).await;
        assert_eq!(snapshot.completed_reps.len(), 1);
        assert_eq!(snapshot.completed_reps[0].time_secs, Some(5.4));

        let mut saw_rep = false;
        while let Ok(event) = events.try_recv() {
            if let WorkoutEvent::RepCompleted(record) = event {
                assert_eq!(record.rep_index, 1);
                saw_rep = true;
            }
        }
        assert!(saw_rep);
    }

    #[tokio::test]
    async fn stop_finishes_session() {
        let transport = MockTransport::new();
        let clock = ManualClock::new(Timestamp::from_millis(0));
        let handle = start(DeviceRole::Companion, &transport, &clock);
        let mut events = handle.events();

        let snapshot = handle.stop().await.unwrap();

        assert_eq!(snapshot.phase, Phase::Aborted);
        let mut finished = None;
        while let Ok(event) = events.try_recv() {
            if let WorkoutEvent::SessionFinished { outcome } = event {
                finished = Some(outcome);
            }
        }
        assert_eq!(finished, Some(Outcome::Aborted));
    }

    // ===========================================
    // Peer messages
    // ===========================================

    #[tokio::test]
    async fn untouched_companion_joins_announced_session() {
        let transport = MockTransport::new();
        let clock = ManualClock::new(Timestamp::from_millis(0));
        let handle = start(DeviceRole::Companion, &transport, &clock);

        let host_session = sprintsync_types::SessionId::new();
        let start = SessionStart {
            session: host_session,
            config: SessionConfig::sprints(5, 60.0, 90)
                .with_plan(vec![Phase::Warmup, Phase::Sprint]),
            started_at: Timestamp::from_millis(0),
        };
        transport.push_inbound(&Envelope::new(
            DeviceId::random(),
            DeviceRole::Host,
            1,
            Version::zero(),
            Timestamp::from_millis(0),
            Message::SessionStart(start),
        ));

        let snapshot = wait_for(&handle, |s| s.session == host_session).await;
        assert_eq!(snapshot.total_reps, 5);
    }

    #[tokio::test]
    async fn peer_command_runs_locally() {
        let transport = MockTransport::new();
        let clock = ManualClock::new(Timestamp::from_millis(0));
        let handle = start(DeviceRole::Host, &transport, &clock);

        transport.push_inbound(&Envelope::new(
            DeviceId::random(),
            DeviceRole::Companion,
            1,
            Version::zero(),
            Timestamp::from_millis(0),
            Message::Command(sprintsync_types::CommandRequest {
                command: Command::Play,
                issued_at: Timestamp::from_millis(0),
            }),
        ));

        let snapshot = wait_for(&handle, |s| s.is_running).await;
        assert_eq!(snapshot.last_source, DeviceRole::Host);
    }

    #[tokio::test]
    async fn remote_command_is_sent_not_applied() {
        let transport = MockTransport::new();
        let clock = ManualClock::new(Timestamp::from_millis(0));
        let handle = start(DeviceRole::Companion, &transport, &clock);

        handle.remote_command(Command::Play).await.unwrap();

        assert!(!handle.snapshot().is_running);
        assert!(transport.sent_messages().iter().any(|m| matches!(
            m,
            Message::Command(request) if request.command == Command::Play
        )));
    }

    #[tokio::test]
    async fn offline_commands_queue() {
        let transport = MockTransport::new();
        transport.set_reachable(false);
        let clock = ManualClock::new(Timestamp::from_millis(0));
        let handle = start(DeviceRole::Host, &transport, &clock);

        handle.play().await.unwrap();
        handle.skip().await.unwrap();

        assert!(handle.pending_count().await.unwrap() >= 2);
        assert_eq!(
            *handle.sync_status().borrow(),
            crate::channel::SyncStatus::Offline
        );
    }

    #[tokio::test]
    async fn shutdown_closes_handle() {
        let transport = MockTransport::new();
        let clock = ManualClock::new(Timestamp::from_millis(0));
        let handle = start(DeviceRole::Host, &transport, &clock);

        handle.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            handle.play().await,
            Err(ControllerError::Closed)
        ));
    }
}
