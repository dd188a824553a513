//! Replica reconciliation.
//!
//! The replicated state is a last-writer-wins register (phase, clocks, run
//! flags) glued to an append-only rep ledger, with one exception: a
//! `stop` always wins within a session. [`ReplicaReconciler::merge`] decides
//! between the local and a remote snapshot using only fields of the two
//! snapshots, so both devices reach the same decision for the same pair.
//!
//! Conflicts are normal operation; they are logged, never returned as errors.

use std::cmp::Ordering;

use sprintsync_types::{DeviceRole, WorkoutSnapshot};

use crate::RepLedger;

/// Tuning for [`ReplicaReconciler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// `updated_at` values closer than this are treated as concurrent.
    pub skew_tolerance_ms: u64,
    /// Consecutive corrective re-broadcasts allowed before suppression.
    pub max_corrections: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            skew_tolerance_ms: 2_000,
            max_corrections: 3,
        }
    }
}

/// How a remote snapshot was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Already applied; nothing changed.
    Duplicate,
    /// Belongs to another session with no newer lineage; discarded.
    ForeignSession,
    /// A newer session (after a reset) replaced the local one.
    NewSession,
    /// A remote `stop` overrode the local state.
    StopWins,
    /// A local `stop` was kept over a remote update.
    StopHeld,
    /// Remote version is behind; local kept.
    Stale,
    /// Remote won last-writer-wins and was adopted.
    Adopted,
    /// Local won last-writer-wins and was kept.
    KeptLocal,
}

/// Result of one merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Merge {
    /// The snapshot the local replica must hold from now on.
    pub snapshot: WorkoutSnapshot,
    /// Which rule decided.
    pub decision: Decision,
    /// `snapshot` must be sent to the peer.
    pub rebroadcast: bool,
}

impl Merge {
    /// Whether the remote snapshot replaced the local one.
    pub fn adopted(&self) -> bool {
        matches!(
            self.decision,
            Decision::NewSession | Decision::StopWins | Decision::Adopted
        )
    }
}

/// Merges remote snapshots into the local replica.
///
/// Tracks consecutive corrections so two devices with badly skewed clocks
/// cannot correct each other forever.
#[derive(Debug, Clone, Default)]
pub struct ReplicaReconciler {
    config: ReconcilerConfig,
    corrections: u32,
}

impl ReplicaReconciler {
    /// Create a reconciler with the given tuning.
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            corrections: 0,
        }
    }

    /// The tuning in use.
    pub fn config(&self) -> ReconcilerConfig {
        self.config
    }

    /// Corrective re-broadcasts since the last adoption or local mutation.
    pub fn corrections(&self) -> u32 {
        self.corrections
    }

    /// A local mutation ends any correction streak.
    pub fn note_local_mutation(&mut self) {
        self.corrections = 0;
    }

    /// Decide what the local replica holds after receiving `remote`.
    pub fn merge(&mut self, local: &WorkoutSnapshot, remote: &WorkoutSnapshot) -> Merge {
        if remote.session != local.session {
            if remote.version > local.version {
                tracing::info!(
                    session = %remote.session,
                    version = %remote.version,
                    "Adopting newer session from peer"
                );
                return self.adopt(remote.clone(), Decision::NewSession, false);
            }
            tracing::debug!(
                remote_session = %remote.session,
                remote_version = %remote.version,
                local_version = %local.version,
                "Discarding snapshot from another session"
            );
            return self.keep(local.clone(), Decision::ForeignSession, true);
        }

        if remote.same_origin(local) {
            return Merge {
                snapshot: local.clone(),
                decision: Decision::Duplicate,
                rebroadcast: false,
            };
        }

        let mut ledger = RepLedger::from_records(&local.completed_reps);
        let local_ledger_changed = ledger.union(&remote.completed_reps);
        let merged_reps = ledger.to_vec();
        let top = local.version.max(remote.version);

        if remote.is_stop_originated() && !local.is_stopped() {
            let mut snapshot = remote.clone();
            let ledger_grew = snapshot.completed_reps != merged_reps;
            snapshot.completed_reps = merged_reps;
            // rep_index never moves backwards within a session
            let behind = local.rep_index > snapshot.rep_index;
            if behind {
                snapshot.rep_index = local.rep_index;
                snapshot.set_rep = local.set_rep;
            }
            let rebroadcast = remote.version <= local.version || ledger_grew || behind;
            if rebroadcast {
                snapshot.version = top.next();
            }
            tracing::info!(
                version = %snapshot.version,
                source = %remote.last_source,
                "Peer stopped the session"
            );
            return self.adopt(snapshot, Decision::StopWins, rebroadcast);
        }

        if local.is_stop_originated() && !remote.is_stopped() {
            let mut snapshot = local.clone();
            snapshot.completed_reps = merged_reps;
            snapshot.version = top.next();
            tracing::debug!(version = %snapshot.version, "Holding local stop over peer update");
            return self.keep(snapshot, Decision::StopHeld, true);
        }

        if remote.version < local.version {
            let mut snapshot = local.clone();
            if local_ledger_changed {
                snapshot.completed_reps = merged_reps;
                snapshot.version = top.next();
            }
            tracing::debug!(
                remote_version = %remote.version,
                local_version = %local.version,
                "Stale snapshot from peer"
            );
            return self.keep(snapshot, Decision::Stale, local_ledger_changed);
        }

        if self.remote_wins(local, remote) {
            let mut snapshot = remote.clone();
            let ledger_grew = snapshot.completed_reps != merged_reps;
            snapshot.completed_reps = merged_reps;
            if ledger_grew {
                snapshot.version = top.next();
            }
            tracing::debug!(
                version = %snapshot.version,
                phase = %snapshot.phase,
                source = %remote.last_source,
                "Adopted peer snapshot"
            );
            self.adopt(snapshot, Decision::Adopted, ledger_grew)
        } else {
            let mut snapshot = local.clone();
            snapshot.completed_reps = merged_reps;
            snapshot.version = top.next();
            tracing::debug!(
                version = %snapshot.version,
                remote_version = %remote.version,
                "Local snapshot wins; correcting peer"
            );
            self.keep(snapshot, Decision::KeptLocal, true)
        }
    }

    /// Last-writer-wins between two snapshots of one session.
    ///
    /// Symmetric: swapping the arguments flips the answer unless the two are
    /// indistinguishable.
    fn remote_wins(&self, local: &WorkoutSnapshot, remote: &WorkoutSnapshot) -> bool {
        let local_at = local.updated_at.as_millis();
        let remote_at = remote.updated_at.as_millis();
        if remote_at.abs_diff(local_at) > self.config.skew_tolerance_ms {
            return remote_at > local_at;
        }
        let role_rank = |role: DeviceRole| match role {
            DeviceRole::Host => 1u8,
            DeviceRole::Companion => 0u8,
        };
        remote
            .version
            .cmp(&local.version)
            .then(role_rank(remote.last_source).cmp(&role_rank(local.last_source)))
            .then(remote_at.cmp(&local_at))
            == Ordering::Greater
    }

    fn adopt(&mut self, snapshot: WorkoutSnapshot, decision: Decision, rebroadcast: bool) -> Merge {
        self.corrections = 0;
        Merge {
            snapshot,
            decision,
            rebroadcast,
        }
    }

    fn keep(&mut self, snapshot: WorkoutSnapshot, decision: Decision, correct: bool) -> Merge {
        if !correct {
            return Merge {
                snapshot,
                decision,
                rebroadcast: false,
            };
        }
        if self.corrections >= self.config.max_corrections {
            tracing::warn!(
                corrections = self.corrections,
                ?decision,
                "Suppressing corrective re-broadcast"
            );
            return Merge {
                snapshot,
                decision,
                rebroadcast: false,
            };
        }
        self.corrections += 1;
        Merge {
            snapshot,
            decision,
            rebroadcast: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprintsync_types::{Command, Phase, RepRecord, SessionId, Timestamp, Version};

    fn base(source: DeviceRole) -> WorkoutSnapshot {
        let mut snap = WorkoutSnapshot::initial(
            SessionId::new(),
            8,
            300,
            source,
            Timestamp::from_millis(1_000_000),
        );
        snap.phase = Phase::Sprint;
        snap.rep_index = 6;
        snap.is_running = true;
        snap
    }

    fn rep(rep_index: u32, time_secs: Option<f64>) -> RepRecord {
        RepRecord {
            rep_index,
            kind: Phase::Drill,
            set_rep: rep_index,
            time_secs,
            distance_m: 20.0,
            completed_at: Timestamp::from_millis(900_000 + u64::from(rep_index)),
            source: DeviceRole::Host,
        }
    }

    fn mutate(
        from: &WorkoutSnapshot,
        source: DeviceRole,
        version: u64,
        at: u64,
    ) -> WorkoutSnapshot {
        let mut snap = from.clone();
        snap.last_source = source;
        snap.version = Version::new(version);
        snap.updated_at = Timestamp::from_millis(at);
        snap
    }

    #[test]
    fn duplicate_delivery_is_noop() {
        let mut reconciler = ReplicaReconciler::default();
        let local = base(DeviceRole::Host);

        let merge = reconciler.merge(&local, &local.clone());
        assert_eq!(merge.decision, Decision::Duplicate);
        assert_eq!(merge.snapshot, local);
        assert!(!merge.rebroadcast);
    }

    #[test]
    fn reapplying_an_adopted_snapshot_changes_nothing() {
        let mut reconciler = ReplicaReconciler::default();
        let local = base(DeviceRole::Host);
        let remote = mutate(&local, DeviceRole::Companion, 3, 1_010_000);

        let first = reconciler.merge(&local, &remote);
        assert_eq!(first.decision, Decision::Adopted);

        let second = reconciler.merge(&first.snapshot, &remote);
        assert_eq!(second.decision, Decision::Duplicate);
        assert_eq!(second.snapshot, first.snapshot);
    }

    #[test]
    fn stale_remote_is_discarded() {
        let mut reconciler = ReplicaReconciler::default();
        let mut local = base(DeviceRole::Host);
        local.version = Version::new(9);
        let remote = mutate(&local, DeviceRole::Companion, 4, 2_000_000);

        let merge = reconciler.merge(&local, &remote);
        assert_eq!(merge.decision, Decision::Stale);
        assert_eq!(merge.snapshot, local);
        assert!(!merge.rebroadcast);
    }

    #[test]
    fn stale_remote_still_contributes_reps() {
        let mut reconciler = ReplicaReconciler::default();
        let mut local = base(DeviceRole::Host);
        local.version = Version::new(9);
        local.completed_reps = vec![rep(1, Some(4.0))];
        let mut remote = mutate(&local, DeviceRole::Companion, 4, 900_000);
        remote.completed_reps = vec![rep(1, Some(4.0)), rep(2, Some(4.2))];

        let merge = reconciler.merge(&local, &remote);
        assert_eq!(merge.decision, Decision::Stale);
        assert_eq!(merge.snapshot.completed_reps.len(), 2);
        assert_eq!(merge.snapshot.version, Version::new(10));
        assert!(merge.rebroadcast);
    }

    #[test]
    fn newer_remote_is_adopted_with_ledger_union() {
        let mut reconciler = ReplicaReconciler::default();
        let mut local = base(DeviceRole::Host);
        local.version = Version::new(5);
        local.completed_reps = vec![rep(1, Some(4.0)), rep(2, Some(4.1))];
        let mut remote = mutate(&local, DeviceRole::Companion, 6, 1_100_000);
        remote.completed_reps = vec![rep(1, Some(4.0))];
        remote.phase = Phase::Resting;

        let merge = reconciler.merge(&local, &remote);
        assert_eq!(merge.decision, Decision::Adopted);
        assert_eq!(merge.snapshot.phase, Phase::Resting);
        assert_eq!(merge.snapshot.completed_reps.len(), 2);
        // the union changed what the peer sent, so it must hear about it
        assert_eq!(merge.snapshot.version, Version::new(7));
        assert!(merge.rebroadcast);
    }

    #[test]
    fn older_timestamp_keeps_local_and_corrects_peer() {
        let mut reconciler = ReplicaReconciler::default();
        let mut local = base(DeviceRole::Companion);
        local.version = Version::new(5);
        local.updated_at = Timestamp::from_millis(2_000_000);
        let remote = mutate(&local, DeviceRole::Host, 6, 1_000_000);

        let merge = reconciler.merge(&local, &remote);
        assert_eq!(merge.decision, Decision::KeptLocal);
        assert_eq!(merge.snapshot.version, Version::new(7));
        assert_eq!(merge.snapshot.updated_at, local.updated_at);
        assert!(merge.rebroadcast);
    }

    #[test]
    fn concurrent_updates_fall_back_to_version_then_host() {
        let mut reconciler = ReplicaReconciler::default();
        let local = mutate(&base(DeviceRole::Host), DeviceRole::Companion, 5, 1_000_500);
        let remote = mutate(&local, DeviceRole::Host, 5, 1_000_000);

        // within tolerance, same version: host wins
        let merge = reconciler.merge(&local, &remote);
        assert_eq!(merge.decision, Decision::Adopted);

        let higher = mutate(&local, DeviceRole::Companion, 6, 1_000_000);
        let merge = reconciler.merge(&remote, &higher);
        assert_eq!(merge.decision, Decision::Adopted);
    }

    #[test]
    fn stop_wins_regardless_of_version() {
        let mut reconciler = ReplicaReconciler::default();
        let mut local = base(DeviceRole::Host);
        local.version = Version::new(20);
        local.updated_at = Timestamp::from_millis(5_000_000);
        let mut remote = mutate(&local, DeviceRole::Companion, 3, 1_000_000);
        remote.phase = Phase::Aborted;
        remote.is_running = false;
        remote.last_command = Some(Command::Stop);

        let merge = reconciler.merge(&local, &remote);
        assert_eq!(merge.decision, Decision::StopWins);
        assert_eq!(merge.snapshot.phase, Phase::Aborted);
        assert_eq!(merge.snapshot.version, Version::new(21));
        assert!(merge.rebroadcast);
    }

    #[test]
    fn stop_from_an_earlier_rep_keeps_local_rep_index() {
        let mut reconciler = ReplicaReconciler::default();
        let mut local = base(DeviceRole::Host);
        local.rep_index = 7;
        local.set_rep = 2;
        local.version = Version::new(5);
        let mut remote = mutate(&base(DeviceRole::Companion), DeviceRole::Companion, 6, 1_000_000);
        remote.session = local.session;
        remote.phase = Phase::Aborted;
        remote.is_running = false;
        remote.set_rep = 1;
        remote.last_command = Some(Command::Stop);

        let merge = reconciler.merge(&local, &remote);
        assert_eq!(merge.decision, Decision::StopWins);
        assert_eq!(merge.snapshot.rep_index, 7);
        assert_eq!(merge.snapshot.set_rep, 2);
        assert_eq!(merge.snapshot.version, Version::new(7));
        assert!(merge.rebroadcast);
    }

    #[test]
    fn local_stop_is_held() {
        let mut reconciler = ReplicaReconciler::default();
        let mut local = base(DeviceRole::Host);
        local.phase = Phase::Aborted;
        local.last_command = Some(Command::Stop);
        local.version = Version::new(4);
        let remote = mutate(&base(DeviceRole::Companion), DeviceRole::Companion, 9, 9_000_000);
        let remote = WorkoutSnapshot {
            session: local.session,
            ..remote
        };

        let merge = reconciler.merge(&local, &remote);
        assert_eq!(merge.decision, Decision::StopHeld);
        assert_eq!(merge.snapshot.phase, Phase::Aborted);
        assert_eq!(merge.snapshot.version, Version::new(10));
        assert!(merge.rebroadcast);
    }

    #[test]
    fn foreign_session_needs_higher_version() {
        let mut reconciler = ReplicaReconciler::default();
        let mut local = base(DeviceRole::Host);
        local.version = Version::new(10);

        let mut old = base(DeviceRole::Companion);
        old.version = Version::new(8);
        let merge = reconciler.merge(&local, &old);
        assert_eq!(merge.decision, Decision::ForeignSession);
        assert_eq!(merge.snapshot, local);

        let mut reset = base(DeviceRole::Companion);
        reset.version = Version::new(11);
        let merge = reconciler.merge(&local, &reset);
        assert_eq!(merge.decision, Decision::NewSession);
        assert_eq!(merge.snapshot, reset);
    }

    #[test]
    fn corrections_are_bounded() {
        let mut reconciler = ReplicaReconciler::new(ReconcilerConfig {
            skew_tolerance_ms: 0,
            max_corrections: 2,
        });
        let mut local = base(DeviceRole::Host);
        local.updated_at = Timestamp::from_millis(9_000_000);

        let mut sent = Vec::new();
        for version in 1..=4 {
            let remote = mutate(&local, DeviceRole::Companion, version * 10, 1_000_000);
            let merge = reconciler.merge(&local, &remote);
            assert_eq!(merge.decision, Decision::KeptLocal);
            sent.push(merge.rebroadcast);
        }
        assert_eq!(sent, vec![true, true, false, false]);

        reconciler.note_local_mutation();
        let remote = mutate(&local, DeviceRole::Companion, 99, 1_000_000);
        assert!(reconciler.merge(&local, &remote).rebroadcast);
    }

    #[test]
    fn merge_never_shrinks_the_ledger() {
        let mut reconciler = ReplicaReconciler::default();
        let mut local = base(DeviceRole::Host);
        local.completed_reps = vec![rep(1, Some(4.0)), rep(2, None), rep(3, Some(4.4))];

        let mut remote = mutate(&local, DeviceRole::Companion, 1, 1_500_000);
        remote.completed_reps = vec![rep(2, Some(4.9))];
        let merge = reconciler.merge(&local, &remote);

        assert_eq!(merge.snapshot.completed_reps.len(), 3);
        // timed entry replaces the null-time one for the same rep
        assert_eq!(merge.snapshot.completed_reps[1].time_secs, Some(4.9));
    }
}
