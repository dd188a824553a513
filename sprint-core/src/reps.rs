//! Rep tracking and the append-only rep ledger.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use sprintsync_types::{DeviceRole, Phase, RepRecord, Timestamp};

use crate::WorkoutError;

/// Counts reps within one block and accumulates the open rep's distance.
#[derive(Debug, Clone, PartialEq)]
pub struct RepTracker {
    source: DeviceRole,
    kind: Phase,
    block_reps: u32,
    offset: u32,
    current: u32,
    target_m: f64,
    distance_m: f64,
    open: bool,
}

impl RepTracker {
    /// A tracker outside any block. Records it closes name `source`.
    pub fn new(source: DeviceRole) -> Self {
        Self {
            source,
            kind: Phase::Drill,
            block_reps: 0,
            offset: 0,
            current: 0,
            target_m: 0.0,
            distance_m: 0.0,
            open: false,
        }
    }

    /// Move to a new block of `block_reps` reps whose first rep has global
    /// index `offset + 1`.
    pub fn enter_block(&mut self, kind: Phase, block_reps: u32, offset: u32) {
        self.kind = kind;
        self.block_reps = block_reps;
        self.offset = offset;
        self.current = 0;
        self.distance_m = 0.0;
        self.open = false;
    }

    /// Open the next rep of the block. Returns its global index.
    pub fn begin_rep(&mut self, target_m: f64) -> u32 {
        self.current = self.current.saturating_add(1);
        self.target_m = target_m;
        self.distance_m = 0.0;
        self.open = true;
        self.rep_index()
    }

    /// Record the distance covered in the open rep.
    ///
    /// Readings below the current distance are GPS noise and are ignored.
    /// Returns whether the target is now reached.
    pub fn record_distance(&mut self, distance_m: f64) -> bool {
        if self.open && distance_m.is_finite() && distance_m > self.distance_m {
            self.distance_m = distance_m;
        }
        self.target_reached()
    }

    /// Whether the open rep has covered its target distance.
    pub fn target_reached(&self) -> bool {
        self.open && self.distance_m >= self.target_m
    }

    /// Close the open rep and produce its ledger entry.
    pub fn complete_rep(
        &mut self,
        time_secs: Option<f64>,
        at: Timestamp,
    ) -> Result<RepRecord, WorkoutError> {
        if !self.open {
            return Err(WorkoutError::RepNotOpen);
        }
        self.open = false;
        Ok(RepRecord {
            rep_index: self.rep_index(),
            kind: self.kind,
            set_rep: self.current,
            time_secs,
            distance_m: self.distance_m,
            completed_at: at,
            source: self.source,
        })
    }

    /// Close the open rep without producing an entry, because another
    /// replica already recorded it.
    pub fn abandon_rep(&mut self) {
        self.open = false;
        self.distance_m = 0.0;
    }

    /// Rep number within the block, 1-based; zero before the first rep.
    pub fn current_rep(&self) -> u32 {
        self.current
    }

    /// Session-global index of the current rep.
    pub fn rep_index(&self) -> u32 {
        self.offset + self.current
    }

    /// The current rep is the block's last.
    pub fn is_final_rep(&self) -> bool {
        self.current == self.block_reps
    }

    /// A rep is open.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Distance covered in the open rep.
    pub fn distance_m(&self) -> f64 {
        self.distance_m
    }

    /// Rep phase of the current block.
    pub fn kind(&self) -> Phase {
        self.kind
    }

    /// Rebuild from a replicated snapshot.
    pub fn restore(&mut self, current: u32, target_m: f64, distance_m: f64, open: bool) {
        self.current = current;
        self.target_m = target_m;
        self.distance_m = distance_m;
        self.open = open;
    }
}

/// The rep ledger: one entry per visited rep, keyed by `rep_index`.
///
/// Entries are never removed and local appends never overwrite. Merging two
/// replicas' ledgers is a union; when both closed the same rep, both pick the
/// same winner (see [`RepLedger::union`]), so a recorded time always
/// supersedes an untimed entry and is never lost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepLedger {
    entries: BTreeMap<u32, RepRecord>,
}

impl RepLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a snapshot's entries.
    pub fn from_records(records: &[RepRecord]) -> Self {
        let mut ledger = Self::new();
        ledger.union(records);
        ledger
    }

    /// Add a locally closed rep. Returns false if the rep is already recorded.
    pub fn append(&mut self, record: RepRecord) -> bool {
        if self.entries.contains_key(&record.rep_index) {
            return false;
        }
        self.entries.insert(record.rep_index, record);
        true
    }

    /// Merge another replica's entries. Returns whether anything changed.
    ///
    /// Missing keys are inserted. On a collision the entry with a time beats
    /// a null-time one, then the earlier `completed_at`, then the host's. An
    /// untimed entry therefore stays untimed unless the peer timed the rep.
    pub fn union(&mut self, records: &[RepRecord]) -> bool {
        let mut changed = false;
        for record in records {
            match self.entries.get(&record.rep_index) {
                None => {
                    self.entries.insert(record.rep_index, record.clone());
                    changed = true;
                }
                Some(existing) if existing != record => {
                    if precedence(record, existing) == Ordering::Less {
                        self.entries.insert(record.rep_index, record.clone());
                        changed = true;
                    }
                }
                Some(_) => {}
            }
        }
        changed
    }

    /// Look up one entry.
    pub fn get(&self, rep_index: u32) -> Option<&RepRecord> {
        self.entries.get(&rep_index)
    }

    /// Whether `rep_index` is recorded.
    pub fn contains(&self, rep_index: u32) -> bool {
        self.entries.contains_key(&rep_index)
    }

    /// Entries in `rep_index` order.
    pub fn iter(&self) -> impl Iterator<Item = &RepRecord> {
        self.entries.values()
    }

    /// Entries in `rep_index` order, for a snapshot.
    pub fn to_vec(&self) -> Vec<RepRecord> {
        self.entries.values().cloned().collect()
    }

    /// Number of recorded reps.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No reps recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Total order between two entries for the same rep; `Less` wins.
fn precedence(a: &RepRecord, b: &RepRecord) -> Ordering {
    let timed = |r: &RepRecord| if r.time_secs.is_some() { 0u8 } else { 1u8 };
    let role = |r: &RepRecord| match r.source {
        DeviceRole::Host => 0u8,
        DeviceRole::Companion => 1u8,
    };
    timed(a)
        .cmp(&timed(b))
        .then(a.completed_at.cmp(&b.completed_at))
        .then(role(a).cmp(&role(b)))
        .then_with(|| {
            let time = |r: &RepRecord| r.time_secs.unwrap_or(f64::MAX);
            time(a).total_cmp(&time(b))
        })
        .then_with(|| b.distance_m.total_cmp(&a.distance_m))
}
