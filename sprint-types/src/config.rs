//! Session configuration.
//!
//! A [`SessionConfig`] is chosen once at session start and never mutated.
//! Both devices derive rep numbering and phase routing from it, so they must
//! run from identical copies (the host ships it in a `SessionStart` message).

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Phase};

/// Distance reps for a drill or strides block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepBlock {
    /// Number of reps in the block.
    pub reps: u32,
    /// Target distance of each rep in meters.
    pub distance_m: f64,
}

/// The sprint block: distance reps separated by a fixed rest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SprintBlock {
    /// Total sprint reps.
    pub reps: u32,
    /// Target distance of each rep in meters.
    pub distance_m: f64,
    /// Rest between two reps in seconds. Not adapted to sprint times.
    pub rest_secs: u32,
}

/// Immutable description of one sprint session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Ordered phase plan; a subsequence of the canonical phase order.
    pub plan: Vec<Phase>,
    /// Warm-up countdown in seconds.
    #[serde(default = "default_block_secs")]
    pub warmup_secs: u32,
    /// Stretch countdown in seconds.
    #[serde(default = "default_block_secs")]
    pub stretch_secs: u32,
    /// Cooldown countdown in seconds.
    #[serde(default = "default_block_secs")]
    pub cooldown_secs: u32,
    /// Drill reps.
    #[serde(default = "default_drill")]
    pub drill: RepBlock,
    /// Stride reps.
    #[serde(default = "default_strides")]
    pub strides: RepBlock,
    /// Sprint reps.
    pub sprint: SprintBlock,
}

fn default_block_secs() -> u32 {
    300 // 5 minutes
}

fn default_drill() -> RepBlock {
    RepBlock {
        reps: 2,
        distance_m: 20.0,
    }
}

fn default_strides() -> RepBlock {
    RepBlock {
        reps: 3,
        distance_m: 20.0,
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::sprints(4, 40.0, 120)
    }
}

impl SessionConfig {
    /// A full session (every plannable phase) around the given sprint block.
    pub fn sprints(reps: u32, distance_m: f64, rest_secs: u32) -> Self {
        Self {
            plan: vec![
                Phase::Warmup,
                Phase::Stretch,
                Phase::Drill,
                Phase::Strides,
                Phase::Sprint,
                Phase::Cooldown,
            ],
            warmup_secs: default_block_secs(),
            stretch_secs: default_block_secs(),
            cooldown_secs: default_block_secs(),
            drill: default_drill(),
            strides: default_strides(),
            sprint: SprintBlock {
                reps,
                distance_m,
                rest_secs,
            },
        }
    }

    /// Replace the phase plan.
    pub fn with_plan(mut self, plan: Vec<Phase>) -> Self {
        self.plan = plan;
        self
    }

    /// Check every field; the state machine refuses unvalidated configs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_plan()?;

        for phase in [Phase::Drill, Phase::Strides, Phase::Sprint] {
            if !self.is_planned(phase) {
                continue;
            }
            let (reps, distance_m) = self.block(phase).unwrap_or((0, 0.0));
            if reps == 0 {
                return Err(ConfigError::ZeroReps { phase });
            }
            if !distance_m.is_finite() || distance_m <= 0.0 {
                return Err(ConfigError::InvalidDistance { phase, distance_m });
            }
        }

        self.plan
            .iter()
            .filter_map(|&p| self.block(p))
            .try_fold(0u32, |total, (reps, _)| total.checked_add(reps))
            .ok_or(ConfigError::TooManyReps)?;

        for phase in [Phase::Warmup, Phase::Stretch, Phase::Cooldown] {
            if self.is_planned(phase) && self.duration_secs(phase) == Some(0) {
                return Err(ConfigError::ZeroDuration { phase });
            }
        }
        if self.sprint.reps > 1 && self.sprint.rest_secs == 0 {
            return Err(ConfigError::ZeroDuration {
                phase: Phase::Resting,
            });
        }

        Ok(())
    }

    fn validate_plan(&self) -> Result<(), ConfigError> {
        if let Some(phase) = self.plan.iter().find(|p| !p.is_plannable()) {
            return Err(ConfigError::InvalidPlan(format!(
                "{phase} is implied and cannot be planned"
            )));
        }
        if self.plan.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::InvalidPlan(
                "phases must appear once, in timeline order".into(),
            ));
        }
        if self.plan.first() != Some(&Phase::Warmup) {
            return Err(ConfigError::InvalidPlan("plan must start with warmup".into()));
        }
        if !self.is_planned(Phase::Sprint) {
            return Err(ConfigError::InvalidPlan("plan must include sprint".into()));
        }
        Ok(())
    }

    /// Whether the plan visits `phase`.
    pub fn is_planned(&self, phase: Phase) -> bool {
        self.plan.contains(&phase)
    }

    /// The first planned phase after `phase`, or `Completed` when none is left.
    pub fn next_planned_after(&self, phase: Phase) -> Phase {
        self.plan
            .iter()
            .copied()
            .find(|p| *p > phase)
            .unwrap_or(Phase::Completed)
    }

    /// Countdown length of a timed phase.
    pub fn duration_secs(&self, phase: Phase) -> Option<u32> {
        match phase {
            Phase::Warmup => Some(self.warmup_secs),
            Phase::Stretch => Some(self.stretch_secs),
            Phase::Resting => Some(self.sprint.rest_secs),
            Phase::Cooldown => Some(self.cooldown_secs),
            _ => None,
        }
    }

    /// `(reps, distance_m)` of a rep phase's block.
    pub fn block(&self, phase: Phase) -> Option<(u32, f64)> {
        match phase {
            Phase::Drill => Some((self.drill.reps, self.drill.distance_m)),
            Phase::Strides => Some((self.strides.reps, self.strides.distance_m)),
            Phase::Sprint => Some((self.sprint.reps, self.sprint.distance_m)),
            _ => None,
        }
    }

    /// Number of ledger entries before the first rep of `phase`'s block.
    ///
    /// Rep indices run across the whole session in plan order, so the
    /// `n`-th rep of a block has global index `rep_offset(block) + n`.
    pub fn rep_offset(&self, phase: Phase) -> u32 {
        self.plan
            .iter()
            .copied()
            .filter(|p| p.is_rep_phase() && *p < phase)
            .filter_map(|p| self.block(p).map(|(reps, _)| reps))
            .sum()
    }

    /// Total reps across every planned rep phase.
    pub fn total_reps(&self) -> u32 {
        self.plan
            .iter()
            .copied()
            .filter(|p| p.is_rep_phase())
            .filter_map(|p| self.block(p).map(|(reps, _)| reps))
            .sum()
    }

    /// Map a global rep index back to `(block phase, rep within block)`.
    pub fn locate_rep(&self, rep_index: u32) -> Option<(Phase, u32)> {
        self.plan
            .iter()
            .copied()
            .filter(|p| p.is_rep_phase())
            .find_map(|p| {
                let (reps, _) = self.block(p)?;
                let offset = self.rep_offset(p);
                (rep_index > offset && rep_index <= offset + reps)
                    .then(|| (p, rep_index - offset))
            })
    }
}
