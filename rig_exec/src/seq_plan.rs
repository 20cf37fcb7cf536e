//! # Sequence Planner
//!
//! A session consists of nine subtrials. The first three probe a single axis of motion each, the
//! remaining six probe combined motions, one for each ordering of the three axes. The order in
//! which the axes and combinations are probed is randomised once per run.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Labels of the three axes of motion.
pub const AXIS_LABELS: [char; 3] = ['F', 'A', 'L'];

/// Number of single axis subtrials at the start of the plan.
pub const NUM_SINGLE: usize = 3;

/// Number of combined subtrials following the single axis ones.
pub const NUM_COMBINED: usize = 6;

/// Total number of subtrials in a plan.
pub const NUM_SUBTRIALS: usize = NUM_SINGLE + NUM_COMBINED;

/// Alarm threshold scale for each subtrial, indexed from subtrial 1.
const THRESHOLD_SCALES: [f64; NUM_SUBTRIALS] = [2.0, 2.0, 2.0, 2.0, 4.0, 6.0, 8.0, 10.0, 12.0];

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The ordered motion labels of the nine subtrials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencePlan {
    entries: Vec<String>,
}

/// Holds the plan for the current run.
#[derive(Debug, Default)]
pub struct SequencePlanner {
    plan: Option<SequencePlan>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SequencePlan {
    /// Generate a plan using the thread-local random number generator.
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    /// Generate a plan from the given random number generator.
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut singles: Vec<String> = AXIS_LABELS.iter().map(|c| c.to_string()).collect();
        singles.shuffle(rng);

        let mut combined = axis_permutations();
        combined.shuffle(rng);

        Self {
            entries: singles.into_iter().chain(combined).collect(),
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Label of the given subtrial, indexed from 1.
    pub fn label(&self, subtrial: usize) -> Option<&str> {
        subtrial
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .map(|s| s.as_str())
    }

    /// Iterate over `(subtrial, label)` pairs, subtrials indexed from 1.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, s)| (i + 1, s.as_str()))
    }
}

impl SequencePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new plan, replacing any previous one.
    pub fn generate(&mut self) -> &SequencePlan {
        let plan = SequencePlan::generate();
        info!("Generated sequence plan: {}", plan.entries.join(", "));
        self.plan.insert(plan)
    }

    pub fn plan(&self) -> Option<&SequencePlan> {
        self.plan.as_ref()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Alarm threshold scale of the given subtrial (indexed from 1), or `None` if out of range.
pub fn threshold_scale_for(subtrial: usize) -> Option<f64> {
    subtrial
        .checked_sub(1)
        .and_then(|i| THRESHOLD_SCALES.get(i))
        .copied()
}

/// All six orderings of the three axis labels.
fn axis_permutations() -> Vec<String> {
    let mut perms = Vec::with_capacity(NUM_COMBINED);

    for a in AXIS_LABELS.iter() {
        for b in AXIS_LABELS.iter().filter(|b| *b != a) {
            for c in AXIS_LABELS.iter().filter(|c| *c != a && *c != b) {
                perms.push([a, b, c].iter().copied().collect());
            }
        }
    }

    perms
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
