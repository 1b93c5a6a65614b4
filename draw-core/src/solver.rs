use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::exclusion::ExclusionSet;
use crate::graph::CandidateGraph;
use crate::matching::perfect_matching;
use crate::pairing::Pairing;

pub const DEFAULT_MAX_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Random permutations only. May report a solvable group as infeasible
    /// when the attempt budget runs out.
    Sampling,
    /// Random permutations, then a deterministic matcher once the budget is
    /// spent. Only fails when no valid pairing exists.
    #[default]
    SamplingThenMatching,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown draw strategy {0:?}, expected `sampling` or `sampling_then_matching`")]
pub struct ParseStrategyError(String);

impl FromStr for Strategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sampling" => Ok(Self::Sampling),
            "sampling_then_matching" => Ok(Self::SamplingThenMatching),
            _ => Err(ParseStrategyError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_attempts: usize,
    pub strategy: Strategy,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            strategy: Strategy::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SolveError<P: fmt::Debug> {
    #[error("no valid assignment found given current exclusions ({attempts} attempts)")]
    Infeasible { attempts: usize },
    #[error("participant {0:?} is listed more than once")]
    DuplicateParticipant(P),
    #[error("exclusion {giver:?} -> {receiver:?} names someone who is not participating")]
    MalformedExclusion { giver: P, receiver: P },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Solver {
    config: SolverConfig,
}

impl Solver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    /// Draws a pairing in which every participant gives to exactly one other
    /// participant and receives from exactly one, skipping excluded pairs.
    ///
    /// Each attempt shuffles the receivers against the fixed giver order and
    /// keeps the first permutation that passes. Inputs are never modified.
    pub fn solve<P, R>(
        &self,
        participants: &[P],
        exclusions: &ExclusionSet<P>,
        rng: &mut R,
    ) -> Result<Pairing<P>, SolveError<P>>
    where
        P: Clone + Eq + Hash + fmt::Debug,
        R: Rng + ?Sized,
    {
        let graph = CandidateGraph::build(participants, exclusions)?;
        let n = graph.len();

        if n < 2 {
            return Err(SolveError::Infeasible { attempts: 0 });
        }

        let matching_fallback = self.config.strategy == Strategy::SamplingThenMatching;
        if matching_fallback && graph.has_stranded_participant() {
            debug!(participants = n, "a participant has no possible partner");
            return Err(SolveError::Infeasible { attempts: 0 });
        }

        let mut receivers: Vec<usize> = (0..n).collect();
        for attempt in 1..=self.config.max_attempts {
            receivers.shuffle(rng);
            if graph.accepts(&receivers) {
                debug!(participants = n, attempt, "pairing sampled");
                return Ok(graph.to_pairing(participants, &receivers));
            }
        }

        let attempts = self.config.max_attempts;
        if !matching_fallback {
            debug!(participants = n, attempts, "sampling budget exhausted");
            return Err(SolveError::Infeasible { attempts });
        }

        debug!(
            participants = n,
            attempts, "sampling budget exhausted, falling back to matching"
        );
        perfect_matching(&graph, rng)
            .map(|receivers| graph.to_pairing(participants, &receivers))
            .ok_or(SolveError::Infeasible { attempts })
    }
}

/// [`Solver::solve`] with the default configuration.
pub fn solve<P, R>(
    participants: &[P],
    exclusions: &ExclusionSet<P>,
    rng: &mut R,
) -> Result<Pairing<P>, SolveError<P>>
where
    P: Clone + Eq + Hash + fmt::Debug,
    R: Rng + ?Sized,
{
    Solver::default().solve(participants, exclusions, rng)
}
