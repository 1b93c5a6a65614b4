//! Secret Santa draw: assigns every participant exactly one other participant
//! to give a gift to, honoring directed exclusions.
//!
//! The entry point is [`Solver::solve`] (or the [`solve`] shorthand using the
//! default configuration). It samples random permutations first and, unless
//! configured otherwise, falls back to a bipartite matcher so that a solvable
//! group is never reported as infeasible.

mod exclusion;
mod graph;
mod matching;
mod pairing;
mod solver;

pub use exclusion::{exclusion_key, ExclusionError, ExclusionSet};
pub use pairing::{Pairing, PairingViolation};
pub use solver::{
    solve, ParseStrategyError, SolveError, Solver, SolverConfig, Strategy, DEFAULT_MAX_ATTEMPTS,
};

pub type ParticipantId = String;
