use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exclusion::ExclusionSet;

/// Giver → receiver. Serialized as a plain map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pairing<P: Eq + Hash> {
    assignments: HashMap<P, P>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PairingViolation<P: fmt::Debug> {
    #[error("pairing has {found} givers, expected {expected}")]
    SizeMismatch { expected: usize, found: usize },
    #[error("participant {0:?} gives no gift")]
    MissingGiver(P),
    #[error("participant {0:?} gives to themselves")]
    SelfAssignment(P),
    #[error("{giver:?} gives to excluded {receiver:?}")]
    Excluded { giver: P, receiver: P },
    #[error("participant {0:?} receives more than one gift")]
    DuplicateReceiver(P),
    #[error("{0:?} receives a gift but is not participating")]
    UnknownReceiver(P),
}

impl<P: Eq + Hash> Pairing<P> {
    pub fn receiver_for<Q>(&self, giver: &Q) -> Option<&P>
    where
        P: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.assignments.get(giver)
    }

    pub fn giver_for<Q>(&self, receiver: &Q) -> Option<&P>
    where
        P: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.assignments
            .iter()
            .find(|(_, r)| <P as Borrow<Q>>::borrow(*r) == receiver)
            .map(|(giver, _)| giver)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&P, &P)> {
        self.assignments.iter()
    }
}

impl<P: Clone + Eq + Hash + fmt::Debug> Pairing<P> {
    /// Checks that this is a bijection over `participants` with no
    /// self-assignment and no excluded pair.
    pub fn verify(
        &self,
        participants: &[P],
        exclusions: &ExclusionSet<P>,
    ) -> Result<(), PairingViolation<P>> {
        if self.assignments.len() != participants.len() {
            return Err(PairingViolation::SizeMismatch {
                expected: participants.len(),
                found: self.assignments.len(),
            });
        }

        let known: HashSet<&P> = participants.iter().collect();
        let mut received = HashSet::with_capacity(participants.len());
        for giver in participants {
            let receiver = self
                .assignments
                .get(giver)
                .ok_or_else(|| PairingViolation::MissingGiver(giver.clone()))?;
            if !known.contains(receiver) {
                return Err(PairingViolation::UnknownReceiver(receiver.clone()));
            }
            if receiver == giver {
                return Err(PairingViolation::SelfAssignment(giver.clone()));
            }
            if exclusions.contains(giver, receiver) {
                return Err(PairingViolation::Excluded {
                    giver: giver.clone(),
                    receiver: receiver.clone(),
                });
            }
            if !received.insert(receiver) {
                return Err(PairingViolation::DuplicateReceiver(receiver.clone()));
            }
        }

        Ok(())
    }
}

impl<P: Eq + Hash> FromIterator<(P, P)> for Pairing<P> {
    fn from_iter<I: IntoIterator<Item = (P, P)>>(iter: I) -> Self {
        Self {
            assignments: iter.into_iter().collect(),
        }
    }
}
