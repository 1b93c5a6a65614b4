use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use crate::exclusion::ExclusionSet;
use crate::pairing::Pairing;
use crate::solver::SolveError;

/// Participants by position, with exclusions resolved to positions once so
/// the sampling loop never hashes ids.
pub(crate) struct CandidateGraph {
    forbidden: Vec<HashSet<usize>>,
}

impl CandidateGraph {
    /// Rejects duplicate participants and exclusions naming unknown ids.
    pub(crate) fn build<P>(
        participants: &[P],
        exclusions: &ExclusionSet<P>,
    ) -> Result<Self, SolveError<P>>
    where
        P: Clone + Eq + Hash + fmt::Debug,
    {
        let mut index = HashMap::with_capacity(participants.len());
        for (position, participant) in participants.iter().enumerate() {
            if index.insert(participant, position).is_some() {
                return Err(SolveError::DuplicateParticipant(participant.clone()));
            }
        }

        let mut forbidden = vec![HashSet::new(); participants.len()];
        for (giver, receiver) in exclusions.pairs() {
            match (index.get(giver), index.get(receiver)) {
                (Some(&g), Some(&r)) => {
                    forbidden[g].insert(r);
                }
                _ => {
                    return Err(SolveError::MalformedExclusion {
                        giver: giver.clone(),
                        receiver: receiver.clone(),
                    })
                }
            }
        }

        Ok(Self { forbidden })
    }

    pub(crate) fn len(&self) -> usize {
        self.forbidden.len()
    }

    pub(crate) fn allows(&self, giver: usize, receiver: usize) -> bool {
        giver != receiver && !self.forbidden[giver].contains(&receiver)
    }

    pub(crate) fn receivers(&self, giver: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).filter(move |&receiver| self.allows(giver, receiver))
    }

    /// A participant nobody may give to, or who may give to nobody, rules out
    /// every pairing.
    pub(crate) fn has_stranded_participant(&self) -> bool {
        let n = self.len();
        let mut can_receive = vec![false; n];
        for giver in 0..n {
            let mut any = false;
            for receiver in self.receivers(giver) {
                can_receive[receiver] = true;
                any = true;
            }
            if !any {
                return true;
            }
        }
        can_receive.contains(&false)
    }

    /// Is the positional assignment `receivers[giver] = receiver` allowed?
    pub(crate) fn accepts(&self, receivers: &[usize]) -> bool {
        receivers
            .iter()
            .enumerate()
            .all(|(giver, &receiver)| self.allows(giver, receiver))
    }

    pub(crate) fn to_pairing<P>(&self, participants: &[P], receivers: &[usize]) -> Pairing<P>
    where
        P: Clone + Eq + Hash,
    {
        participants
            .iter()
            .zip(receivers)
            .map(|(giver, &receiver)| (giver.clone(), participants[receiver].clone()))
            .collect()
    }
}
