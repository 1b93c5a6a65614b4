use rand::seq::SliceRandom;
use rand::Rng;

use crate::graph::CandidateGraph;

/// Finds a perfect giver/receiver matching by augmenting paths, or `None` if
/// the exclusions leave no perfect matching at all.
///
/// Candidate lists and the giver order are shuffled with `rng`, so different
/// seeds may land on different valid pairings. The result is positional:
/// `result[giver] == receiver`.
pub(crate) fn perfect_matching<R>(graph: &CandidateGraph, rng: &mut R) -> Option<Vec<usize>>
where
    R: Rng + ?Sized,
{
    let n = graph.len();
    let candidates: Vec<Vec<usize>> = (0..n)
        .map(|giver| {
            let mut receivers: Vec<usize> = graph.receivers(giver).collect();
            receivers.shuffle(rng);
            receivers
        })
        .collect();

    let mut givers: Vec<usize> = (0..n).collect();
    givers.shuffle(rng);

    // receiver -> giver currently holding it
    let mut holder: Vec<Option<usize>> = vec![None; n];
    for giver in givers {
        let mut visited = vec![false; n];
        if !augment(giver, &candidates, &mut holder, &mut visited) {
            return None;
        }
    }

    let mut receivers = vec![0; n];
    for (receiver, giver) in holder.into_iter().enumerate() {
        receivers[giver?] = receiver;
    }
    Some(receivers)
}

fn augment(
    giver: usize,
    candidates: &[Vec<usize>],
    holder: &mut [Option<usize>],
    visited: &mut [bool],
) -> bool {
    for &receiver in &candidates[giver] {
        if visited[receiver] {
            continue;
        }
        visited[receiver] = true;

        let free = match holder[receiver] {
            None => true,
            Some(current) => augment(current, candidates, holder, visited),
        };
        if free {
            holder[receiver] = Some(giver);
            return true;
        }
    }
    false
}
