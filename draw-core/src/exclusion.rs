use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use thiserror::Error;

/// Separator between giver and receiver in the flat at-rest encoding.
const KEY_SEPARATOR: char = '-';

/// Directed "giver must not give to receiver" rules.
///
/// Exclusions are one-way. A mutual exclusion is two entries, see
/// [`ExclusionSet::insert_mutual`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionSet<P: Eq + Hash> {
    forbidden: HashMap<P, HashSet<P>>,
}

impl<P: Eq + Hash> Default for ExclusionSet<P> {
    fn default() -> Self {
        Self {
            forbidden: HashMap::new(),
        }
    }
}

impl<P: Clone + Eq + Hash> ExclusionSet<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the pair was already present.
    pub fn insert(&mut self, giver: P, receiver: P) -> bool {
        self.forbidden.entry(giver).or_default().insert(receiver)
    }

    pub fn insert_mutual(&mut self, a: P, b: P) {
        self.insert(a.clone(), b.clone());
        self.insert(b, a);
    }

    pub fn remove(&mut self, giver: &P, receiver: &P) -> bool {
        let Some(receivers) = self.forbidden.get_mut(giver) else {
            return false;
        };
        let removed = receivers.remove(receiver);
        if receivers.is_empty() {
            self.forbidden.remove(giver);
        }
        removed
    }

    pub fn contains(&self, giver: &P, receiver: &P) -> bool {
        self.forbidden
            .get(giver)
            .is_some_and(|receivers| receivers.contains(receiver))
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&P, &P)> {
        self.forbidden
            .iter()
            .flat_map(|(giver, receivers)| receivers.iter().map(move |r| (giver, r)))
    }

    pub fn len(&self) -> usize {
        self.forbidden.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.forbidden.is_empty()
    }
}

impl<P: Clone + Eq + Hash> FromIterator<(P, P)> for ExclusionSet<P> {
    fn from_iter<I: IntoIterator<Item = (P, P)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (giver, receiver) in iter {
            set.insert(giver, receiver);
        }
        set
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExclusionError {
    #[error("exclusion key {0:?} does not name two known participants")]
    Unparseable(String),
    #[error("exclusion key {0:?} can be split into participants in more than one way")]
    Ambiguous(String),
}

pub fn exclusion_key(giver: &str, receiver: &str) -> String {
    format!("{giver}{KEY_SEPARATOR}{receiver}")
}

impl ExclusionSet<String> {
    /// Parses flat `"giver-receiver"` keys back into an exclusion set.
    ///
    /// Participant ids may themselves contain the separator (UUIDs do), so a
    /// key is split at the one position where both halves are known ids.
    pub fn from_keys<I>(keys: I, participants: &[String]) -> Result<Self, ExclusionError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let known: HashSet<&str> = participants.iter().map(String::as_str).collect();
        let mut set = Self::new();
        for key in keys {
            let (giver, receiver) = split_key(key.as_ref(), &known)?;
            set.insert(giver.to_owned(), receiver.to_owned());
        }
        Ok(set)
    }

    /// Sorted, so snapshots are stable.
    pub fn to_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .pairs()
            .map(|(giver, receiver)| exclusion_key(giver, receiver))
            .collect();
        keys.sort_unstable();
        keys
    }
}

fn split_key<'k>(
    key: &'k str,
    known: &HashSet<&str>,
) -> Result<(&'k str, &'k str), ExclusionError> {
    let mut splits = key
        .match_indices(KEY_SEPARATOR)
        .map(|(idx, _)| (&key[..idx], &key[idx + KEY_SEPARATOR.len_utf8()..]))
        .filter(|(giver, receiver)| known.contains(giver) && known.contains(receiver));

    match (splits.next(), splits.next()) {
        (Some(pair), None) => Ok(pair),
        (None, _) => Err(ExclusionError::Unparseable(key.to_owned())),
        (Some(_), Some(_)) => Err(ExclusionError::Ambiguous(key.to_owned())),
    }
}
