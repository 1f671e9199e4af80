//! Worker affinity.
//!
//! An [`Affinity`] restricts which workers may run a node. Nodes whose state is
//! mutated on every invocation (the serializer) are pinned to a single worker;
//! stateless nodes are left unrestricted so the scheduler can place them
//! anywhere.

use std::collections::BTreeSet;
use std::fmt;

/// Index of a worker in the scheduler's pool, starting at 0.
pub type WorkerId = usize;

/// Set of workers a node may execute on.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Affinity {
  /// Any worker may run the node.
  #[default]
  Unrestricted,
  /// Only the listed workers may run the node.
  Workers(BTreeSet<WorkerId>),
}

impl Affinity {
  /// Pins the node to exactly one worker.
  pub fn pinned(worker: WorkerId) -> Self {
    Self::Workers(BTreeSet::from([worker]))
  }

  /// Restricts the node to the given workers.
  pub fn workers(workers: impl IntoIterator<Item = WorkerId>) -> Self {
    Self::Workers(workers.into_iter().collect())
  }

  /// Returns `true` if `worker` may run the node.
  pub fn allows(&self, worker: WorkerId) -> bool {
    match self {
      Self::Unrestricted => true,
      Self::Workers(set) => set.contains(&worker),
    }
  }

  /// Returns the single worker of a pinned node.
  pub fn pinned_worker(&self) -> Option<WorkerId> {
    match self {
      Self::Workers(set) if set.len() == 1 => set.iter().next().copied(),
      _ => None,
    }
  }

  /// Returns `true` if the set names no worker at all.
  pub fn is_empty(&self) -> bool {
    matches!(self, Self::Workers(set) if set.is_empty())
  }

  /// Iterates over the explicitly listed workers (empty when unrestricted).
  pub fn listed(&self) -> impl Iterator<Item = WorkerId> + '_ {
    let set = match self {
      Self::Unrestricted => None,
      Self::Workers(set) => Some(set),
    };
    set.into_iter().flat_map(|s| s.iter().copied())
  }
}

impl fmt::Display for Affinity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Unrestricted => write!(f, "any"),
      Self::Workers(set) => {
        let ids: Vec<String> = set.iter().map(|w| w.to_string()).collect();
        write!(f, "[{}]", ids.join(","))
      }
    }
  }
}
