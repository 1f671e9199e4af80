//! # Graph
//!
//! This module defines the [`Graph`] struct: the fixed set of nodes and the
//! edges between their ports that a [`Scheduler`](crate::scheduler::Scheduler)
//! executes.
//!
//! ## Structure
//!
//! - **Nodes** are added once and addressed by the [`NodeId`] returned from
//!   [`Graph::add_node`]. A node's affinity is read at that moment and never
//!   again.
//! - **Edges** connect the output of one node to one input port of another.
//!   An output may fan out to any number of ports; an input port has exactly
//!   one producer.
//!
//! ## Validation
//!
//! [`Graph::connect`] rejects edges that would break tag correlation: a node
//! with untagged output (feeder, gate) cannot feed a port that needs tags
//! (any serializer port, port 0 of a tag-preserving transform).
//! [`Graph::validate`] checks, before a run, that every input port is
//! connected and every affinity set names existing workers.
//!
//! ## Example
//!
//! ```rust
//! use tagweave::graph::Graph;
//! use tagweave::nodes::{FilterTagged, Serializer, Source};
//! use tagweave::time::value;
//!
//! let mut graph = Graph::new("example");
//! let src = graph.add_node(Box::new(Source::from_values("src", 0..8i64)))?;
//! let neg = graph.add_node(Box::new(FilterTagged::new("neg", 1, |v| {
//!   Ok(value(-*v[0].downcast_ref::<i64>().ok_or("expected i64")?))
//! })))?;
//! let ser = graph.add_node(Box::new(Serializer::new("ser", 1, |v| Ok(v[0].clone()))))?;
//! graph.connect(src, neg, 0)?;
//! graph.connect(neg, ser, 0)?;
//! graph.validate(2)?;
//! # Ok::<(), tagweave::error::GraphError>(())
//! ```

use crate::affinity::{Affinity, WorkerId};
use crate::error::GraphError;
use crate::node::{Node, OutputKind};
use crate::operand::Destination;
use std::collections::HashMap;
use std::fmt;

/// Identifier of a node within its graph.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(pub usize);

impl NodeId {
  /// Position of the node in its graph.
  pub fn index(self) -> usize {
    self.0
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// A node together with the graph-level facts captured when it was added.
pub(crate) struct NodeEntry {
  pub(crate) node: Box<dyn Node>,
  pub(crate) name: String,
  pub(crate) arity: usize,
  pub(crate) affinity: Affinity,
  pub(crate) output_kind: OutputKind,
  pub(crate) destinations: Vec<Destination>,
  pub(crate) upstream: Vec<Option<NodeId>>,
}

/// A fixed dataflow graph.
pub struct Graph {
  name: String,
  entries: Vec<NodeEntry>,
  by_name: HashMap<String, NodeId>,
}

impl Graph {
  /// Creates an empty graph.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      entries: Vec::new(),
      by_name: HashMap::new(),
    }
  }

  /// Returns the name of the graph.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Number of nodes.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Returns `true` if the graph has no nodes.
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Adds a node and returns its id.
  ///
  /// # Errors
  ///
  /// Returns [`GraphError::DuplicateNode`] if a node with the same name
  /// already exists.
  pub fn add_node(&mut self, node: Box<dyn Node>) -> Result<NodeId, GraphError> {
    let name = node.name().to_string();
    if self.by_name.contains_key(&name) {
      return Err(GraphError::DuplicateNode(name));
    }
    let id = NodeId(self.entries.len());
    let arity = node.input_arity();
    self.entries.push(NodeEntry {
      name: name.clone(),
      arity,
      affinity: node.affinity(),
      output_kind: node.output_kind(),
      destinations: Vec::new(),
      upstream: vec![None; arity],
      node,
    });
    self.by_name.insert(name, id);
    Ok(id)
  }

  /// Looks a node up by name.
  pub fn find_node_by_name(&self, name: &str) -> Option<NodeId> {
    self.by_name.get(name).copied()
  }

  /// Returns the name of a node.
  pub fn node_name(&self, id: NodeId) -> Option<&str> {
    self.entries.get(id.0).map(|e| e.name.as_str())
  }

  /// Returns the affinity captured when the node was added.
  pub fn affinity(&self, id: NodeId) -> Option<&Affinity> {
    self.entries.get(id.0).map(|e| &e.affinity)
  }

  /// Downstream ports fed by a node.
  pub fn destinations(&self, id: NodeId) -> &[Destination] {
    self
      .entries
      .get(id.0)
      .map(|e| e.destinations.as_slice())
      .unwrap_or(&[])
  }

  /// Connects the output of `from` to input `port` of `to`.
  ///
  /// # Errors
  ///
  /// - [`GraphError::UnknownNode`] if either id is not in this graph
  /// - [`GraphError::PortOutOfRange`] if `to` has no such port
  /// - [`GraphError::PortAlreadyConnected`] if the port already has a producer
  /// - [`GraphError::UntaggedIntoTaggedPort`] if `from` emits untagged values
  ///   and the port needs tags
  pub fn connect(&mut self, from: NodeId, to: NodeId, port: usize) -> Result<(), GraphError> {
    let source = self.entry(from)?;
    let (from_name, from_kind) = (source.name.clone(), source.output_kind);

    let target = self.entry(to)?;
    if port >= target.arity {
      return Err(GraphError::PortOutOfRange {
        node: target.name.clone(),
        port,
        arity: target.arity,
      });
    }
    if target.upstream[port].is_some() {
      return Err(GraphError::PortAlreadyConnected {
        node: target.name.clone(),
        port,
      });
    }
    if from_kind == OutputKind::Untagged && target.node.requires_tagged_input(port) {
      return Err(GraphError::UntaggedIntoTaggedPort {
        from: from_name,
        to: target.name.clone(),
        port,
      });
    }
    let worker = target.affinity.pinned_worker();

    self.entries[to.0].upstream[port] = Some(from);
    self.entries[from.0].destinations.push(Destination {
      node: to,
      port,
      worker,
    });
    Ok(())
  }

  /// Checks that the graph can run on `workers` workers.
  ///
  /// # Errors
  ///
  /// - [`GraphError::PortNotConnected`] for an input port without producer
  /// - [`GraphError::EmptyAffinity`] for a node no worker may run
  /// - [`GraphError::UnknownWorker`] for an affinity naming a missing worker
  pub fn validate(&self, workers: usize) -> Result<(), GraphError> {
    for entry in &self.entries {
      if let Some(port) = entry.upstream.iter().position(Option::is_none) {
        return Err(GraphError::PortNotConnected {
          node: entry.name.clone(),
          port,
        });
      }
      if entry.affinity.is_empty() {
        return Err(GraphError::EmptyAffinity(entry.name.clone()));
      }
      if let Some(worker) = entry.affinity.listed().find(|w| *w >= workers) {
        return Err(GraphError::UnknownWorker {
          node: entry.name.clone(),
          worker,
          workers,
        });
      }
    }
    Ok(())
  }

  /// Hands the nodes over to a scheduler.
  pub(crate) fn into_entries(self) -> Vec<NodeEntry> {
    self.entries
  }

  fn entry(&self, id: NodeId) -> Result<&NodeEntry, GraphError> {
    self.entries.get(id.0).ok_or(GraphError::UnknownNode(id.0))
  }
}

impl fmt::Debug for Graph {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let nodes: Vec<(&str, usize, String)> = self
      .entries
      .iter()
      .map(|e| (e.name.as_str(), e.arity, e.affinity.to_string()))
      .collect();
    f.debug_struct("Graph")
      .field("name", &self.name)
      .field("nodes", &nodes)
      .finish()
  }
}

/// Worker ids `0..workers` allowed by `affinity`.
pub(crate) fn allowed_workers(affinity: &Affinity, workers: usize) -> Vec<WorkerId> {
  (0..workers).filter(|w| affinity.allows(*w)).collect()
}
