//! # Common Node Utilities
//!
//! Shared helpers for node implementations and their tests.

use crate::affinity::WorkerId;
use crate::error::FlowError;
use crate::graph::NodeId;
use crate::node::Node;
use crate::operand::{Destination, Operand, Outbox, Token};
use crate::time::Value;

/// Collects the raw payload of every argument, skipping end-of-stream.
pub(crate) fn payloads(args: &[Token]) -> Vec<Value> {
  args.iter().filter_map(Token::payload).cloned().collect()
}

/// Drives a node outside of a scheduler, one invocation at a time.
///
/// Keeps the node's end-of-stream flag between invocations the way a
/// scheduler would, and collects the emitted operands.
pub struct NodeHarness {
  /// Id reported as the source of emitted operands.
  pub id: NodeId,
  /// Worker reported to the node.
  pub worker: WorkerId,
  /// Downstream ports; empty means operands are addressed to the scheduler.
  pub destinations: Vec<Destination>,
  closed: bool,
}

impl NodeHarness {
  /// Creates a harness for a terminal node running on worker 0.
  pub fn new() -> Self {
    Self {
      id: NodeId(0),
      worker: 0,
      destinations: Vec::new(),
      closed: false,
    }
  }

  /// Sets the worker reported to the node.
  pub fn on_worker(mut self, worker: WorkerId) -> Self {
    self.worker = worker;
    self
  }

  /// Returns `true` once the node has sent end-of-stream.
  pub fn is_closed(&self) -> bool {
    self.closed
  }

  /// Runs one invocation and returns the operands it emitted.
  pub fn invoke(&mut self, node: &mut dyn Node, args: Vec<Token>) -> Result<Vec<Operand>, FlowError> {
    let mut sink: Vec<Operand> = Vec::new();
    let name = node.name().to_string();
    let mut outbox = Outbox::new(
      self.id,
      &name,
      self.worker,
      &self.destinations,
      &mut sink,
      &mut self.closed,
    );
    node.run(args, self.worker, &mut outbox)?;
    Ok(sink)
  }
}

impl Default for NodeHarness {
  fn default() -> Self {
    Self::new()
  }
}
