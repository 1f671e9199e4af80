//! # Node Execution Protocol
//!
//! This module defines the [`Node`] trait: the single execution entry point
//! every graph vertex exposes to a scheduler.
//!
//! ## Invocation
//!
//! A scheduler calls [`Node::run`] whenever it decides a node is runnable: a
//! zero-input producer at start (and again when it asked for it), or a node
//! with inputs once every input port has a token available. The call receives
//! one token per input port, the id of the worker running it, and an
//! [`Outbox`] for the tokens it produces.
//!
//! Invocations are synchronous and run to completion. A node that has to wait
//! (for example for the other ports of a serializer to catch up) buffers what
//! it got and returns; it is invoked again when more input arrives.
//!
//! ## Ownership
//!
//! `run` takes `&mut self`: the node owns its state exclusively for the length
//! of an invocation. The reference scheduler moves the boxed node into the
//! worker task that runs it, so two invocations of the same instance can never
//! overlap.
//!
//! A node without state carried between invocations may return a copy of
//! itself from [`Node::replicate`]. Unless its affinity pins it to a single
//! worker, the scheduler then runs several invocations at once, one per copy,
//! and their outputs reach downstream ports in completion order.
//!
//! ## Node Types
//!
//! - **Source** (0 inputs): tags an external sequence
//! - **Feeder** (0 inputs): injects a constant
//! - **FilterTagged** (N inputs): tag-preserving transform
//! - **Gate** (2 inputs): conditional continuation
//! - **Serializer** (N inputs): restores tag order across ports

use crate::affinity::{Affinity, WorkerId};
use crate::error::FlowError;
use crate::operand::{Outbox, Token};
use crate::time::Value;
use std::sync::Arc;

/// Whether a node's output carries tags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputKind {
  /// Every emitted value is a tagged value.
  Tagged,
  /// Emitted values carry no tag.
  Untagged,
}

/// Function over the payloads of all input ports.
pub type MultiFn = Box<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// [`MultiFn`] shared between replicas of one node.
pub type SharedFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// The node execution protocol.
///
/// Implementations must be deterministic given their inputs and must not
/// block.
pub trait Node: Send {
  /// Returns the name of the node.
  fn name(&self) -> &str;

  /// Number of input ports.
  fn input_arity(&self) -> usize;

  /// Workers allowed to run this node. Read once when the node is added to a
  /// graph.
  fn affinity(&self) -> Affinity {
    Affinity::Unrestricted
  }

  /// Whether this node's output is tagged.
  fn output_kind(&self) -> OutputKind;

  /// Whether `port` needs tagged input to correlate values.
  fn requires_tagged_input(&self, port: usize) -> bool;

  /// Returns an independent copy that may run concurrently with this node,
  /// or `None` if invocations depend on each other.
  ///
  /// Only nodes whose invocations share no mutable state may return a copy.
  fn replicate(&self) -> Option<Box<dyn Node>> {
    None
  }

  /// Runs one invocation.
  ///
  /// # Arguments
  ///
  /// * `args` - One token per input port, in port order. Empty for
  ///   zero-input nodes.
  /// * `worker` - Worker executing this invocation.
  /// * `outbox` - Sink for produced tokens.
  ///
  /// # Errors
  ///
  /// Returns a [`FlowError`] on contract violations or when a user function
  /// fails. The invocation is aborted; it is never retried.
  fn run(&mut self, args: Vec<Token>, worker: WorkerId, outbox: &mut Outbox<'_>) -> Result<(), FlowError>;
}

/// Fails with [`FlowError::Arity`] unless `args` has `expected` entries.
pub(crate) fn check_arity(node: &str, args: &[Token], expected: usize) -> Result<(), FlowError> {
  if args.len() != expected {
    return Err(FlowError::Arity {
      node: node.to_string(),
      expected,
      got: args.len(),
    });
  }
  Ok(())
}

/// Wraps a user function error into [`FlowError::Function`].
pub(crate) fn function_error(node: &str) -> impl FnOnce(String) -> FlowError + '_ {
  move |message| FlowError::Function {
    node: node.to_string(),
    message,
  }
}
