//! # Feeder Node
//!
//! Injects a fixed parameter into the graph.
//!
//! ## Ports
//!
//! - **Input**: none
//! - **Output**: the stored constant, untagged
//!
//! ## Behavior
//!
//! Each invocation emits the constant `repeat` times (default 1) with
//! `request_task = false`, followed by end-of-stream so the consuming port is
//! closed and the feeder retires. To pair a constant with every element of a
//! `k`-element source on a [`FilterTagged`](super::FilterTagged), set
//! `repeat` to `k`.
//!
//! The output carries no tag, so a feeder may only be connected to ports that
//! do not need tag correlation. [`Graph::connect`](crate::graph::Graph::connect)
//! enforces this.

use crate::affinity::{Affinity, WorkerId};
use crate::error::FlowError;
use crate::node::{Node, OutputKind, check_arity};
use crate::operand::{Outbox, Token};
use crate::time::{Value, value};
use std::any::Any;

/// Zero-input node that supplies a constant.
pub struct Feeder {
  name: String,
  value: Value,
  repeat: usize,
  affinity: Affinity,
}

impl Feeder {
  /// Creates a feeder that emits `v` once.
  pub fn new<T: Any + Send + Sync>(name: impl Into<String>, v: T) -> Self {
    Self::from_value(name, value(v))
  }

  /// Creates a feeder over an already type-erased value.
  pub fn from_value(name: impl Into<String>, value: Value) -> Self {
    Self {
      name: name.into(),
      value,
      repeat: 1,
      affinity: Affinity::Unrestricted,
    }
  }

  /// Emits the constant `n` times before end-of-stream.
  pub fn repeat(mut self, n: usize) -> Self {
    self.repeat = n;
    self
  }

  /// Restricts the workers allowed to run this feeder.
  pub fn with_affinity(mut self, affinity: Affinity) -> Self {
    self.affinity = affinity;
    self
  }

  /// The stored constant.
  pub fn value(&self) -> &Value {
    &self.value
  }
}

impl Node for Feeder {
  fn name(&self) -> &str {
    &self.name
  }

  fn input_arity(&self) -> usize {
    0
  }

  fn affinity(&self) -> Affinity {
    self.affinity.clone()
  }

  fn output_kind(&self) -> OutputKind {
    OutputKind::Untagged
  }

  fn requires_tagged_input(&self, _port: usize) -> bool {
    false
  }

  fn run(&mut self, args: Vec<Token>, _worker: WorkerId, outbox: &mut Outbox<'_>) -> Result<(), FlowError> {
    check_arity(&self.name, &args, 0)?;
    if outbox.is_closed() {
      return Ok(());
    }
    for _ in 0..self.repeat {
      outbox.emit_with_request(Token::Data(self.value.clone()), false)?;
    }
    outbox.end_of_stream();
    Ok(())
  }
}
