//! # Gate Node
//!
//! A two-input flip-flop used for conditional continuation (loop exit,
//! branch selection).
//!
//! ## Ports
//!
//! - **Input**: `0`, `1`
//! - **Output**: the function result, untagged; or end-of-stream
//!
//! ## Behavior
//!
//! The function receives the raw payloads of both ports. A `bool` `false`
//! result is never forwarded: the gate emits end-of-stream instead and
//! retires. Any other result is forwarded as an untagged value.
//! End-of-stream on either input is propagated.

use crate::affinity::{Affinity, WorkerId};
use crate::error::FlowError;
use crate::node::{MultiFn, Node, OutputKind, check_arity, function_error};
use crate::nodes::common::payloads;
use crate::operand::{Outbox, Token};
use crate::time::Value;
use tracing::debug;

/// Binary predicate gate.
pub struct Gate {
  name: String,
  f: MultiFn,
  affinity: Affinity,
}

impl Gate {
  /// Creates a gate over the two input payloads.
  pub fn new<F>(name: impl Into<String>, f: F) -> Self
  where
    F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
  {
    Self {
      name: name.into(),
      f: Box::new(f),
      affinity: Affinity::Unrestricted,
    }
  }

  /// Restricts the workers allowed to run this gate.
  pub fn with_affinity(mut self, affinity: Affinity) -> Self {
    self.affinity = affinity;
    self
  }
}

impl Node for Gate {
  fn name(&self) -> &str {
    &self.name
  }

  fn input_arity(&self) -> usize {
    2
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
    check_arity(&self.name, &args, 2)?;
    if outbox.is_closed() {
      return Ok(());
    }
    if args.iter().any(Token::is_end_of_stream) {
      outbox.end_of_stream();
      return Ok(());
    }

    let result = (self.f)(&payloads(&args)).map_err(function_error(&self.name))?;
    if result.downcast_ref::<bool>() == Some(&false) {
      debug!(node = %self.name, "gate closed");
      outbox.end_of_stream();
      return Ok(());
    }
    outbox.emit(Token::Data(result))
  }
}
