//! # FilterTagged Node
//!
//! A tag-preserving transform over all input ports.
//!
//! ## Ports
//!
//! - **Input**: `0..arity`; port 0 must carry tagged values, other ports may
//!   carry tagged or untagged values (e.g. from a [`Feeder`](super::Feeder))
//! - **Output**: `f(payloads)` stamped with the tag of port 0
//!
//! ## Behavior
//!
//! End-of-stream on port 0 is forwarded and the node stops. Otherwise the
//! graph topology guarantees every tagged argument carries the same tag; the
//! node still checks it and fails with [`FlowError::TagMismatch`] when it does
//! not hold. The payload of every argument is handed to the function and the
//! result keeps the tag, so downstream consumers can correlate it with the
//! original emission order.
//!
//! ## Concurrency
//!
//! The node keeps no state between invocations and can be replicated: unless
//! pinned to one worker, several invocations run at once and their results
//! leave in completion order, not tag order. A tagged secondary port fed by
//! such a stream no longer lines up with port 0; restore the order with a
//! [`Serializer`](super::Serializer) first.

use crate::affinity::{Affinity, WorkerId};
use crate::error::FlowError;
use crate::node::{Node, OutputKind, SharedFn, check_arity, function_error};
use crate::operand::{Outbox, Token};
use crate::time::Value;
use std::sync::Arc;

/// Tag-preserving transform.
pub struct FilterTagged {
  name: String,
  arity: usize,
  f: SharedFn,
  affinity: Affinity,
}

impl FilterTagged {
  /// Creates a transform with `arity` input ports.
  pub fn new<F>(name: impl Into<String>, arity: usize, f: F) -> Self
  where
    F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
  {
    Self {
      name: name.into(),
      arity: arity.max(1),
      f: Arc::new(f),
      affinity: Affinity::Unrestricted,
    }
  }

  /// Restricts the workers allowed to run this transform.
  pub fn with_affinity(mut self, affinity: Affinity) -> Self {
    self.affinity = affinity;
    self
  }
}

impl Node for FilterTagged {
  fn name(&self) -> &str {
    &self.name
  }

  fn input_arity(&self) -> usize {
    self.arity
  }

  fn affinity(&self) -> Affinity {
    self.affinity.clone()
  }

  fn output_kind(&self) -> OutputKind {
    OutputKind::Tagged
  }

  fn requires_tagged_input(&self, port: usize) -> bool {
    port == 0
  }

  fn replicate(&self) -> Option<Box<dyn Node>> {
    Some(Box::new(Self {
      name: self.name.clone(),
      arity: self.arity,
      f: Arc::clone(&self.f),
      affinity: self.affinity.clone(),
    }))
  }

  fn run(&mut self, args: Vec<Token>, _worker: WorkerId, outbox: &mut Outbox<'_>) -> Result<(), FlowError> {
    check_arity(&self.name, &args, self.arity)?;
    let tag = match &args[0] {
      Token::EndOfStream => {
        outbox.end_of_stream();
        return Ok(());
      }
      Token::Tagged(tv) => tv.tag,
      other => {
        return Err(FlowError::NotTagged {
          node: self.name.clone(),
          port: 0,
          found: other.kind(),
        });
      }
    };

    let mut values = Vec::with_capacity(args.len());
    for (port, arg) in args.into_iter().enumerate() {
      match arg {
        Token::Tagged(tv) if tv.tag != tag => {
          return Err(FlowError::TagMismatch {
            node: self.name.clone(),
            port,
            expected: tag,
            found: tv.tag,
          });
        }
        Token::Tagged(tv) => values.push(tv.value),
        Token::Data(v) => values.push(v),
        Token::EndOfStream => {
          return Err(FlowError::NotTagged {
            node: self.name.clone(),
            port,
            found: "end-of-stream",
          });
        }
      }
    }

    let result = (self.f)(&values).map_err(function_error(&self.name))?;
    outbox.emit_tagged(result, tag)
  }
}
