//! # Operands
//!
//! The message envelope exchanged between node invocations.
//!
//! An [`Operand`] carries a [`Token`] (a tagged value, an untagged value, or
//! the end-of-stream sentinel), the routing key of the port it is addressed
//! to, and the `request_task` scheduling hint. Nodes never build operands by
//! hand; they write tokens to an [`Outbox`], which fans each token out to every
//! downstream destination of the node and pushes the resulting operands into
//! an [`OperandSink`].
//!
//! ## End-of-stream
//!
//! [`Token::EndOfStream`] carries no tag and no payload. Once a node has sent
//! it, the outbox refuses any further data from that node
//! ([`FlowError::EmitAfterEndOfStream`]); repeated end-of-stream is ignored.
//!
//! ## Operands without a destination
//!
//! A node with no downstream edges still emits: its operands are addressed to
//! the scheduler (`destination == None`), which collects them as run results.

use crate::affinity::WorkerId;
use crate::error::FlowError;
use crate::graph::NodeId;
use crate::time::{Tag, TaggedValue, Value};
use std::any::Any;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Payload of an operand.
#[derive(Clone)]
pub enum Token {
  /// A value without a tag (produced by feeders and gates).
  Data(Value),
  /// A value stamped with its emission tag.
  Tagged(TaggedValue),
  /// The stream on this edge has ended.
  EndOfStream,
}

impl Token {
  /// Builds a tagged token.
  pub fn tagged(value: Value, tag: Tag) -> Self {
    Self::Tagged(TaggedValue::new(value, tag))
  }

  /// Returns `true` for the end-of-stream sentinel.
  #[inline]
  pub fn is_end_of_stream(&self) -> bool {
    matches!(self, Self::EndOfStream)
  }

  /// Returns the tagged value, if any.
  pub fn as_tagged(&self) -> Option<&TaggedValue> {
    match self {
      Self::Tagged(tv) => Some(tv),
      _ => None,
    }
  }

  /// Returns the tag, if this token carries one.
  pub fn tag(&self) -> Option<Tag> {
    self.as_tagged().map(TaggedValue::tag)
  }

  /// Returns the raw payload, tagged or not.
  pub fn payload(&self) -> Option<&Value> {
    match self {
      Self::Data(v) => Some(v),
      Self::Tagged(tv) => Some(&tv.value),
      Self::EndOfStream => None,
    }
  }

  /// Downcasts the raw payload to a concrete type.
  pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
    self.payload().and_then(|v| v.downcast_ref::<T>())
  }

  /// Short description used in error messages.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Data(_) => "untagged value",
      Self::Tagged(_) => "tagged value",
      Self::EndOfStream => "end-of-stream",
    }
  }
}

impl fmt::Debug for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Data(_) => write!(f, "Data(..)"),
      Self::Tagged(tv) => write!(f, "Tagged({})", tv.tag),
      Self::EndOfStream => write!(f, "EndOfStream"),
    }
  }
}

/// An input port of a downstream node.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Destination {
  /// Consuming node.
  pub node: NodeId,
  /// Input port on the consuming node.
  pub port: usize,
  /// Worker the consuming node is pinned to, when it is pinned.
  pub worker: Option<WorkerId>,
}

/// The unit moved between node invocations.
#[derive(Clone, Debug)]
pub struct Operand {
  /// Node that produced the operand.
  pub source: NodeId,
  /// Worker the producing invocation ran on.
  pub source_worker: WorkerId,
  /// Port the operand is addressed to; `None` addresses the scheduler.
  pub destination: Option<Destination>,
  /// Carried token.
  pub token: Token,
  /// Asks the scheduler to consider running the producing node again.
  pub request_task: bool,
}

impl Operand {
  /// Routing hint: worker the destination node is pinned to.
  pub fn destination_worker(&self) -> Option<WorkerId> {
    self.destination.and_then(|d| d.worker)
  }

  /// Routing key: destination node and port.
  pub fn destination_node(&self) -> Option<(NodeId, usize)> {
    self.destination.map(|d| (d.node, d.port))
  }
}

/// Outbound operand queue as seen by a node invocation.
///
/// Any scheduler that drives nodes supplies an implementation. Enqueueing
/// never blocks.
pub trait OperandSink: Send {
  /// Enqueues one operand.
  fn send(&mut self, operand: Operand);
}

impl OperandSink for Vec<Operand> {
  fn send(&mut self, operand: Operand) {
    self.push(operand);
  }
}

impl OperandSink for mpsc::UnboundedSender<Operand> {
  fn send(&mut self, operand: Operand) {
    if let Err(err) = mpsc::UnboundedSender::send(self, operand) {
      warn!(source = %err.0.source, "operand queue closed, operand dropped");
    }
  }
}

/// Per-invocation handle through which a node emits tokens.
pub struct Outbox<'a> {
  node: NodeId,
  name: &'a str,
  worker: WorkerId,
  destinations: &'a [Destination],
  sink: &'a mut dyn OperandSink,
  closed: &'a mut bool,
  emitted: usize,
}

impl<'a> Outbox<'a> {
  /// Creates an outbox for one invocation of `node`.
  ///
  /// `closed` is the node's persistent end-of-stream flag; it outlives the
  /// invocation so the one-shot rule holds across invocations.
  pub fn new(
    node: NodeId,
    name: &'a str,
    worker: WorkerId,
    destinations: &'a [Destination],
    sink: &'a mut dyn OperandSink,
    closed: &'a mut bool,
  ) -> Self {
    Self {
      node,
      name,
      worker,
      destinations,
      sink,
      closed,
      emitted: 0,
    }
  }

  /// Worker running the current invocation.
  pub fn worker(&self) -> WorkerId {
    self.worker
  }

  /// Returns `true` once end-of-stream has been sent.
  pub fn is_closed(&self) -> bool {
    *self.closed
  }

  /// Number of tokens emitted during this invocation.
  pub fn emitted(&self) -> usize {
    self.emitted
  }

  /// Emits a token with `request_task = true`.
  pub fn emit(&mut self, token: Token) -> Result<(), FlowError> {
    self.emit_with_request(token, true)
  }

  /// Emits a tagged value.
  pub fn emit_tagged(&mut self, value: Value, tag: Tag) -> Result<(), FlowError> {
    self.emit(Token::tagged(value, tag))
  }

  /// Emits a token to every destination with an explicit scheduling hint.
  pub fn emit_with_request(&mut self, token: Token, request_task: bool) -> Result<(), FlowError> {
    if token.is_end_of_stream() {
      self.end_of_stream();
      return Ok(());
    }
    if *self.closed {
      return Err(FlowError::EmitAfterEndOfStream {
        node: self.name.to_string(),
      });
    }
    self.fan_out(token, request_task);
    Ok(())
  }

  /// Sends end-of-stream with `request_task = true`. Idempotent.
  pub fn end_of_stream(&mut self) {
    if *self.closed {
      trace!(node = self.name, "end-of-stream already sent");
      return;
    }
    *self.closed = true;
    self.fan_out(Token::EndOfStream, true);
  }

  fn fan_out(&mut self, token: Token, request_task: bool) {
    self.emitted += 1;
    if self.destinations.is_empty() {
      self.sink.send(Operand {
        source: self.node,
        source_worker: self.worker,
        destination: None,
        token,
        request_task,
      });
      return;
    }
    for dst in self.destinations {
      self.sink.send(Operand {
        source: self.node,
        source_worker: self.worker,
        destination: Some(*dst),
        token: token.clone(),
        request_task,
      });
    }
  }
}
