//! # Serializer Node
//!
//! A synchronizing reorder buffer: merges N independently paced, possibly
//! out-of-order tagged streams into one stream in strict ascending tag order.
//!
//! ## Ports
//!
//! - **Input**: `0..n`, each carrying a tag-unique stream of tagged values
//! - **Output**: one combined value per tag, tagged with that tag, in order;
//!   then end-of-stream
//!
//! ## Behavior
//!
//! Every port has its own buffer, kept sorted by tag (binary insertion). The
//! node remembers the next tag it has to emit. Whenever values arrive it drains
//! complete rounds: while the head of *every* buffer carries the expected tag,
//! it combines their payloads, pops all heads, emits the result with that tag
//! and advances. Draining stops as soon as one buffer is empty or its head is
//! a later tag; the node then returns and waits to be invoked again. If the
//! combine function fails, the round stays buffered and the next invocation
//! that delivers a value tries it again.
//!
//! Buffers are unbounded unless [`Serializer::with_max_backlog`] is set, in
//! which case an invocation that would push any port past the bound fails with
//! [`FlowError::BacklogExceeded`].
//!
//! ## Termination
//!
//! See [`TerminationPolicy`]. Under either policy, values still buffered when
//! the node closes can never complete a round. They are discarded, reported
//! with a warning and counted by [`Serializer::discarded`]; they are never
//! dropped silently.
//!
//! ## Affinity
//!
//! The buffers and the counter are mutated on every invocation. The node is
//! pinned to a single worker (worker 0 unless [`Serializer::with_worker`] is
//! used) and a scheduler must never run two invocations of it at once.

use crate::affinity::{Affinity, WorkerId};
use crate::error::FlowError;
use crate::node::{MultiFn, Node, OutputKind, check_arity, function_error};
use crate::operand::{Outbox, Token};
use crate::time::{Tag, TaggedValue, Value};
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

/// When a serializer emits end-of-stream.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationPolicy {
  /// Close once every port has delivered end-of-stream, after draining all
  /// complete rounds.
  #[default]
  AllPorts,
  /// Close as soon as port 0 delivers end-of-stream; port 0 is authoritative
  /// for the stream length and anything buffered on other ports is discarded.
  PrimaryPort,
}

/// Synchronizing reorder buffer.
pub struct Serializer {
  name: String,
  combine: MultiFn,
  buffers: Vec<VecDeque<TaggedValue>>,
  closed_ports: Vec<bool>,
  next_tag: Tag,
  policy: TerminationPolicy,
  max_backlog: Option<usize>,
  worker: WorkerId,
  discarded: usize,
}

impl Serializer {
  /// Creates a serializer with `inputs` ports (at least 1) and a combining
  /// function over one payload per port.
  ///
  /// # Example
  ///
  /// ```rust
  /// use tagweave::nodes::Serializer;
  /// use tagweave::time::value;
  ///
  /// let sum = Serializer::new("sum", 2, |vals| {
  ///   let a = vals[0].downcast_ref::<i64>().ok_or("expected i64")?;
  ///   let b = vals[1].downcast_ref::<i64>().ok_or("expected i64")?;
  ///   Ok(value(a + b))
  /// });
  /// ```
  pub fn new<F>(name: impl Into<String>, inputs: usize, combine: F) -> Self
  where
    F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
  {
    let inputs = inputs.max(1);
    Self {
      name: name.into(),
      combine: Box::new(combine),
      buffers: (0..inputs).map(|_| VecDeque::new()).collect(),
      closed_ports: vec![false; inputs],
      next_tag: Tag::ZERO,
      policy: TerminationPolicy::default(),
      max_backlog: None,
      worker: 0,
      discarded: 0,
    }
  }

  /// Sets the termination policy.
  pub fn with_policy(mut self, policy: TerminationPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// Bounds the depth of every port buffer.
  pub fn with_max_backlog(mut self, limit: usize) -> Self {
    self.max_backlog = Some(limit);
    self
  }

  /// Pins the serializer to `worker`.
  pub fn with_worker(mut self, worker: WorkerId) -> Self {
    self.worker = worker;
    self
  }

  /// Tag of the next value to be emitted.
  pub fn next_expected_tag(&self) -> Tag {
    self.next_tag
  }

  /// Number of values buffered on `port`.
  pub fn buffered(&self, port: usize) -> usize {
    self.buffers.get(port).map_or(0, VecDeque::len)
  }

  /// Number of buffered values discarded at termination.
  pub fn discarded(&self) -> usize {
    self.discarded
  }

  /// The configured termination policy.
  pub fn policy(&self) -> TerminationPolicy {
    self.policy
  }

  /// Checks every argument before any state is touched, so a rejected
  /// invocation leaves the buffers as they were.
  fn validate(&self, args: &[Token]) -> Result<(), FlowError> {
    for (port, arg) in args.iter().enumerate() {
      let tv = match arg {
        Token::Tagged(tv) => tv,
        Token::EndOfStream => continue,
        Token::Data(_) => {
          return Err(FlowError::NotTagged {
            node: self.name.clone(),
            port,
            found: arg.kind(),
          });
        }
      };
      let buffer = &self.buffers[port];
      if tv.tag < self.next_tag || buffer.binary_search(tv).is_ok() {
        return Err(FlowError::DuplicateTag {
          node: self.name.clone(),
          port,
          tag: tv.tag,
        });
      }
      if let Some(limit) = self.max_backlog {
        let depth = buffer.len() + 1;
        if depth > limit {
          return Err(FlowError::BacklogExceeded {
            node: self.name.clone(),
            port,
            depth,
            limit,
          });
        }
      }
    }
    Ok(())
  }

  fn insert(&mut self, port: usize, tv: TaggedValue) {
    let buffer = &mut self.buffers[port];
    let at = buffer.partition_point(|held| held.tag < tv.tag);
    buffer.insert(at, tv);
  }

  /// Emits every complete round starting at the expected tag.
  fn drain(&mut self, outbox: &mut Outbox<'_>) -> Result<(), FlowError> {
    loop {
      let expected = self.next_tag;
      let ready = self
        .buffers
        .iter()
        .all(|b| b.front().is_some_and(|head| head.tag == expected));
      if !ready {
        return Ok(());
      }

      // Heads stay buffered until combine succeeds.
      let round: Vec<Value> = self
        .buffers
        .iter()
        .filter_map(|b| b.front().map(|tv| tv.value.clone()))
        .collect();
      let combined = (self.combine)(&round).map_err(function_error(&self.name))?;
      self.buffers.iter_mut().for_each(|b| {
        b.pop_front();
      });
      trace!(node = %self.name, tag = %expected, "emitting round");
      outbox.emit_tagged(combined, expected)?;
      self.next_tag = expected.next();
    }
  }

  /// Discards whatever is still buffered, plus `arriving` values handed to
  /// the closing invocation, and emits end-of-stream.
  fn close(&mut self, outbox: &mut Outbox<'_>, arriving: usize) {
    let residue = self.buffers.iter().map(VecDeque::len).sum::<usize>() + arriving;
    if residue > 0 {
      warn!(
        node = %self.name,
        residue,
        next_tag = %self.next_tag,
        policy = ?self.policy,
        "closing with undrained values; discarding them"
      );
      self.discarded += residue;
      self.buffers.iter_mut().for_each(VecDeque::clear);
    }
    debug!(node = %self.name, emitted = self.next_tag.as_u64(), "serializer closed");
    outbox.end_of_stream();
  }
}

impl Node for Serializer {
  fn name(&self) -> &str {
    &self.name
  }

  fn input_arity(&self) -> usize {
    self.buffers.len()
  }

  fn affinity(&self) -> Affinity {
    Affinity::pinned(self.worker)
  }

  fn output_kind(&self) -> OutputKind {
    OutputKind::Tagged
  }

  fn requires_tagged_input(&self, _port: usize) -> bool {
    true
  }

  fn run(&mut self, args: Vec<Token>, _worker: WorkerId, outbox: &mut Outbox<'_>) -> Result<(), FlowError> {
    check_arity(&self.name, &args, self.buffers.len())?;
    if outbox.is_closed() {
      return Ok(());
    }
    if self.policy == TerminationPolicy::PrimaryPort && args[0].is_end_of_stream() {
      let arriving = args.iter().filter(|arg| arg.as_tagged().is_some()).count();
      self.close(outbox, arriving);
      return Ok(());
    }

    self.validate(&args)?;
    let mut arrived = false;
    for (port, arg) in args.into_iter().enumerate() {
      match arg {
        Token::Tagged(tv) => {
          arrived = true;
          self.insert(port, tv);
        }
        Token::EndOfStream => {
          if !self.closed_ports[port] {
            trace!(node = %self.name, port, "port closed");
            self.closed_ports[port] = true;
          }
        }
        // Rejected by validate.
        Token::Data(_) => {}
      }
    }

    if arrived {
      self.drain(outbox)?;
    }
    if self.closed_ports.iter().all(|closed| *closed) {
      self.close(outbox, 0);
    }
    Ok(())
  }
}
