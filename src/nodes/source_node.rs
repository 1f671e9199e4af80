//! # Source Node
//!
//! Converts an external sequence into a tagged stream.
//!
//! ## Ports
//!
//! - **Input**: none
//! - **Output**: tagged values with consecutive tags starting at 0, then one
//!   end-of-stream
//!
//! ## Behavior
//!
//! The source owns its iteration cursor and its tag counter. For each element
//! it applies the optional transform, stamps the result with the current tag,
//! advances the counter and emits it with `request_task = false`: emitting an
//! item never asks the scheduler for more work. When the cursor is exhausted
//! it emits exactly one end-of-stream with `request_task = true`.
//!
//! By default one invocation drains the whole sequence. With
//! [`Source::with_batch_size`] an invocation emits at most that many items; if
//! the cursor still has elements, the last item of the batch is emitted with
//! `request_task = true` so the scheduler runs the source again.

use crate::affinity::{Affinity, WorkerId};
use crate::error::FlowError;
use crate::node::{Node, OutputKind, check_arity, function_error};
use crate::operand::{Outbox, Token};
use crate::time::{Tag, Value, value};
use std::any::Any;
use std::iter::Peekable;
use tracing::debug;

/// Context handed to a source transform.
#[derive(Clone, Copy, Debug)]
pub struct SourceContext {
  /// Worker running the invocation.
  pub worker: WorkerId,
  /// Tag the transformed element will carry.
  pub tag: Tag,
}

/// Transform applied by a source to each element.
pub type SourceFn = Box<dyn Fn(Value, &SourceContext) -> Result<Value, String> + Send + Sync>;

type Cursor = Peekable<Box<dyn Iterator<Item = Value> + Send>>;

/// Zero-input node that tags an external sequence.
pub struct Source {
  name: String,
  cursor: Cursor,
  transform: Option<SourceFn>,
  next_tag: Tag,
  batch_size: Option<usize>,
  affinity: Affinity,
}

impl Source {
  /// Creates a source over already type-erased values.
  pub fn new<I>(name: impl Into<String>, items: I) -> Self
  where
    I: IntoIterator<Item = Value>,
    I::IntoIter: Send + 'static,
  {
    let cursor: Box<dyn Iterator<Item = Value> + Send> = Box::new(items.into_iter());
    Self {
      name: name.into(),
      cursor: cursor.peekable(),
      transform: None,
      next_tag: Tag::ZERO,
      batch_size: None,
      affinity: Affinity::Unrestricted,
    }
  }

  /// Creates a source over concrete values, erasing each one.
  ///
  /// # Example
  ///
  /// ```rust
  /// use tagweave::nodes::Source;
  ///
  /// let source = Source::from_values("numbers", 0..10i64);
  /// ```
  pub fn from_values<T, I>(name: impl Into<String>, items: I) -> Self
  where
    T: Any + Send + Sync,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
  {
    Self::new(name, items.into_iter().map(value))
  }

  /// Sets the transform applied to each element before tagging.
  pub fn with_transform<F>(mut self, f: F) -> Self
  where
    F: Fn(Value, &SourceContext) -> Result<Value, String> + Send + Sync + 'static,
  {
    self.transform = Some(Box::new(f));
    self
  }

  /// Bounds the number of items emitted per invocation (at least 1).
  pub fn with_batch_size(mut self, n: usize) -> Self {
    self.batch_size = Some(n.max(1));
    self
  }

  /// Restricts the workers allowed to run this source.
  pub fn with_affinity(mut self, affinity: Affinity) -> Self {
    self.affinity = affinity;
    self
  }

  /// Tag the next emitted element will carry.
  pub fn next_tag(&self) -> Tag {
    self.next_tag
  }
}

impl Node for Source {
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
    OutputKind::Tagged
  }

  fn requires_tagged_input(&self, _port: usize) -> bool {
    false
  }

  fn run(&mut self, args: Vec<Token>, worker: WorkerId, outbox: &mut Outbox<'_>) -> Result<(), FlowError> {
    check_arity(&self.name, &args, 0)?;
    if outbox.is_closed() {
      return Ok(());
    }

    let limit = self.batch_size.unwrap_or(usize::MAX);
    let mut emitted = 0;
    while emitted < limit {
      let Some(item) = self.cursor.peek().cloned() else {
        break;
      };
      let tag = self.next_tag;
      let result = match &self.transform {
        Some(f) => f(item, &SourceContext { worker, tag }).map_err(function_error(&self.name))?,
        None => item,
      };
      // Consumed only once the transform succeeded.
      self.cursor.next();
      self.next_tag = tag.next();
      emitted += 1;

      let request_more = emitted == limit && self.cursor.peek().is_some();
      outbox.emit_with_request(Token::tagged(result, tag), request_more)?;
    }

    if self.cursor.peek().is_none() {
      debug!(node = %self.name, items = self.next_tag.as_u64(), "source exhausted");
      outbox.end_of_stream();
    }
    Ok(())
  }
}
