//! Tags and tagged values.
//!
//! A [`Tag`] is the logical time of a dataflow item: a sequence number stamped
//! on a value where it enters the graph (see
//! [`Source`](crate::nodes::source_node::Source)). It is not wall-clock time.
//! Tags are unique and strictly increasing per logical stream, which is what
//! lets a [`Serializer`](crate::nodes::serializer_node::Serializer) put items
//! that arrived out of order back into emission order.
//!
//! [`TaggedValue`] attaches a tag to a type-erased payload. Ordering and
//! equality look at the tag only.

use crate::error::FlowError;
use crate::operand::Token;
use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Type-erased payload carried between nodes.
///
/// Fan-out to several destinations is an `Arc::clone`; nodes downcast to the
/// concrete type they expect.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Wraps a concrete value into a [`Value`].
#[inline]
pub fn value<T: Any + Send + Sync>(v: T) -> Value {
  Arc::new(v)
}

/// Logical sequence number of a tagged value.
#[derive(
  Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Tag(pub u64);

impl Tag {
  /// The first tag a source assigns.
  pub const ZERO: Tag = Tag(0);

  /// Creates a tag from a raw value.
  #[inline]
  pub const fn new(t: u64) -> Self {
    Self(t)
  }

  /// Returns the raw u64 value.
  #[inline]
  pub const fn as_u64(self) -> u64 {
    self.0
  }

  /// Returns the tag that follows this one.
  #[inline]
  pub const fn next(self) -> Self {
    Self(self.0 + 1)
  }
}

impl fmt::Display for Tag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<u64> for Tag {
  fn from(t: u64) -> Self {
    Self(t)
  }
}

/// An immutable payload stamped with the tag of its original emission.
#[derive(Clone)]
pub struct TaggedValue {
  /// The payload.
  pub value: Value,
  /// Emission order of the payload within its stream.
  pub tag: Tag,
}

impl TaggedValue {
  /// Creates a new tagged value.
  #[inline]
  pub fn new(value: Value, tag: Tag) -> Self {
    Self { value, tag }
  }

  /// Returns the tag.
  #[inline]
  pub fn tag(&self) -> Tag {
    self.tag
  }

  /// Returns a reference to the payload.
  #[inline]
  pub fn value(&self) -> &Value {
    &self.value
  }

  /// Downcasts the payload to a concrete type.
  pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
    self.value.downcast_ref::<T>()
  }

  /// Replaces the payload, keeping the tag.
  pub fn with_value(&self, value: Value) -> Self {
    Self::new(value, self.tag)
  }

  /// Compares against an arbitrary operand payload.
  ///
  /// Only another tagged value can be ordered against this one; an untagged
  /// value or end-of-stream is a contract violation and fails with
  /// [`FlowError::Incomparable`].
  pub fn try_cmp(&self, other: &Token) -> Result<Ordering, FlowError> {
    match other {
      Token::Tagged(tv) => Ok(self.cmp(tv)),
      other => Err(FlowError::Incomparable { found: other.kind() }),
    }
  }
}

impl PartialEq for TaggedValue {
  fn eq(&self, other: &Self) -> bool {
    self.tag == other.tag
  }
}

impl Eq for TaggedValue {}

impl PartialOrd for TaggedValue {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for TaggedValue {
  fn cmp(&self, other: &Self) -> Ordering {
    self.tag.cmp(&other.tag)
  }
}

impl fmt::Debug for TaggedValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaggedValue")
      .field("tag", &self.tag)
      .finish_non_exhaustive()
  }
}
