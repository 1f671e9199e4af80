//! # Error Handling
//!
//! Error types for tagweave graphs and their execution.
//!
//! Three layers, matching where a failure is detected:
//!
//! - [`FlowError`]: raised inside a single node invocation. These are contract
//!   violations (a tagged value compared with something that is not one,
//!   misaligned tags handed to a tag-preserving transform, data after
//!   end-of-stream) or failures of a user function. They are never retried:
//!   every invocation is deterministic given its inputs.
//! - [`GraphError`]: raised while building or validating a [`Graph`](crate::graph::Graph).
//! - [`RuntimeError`]: raised by the [`Scheduler`](crate::scheduler::Scheduler).
//!   A failing node aborts the whole run; there is no graph-wide error channel.
//!
//! Termination races (end-of-stream on one port while other ports still hold
//! buffered data) are not errors. They are reported through `tracing` and
//! counted, see [`Serializer`](crate::nodes::serializer_node::Serializer).

use crate::affinity::WorkerId;
use crate::time::Tag;
use thiserror::Error;

/// Error raised by a node while it runs one invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
  /// A tagged value was expected but something else arrived.
  #[error("node '{node}' port {port}: expected a tagged value, found {found}")]
  NotTagged {
    /// Node that observed the value.
    node: String,
    /// Input port the value arrived on.
    port: usize,
    /// Short description of what arrived instead.
    found: &'static str,
  },
  /// A tagged value was ordered against a token that carries no tag.
  #[error("a tagged value cannot be ordered against {found}")]
  Incomparable {
    /// Short description of the other token.
    found: &'static str,
  },
  /// Arguments of a tag-preserving transform carry different tags.
  #[error("node '{node}' port {port}: tag {found} does not match tag {expected} of port 0")]
  TagMismatch {
    /// Node that observed the mismatch.
    node: String,
    /// Port carrying the offending tag.
    port: usize,
    /// Tag taken from port 0.
    expected: Tag,
    /// Tag found on `port`.
    found: Tag,
  },
  /// The same tag arrived twice on one port.
  #[error("node '{node}' port {port}: duplicate tag {tag}")]
  DuplicateTag {
    /// Node that observed the duplicate.
    node: String,
    /// Port the duplicate arrived on.
    port: usize,
    /// The repeated tag.
    tag: Tag,
  },
  /// A port buffer grew past the configured backlog bound.
  #[error("node '{node}' port {port}: backlog of {depth} exceeds limit {limit}")]
  BacklogExceeded {
    /// Node whose buffer overflowed.
    node: String,
    /// Port that lags behind.
    port: usize,
    /// Depth the buffer would have reached.
    depth: usize,
    /// Configured bound.
    limit: usize,
  },
  /// The node was invoked with the wrong number of arguments.
  #[error("node '{node}': expected {expected} arguments, got {got}")]
  Arity {
    /// Node that was invoked.
    node: String,
    /// Declared input arity.
    expected: usize,
    /// Number of arguments supplied.
    got: usize,
  },
  /// Data was emitted after the node already sent end-of-stream.
  #[error("node '{node}': emitted data after end-of-stream")]
  EmitAfterEndOfStream {
    /// Offending node.
    node: String,
  },
  /// A user-supplied function failed.
  #[error("node '{node}': function failed: {message}")]
  Function {
    /// Node whose function failed.
    node: String,
    /// Message returned by the function.
    message: String,
  },
}

/// Error raised while building or validating a graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
  /// A node with this name is already part of the graph.
  #[error("node with name '{0}' already exists")]
  DuplicateNode(String),
  /// The referenced node id does not belong to this graph.
  #[error("node id {0} does not exist")]
  UnknownNode(usize),
  /// The target port is out of range for the node.
  #[error("node '{node}' has {arity} input ports, port {port} does not exist")]
  PortOutOfRange {
    /// Target node.
    node: String,
    /// Requested port.
    port: usize,
    /// Number of input ports the node has.
    arity: usize,
  },
  /// The target port already has an upstream producer.
  #[error("port {port} of node '{node}' is already connected")]
  PortAlreadyConnected {
    /// Target node.
    node: String,
    /// Target port.
    port: usize,
  },
  /// An input port has no upstream producer.
  #[error("port {port} of node '{node}' is not connected")]
  PortNotConnected {
    /// Node with the dangling port.
    node: String,
    /// Dangling port.
    port: usize,
  },
  /// An untagged producer feeds a port that needs tag correlation.
  #[error("node '{from}' produces untagged values but port {port} of node '{to}' requires tags")]
  UntaggedIntoTaggedPort {
    /// Untagged producer.
    from: String,
    /// Consumer requiring tags.
    to: String,
    /// Consumer port.
    port: usize,
  },
  /// A node is restricted to a worker the runtime does not have.
  #[error("node '{node}' is pinned to worker {worker} but only {workers} workers exist")]
  UnknownWorker {
    /// Pinned node.
    node: String,
    /// Worker named in the affinity set.
    worker: WorkerId,
    /// Number of workers configured.
    workers: usize,
  },
  /// A node's affinity set names no worker at all.
  #[error("node '{0}' has an empty affinity set")]
  EmptyAffinity(String),
}

/// Error raised by the scheduler while running a graph.
#[derive(Error, Debug)]
pub enum RuntimeError {
  /// The runtime configuration is invalid.
  #[error("invalid runtime configuration: {0}")]
  Config(String),
  /// The graph failed validation before the run started.
  #[error(transparent)]
  Graph(#[from] GraphError),
  /// A node invocation failed; the run was aborted.
  #[error("node '{node}' failed on worker {worker}: {source}")]
  NodeFailed {
    /// Failing node.
    node: String,
    /// Worker that ran the invocation.
    worker: WorkerId,
    /// Underlying node error.
    #[source]
    source: FlowError,
  },
  /// The run exceeded the configured invocation budget.
  #[error("invocation limit of {0} reached")]
  InvocationLimit(u64),
  /// A worker task stopped before the run finished.
  #[error("worker {0} stopped unexpectedly")]
  WorkerLost(WorkerId),
}
