//! # Scheduler
//!
//! Reference scheduler: runs a validated [`Graph`] on a pool of tokio worker
//! tasks until the graph is quiescent.
//!
//! ## Execution Model
//!
//! The scheduler task owns every node in a slot together with one FIFO queue
//! per input port. Each worker task has its own inbox and runs the node
//! invocations it receives one at a time on tokio's blocking pool, reporting
//! each one back over a shared completion channel. Different workers run in
//! parallel.
//!
//! Dispatching a node *moves* the boxed node into the task; the completion
//! moves it back. While a node is away its slot is busy, so two invocations of
//! a stateful node can never overlap.
//!
//! A node that offers copies through [`Node::replicate`] and is not pinned to
//! a single worker is the exception: up to one invocation per allowed worker
//! runs at once, each on its own copy. Their completions arrive in any order,
//! so downstream ports see tags out of order.
//!
//! ## Matching
//!
//! A node with inputs is runnable when it has spare capacity, is not retired,
//! every input port either has a queued token or has already delivered
//! end-of-stream, and at least one port has a queued token. Its arguments are
//! the head of every port, with [`Token::EndOfStream`] standing in for closed
//! ports. Arguments carrying end-of-stream wait until no other invocation of
//! the node is in flight, so end-of-stream never overtakes data on an edge.
//!
//! Zero-input nodes run once at start and again whenever one of their
//! operands carried `request_task = true`.
//!
//! ## Placement
//!
//! Among the workers a node's affinity allows, the one with the fewest tasks
//! in flight is chosen (lowest id on ties).
//!
//! ## Termination
//!
//! A node that emitted end-of-stream is retired; tokens that still reach it are
//! dropped with a warning. The run ends when no task is in flight and no node
//! is runnable. Operands of nodes without downstream edges are collected into
//! the returned [`Execution`]. A failing invocation aborts the run.

use crate::affinity::{Affinity, WorkerId};
use crate::config::RuntimeConfig;
use crate::error::{FlowError, GraphError, RuntimeError};
use crate::graph::{Graph, NodeEntry, NodeId, allowed_workers};
use crate::node::Node;
use crate::operand::{Destination, Operand, Outbox, Token};
use crate::time::TaggedValue;
use futures::future::join_all;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Runs graphs on a pool of worker tasks.
#[derive(Clone, Debug, Default)]
pub struct Scheduler {
  config: RuntimeConfig,
}

impl Scheduler {
  /// Creates a scheduler with the given configuration.
  pub fn new(config: RuntimeConfig) -> Self {
    Self { config }
  }

  /// Returns the runtime configuration.
  pub fn config(&self) -> &RuntimeConfig {
    &self.config
  }

  /// Runs `graph` to quiescence.
  ///
  /// # Errors
  ///
  /// - [`RuntimeError::Config`] if the configuration is invalid
  /// - [`RuntimeError::Graph`] if the graph fails validation
  /// - [`RuntimeError::NodeFailed`] if an invocation fails
  /// - [`RuntimeError::InvocationLimit`] if the invocation budget runs out
  /// - [`RuntimeError::WorkerLost`] if a worker stops before the run ends
  pub async fn run(&self, graph: Graph) -> Result<Execution, RuntimeError> {
    self.config.validate().map_err(RuntimeError::Config)?;
    let workers = self.config.workers;
    graph.validate(workers)?;
    let graph_name = graph.name().to_string();

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let mut inboxes = Vec::with_capacity(workers);
    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
      let (tx, rx) = mpsc::unbounded_channel();
      handles.push(tokio::spawn(worker_loop(worker, rx, done_tx.clone())));
      inboxes.push(tx);
    }
    drop(done_tx);

    let mut run = Run::new(graph.into_entries(), inboxes, self.config.max_invocations);
    info!(graph = %graph_name, workers, nodes = run.slots.len(), "run started");
    let outcome = run.drive(&mut done_rx).await;

    // Closing the inboxes lets every worker finish its current task and exit.
    run.inboxes.clear();
    for (worker, joined) in join_all(handles).await.into_iter().enumerate() {
      if let Err(err) = joined {
        warn!(worker, error = %err, "worker task ended abnormally");
      }
    }
    if let Err(err) = outcome {
      warn!(graph = %graph_name, error = %err, "run aborted");
      return Err(err);
    }

    let execution = run.finish();
    info!(
      graph = %graph_name,
      invocations = execution.stats.total_invocations(),
      routed = execution.stats.operands_routed,
      dropped = execution.stats.tokens_dropped,
      undelivered = execution.stats.tokens_undelivered,
      "run completed"
    );
    Ok(execution)
  }
}

/// Counters gathered during a run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
  /// Invocations per node name.
  pub invocations: BTreeMap<String, u64>,
  /// Operands delivered to an input port.
  pub operands_routed: u64,
  /// Data tokens discarded because their consumer had retired.
  pub tokens_dropped: u64,
  /// Data tokens still queued when the graph became quiescent.
  pub tokens_undelivered: u64,
  /// Most invocations of one node in flight at the same time.
  pub peak_concurrency: BTreeMap<String, usize>,
}

impl ExecutionStats {
  /// Sum of all invocations.
  pub fn total_invocations(&self) -> u64 {
    self.invocations.values().sum()
  }

  /// Invocations of one node, 0 if unknown.
  pub fn invocations_of(&self, name: &str) -> u64 {
    self.invocations.get(name).copied().unwrap_or(0)
  }

  /// Peak number of concurrent invocations of one node, 0 if unknown.
  pub fn peak_concurrency_of(&self, name: &str) -> usize {
    self.peak_concurrency.get(name).copied().unwrap_or(0)
  }
}

/// Result of a completed run.
#[derive(Debug)]
pub struct Execution {
  index: HashMap<String, usize>,
  outputs: Vec<Vec<Token>>,
  /// Counters gathered during the run.
  pub stats: ExecutionStats,
}

impl Execution {
  /// Tokens emitted by a node without downstream edges, in emission order.
  pub fn outputs_of(&self, name: &str) -> &[Token] {
    self
      .index
      .get(name)
      .map(|i| self.outputs[*i].as_slice())
      .unwrap_or(&[])
  }

  /// Tagged values emitted by a terminal node, in emission order.
  pub fn tagged_outputs_of(&self, name: &str) -> Vec<TaggedValue> {
    self
      .outputs_of(name)
      .iter()
      .filter_map(Token::as_tagged)
      .cloned()
      .collect()
  }

  /// Payloads emitted by a terminal node, downcast to `T`.
  pub fn values_of<T: Clone + 'static>(&self, name: &str) -> Vec<T> {
    self
      .outputs_of(name)
      .iter()
      .filter_map(|t| t.downcast_ref::<T>().cloned())
      .collect()
  }

  /// Returns `true` if the node's collected output ends with end-of-stream.
  pub fn ended(&self, name: &str) -> bool {
    self
      .outputs_of(name)
      .last()
      .is_some_and(Token::is_end_of_stream)
  }
}

// ============================================================================
// Worker side
// ============================================================================

/// One invocation, carrying the node it runs.
struct Task {
  id: NodeId,
  name: String,
  node: Box<dyn Node>,
  args: Vec<Token>,
  destinations: Arc<[Destination]>,
  closed: bool,
}

/// A finished invocation, handing the node back.
struct Completion {
  worker: WorkerId,
  id: NodeId,
  node: Box<dyn Node>,
  closed: bool,
  operands: Vec<Operand>,
  result: Result<(), FlowError>,
}

impl Task {
  fn execute(mut self, worker: WorkerId) -> Completion {
    let args = std::mem::take(&mut self.args);
    let mut operands: Vec<Operand> = Vec::new();
    let outcome = {
      let mut outbox = Outbox::new(
        self.id,
        &self.name,
        worker,
        &self.destinations,
        &mut operands,
        &mut self.closed,
      );
      let node = &mut self.node;
      catch_unwind(AssertUnwindSafe(|| node.run(args, worker, &mut outbox)))
    };
    let result = outcome.unwrap_or_else(|payload| {
      Err(FlowError::Function {
        node: self.name.clone(),
        message: format!("panicked: {}", panic_message(payload.as_ref())),
      })
    });
    Completion {
      worker,
      id: self.id,
      node: self.node,
      closed: self.closed,
      operands,
      result,
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}

async fn worker_loop(
  worker: WorkerId,
  mut inbox: mpsc::UnboundedReceiver<Task>,
  done: mpsc::UnboundedSender<Completion>,
) {
  while let Some(task) = inbox.recv().await {
    trace!(worker, node = %task.name, "running invocation");
    let completion = match tokio::task::spawn_blocking(move || task.execute(worker)).await {
      Ok(completion) => completion,
      Err(err) => {
        warn!(worker, error = %err, "invocation did not complete");
        break;
      }
    };
    if done.send(completion).is_err() {
      break;
    }
  }
  trace!(worker, "worker stopped");
}

// ============================================================================
// Scheduler side
// ============================================================================

/// Where a slot keeps its node between invocations.
enum Instances {
  /// One instance; `None` while it is away on a worker.
  Exclusive(Option<Box<dyn Node>>),
  /// Idle copies of a replicable node. `template` makes more on demand.
  Replicated {
    template: Box<dyn Node>,
    idle: Vec<Box<dyn Node>>,
  },
}

impl Instances {
  fn new(node: Box<dyn Node>, affinity: &Affinity) -> Self {
    if affinity.pinned_worker().is_some() {
      return Self::Exclusive(Some(node));
    }
    match node.replicate() {
      Some(copy) => Self::Replicated {
        template: node,
        idle: vec![copy],
      },
      None => Self::Exclusive(Some(node)),
    }
  }

  fn is_replicated(&self) -> bool {
    matches!(self, Self::Replicated { .. })
  }

  fn check_out(&mut self) -> Option<Box<dyn Node>> {
    match self {
      Self::Exclusive(node) => node.take(),
      Self::Replicated { template, idle } => idle.pop().or_else(|| template.replicate()),
    }
  }

  fn check_in(&mut self, node: Box<dyn Node>) {
    match self {
      Self::Exclusive(slot) => *slot = Some(node),
      Self::Replicated { idle, .. } => idle.push(node),
    }
  }
}

struct Slot {
  name: String,
  instances: Instances,
  /// Invocations in flight.
  running: usize,
  /// Invocations allowed in flight at once.
  capacity: usize,
  peak_running: usize,
  arity: usize,
  allowed: Vec<WorkerId>,
  destinations: Arc<[Destination]>,
  ports: Vec<VecDeque<Token>>,
  port_closed: Vec<bool>,
  /// Set once the node has emitted end-of-stream.
  retired: bool,
  /// Zero-input node asked to run (again).
  wants_run: bool,
  invocations: u64,
}

impl Slot {
  fn new(entry: NodeEntry, workers: usize) -> Self {
    let allowed = allowed_workers(&entry.affinity, workers);
    let instances = Instances::new(entry.node, &entry.affinity);
    let capacity = if instances.is_replicated() {
      allowed.len().max(1)
    } else {
      1
    };
    if capacity > 1 {
      debug!(node = %entry.name, capacity, "node runs replicated");
    }
    Self {
      allowed,
      instances,
      running: 0,
      capacity,
      peak_running: 0,
      destinations: Arc::from(entry.destinations),
      ports: (0..entry.arity).map(|_| VecDeque::new()).collect(),
      port_closed: vec![false; entry.arity],
      retired: false,
      wants_run: entry.arity == 0,
      invocations: 0,
      name: entry.name,
      arity: entry.arity,
    }
  }

  fn is_runnable(&self) -> bool {
    if self.retired || self.running >= self.capacity {
      return false;
    }
    if self.arity == 0 {
      return self.wants_run;
    }
    let any_queued = self.ports.iter().any(|q| !q.is_empty());
    let all_ready = self
      .ports
      .iter()
      .zip(&self.port_closed)
      .all(|(q, closed)| *closed || !q.is_empty());
    any_queued && all_ready && (self.running == 0 || !self.next_args_end_stream())
  }

  /// Whether the next arguments would include end-of-stream.
  fn next_args_end_stream(&self) -> bool {
    self
      .ports
      .iter()
      .zip(&self.port_closed)
      .any(|(q, closed)| *closed || q.front().is_some_and(Token::is_end_of_stream))
  }

  /// Pops the head of every port; closed ports yield end-of-stream.
  fn take_args(&mut self) -> Vec<Token> {
    self
      .ports
      .iter_mut()
      .zip(self.port_closed.iter_mut())
      .map(|(queue, closed)| match queue.pop_front() {
        Some(token) => {
          if token.is_end_of_stream() {
            *closed = true;
          }
          token
        }
        None => Token::EndOfStream,
      })
      .collect()
  }

  fn queued_data(&self) -> usize {
    self
      .ports
      .iter()
      .flatten()
      .filter(|t| !t.is_end_of_stream())
      .count()
  }
}

struct Run {
  slots: Vec<Slot>,
  inboxes: Vec<mpsc::UnboundedSender<Task>>,
  in_flight: Vec<usize>,
  outputs: Vec<Vec<Token>>,
  max_invocations: Option<u64>,
  dispatched: u64,
  routed: u64,
  dropped: u64,
}

impl Run {
  fn new(
    entries: Vec<NodeEntry>,
    inboxes: Vec<mpsc::UnboundedSender<Task>>,
    max_invocations: Option<u64>,
  ) -> Self {
    let workers = inboxes.len();
    let slots: Vec<Slot> = entries
      .into_iter()
      .map(|entry| Slot::new(entry, workers))
      .collect();
    Self {
      outputs: vec![Vec::new(); slots.len()],
      slots,
      inboxes,
      in_flight: vec![0; workers],
      max_invocations,
      dispatched: 0,
      routed: 0,
      dropped: 0,
    }
  }

  async fn drive(
    &mut self,
    done: &mut mpsc::UnboundedReceiver<Completion>,
  ) -> Result<(), RuntimeError> {
    self.dispatch_ready()?;
    while self.in_flight.iter().any(|n| *n > 0) {
      let Some(completion) = done.recv().await else {
        let worker = self.in_flight.iter().position(|n| *n > 0).unwrap_or(0);
        return Err(RuntimeError::WorkerLost(worker));
      };
      self.complete(completion)?;
      self.dispatch_ready()?;
    }
    Ok(())
  }

  fn dispatch_ready(&mut self) -> Result<(), RuntimeError> {
    for index in 0..self.slots.len() {
      while self.slots[index].is_runnable() {
        if !self.dispatch(NodeId(index))? {
          break;
        }
      }
    }
    Ok(())
  }

  /// Sends one invocation to a worker. Returns `false` if no instance of the
  /// node was available.
  fn dispatch(&mut self, id: NodeId) -> Result<bool, RuntimeError> {
    if let Some(limit) = self.max_invocations {
      if self.dispatched >= limit {
        return Err(RuntimeError::InvocationLimit(limit));
      }
    }
    let in_flight = &self.in_flight;
    let slot = &mut self.slots[id.index()];
    let worker = slot
      .allowed
      .iter()
      .copied()
      .min_by_key(|w| (in_flight[*w], *w))
      .ok_or_else(|| GraphError::EmptyAffinity(slot.name.clone()))?;
    let Some(node) = slot.instances.check_out() else {
      return Ok(false);
    };
    let args = slot.take_args();
    slot.wants_run = false;
    slot.invocations += 1;
    slot.running += 1;
    slot.peak_running = slot.peak_running.max(slot.running);
    debug!(node = %slot.name, worker, running = slot.running, args = ?args, "dispatching");

    let task = Task {
      id,
      name: slot.name.clone(),
      node,
      args,
      destinations: Arc::clone(&slot.destinations),
      closed: slot.retired,
    };
    self.inboxes[worker]
      .send(task)
      .map_err(|_| RuntimeError::WorkerLost(worker))?;
    self.in_flight[worker] += 1;
    self.dispatched += 1;
    Ok(true)
  }

  fn complete(&mut self, completion: Completion) -> Result<(), RuntimeError> {
    let Completion {
      worker,
      id,
      node,
      closed,
      operands,
      result,
    } = completion;
    self.in_flight[worker] = self.in_flight[worker].saturating_sub(1);

    let slot = &mut self.slots[id.index()];
    slot.instances.check_in(node);
    slot.running = slot.running.saturating_sub(1);
    if let Err(source) = result {
      return Err(RuntimeError::NodeFailed {
        node: slot.name.clone(),
        worker,
        source,
      });
    }
    let newly_retired = closed && !slot.retired;
    slot.retired |= closed;

    for operand in operands {
      self.route(operand);
    }
    if newly_retired {
      self.retire(id);
    }
    Ok(())
  }

  fn route(&mut self, operand: Operand) {
    let source = operand.source.index();
    if operand.request_task {
      let slot = &mut self.slots[source];
      if slot.arity == 0 && !slot.retired {
        slot.wants_run = true;
      }
    }

    let Some(dst) = operand.destination else {
      trace!(node = %self.slots[source].name, token = ?operand.token, "collected output");
      self.outputs[source].push(operand.token);
      return;
    };
    let target = &mut self.slots[dst.node.index()];
    if target.retired {
      if operand.token.is_end_of_stream() {
        trace!(node = %target.name, port = dst.port, "end-of-stream for retired node ignored");
      } else {
        warn!(
          node = %target.name,
          port = dst.port,
          token = ?operand.token,
          "node already retired, token dropped"
        );
        self.dropped += 1;
      }
      return;
    }
    trace!(
      from = %self.slots[source].name,
      to = %self.slots[dst.node.index()].name,
      port = dst.port,
      token = ?operand.token,
      "routing operand"
    );
    self.slots[dst.node.index()].ports[dst.port].push_back(operand.token);
    self.routed += 1;
  }

  fn retire(&mut self, id: NodeId) {
    let slot = &mut self.slots[id.index()];
    let residue = slot.queued_data();
    slot.ports.iter_mut().for_each(VecDeque::clear);
    slot.wants_run = false;
    if residue > 0 {
      warn!(node = %slot.name, residue, "node retired with queued tokens, dropping them");
      self.dropped += residue as u64;
    }
    info!(node = %slot.name, invocations = slot.invocations, "node retired");
  }

  fn finish(self) -> Execution {
    let mut undelivered = 0u64;
    for slot in &self.slots {
      let queued = slot.queued_data();
      if queued > 0 {
        warn!(node = %slot.name, queued, "graph quiescent with undelivered tokens");
        undelivered += queued as u64;
      }
      if !slot.retired {
        debug!(node = %slot.name, "node never emitted end-of-stream");
      }
    }

    let stats = ExecutionStats {
      invocations: self
        .slots
        .iter()
        .map(|s| (s.name.clone(), s.invocations))
        .collect(),
      operands_routed: self.routed,
      tokens_dropped: self.dropped,
      tokens_undelivered: undelivered,
      peak_concurrency: self
        .slots
        .iter()
        .map(|s| (s.name.clone(), s.peak_running))
        .collect(),
    };
    let index = self
      .slots
      .iter()
      .enumerate()
      .map(|(i, s)| (s.name.clone(), i))
      .collect();
    Execution {
      index,
      outputs: self.outputs,
      stats,
    }
  }
}
