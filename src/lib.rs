//! # tagweave
//!
//! Tagged-token dataflow on a pool of workers.
//!
//! A program is a fixed graph of nodes. Values enter through sources, which
//! stamp every element with a monotonically increasing [`Tag`](time::Tag).
//! Because workers run invocations concurrently, values may reach a consumer
//! out of order; a [`Serializer`](nodes::Serializer) restores strict tag order
//! across several independently paced streams.
//!
//! ## Key Pieces
//!
//! - **Tokens**: tagged values, untagged values and the end-of-stream sentinel
//!   ([`operand`])
//! - **Nodes**: five variants behind one execution protocol ([`node`],
//!   [`nodes`])
//! - **Graph**: construction with tag-correlation checks ([`graph`])
//! - **Scheduler**: reference tokio runtime honoring worker affinity
//!   ([`scheduler`])
//!
//! ## Quick Start
//!
//! ```rust
//! use tagweave::config::RuntimeConfig;
//! use tagweave::graph::Graph;
//! use tagweave::nodes::{FilterTagged, Serializer, Source};
//! use tagweave::scheduler::Scheduler;
//! use tagweave::time::value;
//!
//! # tokio_test::block_on(async {
//! let mut graph = Graph::new("squares");
//! let src = graph.add_node(Box::new(Source::from_values("src", 0..5i64)))?;
//! let sq = graph.add_node(Box::new(FilterTagged::new("sq", 1, |v| {
//!   let x = v[0].downcast_ref::<i64>().ok_or("expected i64")?;
//!   Ok(value(x * x))
//! })))?;
//! let out = graph.add_node(Box::new(Serializer::new("out", 1, |v| Ok(v[0].clone()))))?;
//! graph.connect(src, sq, 0)?;
//! graph.connect(sq, out, 0)?;
//!
//! let execution = Scheduler::new(RuntimeConfig::new(2)).run(graph).await?;
//! assert_eq!(execution.values_of::<i64>("out"), vec![0, 1, 4, 9, 16]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Worker ids and affinity sets.
pub mod affinity;
/// Runtime configuration.
pub mod config;
/// Error types.
pub mod error;
/// Graph construction and validation.
pub mod graph;
/// Tracing subscriber setup.
pub mod logging;
/// Node execution protocol.
pub mod node;
/// The built-in node variants.
pub mod nodes;
/// Operands, tokens and the per-invocation outbox.
pub mod operand;
/// Reference scheduler.
pub mod scheduler;
/// Tags and tagged values.
pub mod time;


pub use affinity::{Affinity, WorkerId};
pub use config::RuntimeConfig;
pub use error::{FlowError, GraphError, RuntimeError};
pub use graph::{Graph, NodeId};
pub use node::{Node, OutputKind};
pub use operand::{Operand, Outbox, Token};
pub use scheduler::{Execution, ExecutionStats, Scheduler};
pub use time::{Tag, TaggedValue, Value};
