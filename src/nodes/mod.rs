//! # Node Library
//!
//! The five node variants of the tagged-token execution model. All of them
//! implement the [`Node`](crate::node::Node) trait and exchange type-erased
//! payloads as [`Value`](crate::time::Value).
//!
//! ## Node Categories
//!
//! - **Producers** (0 inputs): [`Source`], [`Feeder`]
//! - **Transforms** (1+ inputs): [`FilterTagged`], [`Gate`]
//! - **Order restoration** (N inputs): [`Serializer`]

pub mod common;
pub mod feeder_node;
pub mod filter_tagged_node;
pub mod gate_node;
pub mod serializer_node;
pub mod source_node;

pub use feeder_node::Feeder;
pub use filter_tagged_node::FilterTagged;
pub use gate_node::Gate;
pub use serializer_node::{Serializer, TerminationPolicy};
pub use source_node::{Source, SourceContext};

#[cfg(test)]
mod serializer_node_test;
