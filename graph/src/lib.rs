//! A small dataflow graph runtime.
//!
//! Graphs are built symbolically through `Graph`, differentiated with
//! `Graph::gradients` and executed by a `Session`. Values are dense `f32`
//! tensors, variables live in lock protected storage owned by the graph.

mod builder;
pub mod error;
pub mod gradients;
mod graph;
pub mod init;
mod keys;
mod op;
mod session;
mod variable;

pub use builder::MomentumFlags;
pub use error::{GraphErr, Result};
pub use gradients::{AggregationMethod, Gradient, GradientOptions, IndexedSlices};
pub use graph::Graph;
pub use keys::GraphKeys;
pub use op::{Locking, Node, Op};
pub use session::Session;
pub use variable::{Variable, VariableId, VariableKind};
