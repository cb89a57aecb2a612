//! Training primitives on top of the graph runtime: the optimizer base, its
//! gradient descent and momentum implementations and the gating options.

pub mod error;
mod gate;
mod gradient_descent;
mod momentum;
mod optimizer;
mod slots;

pub use error::{Result, TrainErr};
pub use gate::GateGradients;
pub use gradient_descent::GradientDescentOptimizer;
pub use graph::{AggregationMethod, GraphKeys};
pub use momentum::MomentumOptimizer;
pub use optimizer::{ComputeGradientsOptions, GradAndVar, Optimizer, deduplicate_indexed_slices};
pub use slots::SlotStore;
