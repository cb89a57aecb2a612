//! Symbolic reverse-mode gradients.
//!
//! `Graph::gradients` appends the ops computing `d(sum ys)/d(xs)` to the graph
//! and returns handles to them, nothing is executed until a session runs them.

mod aggregate;
mod rules;

use std::collections::HashMap;

use log::debug;

use crate::{
    error::{GraphErr, Result},
    graph::Graph,
    op::Node,
};

/// How the gradients reaching a node from several consumers are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationMethod {
    /// A single `AddN` over every contribution.
    #[default]
    AddN = 0,
    /// A balanced tree of pairwise `Add`s.
    ExperimentalTree = 1,
    /// A running sum, one `Add` per contribution.
    ExperimentalAccumulateN = 2,
}

/// Tuning knobs for `Graph::gradients`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientOptions {
    /// Gate the input gradients of each op so none is consumed before all are
    /// produced.
    pub gate_gradients: bool,
    pub aggregation_method: AggregationMethod,
    /// Place the gradient ops with their forward ops. The runtime has a
    /// single device so this is only recorded.
    pub colocate_gradients_with_ops: bool,
}

/// A sparse gradient: the rows `indices` of a tensor shaped like `dense_shape`.
///
/// Indices may repeat, repeated rows add up.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedSlices {
    pub values: Node,
    pub indices: Vec<usize>,
    /// A node whose runtime shape is the dense shape.
    pub dense_shape: Node,
}

/// The gradient of a loss with respect to a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Gradient {
    Dense(Node),
    Sparse(IndexedSlices),
}

impl Gradient {
    /// Returns the node holding the gradient's values.
    pub fn values(&self) -> Node {
        match self {
            Gradient::Dense(node) => *node,
            Gradient::Sparse(slices) => slices.values,
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Gradient::Sparse(_))
    }

    /// Replaces the values node, keeping the sparse structure if any.
    pub fn with_values(&self, values: Node) -> Self {
        match self {
            Gradient::Dense(_) => Gradient::Dense(values),
            Gradient::Sparse(slices) => Gradient::Sparse(IndexedSlices {
                values,
                ..slices.clone()
            }),
        }
    }
}

impl Graph {
    /// Builds the gradients of the sum of `ys` with respect to each of `xs`.
    ///
    /// # Arguments
    /// * `ys` - The nodes to differentiate.
    /// * `xs` - The nodes to differentiate with respect to.
    /// * `grad_ys` - The initial gradient of each `y`, ones shaped like `y`
    ///   when not given.
    /// * `options` - Gating and aggregation options.
    ///
    /// # Returns
    /// One entry per `x`, in order, `None` where `ys` don't depend on `x`. An
    /// error if a differentiated path crosses an op with no gradient rule.
    pub fn gradients(
        &mut self,
        ys: &[Node],
        xs: &[Node],
        grad_ys: Option<&[Node]>,
        options: GradientOptions,
    ) -> Result<Vec<Option<Gradient>>> {
        if let Some(grad_ys) = grad_ys
            && grad_ys.len() != ys.len()
        {
            return Err(GraphErr::InvalidArgument(format!(
                "got {} grad_ys for {} ys",
                grad_ys.len(),
                ys.len()
            )));
        }

        for &node in ys.iter().chain(xs).chain(grad_ys.unwrap_or_default()) {
            self.def(node)?;
        }

        if options.colocate_gradients_with_ops {
            debug!("single device runtime, gradients aren't colocated");
        }

        self.with_name_scope("gradients", |g| g.build_gradients(ys, xs, grad_ys, options))
    }

    fn build_gradients(
        &mut self,
        ys: &[Node],
        xs: &[Node],
        grad_ys: Option<&[Node]>,
        options: GradientOptions,
    ) -> Result<Vec<Option<Gradient>>> {
        let between = self.between(ys, xs)?;
        let mut pending: HashMap<Node, Vec<Gradient>> = HashMap::new();

        for (i, &y) in ys.iter().enumerate() {
            if !between[y.0] {
                continue;
            }

            let grad = match grad_ys {
                Some(grad_ys) => grad_ys[i],
                None => self.ones_like(y)?,
            };
            pending.entry(y).or_default().push(Gradient::Dense(grad));
        }

        let mut results: HashMap<Node, Gradient> = HashMap::new();
        let Some(&last) = ys.iter().max() else {
            return Ok(vec![None; xs.len()]);
        };

        for index in (0..=last.0).rev() {
            let node = Node(index);
            let Some(grads) = pending.remove(&node) else {
                continue;
            };

            let grad = self.aggregate(grads, options.aggregation_method)?;
            if xs.contains(&node) {
                results.insert(node, grad.clone());
            }

            let op = self.op(node)?.clone();
            let inputs = op.inputs();
            let wanted: Vec<bool> = inputs.iter().map(|input| between[input.0]).collect();
            if !wanted.contains(&true) {
                continue;
            }

            let dense = self.densify(&grad)?;
            let mut in_grads = rules::input_gradients(self, node, &op, dense, &wanted)?;

            if options.gate_gradients {
                in_grads = self.gate(in_grads)?;
            }

            for (input, in_grad) in inputs.into_iter().zip(in_grads) {
                if let Some(in_grad) = in_grad {
                    pending.entry(input).or_default().push(in_grad);
                }
            }
        }

        Ok(xs.iter().map(|x| results.get(x).cloned()).collect())
    }

    /// Marks the nodes that lie on a data path from some `x` to some `y`.
    fn between(&self, ys: &[Node], xs: &[Node]) -> Result<Vec<bool>> {
        let len = self.len();
        let mut reached = vec![false; len];

        for &x in xs {
            reached[x.0] = true;
        }

        for index in 0..len {
            if reached[index] {
                continue;
            }

            let inputs = self.op(Node(index))?.inputs();
            reached[index] = inputs.iter().any(|input| reached[input.0]);
        }

        let mut needed = vec![false; len];
        for &y in ys {
            needed[y.0] = true;
        }

        for index in (0..len).rev() {
            if !needed[index] || !reached[index] {
                continue;
            }

            for input in self.op(Node(index))?.inputs() {
                needed[input.0] = true;
            }
        }

        Ok((0..len).map(|i| needed[i] && reached[i]).collect())
    }

    /// Turns a sparse gradient into a dense one.
    pub fn densify(&mut self, grad: &Gradient) -> Result<Node> {
        match grad {
            Gradient::Dense(node) => Ok(*node),
            Gradient::Sparse(slices) => {
                self.scatter_dense(slices.values, &slices.indices, slices.dense_shape)
            }
        }
    }

    /// Gates the gradients of an op's inputs behind each other when there is
    /// more than one of them.
    fn gate(&mut self, grads: Vec<Option<Gradient>>) -> Result<Vec<Option<Gradient>>> {
        let present: Vec<Node> = grads.iter().flatten().map(Gradient::values).collect();
        if present.len() < 2 {
            return Ok(grads);
        }

        let mut gated = self.tuple(&present)?.into_iter();
        Ok(grads
            .into_iter()
            .map(|grad| {
                let grad = grad?;
                gated.next().map(|values| grad.with_values(values))
            })
            .collect())
    }
}
