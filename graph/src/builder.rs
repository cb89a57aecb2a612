//! Typed constructors for every op the runtime supports.

use ndarray::{ArrayD, IxDyn, arr0};

use crate::{
    error::{GraphErr, Result},
    graph::Graph,
    op::{Locking, Node, Op},
    variable::{Variable, VariableKind},
};

/// Flags shared by the momentum update ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct MomentumFlags {
    pub use_locking: bool,
    pub use_nesterov: bool,
}

impl Graph {
    pub fn constant(&mut self, value: ArrayD<f32>) -> Result<Node> {
        self.add_node(Op::Const(value), "Const")
    }

    pub fn scalar(&mut self, value: f32) -> Result<Node> {
        self.constant(arr0(value).into_dyn())
    }

    /// Adds a named scalar constant.
    pub fn scalar_named(&mut self, value: f32, name: &str) -> Result<Node> {
        self.add_node(Op::Const(arr0(value).into_dyn()), name)
    }

    /// Adds a placeholder, a node whose value must be fed on every run.
    pub fn placeholder(&mut self, name: &str) -> Result<Node> {
        self.add_node(Op::Placeholder, name)
    }

    /// Adds a fresh read of `var`.
    ///
    /// Unlike `var.node()`, the new read honors the control dependencies in
    /// scope, so it can observe the effect of earlier updates.
    pub fn read_value(&mut self, var: &Variable) -> Result<Node> {
        self.variable_def(var.id())?;
        self.add_node(Op::Variable(var.id()), &format!("{}/read", var.name()))
    }

    pub fn identity(&mut self, a: Node) -> Result<Node> {
        self.add_node(Op::Identity(a), "Identity")
    }

    /// Passes `a` through while blocking gradients from flowing into it.
    pub fn stop_gradient(&mut self, a: Node) -> Result<Node> {
        self.add_node(Op::StopGradient(a), "StopGradient")
    }

    pub fn add(&mut self, a: Node, b: Node) -> Result<Node> {
        self.add_node(Op::Add(a, b), "Add")
    }

    pub fn sub(&mut self, a: Node, b: Node) -> Result<Node> {
        self.add_node(Op::Sub(a, b), "Sub")
    }

    pub fn mul(&mut self, a: Node, b: Node) -> Result<Node> {
        self.add_node(Op::Mul(a, b), "Mul")
    }

    pub fn div(&mut self, a: Node, b: Node) -> Result<Node> {
        self.add_node(Op::Div(a, b), "Div")
    }

    pub fn neg(&mut self, a: Node) -> Result<Node> {
        self.add_node(Op::Neg(a), "Neg")
    }

    pub fn square(&mut self, a: Node) -> Result<Node> {
        self.add_node(Op::Square(a), "Square")
    }

    pub fn sigmoid(&mut self, a: Node) -> Result<Node> {
        self.add_node(Op::Sigmoid(a), "Sigmoid")
    }

    pub fn matmul(&mut self, a: Node, b: Node) -> Result<Node> {
        self.add_node(Op::MatMul(a, b), "MatMul")
    }

    pub fn transpose(&mut self, a: Node) -> Result<Node> {
        self.add_node(Op::Transpose(a), "Transpose")
    }

    /// Sums every element of `a` into a scalar.
    pub fn sum(&mut self, a: Node) -> Result<Node> {
        self.add_node(Op::Sum(a), "Sum")
    }

    /// Averages every element of `a` into a scalar.
    pub fn mean(&mut self, a: Node) -> Result<Node> {
        self.add_node(Op::Mean(a), "Mean")
    }

    pub fn size(&mut self, a: Node) -> Result<Node> {
        self.add_node(Op::Size(a), "Size")
    }

    pub fn broadcast_like(&mut self, value: Node, like: Node) -> Result<Node> {
        self.add_node(Op::BroadcastLike { value, like }, "BroadcastLike")
    }

    /// Sums `value` over its broadcast axes so it ends up shaped like `like`.
    pub fn sum_to_shape(&mut self, value: Node, like: Node) -> Result<Node> {
        self.add_node(Op::SumToShape { value, like }, "SumToShape")
    }

    /// Adds a tensor of ones shaped like `like`.
    pub fn ones_like(&mut self, like: Node) -> Result<Node> {
        let one = self.scalar(1.0)?;
        self.broadcast_like(one, like)
    }

    pub fn add_n(&mut self, nodes: &[Node]) -> Result<Node> {
        if nodes.is_empty() {
            return Err(GraphErr::InvalidArgument(
                "AddN needs at least one input".into(),
            ));
        }

        self.add_node(Op::AddN(nodes.to_vec()), "AddN")
    }

    /// Selects rows of `params` along the first axis.
    pub fn gather(&mut self, params: Node, indices: &[usize]) -> Result<Node> {
        self.add_node(
            Op::Gather {
                params,
                indices: indices.to_vec(),
            },
            "Gather",
        )
    }

    /// Writes the rows of `values` at `indices` of a zero tensor shaped like
    /// `like`, duplicated indices are summed.
    pub fn scatter_dense(&mut self, values: Node, indices: &[usize], like: Node) -> Result<Node> {
        self.add_node(
            Op::ScatterDense {
                values,
                indices: indices.to_vec(),
                like,
            },
            "ScatterDense",
        )
    }

    /// Concatenates along the first axis.
    pub fn concat(&mut self, nodes: &[Node]) -> Result<Node> {
        if nodes.is_empty() {
            return Err(GraphErr::InvalidArgument(
                "Concat needs at least one input".into(),
            ));
        }

        self.add_node(Op::Concat(nodes.to_vec()), "Concat")
    }

    /// Sums the rows of `data` that share a segment id.
    pub fn segment_sum(
        &mut self,
        data: Node,
        segment_ids: &[usize],
        num_segments: usize,
    ) -> Result<Node> {
        if let Some(&bad) = segment_ids.iter().find(|&&id| id >= num_segments) {
            return Err(GraphErr::InvalidArgument(format!(
                "segment id {bad} is out of range for {num_segments} segments"
            )));
        }

        self.add_node(
            Op::SegmentSum {
                data,
                segment_ids: segment_ids.to_vec(),
                num_segments,
            },
            "SegmentSum",
        )
    }

    /// Adds an op that does nothing but run after every node in `nodes`.
    pub fn group(&mut self, nodes: &[Node], name: &str) -> Result<Node> {
        self.with_control_dependencies(nodes, |g| g.add_node(Op::NoOp, name))
    }

    /// Gates `nodes` behind each other.
    ///
    /// # Arguments
    /// * `nodes` - The values to gate.
    ///
    /// # Returns
    /// One identity per input, none of them can be produced before all of
    /// `nodes` have been.
    pub fn tuple(&mut self, nodes: &[Node]) -> Result<Vec<Node>> {
        self.with_name_scope("tuple", |g| -> Result<Vec<Node>> {
            let gate = g.group(nodes, "control_dependency")?;
            g.with_control_dependencies(&[gate], |g| {
                nodes.iter().map(|&node| g.identity(node)).collect()
            })
        })
    }

    pub fn assign(&mut self, var: &Variable, value: Node, name: &str) -> Result<Node> {
        self.add_node(
            Op::Assign {
                var: var.id(),
                value,
            },
            name,
        )
    }

    pub fn assign_add(&mut self, var: &Variable, value: Node, name: &str) -> Result<Node> {
        self.add_node(
            Op::AssignAdd {
                var: var.id(),
                value,
            },
            name,
        )
    }

    pub fn assign_sub(&mut self, var: &Variable, value: Node, name: &str) -> Result<Node> {
        self.add_node(
            Op::AssignSub {
                var: var.id(),
                value,
            },
            name,
        )
    }

    /// `var -= alpha * delta` on a ref variable.
    ///
    /// # Arguments
    /// * `var` - The ref variable to update.
    /// * `alpha` - The scalar scaling factor.
    /// * `delta` - The change, shaped like `var`.
    /// * `use_locking` - Whether the update holds the variable's lock.
    ///
    /// # Returns
    /// The update node, it evaluates to the updated value.
    pub fn apply_gradient_descent(
        &mut self,
        var: &Variable,
        alpha: Node,
        delta: Node,
        use_locking: bool,
    ) -> Result<Node> {
        let op = Op::ApplyGradientDescent {
            var: var.id(),
            alpha,
            delta,
            locking: Locking(use_locking),
            resource: false,
        };
        self.add_update(op, var, VariableKind::Ref)
    }

    /// `var -= alpha * delta` on a resource variable.
    pub fn resource_apply_gradient_descent(
        &mut self,
        var: &Variable,
        alpha: Node,
        delta: Node,
        use_locking: bool,
    ) -> Result<Node> {
        let op = Op::ApplyGradientDescent {
            var: var.id(),
            alpha,
            delta,
            locking: Locking(use_locking),
            resource: true,
        };
        self.add_update(op, var, VariableKind::Resource)
    }

    /// `var[indices[i]] -= updates[i]` on a ref variable, duplicated indices
    /// accumulate.
    pub fn scatter_sub(
        &mut self,
        var: &Variable,
        indices: &[usize],
        updates: Node,
        use_locking: bool,
    ) -> Result<Node> {
        let op = Op::ScatterSub {
            var: var.id(),
            indices: indices.to_vec(),
            updates,
            locking: Locking(use_locking),
        };
        self.add_update(op, var, VariableKind::Ref)
    }

    /// `var[indices[i]] += updates[i]` on a resource variable, duplicated
    /// indices accumulate.
    pub fn resource_scatter_add(
        &mut self,
        var: &Variable,
        indices: &[usize],
        updates: Node,
    ) -> Result<Node> {
        let op = Op::ResourceScatterAdd {
            var: var.id(),
            indices: indices.to_vec(),
            updates,
        };
        self.add_update(op, var, VariableKind::Resource)
    }

    /// `accum = accum * momentum + grad; var -= lr * accum`, or the Nesterov
    /// variant `var -= lr * (grad + momentum * accum)`.
    pub fn apply_momentum(
        &mut self,
        var: &Variable,
        accum: &Variable,
        lr: Node,
        grad: Node,
        momentum: Node,
        flags: MomentumFlags,
    ) -> Result<Node> {
        let resource = var.kind() == VariableKind::Resource;
        let op = Op::ApplyMomentum {
            var: var.id(),
            accum: accum.id(),
            lr,
            grad,
            momentum,
            locking: Locking(flags.use_locking),
            nesterov: flags.use_nesterov,
            resource,
        };
        self.add_update(op, var, var.kind())
    }

    /// The row-wise version of `apply_momentum`, only the rows in `indices`
    /// of `var` and `accum` are touched.
    #[allow(clippy::too_many_arguments)]
    pub fn sparse_apply_momentum(
        &mut self,
        var: &Variable,
        accum: &Variable,
        lr: Node,
        grad: Node,
        indices: &[usize],
        momentum: Node,
        flags: MomentumFlags,
    ) -> Result<Node> {
        let resource = var.kind() == VariableKind::Resource;
        let op = Op::SparseApplyMomentum {
            var: var.id(),
            accum: accum.id(),
            lr,
            grad,
            indices: indices.to_vec(),
            momentum,
            locking: Locking(flags.use_locking),
            nesterov: flags.use_nesterov,
            resource,
        };
        self.add_update(op, var, var.kind())
    }

    fn add_update(&mut self, op: Op, var: &Variable, expected: VariableKind) -> Result<Node> {
        let op_name = op.type_name();

        if var.kind() != expected {
            return Err(GraphErr::VariableKindMismatch {
                op: op_name,
                variable: var.name().to_string(),
            });
        }

        self.variable_def(var.id())?;
        self.add_node(op, op_name)
    }

    /// Builds a constant filled with `value`, shaped like `shape`.
    pub fn fill(&mut self, shape: &[usize], value: f32) -> Result<Node> {
        self.constant(ArrayD::from_elem(IxDyn(shape), value))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr1;

    use super::*;

    #[test]
    fn test_update_requires_matching_variable_kind() {
        let mut graph = Graph::new();
        let var = graph.resource_variable("v", arr1(&[1.0]).into_dyn(), true);
        let lr = graph.scalar(0.1).unwrap();
        let grad = graph.constant(arr1(&[1.0]).into_dyn()).unwrap();

        let err = graph
            .apply_gradient_descent(&var, lr, grad, false)
            .unwrap_err();
        assert!(matches!(err, GraphErr::VariableKindMismatch { .. }));

        let ok = graph
            .resource_apply_gradient_descent(&var, lr, grad, false)
            .unwrap();
        assert_eq!(
            graph.op(ok).unwrap().type_name(),
            "ResourceApplyGradientDescent"
        );
    }

    #[test]
    fn test_tuple_gates_every_output() {
        let mut graph = Graph::new();
        let a = graph.scalar(1.0).unwrap();
        let b = graph.scalar(2.0).unwrap();

        let gated = graph.tuple(&[a, b]).unwrap();
        assert_eq!(gated.len(), 2);

        let gate = graph.control_inputs(gated[0]).unwrap()[0];
        assert_eq!(graph.control_inputs(gated[1]).unwrap(), &[gate]);
        assert_eq!(graph.control_inputs(gate).unwrap(), &[a, b]);
        assert_eq!(graph.name(gate).unwrap(), "tuple/control_dependency");
    }

    #[test]
    fn test_segment_ids_are_checked() {
        let mut graph = Graph::new();
        let data = graph.fill(&[3, 2], 1.0).unwrap();
        assert!(graph.segment_sum(data, &[0, 2, 1], 2).is_err());
        assert!(graph.segment_sum(data, &[0, 1, 1], 2).is_ok());
    }
}
