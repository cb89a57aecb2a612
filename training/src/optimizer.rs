use std::collections::HashMap;

use graph::{
    AggregationMethod, Gradient, GradientOptions, Graph, GraphKeys, IndexedSlices, Node,
    Variable, VariableKind,
};
use log::{debug, warn};

use crate::{
    error::{Result, TrainErr},
    gate::GateGradients,
    slots::SlotStore,
};

/// A gradient paired with the variable it belongs to, `None` when the loss
/// doesn't depend on the variable.
pub type GradAndVar = (Option<Gradient>, Variable);

/// Options for `Optimizer::compute_gradients`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComputeGradientsOptions {
    pub gate_gradients: GateGradients,
    pub aggregation_method: AggregationMethod,
    pub colocate_gradients_with_ops: bool,
    /// The gradient of the loss itself, ones when not given.
    pub grad_loss: Option<Node>,
}

/// The base of every optimizer.
///
/// Implementors provide the update rules through the `apply_*` hooks, the
/// provided methods turn a loss into gradients and gradients into a single
/// training op built out of those hooks.
pub trait Optimizer {
    /// The name used for the optimizer's name scope and slot variables.
    fn name(&self) -> &str;

    /// Whether the update ops hold the variables' locks while updating.
    fn use_locking(&self) -> bool;

    fn slots(&self) -> &SlotStore;

    fn slots_mut(&mut self) -> &mut SlotStore;

    /// Creates the slots the update rules need, called once per
    /// `apply_gradients` with every variable about to be updated.
    fn create_slots(&mut self, _graph: &mut Graph, _vars: &[Variable]) -> Result<()> {
        Ok(())
    }

    /// Builds whatever the update rules share, e.g. hyperparameter nodes.
    /// Called inside the optimizer's name scope before any update op is built.
    fn prepare(&mut self, _graph: &mut Graph) -> Result<()> {
        Ok(())
    }

    /// Builds the update of a ref variable from a dense gradient.
    fn apply_dense(&mut self, graph: &mut Graph, grad: Node, var: &Variable) -> Result<Node>;

    /// Builds the update of a resource variable from a dense gradient.
    fn resource_apply_dense(&mut self, graph: &mut Graph, grad: Node, var: &Variable)
    -> Result<Node>;

    /// Builds the update of a ref variable from a sparse gradient whose
    /// indices are unique.
    fn apply_sparse(
        &mut self,
        graph: &mut Graph,
        grad: &IndexedSlices,
        var: &Variable,
    ) -> Result<Node>;

    /// Builds the update of a resource variable from the rows `values` at the
    /// unique `indices`.
    fn resource_apply_sparse(
        &mut self,
        graph: &mut Graph,
        values: Node,
        var: &Variable,
        indices: &[usize],
    ) -> Result<Node>;

    /// Builds the update of a ref variable from a sparse gradient that may
    /// repeat indices. Repeated rows are summed before `apply_sparse`.
    fn apply_sparse_duplicate_indices(
        &mut self,
        graph: &mut Graph,
        grad: &IndexedSlices,
        var: &Variable,
    ) -> Result<Node> {
        let grad = deduplicate_indexed_slices(graph, grad)?;
        self.apply_sparse(graph, &grad, var)
    }

    /// Resource variable version of `apply_sparse_duplicate_indices`.
    fn resource_apply_sparse_duplicate_indices(
        &mut self,
        graph: &mut Graph,
        grad: &IndexedSlices,
        var: &Variable,
    ) -> Result<Node> {
        let grad = deduplicate_indexed_slices(graph, grad)?;
        self.resource_apply_sparse(graph, grad.values, var, &grad.indices)
    }

    /// Combines the update ops into the op that runs them all.
    fn finish(&mut self, graph: &mut Graph, update_ops: &[Node], name: &str) -> Result<Node> {
        Ok(graph.group(update_ops, name)?)
    }

    /// Builds the gradients of `loss` with respect to each variable.
    ///
    /// # Arguments
    /// * `graph` - The graph holding `loss` and the variables.
    /// * `loss` - The value to minimize.
    /// * `var_list` - The variables to differentiate with respect to, every
    ///   trainable variable when not given.
    /// * `options` - Gating, aggregation and the loss' initial gradient.
    ///
    /// # Returns
    /// One pair per variable, in `var_list` order.
    fn compute_gradients(
        &self,
        graph: &mut Graph,
        loss: Node,
        var_list: Option<&[Variable]>,
        options: &ComputeGradientsOptions,
    ) -> Result<Vec<GradAndVar>> {
        let vars = match var_list {
            Some(vars) => vars.to_vec(),
            None => graph.trainable_variables(),
        };

        if vars.is_empty() {
            return Err(TrainErr::NoVariables);
        }

        let xs: Vec<Node> = vars.iter().map(Variable::node).collect();
        let grad_ys = options.grad_loss.map(|grad| [grad]);
        let gradient_options = GradientOptions {
            gate_gradients: options.gate_gradients.gates_ops(),
            aggregation_method: options.aggregation_method,
            colocate_gradients_with_ops: options.colocate_gradients_with_ops,
        };

        let mut grads = graph.gradients(
            &[loss],
            &xs,
            grad_ys.as_ref().map(|grad| grad.as_slice()),
            gradient_options,
        )?;

        if options.gate_gradients == GateGradients::GateGraph {
            grads = gate_graph(graph, grads)?;
        }

        if grads.len() != vars.len() {
            return Err(TrainErr::GradientCountMismatch {
                grads: grads.len(),
                vars: vars.len(),
            });
        }

        debug!(
            optimizer = self.name(),
            vars = vars.len(),
            with_gradient = grads.iter().flatten().count();
            "computed gradients"
        );

        Ok(grads.into_iter().zip(vars).collect())
    }

    /// Builds the op applying `grads_and_vars`.
    ///
    /// # Arguments
    /// * `graph` - The graph holding the gradients and variables.
    /// * `grads_and_vars` - The pairs returned by `compute_gradients`, pairs
    ///   without a gradient are skipped.
    /// * `global_step` - A counter incremented once the updates are done.
    /// * `name` - The name scope of the update ops, the optimizer's name when
    ///   not given.
    ///
    /// # Returns
    /// The training op. It increments `global_step` when one is given, it
    /// groups the updates otherwise.
    fn apply_gradients(
        &mut self,
        graph: &mut Graph,
        grads_and_vars: &[GradAndVar],
        global_step: Option<&Variable>,
        name: Option<&str>,
    ) -> Result<Node> {
        if grads_and_vars.is_empty() {
            return Err(TrainErr::NoGradientsProvided);
        }

        let mut pairs = Vec::with_capacity(grads_and_vars.len());
        for (grad, var) in grads_and_vars {
            match grad {
                Some(grad) => pairs.push((grad, var)),
                None => debug!(variable = var.name(); "no gradient, skipping variable"),
            }
        }

        if pairs.is_empty() {
            let variables = grads_and_vars
                .iter()
                .map(|(_, var)| var.name().to_string())
                .collect();
            return Err(TrainErr::NoGradients { variables });
        }

        let vars: Vec<Variable> = pairs.iter().map(|(_, var)| (*var).clone()).collect();
        self.create_slots(graph, &vars)?;

        let name = name.map_or_else(|| self.name().to_string(), str::to_string);
        let train_op = graph.with_name_scope(&name, |g| -> Result<Node> {
            self.prepare(g)?;

            let mut update_ops = Vec::with_capacity(pairs.len());
            for (grad, var) in &pairs {
                let scope = format!("update_{}", var.name());
                let update = g.with_name_scope(&scope, |g| apply_one(&mut *self, g, grad, var))?;
                let op = g.name(update)?;
                debug!(variable = var.name(), op = op; "created update op");
                update_ops.push(update);
            }

            let Some(step) = global_step else {
                return self.finish(g, &update_ops, "update");
            };

            let updates = self.finish(g, &update_ops, "update")?;
            let one = g.scalar(1.0)?;
            let increment = g.with_control_dependencies(&[updates], |g| {
                g.assign_add(step, one, "increment_global_step")
            })?;
            Ok(increment)
        })?;

        graph.add_to_collection(GraphKeys::TRAIN_OP, train_op);
        Ok(train_op)
    }

    /// Adds the ops minimizing `loss`, `compute_gradients` followed by
    /// `apply_gradients`.
    ///
    /// # Returns
    /// The training op or a `NoGradients` error when no variable got a
    /// gradient.
    fn minimize(
        &mut self,
        graph: &mut Graph,
        loss: Node,
        global_step: Option<&Variable>,
        var_list: Option<&[Variable]>,
        options: &ComputeGradientsOptions,
    ) -> Result<Node> {
        let grads_and_vars = self.compute_gradients(graph, loss, var_list, options)?;

        if grads_and_vars.iter().all(|(grad, _)| grad.is_none()) {
            let variables = grads_and_vars
                .iter()
                .map(|(_, var)| var.name().to_string())
                .collect();
            return Err(TrainErr::NoGradients { variables });
        }

        self.apply_gradients(graph, &grads_and_vars, global_step, None)
    }

    /// Returns the `slot` of `var`, if the optimizer created one.
    fn get_slot(&self, var: &Variable, slot: &str) -> Option<Variable> {
        self.slots().get(var, slot).cloned()
    }

    fn get_slot_names(&self) -> Vec<String> {
        self.slots().names()
    }

    /// Returns every variable the optimizer created.
    fn variables(&self) -> Vec<Variable> {
        self.slots().variables()
    }
}

/// Routes a gradient to the hook matching its variable's kind and its own
/// density.
fn apply_one<O: Optimizer + ?Sized>(
    optimizer: &mut O,
    graph: &mut Graph,
    grad: &Gradient,
    var: &Variable,
) -> Result<Node> {
    match (var.kind(), grad) {
        (VariableKind::Ref, Gradient::Dense(grad)) => optimizer.apply_dense(graph, *grad, var),
        (VariableKind::Ref, Gradient::Sparse(grad)) => {
            optimizer.apply_sparse_duplicate_indices(graph, grad, var)
        }
        (VariableKind::Resource, Gradient::Dense(grad)) => {
            optimizer.resource_apply_dense(graph, *grad, var)
        }
        (VariableKind::Resource, Gradient::Sparse(grad)) => {
            optimizer.resource_apply_sparse_duplicate_indices(graph, grad, var)
        }
    }
}

/// Gates every gradient behind every other one.
fn gate_graph(graph: &mut Graph, grads: Vec<Option<Gradient>>) -> Result<Vec<Option<Gradient>>> {
    let present: Vec<Node> = grads.iter().flatten().map(Gradient::values).collect();
    if present.is_empty() {
        warn!("no variable has a gradient, nothing to gate");
        return Ok(grads);
    }

    let mut gated = graph.tuple(&present)?.into_iter();
    Ok(grads
        .into_iter()
        .map(|grad| {
            let grad = grad?;
            gated.next().map(|values| grad.with_values(values))
        })
        .collect())
}

/// Sums the rows of `grad` that share an index.
///
/// # Returns
/// An equivalent sparse gradient with unique indices, in order of first
/// occurrence. `grad` itself when its indices are already unique.
pub fn deduplicate_indexed_slices(graph: &mut Graph, grad: &IndexedSlices) -> Result<IndexedSlices> {
    let mut unique = Vec::new();
    let mut positions: HashMap<usize, usize> = HashMap::new();

    let segment_ids: Vec<usize> = grad
        .indices
        .iter()
        .map(|&index| {
            *positions.entry(index).or_insert_with(|| {
                unique.push(index);
                unique.len() - 1
            })
        })
        .collect();

    if unique.len() == grad.indices.len() {
        return Ok(grad.clone());
    }

    let values = graph.segment_sum(grad.values, &segment_ids, unique.len())?;
    Ok(IndexedSlices {
        values,
        indices: unique,
        dense_shape: grad.dense_shape,
    })
}
