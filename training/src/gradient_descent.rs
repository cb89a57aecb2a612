use graph::{Graph, IndexedSlices, Node, Variable};

use crate::{
    error::{Result, TrainErr},
    optimizer::Optimizer,
    slots::SlotStore,
};

/// Gradient descent optimization algorithm, every variable takes a step of
/// length `learning_rate` in the opposite direction of its gradient.
#[derive(Debug)]
pub struct GradientDescentOptimizer {
    learning_rate: f32,
    use_locking: bool,
    name: String,
    slots: SlotStore,
    learning_rate_node: Option<Node>,
}

impl GradientDescentOptimizer {
    pub const DEFAULT_NAME: &'static str = "GradientDescent";

    /// Returns a new `GradientDescentOptimizer`.
    ///
    /// # Arguments
    /// * `learning_rate` - The *length* of the steps taken on each update.
    /// * `use_locking` - Whether the updates hold the variables' locks.
    pub fn new(learning_rate: f32, use_locking: bool) -> Self {
        Self {
            learning_rate,
            use_locking,
            name: Self::DEFAULT_NAME.to_string(),
            slots: SlotStore::new(),
            learning_rate_node: None,
        }
    }

    /// Renames the optimizer, the name scope of its update ops.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn lr(&self) -> Result<Node> {
        self.learning_rate_node.ok_or_else(|| TrainErr::NotPrepared {
            optimizer: self.name.clone(),
        })
    }
}

impl Optimizer for GradientDescentOptimizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn use_locking(&self) -> bool {
        self.use_locking
    }

    fn slots(&self) -> &SlotStore {
        &self.slots
    }

    fn slots_mut(&mut self) -> &mut SlotStore {
        &mut self.slots
    }

    fn prepare(&mut self, graph: &mut Graph) -> Result<()> {
        self.learning_rate_node = Some(graph.scalar_named(self.learning_rate, "learning_rate")?);
        Ok(())
    }

    fn apply_dense(&mut self, graph: &mut Graph, grad: Node, var: &Variable) -> Result<Node> {
        let lr = self.lr()?;
        Ok(graph.apply_gradient_descent(var, lr, grad, self.use_locking)?)
    }

    fn resource_apply_dense(
        &mut self,
        graph: &mut Graph,
        grad: Node,
        var: &Variable,
    ) -> Result<Node> {
        let lr = self.lr()?;
        Ok(graph.resource_apply_gradient_descent(var, lr, grad, self.use_locking)?)
    }

    fn apply_sparse(
        &mut self,
        graph: &mut Graph,
        grad: &IndexedSlices,
        var: &Variable,
    ) -> Result<Node> {
        let lr = self.lr()?;
        let delta = graph.mul(grad.values, lr)?;
        Ok(graph.scatter_sub(var, &grad.indices, delta, self.use_locking)?)
    }

    fn resource_apply_sparse(
        &mut self,
        graph: &mut Graph,
        values: Node,
        var: &Variable,
        indices: &[usize],
    ) -> Result<Node> {
        let lr = self.lr()?;
        let delta = graph.mul(values, lr)?;
        let delta = graph.neg(delta)?;
        Ok(graph.resource_scatter_add(var, indices, delta)?)
    }

    /// Scatter-add already accumulates repeated rows, the gradient is applied
    /// as is.
    fn resource_apply_sparse_duplicate_indices(
        &mut self,
        graph: &mut Graph,
        grad: &IndexedSlices,
        var: &Variable,
    ) -> Result<Node> {
        self.resource_apply_sparse(graph, grad.values, var, &grad.indices)
    }
}

#[cfg(test)]
mod tests {
    use graph::Session;
    use ndarray::arr1;

    use super::*;

    #[test]
    fn test_update_before_prepare_fails() {
        let mut graph = Graph::new();
        let var = graph.variable("w", arr1(&[1.0]).into_dyn(), true);
        let grad = graph.scalar(1.0).unwrap();
        let mut sgd = GradientDescentOptimizer::new(0.1, false);

        let err = sgd.apply_dense(&mut graph, grad, &var).unwrap_err();
        assert_eq!(
            err,
            TrainErr::NotPrepared {
                optimizer: "GradientDescent".into()
            }
        );
    }

    #[test]
    fn test_dense_update_steps_against_gradient() {
        let mut graph = Graph::new();
        let var = graph.variable("w", arr1(&[1.0, 2.0]).into_dyn(), true);
        let grad = graph.constant(arr1(&[2.0, -2.0]).into_dyn()).unwrap();
        let mut sgd = GradientDescentOptimizer::new(0.5, true);

        sgd.prepare(&mut graph).unwrap();
        let update = sgd.apply_dense(&mut graph, grad, &var).unwrap();
        assert_eq!(graph.op(update).unwrap().type_name(), "ApplyGradientDescent");

        Session::new(&graph).run_target(update).unwrap();
        assert_eq!(graph.value(&var).unwrap(), arr1(&[0.0, 3.0]).into_dyn());
    }

    #[test]
    fn test_resource_sparse_update_keeps_duplicates() {
        let mut graph = Graph::new();
        let var = graph.resource_variable("w", arr1(&[1.0, 1.0, 1.0]).into_dyn(), true);
        let values = graph.constant(arr1(&[1.0, 2.0]).into_dyn()).unwrap();
        let grad = IndexedSlices {
            values,
            indices: vec![1, 1],
            dense_shape: var.node(),
        };
        let mut sgd = GradientDescentOptimizer::new(0.5, false);

        sgd.prepare(&mut graph).unwrap();
        let update = sgd
            .resource_apply_sparse_duplicate_indices(&mut graph, &grad, &var)
            .unwrap();
        assert_eq!(graph.op(update).unwrap().type_name(), "ResourceScatterAdd");

        Session::new(&graph).run_target(update).unwrap();
        assert_eq!(graph.value(&var).unwrap(), arr1(&[1.0, -0.5, 1.0]).into_dyn());
    }
}
