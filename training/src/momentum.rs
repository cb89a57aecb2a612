use graph::{Graph, IndexedSlices, MomentumFlags, Node, Variable};

use crate::{
    error::{Result, TrainErr},
    optimizer::Optimizer,
    slots::SlotStore,
};

/// Gradient descent with momentum, every variable keeps a `"momentum"` slot
/// accumulating its past gradients.
#[derive(Debug)]
pub struct MomentumOptimizer {
    learning_rate: f32,
    momentum: f32,
    use_locking: bool,
    use_nesterov: bool,
    name: String,
    slots: SlotStore,
    nodes: Option<(Node, Node)>,
}

impl MomentumOptimizer {
    pub const DEFAULT_NAME: &'static str = "Momentum";
    pub const SLOT: &'static str = "momentum";

    /// Creates a new `MomentumOptimizer`.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - How much of the accumulated gradient survives each step.
    /// * `use_locking` - Whether the updates hold the variables' locks.
    /// * `use_nesterov` - Whether to look ahead along the accumulated gradient.
    pub fn new(learning_rate: f32, momentum: f32, use_locking: bool, use_nesterov: bool) -> Self {
        Self {
            learning_rate,
            momentum,
            use_locking,
            use_nesterov,
            name: Self::DEFAULT_NAME.to_string(),
            slots: SlotStore::new(),
            nodes: None,
        }
    }

    /// Renames the optimizer, the name scope of its update ops and the suffix
    /// of its slots.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    fn flags(&self) -> MomentumFlags {
        MomentumFlags {
            use_locking: self.use_locking,
            use_nesterov: self.use_nesterov,
        }
    }

    /// Returns the learning rate and momentum nodes along with `var`'s
    /// accumulator.
    fn operands(&self, var: &Variable) -> Result<(Node, Node, Variable)> {
        let (lr, momentum) = self.nodes.ok_or_else(|| TrainErr::NotPrepared {
            optimizer: self.name.clone(),
        })?;

        let accum = self.get_slot(var, Self::SLOT).ok_or_else(|| TrainErr::MissingSlot {
            slot: Self::SLOT.to_string(),
            variable: var.name().to_string(),
        })?;

        Ok((lr, momentum, accum))
    }
}

impl Optimizer for MomentumOptimizer {
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

    fn create_slots(&mut self, graph: &mut Graph, vars: &[Variable]) -> Result<()> {
        for var in vars {
            self.slots.zeros(graph, var, Self::SLOT, &self.name)?;
        }

        Ok(())
    }

    fn prepare(&mut self, graph: &mut Graph) -> Result<()> {
        let lr = graph.scalar_named(self.learning_rate, "learning_rate")?;
        let momentum = graph.scalar_named(self.momentum, "momentum")?;
        self.nodes = Some((lr, momentum));
        Ok(())
    }

    fn apply_dense(&mut self, graph: &mut Graph, grad: Node, var: &Variable) -> Result<Node> {
        let (lr, momentum, accum) = self.operands(var)?;
        Ok(graph.apply_momentum(var, &accum, lr, grad, momentum, self.flags())?)
    }

    fn resource_apply_dense(
        &mut self,
        graph: &mut Graph,
        grad: Node,
        var: &Variable,
    ) -> Result<Node> {
        self.apply_dense(graph, grad, var)
    }

    fn apply_sparse(
        &mut self,
        graph: &mut Graph,
        grad: &IndexedSlices,
        var: &Variable,
    ) -> Result<Node> {
        self.resource_apply_sparse(graph, grad.values, var, &grad.indices)
    }

    fn resource_apply_sparse(
        &mut self,
        graph: &mut Graph,
        values: Node,
        var: &Variable,
        indices: &[usize],
    ) -> Result<Node> {
        let (lr, momentum, accum) = self.operands(var)?;
        Ok(graph.sparse_apply_momentum(var, &accum, lr, values, indices, momentum, self.flags())?)
    }
}

#[cfg(test)]
mod tests {
    use graph::Session;
    use ndarray::arr1;

    use super::*;

    #[test]
    fn test_update_without_slot_fails() {
        let mut graph = Graph::new();
        let var = graph.variable("w", arr1(&[1.0]).into_dyn(), true);
        let grad = graph.constant(arr1(&[1.0]).into_dyn()).unwrap();
        let mut opt = MomentumOptimizer::new(0.1, 0.9, false, false);

        opt.prepare(&mut graph).unwrap();
        let err = opt.apply_dense(&mut graph, grad, &var).unwrap_err();
        assert!(matches!(err, TrainErr::MissingSlot { .. }));
    }

    #[test]
    fn test_nesterov_looks_ahead() {
        let mut graph = Graph::new();
        let var = graph.variable("w", arr1(&[1.0]).into_dyn(), true);
        let grad = graph.constant(arr1(&[1.0]).into_dyn()).unwrap();
        let mut opt = MomentumOptimizer::new(0.5, 0.5, true, true);

        opt.create_slots(&mut graph, std::slice::from_ref(&var)).unwrap();
        opt.prepare(&mut graph).unwrap();
        let update = opt.apply_dense(&mut graph, grad, &var).unwrap();
        Session::new(&graph).run_target(update).unwrap();

        // accum = 1, var -= 0.5 * 1 + 0.5 * 0.5 * 1
        let accum = opt.get_slot(&var, MomentumOptimizer::SLOT).unwrap();
        assert_eq!(graph.value(&accum).unwrap(), arr1(&[1.0]).into_dyn());
        assert_eq!(graph.value(&var).unwrap(), arr1(&[0.25]).into_dyn());
    }
}
