use std::collections::HashMap;

use graph::{Graph, Variable, VariableId, VariableKind};
use ndarray::{ArrayD, IxDyn};

use crate::error::Result;

/// The extra variables an optimizer keeps per trained variable, e.g. momentum
/// accumulators.
///
/// Slots are looked up by slot name, then by primary variable.
#[derive(Debug, Default)]
pub struct SlotStore {
    slots: HashMap<String, HashMap<VariableId, Variable>>,
}

impl SlotStore {
    /// Creates a new empty `SlotStore`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, var: &Variable, slot: &str) -> Option<&Variable> {
        self.slots.get(slot)?.get(&var.id())
    }

    /// Returns the slot names in use, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.slots.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Returns every slot variable, in creation order.
    pub fn variables(&self) -> Vec<Variable> {
        let mut vars: Vec<_> = self.slots.values().flat_map(HashMap::values).cloned().collect();
        vars.sort_unstable_by_key(Variable::id);
        vars
    }

    /// Returns the `slot` of `var`, creating it the first time.
    ///
    /// # Arguments
    /// * `graph` - The graph owning `var`.
    /// * `var` - The primary variable.
    /// * `slot` - The slot's name, e.g. `"momentum"`.
    /// * `op_name` - The optimizer's name, the slot variable is named
    ///   `<var name>/<op_name>`.
    /// * `initial` - Builds the slot's initial value out of the primary's shape.
    ///
    /// # Returns
    /// A non trainable variable of the same kind as `var`.
    pub fn get_or_make(
        &mut self,
        graph: &mut Graph,
        var: &Variable,
        slot: &str,
        op_name: &str,
        initial: impl FnOnce(&[usize]) -> ArrayD<f32>,
    ) -> Result<Variable> {
        if let Some(existing) = self.get(var, slot) {
            return Ok(existing.clone());
        }

        let shape = graph.variable_shape(var)?;
        let name = format!("{}/{op_name}", var.name());
        let value = initial(&shape);

        let slot_var = match var.kind() {
            VariableKind::Ref => graph.variable(&name, value, false),
            VariableKind::Resource => graph.resource_variable(&name, value, false),
        };

        self.slots
            .entry(slot.to_string())
            .or_default()
            .insert(var.id(), slot_var.clone());

        Ok(slot_var)
    }

    /// Returns the `slot` of `var`, creating it filled with zeros the first
    /// time.
    pub fn zeros(
        &mut self,
        graph: &mut Graph,
        var: &Variable,
        slot: &str,
        op_name: &str,
    ) -> Result<Variable> {
        self.get_or_make(graph, var, slot, op_name, |shape| ArrayD::zeros(IxDyn(shape)))
    }
}

#[cfg(test)]
mod tests {
    use graph::GraphKeys;
    use ndarray::arr1;

    use super::*;

    #[test]
    fn test_zeros_slot_mirrors_primary() {
        let mut graph = Graph::new();
        let var = graph.resource_variable("w", arr1(&[1.0, 2.0, 3.0]).into_dyn(), true);
        let mut slots = SlotStore::new();

        let slot = slots.zeros(&mut graph, &var, "momentum", "Momentum").unwrap();
        assert_eq!(slot.name(), "w/Momentum");
        assert_eq!(slot.kind(), VariableKind::Resource);
        assert!(!slot.trainable());
        assert_eq!(graph.value(&slot).unwrap(), arr1(&[0.0, 0.0, 0.0]).into_dyn());

        assert!(!graph.trainable_variables().contains(&slot));
        assert!(graph.variables_in(GraphKeys::GLOBAL_VARIABLES).contains(&slot));
    }

    #[test]
    fn test_slots_are_created_once() {
        let mut graph = Graph::new();
        let a = graph.variable("a", arr1(&[1.0]).into_dyn(), true);
        let b = graph.variable("b", arr1(&[1.0]).into_dyn(), true);
        let mut slots = SlotStore::new();

        let first = slots.zeros(&mut graph, &a, "m", "Opt").unwrap();
        let again = slots.zeros(&mut graph, &a, "m", "Opt").unwrap();
        let other = slots.zeros(&mut graph, &b, "v", "Opt").unwrap();

        assert_eq!(first, again);
        assert_eq!(slots.get(&a, "m"), Some(&first));
        assert_eq!(slots.get(&b, "m"), None);
        assert_eq!(slots.names(), vec!["m".to_string(), "v".to_string()]);
        assert_eq!(slots.variables(), vec![first, other]);
    }
}
