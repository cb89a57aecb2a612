use std::collections::HashMap;

use log::debug;
use ndarray::{ArrayD, IxDyn};
use parking_lot::RwLock;

use crate::{
    error::{GraphErr, Result},
    keys::GraphKeys,
    op::{Node, NodeDef, Op},
    variable::{Variable, VariableDef, VariableId, VariableKind},
};

/// A dataflow graph: nodes, variables and named collections.
///
/// Nodes are append-only and may only reference nodes that already exist, so
/// the graph is acyclic by construction and node indices are a valid
/// topological order.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<NodeDef>,
    used_names: HashMap<String, usize>,
    scopes: Vec<String>,
    control_deps: Vec<Vec<Node>>,
    collections: HashMap<String, Vec<Node>>,
    variables: Vec<VariableDef>,
}

impl Graph {
    /// Creates a new empty `Graph`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the amount of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Runs `f` with `name` pushed as the innermost name scope.
    ///
    /// The scope itself is made unique, so opening `"gradients"` twice yields
    /// `gradients/...` and then `gradients_1/...`.
    ///
    /// # Arguments
    /// * `name` - The scope's base name.
    /// * `f` - The closure that builds nodes inside the scope.
    ///
    /// # Returns
    /// Whatever `f` returns.
    pub fn with_name_scope<R>(&mut self, name: &str, f: impl FnOnce(&mut Self) -> R) -> R {
        let scope = self.unique_name(name);
        self.scopes.push(scope);
        let ret = f(self);
        self.scopes.pop();
        ret
    }

    /// Returns the full path of the innermost name scope, empty at the root.
    pub fn current_scope(&self) -> &str {
        self.scopes.last().map(String::as_str).unwrap_or_default()
    }

    /// Runs `f` so every node it creates control-depends on `deps`.
    ///
    /// # Arguments
    /// * `deps` - Nodes that must run before any node built by `f`.
    /// * `f` - The closure that builds the dependent nodes.
    ///
    /// # Returns
    /// Whatever `f` returns.
    pub fn with_control_dependencies<R>(
        &mut self,
        deps: &[Node],
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        self.control_deps.push(deps.to_vec());
        let ret = f(self);
        self.control_deps.pop();
        ret
    }

    /// Makes a unique node name out of `base` inside the current name scope.
    pub fn unique_name(&mut self, base: &str) -> String {
        let full = match self.scopes.last() {
            Some(scope) => format!("{scope}/{base}"),
            None => base.to_string(),
        };

        self.reserve_name(full)
    }

    fn reserve_name(&mut self, full: String) -> String {
        let Some(&next) = self.used_names.get(&full) else {
            self.used_names.insert(full.clone(), 1);
            return full;
        };

        let mut i = next;
        loop {
            let candidate = format!("{full}_{i}");
            i += 1;

            if !self.used_names.contains_key(&candidate) {
                self.used_names.insert(full, i);
                self.used_names.insert(candidate.clone(), 1);
                return candidate;
            }
        }
    }

    /// Adds a node to the graph.
    ///
    /// # Arguments
    /// * `op` - The operation the node performs.
    /// * `name` - The base name, made unique inside the current scope.
    ///
    /// # Returns
    /// The new node or an `UnknownNode` error if `op` references a node that
    /// doesn't belong to this graph.
    pub fn add_node(&mut self, op: Op, name: &str) -> Result<Node> {
        for input in op.inputs() {
            self.check(input)?;
        }

        let mut control_inputs: Vec<Node> = Vec::new();
        for &dep in self.control_deps.iter().flatten() {
            self.check(dep)?;
            if !control_inputs.contains(&dep) {
                control_inputs.push(dep);
            }
        }

        let name = self.unique_name(name);
        Ok(self.push_def(name, op, control_inputs))
    }

    fn push_def(&mut self, name: String, op: Op, control_inputs: Vec<Node>) -> Node {
        let node = Node(self.nodes.len());
        self.nodes.push(NodeDef {
            name,
            op,
            control_inputs,
        });
        node
    }

    fn check(&self, node: Node) -> Result<()> {
        if node.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphErr::UnknownNode(node.0))
        }
    }

    pub(crate) fn def(&self, node: Node) -> Result<&NodeDef> {
        self.nodes.get(node.0).ok_or(GraphErr::UnknownNode(node.0))
    }

    pub fn op(&self, node: Node) -> Result<&Op> {
        Ok(&self.def(node)?.op)
    }

    pub fn name(&self, node: Node) -> Result<&str> {
        Ok(&self.def(node)?.name)
    }

    pub fn control_inputs(&self, node: Node) -> Result<&[Node]> {
        Ok(&self.def(node)?.control_inputs)
    }

    /// Looks a node up by its full name.
    pub fn find(&self, name: &str) -> Option<Node> {
        self.nodes
            .iter()
            .position(|def| def.name == name)
            .map(Node)
    }

    pub fn add_to_collection(&mut self, key: &str, node: Node) {
        self.collections.entry(key.to_string()).or_default().push(node);
    }

    /// Returns the nodes in the collection `key`, in insertion order.
    pub fn get_collection(&self, key: &str) -> &[Node] {
        self.collections.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Creates a new ref variable.
    ///
    /// # Arguments
    /// * `name` - The variable's base name.
    /// * `initial` - The initial value, it also fixes the variable's shape.
    /// * `trainable` - Whether to add it to `GraphKeys::TRAINABLE_VARIABLES`.
    ///
    /// # Returns
    /// A handle to the new variable.
    pub fn variable(&mut self, name: &str, initial: ArrayD<f32>, trainable: bool) -> Variable {
        self.make_variable(name, initial, trainable, VariableKind::Ref)
    }

    /// Creates a new resource variable, see `variable`.
    pub fn resource_variable(
        &mut self,
        name: &str,
        initial: ArrayD<f32>,
        trainable: bool,
    ) -> Variable {
        self.make_variable(name, initial, trainable, VariableKind::Resource)
    }

    // Variables are created outside any control dependency scope, their
    // initializers must be runnable on their own.
    fn make_variable(
        &mut self,
        name: &str,
        initial: ArrayD<f32>,
        trainable: bool,
        kind: VariableKind,
    ) -> Variable {
        let id = VariableId(self.variables.len());
        let name = self.unique_name(name);
        let node = self.push_def(name.clone(), Op::Variable(id), Vec::new());

        let initial_name = self.reserve_name(format!("{name}/initial_value"));
        let initial_node = self.push_def(initial_name, Op::Const(initial.clone()), Vec::new());
        let assign_name = self.reserve_name(format!("{name}/Assign"));
        let initializer = self.push_def(
            assign_name,
            Op::Assign {
                var: id,
                value: initial_node,
            },
            Vec::new(),
        );

        let handle = Variable::new(id, node, &name, kind, trainable);
        self.variables.push(VariableDef {
            handle: handle.clone(),
            storage: RwLock::new(initial),
            initializer,
        });

        self.add_to_collection(GraphKeys::GLOBAL_VARIABLES, node);
        if trainable {
            self.add_to_collection(GraphKeys::TRAINABLE_VARIABLES, node);
            if kind == VariableKind::Resource {
                self.add_to_collection(GraphKeys::TRAINABLE_RESOURCE_VARIABLES, node);
            }
        }

        debug!(variable = name.as_str(), trainable = trainable; "created variable");
        handle
    }

    pub(crate) fn variable_def(&self, id: VariableId) -> Result<&VariableDef> {
        self.variables
            .get(id.0)
            .ok_or(GraphErr::UnknownVariable(id.0))
    }

    /// Returns the variable read by `node`, if `node` is a variable read.
    pub fn variable_for_node(&self, node: Node) -> Option<&Variable> {
        match self.nodes.get(node.0)?.op {
            Op::Variable(id) => self.variables.get(id.0).map(|def| &def.handle),
            _ => None,
        }
    }

    /// Returns the variables whose read nodes are in the collection `key`.
    pub fn variables_in(&self, key: &str) -> Vec<Variable> {
        self.get_collection(key)
            .iter()
            .filter_map(|&node| self.variable_for_node(node))
            .cloned()
            .collect()
    }

    pub fn trainable_variables(&self) -> Vec<Variable> {
        self.variables_in(GraphKeys::TRAINABLE_VARIABLES)
    }

    pub fn global_variables(&self) -> Vec<Variable> {
        self.variables_in(GraphKeys::GLOBAL_VARIABLES)
    }

    /// Returns a snapshot of the variable's current value.
    pub fn value(&self, var: &Variable) -> Result<ArrayD<f32>> {
        Ok(self.variable_def(var.id())?.storage.read().clone())
    }

    /// Returns the shape of the variable's current value.
    pub fn variable_shape(&self, var: &Variable) -> Result<Vec<usize>> {
        Ok(self.variable_def(var.id())?.storage.read().shape().to_vec())
    }

    /// Returns the op that resets the variable to its initial value.
    pub fn initializer(&self, var: &Variable) -> Result<Node> {
        Ok(self.variable_def(var.id())?.initializer)
    }

    /// Groups the initializers of every global variable into a single op.
    pub fn global_variables_initializer(&mut self) -> Result<Node> {
        let initializers = self
            .global_variables()
            .iter()
            .map(|var| self.initializer(var))
            .collect::<Result<Vec<_>>>()?;

        self.group(&initializers, "init")
    }

    /// Returns the graph's global step, if one was created.
    pub fn global_step(&self) -> Option<Variable> {
        self.variables_in(GraphKeys::GLOBAL_STEP).into_iter().next()
    }

    /// Returns the global step, creating a scalar non trainable counter at
    /// zero the first time.
    pub fn get_or_create_global_step(&mut self) -> Variable {
        if let Some(step) = self.global_step() {
            return step;
        }

        let step = self.variable("global_step", ArrayD::zeros(IxDyn(&[])), false);
        self.add_to_collection(GraphKeys::GLOBAL_STEP, step.node());
        step
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr1;

    use super::*;

    #[test]
    fn test_unique_names_inside_scopes() {
        let mut graph = Graph::new();

        assert_eq!(graph.unique_name("Add"), "Add");
        assert_eq!(graph.unique_name("Add"), "Add_1");
        assert_eq!(graph.unique_name("Add"), "Add_2");

        let scoped = graph.with_name_scope("gradients", |g| g.unique_name("Add"));
        assert_eq!(scoped, "gradients/Add");

        let scoped = graph.with_name_scope("gradients", |g| g.unique_name("Add"));
        assert_eq!(scoped, "gradients_1/Add");
    }

    #[test]
    fn test_suffixed_name_is_not_reused() {
        let mut graph = Graph::new();

        assert_eq!(graph.unique_name("x_1"), "x_1");
        assert_eq!(graph.unique_name("x"), "x");
        assert_eq!(graph.unique_name("x"), "x_2");
    }

    #[test]
    fn test_control_dependencies_apply_to_nested_nodes() {
        let mut graph = Graph::new();
        let a = graph.add_node(Op::NoOp, "a").unwrap();
        let b = graph.add_node(Op::NoOp, "b").unwrap();

        let c = graph.with_control_dependencies(&[a], |g| {
            g.with_control_dependencies(&[b, a], |g| g.add_node(Op::NoOp, "c"))
        });
        let c = c.unwrap();

        assert_eq!(graph.control_inputs(c).unwrap(), &[a, b]);
        assert!(graph.control_inputs(a).unwrap().is_empty());
    }

    #[test]
    fn test_foreign_node_is_rejected() {
        let mut graph = Graph::new();
        let err = graph.add_node(Op::Identity(Node(42)), "x").unwrap_err();
        assert_eq!(err, GraphErr::UnknownNode(42));
    }

    #[test]
    fn test_variables_are_registered_in_collections() {
        let mut graph = Graph::new();
        let w = graph.variable("w", arr1(&[1.0, 2.0]).into_dyn(), true);
        let r = graph.resource_variable("r", arr1(&[3.0]).into_dyn(), true);
        let frozen = graph.variable("frozen", arr1(&[0.0]).into_dyn(), false);

        assert_eq!(graph.trainable_variables(), vec![w.clone(), r.clone()]);
        assert_eq!(graph.global_variables().len(), 3);
        assert_eq!(
            graph.variables_in(GraphKeys::TRAINABLE_RESOURCE_VARIABLES),
            vec![r]
        );
        assert!(!frozen.trainable());
        assert_eq!(graph.variable_shape(&w).unwrap(), vec![2]);
        assert_eq!(graph.variable_for_node(w.node()), Some(&w));
    }

    #[test]
    fn test_global_step_is_created_once() {
        let mut graph = Graph::new();
        let step = graph.get_or_create_global_step();
        let again = graph.get_or_create_global_step();

        assert_eq!(step, again);
        assert_eq!(step.name(), "global_step");
        assert!(graph.trainable_variables().is_empty());
    }
}
