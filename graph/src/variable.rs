use std::sync::Arc;

use ndarray::ArrayD;
use parking_lot::RwLock;

use crate::op::Node;

/// Identifies a variable's storage inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub(crate) usize);

/// How update ops address a variable.
///
/// Ref variables are updated by the `Apply*`/`Scatter*` op family, resource
/// variables by the `ResourceApply*`/`ResourceScatter*` one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Ref,
    Resource,
}

/// A handle to a mutable storage location of the graph.
///
/// Cloning the handle doesn't clone the storage.
#[derive(Debug, Clone)]
pub struct Variable {
    id: VariableId,
    node: Node,
    name: Arc<str>,
    kind: VariableKind,
    trainable: bool,
}

impl Variable {
    pub(crate) fn new(
        id: VariableId,
        node: Node,
        name: &str,
        kind: VariableKind,
        trainable: bool,
    ) -> Self {
        Self {
            id,
            node,
            name: Arc::from(name),
            kind,
            trainable,
        }
    }

    pub fn id(&self) -> VariableId {
        self.id
    }

    /// Returns the node that reads this variable's current value.
    pub fn node(&self) -> Node {
        self.node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    pub fn trainable(&self) -> bool {
        self.trainable
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Variable {}

/// The storage backing a variable plus what's needed to reset it.
#[derive(Debug)]
pub(crate) struct VariableDef {
    pub handle: Variable,
    pub storage: RwLock<ArrayD<f32>>,
    pub initializer: Node,
}
