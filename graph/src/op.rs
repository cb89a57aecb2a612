use ndarray::ArrayD;

use crate::variable::VariableId;

/// An opaque handle to a node of a `Graph`.
///
/// A node produces a single value when executed. Handles are only meaningful
/// for the graph that created them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node(pub(crate) usize);

impl Node {
    /// Returns the position of this node in its graph.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Whether an update op holds the variable's write lock for its whole
/// read-modify-write.
///
/// Without locking the update works on a snapshot taken under a shared lock, so
/// two concurrent updates of the same variable may lose one of the writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Locking(pub bool);

/// The operations the runtime knows how to execute.
#[derive(Debug, Clone)]
pub enum Op {
    Const(ArrayD<f32>),
    Placeholder,
    Variable(VariableId),
    Identity(Node),
    StopGradient(Node),
    Add(Node, Node),
    Sub(Node, Node),
    Mul(Node, Node),
    Div(Node, Node),
    Neg(Node),
    Square(Node),
    Sigmoid(Node),
    MatMul(Node, Node),
    Transpose(Node),
    Sum(Node),
    Mean(Node),
    Size(Node),
    BroadcastLike {
        value: Node,
        like: Node,
    },
    SumToShape {
        value: Node,
        like: Node,
    },
    AddN(Vec<Node>),
    Gather {
        params: Node,
        indices: Vec<usize>,
    },
    ScatterDense {
        values: Node,
        indices: Vec<usize>,
        like: Node,
    },
    Concat(Vec<Node>),
    SegmentSum {
        data: Node,
        segment_ids: Vec<usize>,
        num_segments: usize,
    },
    NoOp,

    // Stateful ops, they write into variable storage.
    Assign {
        var: VariableId,
        value: Node,
    },
    AssignAdd {
        var: VariableId,
        value: Node,
    },
    AssignSub {
        var: VariableId,
        value: Node,
    },
    ApplyGradientDescent {
        var: VariableId,
        alpha: Node,
        delta: Node,
        locking: Locking,
        resource: bool,
    },
    ScatterSub {
        var: VariableId,
        indices: Vec<usize>,
        updates: Node,
        locking: Locking,
    },
    ResourceScatterAdd {
        var: VariableId,
        indices: Vec<usize>,
        updates: Node,
    },
    ApplyMomentum {
        var: VariableId,
        accum: VariableId,
        lr: Node,
        grad: Node,
        momentum: Node,
        locking: Locking,
        nesterov: bool,
        resource: bool,
    },
    SparseApplyMomentum {
        var: VariableId,
        accum: VariableId,
        lr: Node,
        grad: Node,
        indices: Vec<usize>,
        momentum: Node,
        locking: Locking,
        nesterov: bool,
        resource: bool,
    },
}

impl Op {
    /// Returns the op type name, the default base for node names.
    pub fn type_name(&self) -> &'static str {
        match self {
            Op::Const(_) => "Const",
            Op::Placeholder => "Placeholder",
            Op::Variable(_) => "Variable",
            Op::Identity(_) => "Identity",
            Op::StopGradient(_) => "StopGradient",
            Op::Add(..) => "Add",
            Op::Sub(..) => "Sub",
            Op::Mul(..) => "Mul",
            Op::Div(..) => "Div",
            Op::Neg(_) => "Neg",
            Op::Square(_) => "Square",
            Op::Sigmoid(_) => "Sigmoid",
            Op::MatMul(..) => "MatMul",
            Op::Transpose(_) => "Transpose",
            Op::Sum(_) => "Sum",
            Op::Mean(_) => "Mean",
            Op::Size(_) => "Size",
            Op::BroadcastLike { .. } => "BroadcastLike",
            Op::SumToShape { .. } => "SumToShape",
            Op::AddN(_) => "AddN",
            Op::Gather { .. } => "Gather",
            Op::ScatterDense { .. } => "ScatterDense",
            Op::Concat(_) => "Concat",
            Op::SegmentSum { .. } => "SegmentSum",
            Op::NoOp => "NoOp",
            Op::Assign { .. } => "Assign",
            Op::AssignAdd { .. } => "AssignAdd",
            Op::AssignSub { .. } => "AssignSub",
            Op::ApplyGradientDescent {
                resource: false, ..
            } => "ApplyGradientDescent",
            Op::ApplyGradientDescent { resource: true, .. } => "ResourceApplyGradientDescent",
            Op::ScatterSub { .. } => "ScatterSub",
            Op::ResourceScatterAdd { .. } => "ResourceScatterAdd",
            Op::ApplyMomentum {
                resource: false, ..
            } => "ApplyMomentum",
            Op::ApplyMomentum { resource: true, .. } => "ResourceApplyMomentum",
            Op::SparseApplyMomentum {
                resource: false, ..
            } => "SparseApplyMomentum",
            Op::SparseApplyMomentum { resource: true, .. } => "ResourceSparseApplyMomentum",
        }
    }

    /// Returns the data inputs of this op, in argument order.
    pub fn inputs(&self) -> Vec<Node> {
        match self {
            Op::Const(_) | Op::Placeholder | Op::Variable(_) | Op::NoOp => Vec::new(),
            Op::Identity(a)
            | Op::StopGradient(a)
            | Op::Neg(a)
            | Op::Square(a)
            | Op::Sigmoid(a)
            | Op::Transpose(a)
            | Op::Sum(a)
            | Op::Mean(a)
            | Op::Size(a) => vec![*a],
            Op::Add(a, b) | Op::Sub(a, b) | Op::Mul(a, b) | Op::Div(a, b) | Op::MatMul(a, b) => {
                vec![*a, *b]
            }
            Op::BroadcastLike { value, like } | Op::SumToShape { value, like } => {
                vec![*value, *like]
            }
            Op::AddN(nodes) | Op::Concat(nodes) => nodes.clone(),
            Op::Gather { params, .. } => vec![*params],
            Op::ScatterDense { values, like, .. } => vec![*values, *like],
            Op::SegmentSum { data, .. } => vec![*data],
            Op::Assign { value, .. } | Op::AssignAdd { value, .. } | Op::AssignSub { value, .. } => {
                vec![*value]
            }
            Op::ApplyGradientDescent { alpha, delta, .. } => vec![*alpha, *delta],
            Op::ScatterSub { updates, .. } | Op::ResourceScatterAdd { updates, .. } => {
                vec![*updates]
            }
            Op::ApplyMomentum {
                lr, grad, momentum, ..
            }
            | Op::SparseApplyMomentum {
                lr, grad, momentum, ..
            } => vec![*lr, *grad, *momentum],
        }
    }

    /// Returns `true` if executing this op writes into variable storage.
    pub fn is_stateful(&self) -> bool {
        matches!(
            self,
            Op::Assign { .. }
                | Op::AssignAdd { .. }
                | Op::AssignSub { .. }
                | Op::ApplyGradientDescent { .. }
                | Op::ScatterSub { .. }
                | Op::ResourceScatterAdd { .. }
                | Op::ApplyMomentum { .. }
                | Op::SparseApplyMomentum { .. }
        )
    }
}

/// A node as stored in the graph.
#[derive(Debug, Clone)]
pub(crate) struct NodeDef {
    pub name: String,
    pub op: Op,
    pub control_inputs: Vec<Node>,
}
