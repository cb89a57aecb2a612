use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire graph runtime.
pub type Result<T> = std::result::Result<T, GraphErr>;

/// The graph runtime's error type.
///
/// Errors raised while executing a node carry the node's name so the failing
/// op can be located in the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphErr {
    UnknownNode(usize),
    UnknownVariable(usize),
    ShapeMismatch {
        op: &'static str,
        node: String,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
    RankMismatch {
        op: &'static str,
        node: String,
        expected: usize,
        got: usize,
    },
    NotScalar {
        node: String,
        shape: Vec<usize>,
    },
    IndexOutOfRange {
        node: String,
        index: usize,
        len: usize,
    },
    MissingFeed {
        node: String,
    },
    NoGradient {
        op: &'static str,
        node: String,
    },
    VariableKindMismatch {
        op: &'static str,
        variable: String,
    },
    InvalidArgument(String),
}

impl Display for GraphErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphErr::UnknownNode(id) => write!(f, "node {id} doesn't belong to this graph"),
            GraphErr::UnknownVariable(id) => {
                write!(f, "variable {id} doesn't belong to this graph")
            }
            GraphErr::ShapeMismatch { op, node, lhs, rhs } => write!(
                f,
                "shape mismatch in {op} ({node}), lhs: {lhs:?}, rhs: {rhs:?}"
            ),
            GraphErr::RankMismatch {
                op,
                node,
                expected,
                got,
            } => write!(
                f,
                "unexpected rank in {op} ({node}), expected {expected}, got {got}"
            ),
            GraphErr::NotScalar { node, shape } => {
                write!(f, "{node} must be a scalar, got shape {shape:?}")
            }
            GraphErr::IndexOutOfRange { node, index, len } => {
                write!(f, "index {index} out of range for {len} rows in {node}")
            }
            GraphErr::MissingFeed { node } => {
                write!(f, "placeholder {node} must be fed a value")
            }
            GraphErr::NoGradient { op, node } => {
                write!(f, "no gradient defined for op type {op} ({node})")
            }
            GraphErr::VariableKindMismatch { op, variable } => {
                write!(f, "{op} can't update variable {variable} of this kind")
            }
            GraphErr::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
        }
    }
}

impl Error for GraphErr {}
