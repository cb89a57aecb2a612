//! The gradient rule of every differentiable op.

use super::{Gradient, IndexedSlices};
use crate::{
    error::{GraphErr, Result},
    graph::Graph,
    op::{Node, Op},
};

/// Builds the gradients of an op's inputs from the gradient of its output.
///
/// # Arguments
/// * `g` - The graph the gradient ops are added to.
/// * `node` - The node being differentiated.
/// * `op` - The node's op.
/// * `grad` - The gradient flowing into `node`.
/// * `wanted` - Which inputs need a gradient, in argument order.
///
/// # Returns
/// One entry per input, `None` for unwanted inputs and for inputs the op
/// doesn't propagate gradients to.
pub(super) fn input_gradients(
    g: &mut Graph,
    node: Node,
    op: &Op,
    grad: Node,
    wanted: &[bool],
) -> Result<Vec<Option<Gradient>>> {
    let want = |i: usize| wanted.get(i).copied().unwrap_or(false);

    let grads = match *op {
        Op::Const(_) | Op::Placeholder | Op::Variable(_) | Op::NoOp => Vec::new(),
        Op::StopGradient(_) | Op::Size(_) => vec![None],
        Op::Identity(_) => vec![Some(grad)],
        Op::Add(a, b) => vec![
            lazy(want(0), || g.sum_to_shape(grad, a))?,
            lazy(want(1), || g.sum_to_shape(grad, b))?,
        ],
        Op::Sub(a, b) => vec![
            lazy(want(0), || g.sum_to_shape(grad, a))?,
            lazy(want(1), || {
                let neg = g.neg(grad)?;
                g.sum_to_shape(neg, b)
            })?,
        ],
        Op::Mul(a, b) => vec![
            lazy(want(0), || {
                let prod = g.mul(grad, b)?;
                g.sum_to_shape(prod, a)
            })?,
            lazy(want(1), || {
                let prod = g.mul(grad, a)?;
                g.sum_to_shape(prod, b)
            })?,
        ],
        Op::Div(a, b) => vec![
            lazy(want(0), || {
                let quot = g.div(grad, b)?;
                g.sum_to_shape(quot, a)
            })?,
            lazy(want(1), || {
                // -g * a / b^2
                let prod = g.mul(grad, a)?;
                let sq = g.square(b)?;
                let quot = g.div(prod, sq)?;
                let neg = g.neg(quot)?;
                g.sum_to_shape(neg, b)
            })?,
        ],
        Op::Neg(_) => vec![Some(g.neg(grad)?)],
        Op::Square(a) => {
            let two = g.scalar(2.0)?;
            let twice = g.mul(two, a)?;
            vec![Some(g.mul(grad, twice)?)]
        }
        Op::Sigmoid(_) => {
            let one = g.scalar(1.0)?;
            let rest = g.sub(one, node)?;
            let local = g.mul(node, rest)?;
            vec![Some(g.mul(grad, local)?)]
        }
        Op::MatMul(a, b) => vec![
            lazy(want(0), || {
                let bt = g.transpose(b)?;
                g.matmul(grad, bt)
            })?,
            lazy(want(1), || {
                let at = g.transpose(a)?;
                g.matmul(at, grad)
            })?,
        ],
        Op::Transpose(_) => vec![Some(g.transpose(grad)?)],
        Op::Sum(a) => vec![Some(g.broadcast_like(grad, a)?)],
        Op::Mean(a) => {
            let spread = g.broadcast_like(grad, a)?;
            let count = g.size(a)?;
            vec![Some(g.div(spread, count)?)]
        }
        Op::AddN(ref nodes) => nodes
            .iter()
            .enumerate()
            .map(|(i, _)| want(i).then_some(grad))
            .collect(),
        Op::BroadcastLike { value, .. } => {
            vec![lazy(want(0), || g.sum_to_shape(grad, value))?, None]
        }
        Op::SumToShape { value, .. } => {
            vec![lazy(want(0), || g.broadcast_like(grad, value))?, None]
        }
        Op::Gather {
            params,
            ref indices,
        } => {
            return Ok(vec![Some(Gradient::Sparse(IndexedSlices {
                values: grad,
                indices: indices.clone(),
                dense_shape: params,
            }))]);
        }
        Op::ScatterDense { ref indices, .. } => {
            vec![lazy(want(0), || g.gather(grad, indices))?, None]
        }
        // Concat, SegmentSum and every stateful op.
        _ => return no_gradient(g, node, op),
    };

    Ok(grads
        .into_iter()
        .enumerate()
        .map(|(i, grad)| grad.filter(|_| want(i)).map(Gradient::Dense))
        .collect())
}

fn lazy(wanted: bool, build: impl FnOnce() -> Result<Node>) -> Result<Option<Node>> {
    if wanted { build().map(Some) } else { Ok(None) }
}

fn no_gradient(g: &Graph, node: Node, op: &Op) -> Result<Vec<Option<Gradient>>> {
    Err(GraphErr::NoGradient {
        op: op.type_name(),
        node: g.name(node)?.to_string(),
    })
}
