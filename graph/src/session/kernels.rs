//! The cpu kernel of every op.

use std::collections::HashMap;

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Axis, Ix2, IxDyn, Zip, arr0};
use parking_lot::RwLock;

use crate::{
    error::{GraphErr, Result},
    graph::Graph,
    op::{Locking, Node, Op},
    variable::VariableId,
};

type Values = HashMap<Node, ArrayD<f32>>;

/// Executes a single node.
///
/// # Arguments
/// * `graph` - The graph the node belongs to.
/// * `node` - The node to execute.
/// * `values` - The values of every node executed so far, it must hold all of
///   `node`'s inputs.
///
/// # Returns
/// The node's value.
pub(super) fn evaluate(graph: &Graph, node: Node, values: &Values) -> Result<ArrayD<f32>> {
    let def = graph.def(node)?;
    let name = def.name.as_str();
    let get = |n: Node| values.get(&n).ok_or(GraphErr::UnknownNode(n.index()));

    let value = match &def.op {
        Op::Const(value) => value.clone(),
        Op::Placeholder => {
            return Err(GraphErr::MissingFeed {
                node: name.to_string(),
            });
        }
        Op::Variable(id) => graph.variable_def(*id)?.storage.read().clone(),
        Op::Identity(a) | Op::StopGradient(a) => get(*a)?.clone(),
        Op::Add(a, b) => binary("Add", name, get(*a)?, get(*b)?, |x, y| x + y)?,
        Op::Sub(a, b) => binary("Sub", name, get(*a)?, get(*b)?, |x, y| x - y)?,
        Op::Mul(a, b) => binary("Mul", name, get(*a)?, get(*b)?, |x, y| x * y)?,
        Op::Div(a, b) => binary("Div", name, get(*a)?, get(*b)?, |x, y| x / y)?,
        Op::Neg(a) => get(*a)?.mapv(|x| -x),
        Op::Square(a) => get(*a)?.mapv(|x| x * x),
        Op::Sigmoid(a) => get(*a)?.mapv(|x| 1.0 / (1.0 + (-x).exp())),
        Op::MatMul(a, b) => matmul(name, get(*a)?, get(*b)?)?,
        Op::Transpose(a) => get(*a)?.t().to_owned(),
        Op::Sum(a) => arr0(get(*a)?.sum()).into_dyn(),
        Op::Mean(a) => {
            let mean = get(*a)?
                .mean()
                .ok_or_else(|| GraphErr::InvalidArgument(format!("mean of an empty tensor in {name}")))?;
            arr0(mean).into_dyn()
        }
        Op::Size(a) => arr0(get(*a)?.len() as f32).into_dyn(),
        Op::BroadcastLike { value, like } => broadcast_like(name, get(*value)?, get(*like)?.shape())?,
        Op::SumToShape { value, like } => sum_to_shape(name, get(*value)?, get(*like)?.shape())?,
        Op::AddN(nodes) => add_n(name, nodes, &get)?,
        Op::Gather { params, indices } => gather(name, get(*params)?, indices)?,
        Op::ScatterDense {
            values: rows,
            indices,
            like,
        } => {
            let mut out = ArrayD::zeros(get(*like)?.raw_dim());
            scatter_rows(name, &mut out, indices, get(*rows)?, |row, update| *row += update)?;
            out
        }
        Op::Concat(nodes) => {
            let views = nodes
                .iter()
                .map(|&n| get(n).map(|value| value.view()))
                .collect::<Result<Vec<_>>>()?;
            ndarray::concatenate(Axis(0), &views)
                .map_err(|e| GraphErr::InvalidArgument(format!("{name}: {e}")))?
        }
        Op::SegmentSum {
            data,
            segment_ids,
            num_segments,
        } => segment_sum(name, get(*data)?, segment_ids, *num_segments)?,
        Op::NoOp => ArrayD::zeros(IxDyn(&[0])),

        Op::Assign { var, value } => {
            let value = get(*value)?;
            let mut storage = storage(graph, *var)?.write();
            check_same_shape("Assign", name, storage.shape(), value.shape())?;
            *storage = value.clone();
            value.clone()
        }
        Op::AssignAdd { var, value } => {
            let value = get(*value)?;
            update(storage(graph, *var)?, Locking(true), |current| {
                let delta = broadcast_to("AssignAdd", name, value, current.shape())?;
                *current += &delta;
                Ok(())
            })?
        }
        Op::AssignSub { var, value } => {
            let value = get(*value)?;
            update(storage(graph, *var)?, Locking(true), |current| {
                let delta = broadcast_to("AssignSub", name, value, current.shape())?;
                *current -= &delta;
                Ok(())
            })?
        }
        Op::ApplyGradientDescent {
            var,
            alpha,
            delta,
            locking,
            ..
        } => {
            let alpha = scalar(name, get(*alpha)?)?;
            let delta = get(*delta)?;
            update(storage(graph, *var)?, *locking, |current| {
                check_same_shape(def.op.type_name(), name, current.shape(), delta.shape())?;
                current.scaled_add(-alpha, delta);
                Ok(())
            })?
        }
        Op::ScatterSub {
            var,
            indices,
            updates,
            locking,
        } => {
            let updates = get(*updates)?;
            update(storage(graph, *var)?, *locking, |current| {
                scatter_rows(name, current, indices, updates, |row, update| *row -= update)
            })?
        }
        Op::ResourceScatterAdd {
            var,
            indices,
            updates,
        } => {
            let updates = get(*updates)?;
            update(storage(graph, *var)?, Locking(true), |current| {
                scatter_rows(name, current, indices, updates, |row, update| *row += update)
            })?
        }
        Op::ApplyMomentum {
            var,
            accum,
            lr,
            grad,
            momentum,
            locking,
            nesterov,
            ..
        } => {
            let lr = scalar(name, get(*lr)?)?;
            let momentum = scalar(name, get(*momentum)?)?;
            let grad = get(*grad)?;
            let step = MomentumStep {
                lr,
                momentum,
                nesterov: *nesterov,
            };

            update_pair(graph, *var, *accum, *locking, |var, accum| {
                check_same_shape(def.op.type_name(), name, var.shape(), grad.shape())?;
                check_same_shape(def.op.type_name(), name, accum.shape(), grad.shape())?;
                step.apply(var.view_mut(), accum.view_mut(), grad.view());
                Ok(())
            })?
        }
        Op::SparseApplyMomentum {
            var,
            accum,
            lr,
            grad,
            indices,
            momentum,
            locking,
            nesterov,
            ..
        } => {
            let lr = scalar(name, get(*lr)?)?;
            let momentum = scalar(name, get(*momentum)?)?;
            let grad = get(*grad)?;
            let step = MomentumStep {
                lr,
                momentum,
                nesterov: *nesterov,
            };

            update_pair(graph, *var, *accum, *locking, |var, accum| {
                check_same_shape(def.op.type_name(), name, var.shape(), accum.shape())?;
                check_rows(name, var, indices, grad)?;
                for (i, &index) in indices.iter().enumerate() {
                    step.apply(
                        var.index_axis_mut(Axis(0), index),
                        accum.index_axis_mut(Axis(0), index),
                        grad.index_axis(Axis(0), i),
                    );
                }
                Ok(())
            })?
        }
    };

    Ok(value)
}

/// Reads a tensor holding a single element.
fn scalar(name: &str, value: &ArrayD<f32>) -> Result<f32> {
    match value.iter().next() {
        Some(&x) if value.len() == 1 => Ok(x),
        _ => Err(GraphErr::NotScalar {
            node: name.to_string(),
            shape: value.shape().to_vec(),
        }),
    }
}

fn check_same_shape(op: &'static str, name: &str, lhs: &[usize], rhs: &[usize]) -> Result<()> {
    if lhs != rhs {
        return Err(GraphErr::ShapeMismatch {
            op,
            node: name.to_string(),
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        });
    }

    Ok(())
}

/// Computes the shape two tensors broadcast to, aligning trailing axes.
fn broadcast_shape(op: &'static str, name: &str, lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let dim = |shape: &[usize], axis: usize| {
        let offset = rank - shape.len();
        if axis < offset { 1 } else { shape[axis - offset] }
    };

    (0..rank)
        .map(|axis| match (dim(lhs, axis), dim(rhs, axis)) {
            (a, b) if a == b => Ok(a),
            (1, b) => Ok(b),
            (a, 1) => Ok(a),
            _ => Err(GraphErr::ShapeMismatch {
                op,
                node: name.to_string(),
                lhs: lhs.to_vec(),
                rhs: rhs.to_vec(),
            }),
        })
        .collect()
}

fn broadcast_to<'a>(
    op: &'static str,
    name: &str,
    value: &'a ArrayD<f32>,
    shape: &[usize],
) -> Result<ArrayViewD<'a, f32>> {
    value.broadcast(IxDyn(shape)).ok_or_else(|| GraphErr::ShapeMismatch {
        op,
        node: name.to_string(),
        lhs: value.shape().to_vec(),
        rhs: shape.to_vec(),
    })
}

fn binary(
    op: &'static str,
    name: &str,
    a: &ArrayD<f32>,
    b: &ArrayD<f32>,
    f: impl Fn(f32, f32) -> f32,
) -> Result<ArrayD<f32>> {
    let shape = broadcast_shape(op, name, a.shape(), b.shape())?;
    let a = broadcast_to(op, name, a, &shape)?;
    let b = broadcast_to(op, name, b, &shape)?;
    Ok(Zip::from(a).and(b).map_collect(|&x, &y| f(x, y)))
}

fn matmul(name: &str, a: &ArrayD<f32>, b: &ArrayD<f32>) -> Result<ArrayD<f32>> {
    let rank = |value: &ArrayD<f32>| GraphErr::RankMismatch {
        op: "MatMul",
        node: name.to_string(),
        expected: 2,
        got: value.ndim(),
    };

    let lhs = a.view().into_dimensionality::<Ix2>().map_err(|_| rank(a))?;
    let rhs = b.view().into_dimensionality::<Ix2>().map_err(|_| rank(b))?;
    if lhs.ncols() != rhs.nrows() {
        return Err(GraphErr::ShapeMismatch {
            op: "MatMul",
            node: name.to_string(),
            lhs: a.shape().to_vec(),
            rhs: b.shape().to_vec(),
        });
    }

    Ok(lhs.dot(&rhs).into_dyn())
}

fn broadcast_like(name: &str, value: &ArrayD<f32>, shape: &[usize]) -> Result<ArrayD<f32>> {
    Ok(broadcast_to("BroadcastLike", name, value, shape)?.to_owned())
}

/// Undoes a broadcast: sums the leading axes `value` has on top of `shape`
/// and every axis `shape` holds as 1.
fn sum_to_shape(name: &str, value: &ArrayD<f32>, shape: &[usize]) -> Result<ArrayD<f32>> {
    let mut out = value.clone();
    while out.ndim() > shape.len() {
        out = out.sum_axis(Axis(0));
    }

    for (axis, &len) in shape.iter().enumerate() {
        if len == 1 && out.ndim() == shape.len() && out.shape()[axis] != 1 {
            out = out.sum_axis(Axis(axis)).insert_axis(Axis(axis));
        }
    }

    if out.shape() != shape {
        out = broadcast_like(name, &out, shape)?;
    }

    Ok(out)
}

fn add_n<'a>(
    name: &str,
    nodes: &[Node],
    get: &impl Fn(Node) -> Result<&'a ArrayD<f32>>,
) -> Result<ArrayD<f32>> {
    let Some((&first, rest)) = nodes.split_first() else {
        return Err(GraphErr::InvalidArgument(format!("{name} has no inputs")));
    };

    let mut sum = get(first)?.clone();
    for &node in rest {
        let value = get(node)?;
        check_same_shape("AddN", name, sum.shape(), value.shape())?;
        sum += value;
    }

    Ok(sum)
}

fn check_index(name: &str, index: usize, len: usize) -> Result<()> {
    if index >= len {
        return Err(GraphErr::IndexOutOfRange {
            node: name.to_string(),
            index,
            len,
        });
    }

    Ok(())
}

fn gather(name: &str, params: &ArrayD<f32>, indices: &[usize]) -> Result<ArrayD<f32>> {
    if params.ndim() == 0 {
        return Err(GraphErr::RankMismatch {
            op: "Gather",
            node: name.to_string(),
            expected: 1,
            got: 0,
        });
    }

    let rows = params.len_of(Axis(0));
    for &index in indices {
        check_index(name, index, rows)?;
    }

    Ok(params.select(Axis(0), indices))
}

/// Checks `rows` holds one row of `target` per index.
fn check_rows(name: &str, target: &ArrayD<f32>, indices: &[usize], rows: &ArrayD<f32>) -> Result<()> {
    let mismatch = || GraphErr::ShapeMismatch {
        op: "Scatter",
        node: name.to_string(),
        lhs: target.shape().to_vec(),
        rhs: rows.shape().to_vec(),
    };

    if target.ndim() == 0 || rows.ndim() != target.ndim() {
        return Err(mismatch());
    }

    if rows.len_of(Axis(0)) != indices.len() || rows.shape()[1..] != target.shape()[1..] {
        return Err(mismatch());
    }

    let len = target.len_of(Axis(0));
    indices.iter().try_for_each(|&index| check_index(name, index, len))
}

/// Combines row `i` of `rows` into row `indices[i]` of `target`, repeated
/// indices are combined once per occurrence.
fn scatter_rows(
    name: &str,
    target: &mut ArrayD<f32>,
    indices: &[usize],
    rows: &ArrayD<f32>,
    combine: impl Fn(&mut f32, f32),
) -> Result<()> {
    check_rows(name, target, indices, rows)?;

    for (i, &index) in indices.iter().enumerate() {
        Zip::from(target.index_axis_mut(Axis(0), index))
            .and(rows.index_axis(Axis(0), i))
            .for_each(|t, &r| combine(t, r));
    }

    Ok(())
}

fn segment_sum(
    name: &str,
    data: &ArrayD<f32>,
    segment_ids: &[usize],
    num_segments: usize,
) -> Result<ArrayD<f32>> {
    if data.ndim() == 0 || data.len_of(Axis(0)) != segment_ids.len() {
        return Err(GraphErr::ShapeMismatch {
            op: "SegmentSum",
            node: name.to_string(),
            lhs: data.shape().to_vec(),
            rhs: vec![segment_ids.len()],
        });
    }

    let mut shape = data.shape().to_vec();
    shape[0] = num_segments;
    let mut out = ArrayD::zeros(IxDyn(&shape));

    for (row, &segment) in data.axis_iter(Axis(0)).zip(segment_ids) {
        check_index(name, segment, num_segments)?;
        let mut target = out.index_axis_mut(Axis(0), segment);
        target += &row;
    }

    Ok(out)
}

fn storage(graph: &Graph, var: VariableId) -> Result<&RwLock<ArrayD<f32>>> {
    Ok(&graph.variable_def(var)?.storage)
}

/// Runs a read-modify-write on a variable.
///
/// # Arguments
/// * `storage` - The variable's storage.
/// * `locking` - Whether the write lock is held for the whole update.
/// * `f` - The modification, nothing is written if it fails.
///
/// # Returns
/// The variable's value after the update.
fn update(
    storage: &RwLock<ArrayD<f32>>,
    locking: Locking,
    f: impl FnOnce(&mut ArrayD<f32>) -> Result<()>,
) -> Result<ArrayD<f32>> {
    if locking.0 {
        let mut guard = storage.write();
        f(&mut guard)?;
        return Ok(guard.clone());
    }

    let mut snapshot = storage.read().clone();
    f(&mut snapshot)?;
    *storage.write() = snapshot.clone();
    Ok(snapshot)
}

/// `update` for ops writing a variable and its accumulator.
///
/// The variable's lock is always taken before the accumulator's.
fn update_pair(
    graph: &Graph,
    var: VariableId,
    accum: VariableId,
    locking: Locking,
    f: impl FnOnce(&mut ArrayD<f32>, &mut ArrayD<f32>) -> Result<()>,
) -> Result<ArrayD<f32>> {
    if var == accum {
        return Err(GraphErr::InvalidArgument(
            "a variable can't be its own accumulator".into(),
        ));
    }

    let var = storage(graph, var)?;
    let accum = storage(graph, accum)?;

    if locking.0 {
        let mut var = var.write();
        let mut accum = accum.write();
        f(&mut var, &mut accum)?;
        return Ok(var.clone());
    }

    let mut var_snapshot = var.read().clone();
    let mut accum_snapshot = accum.read().clone();
    f(&mut var_snapshot, &mut accum_snapshot)?;
    *accum.write() = accum_snapshot;
    *var.write() = var_snapshot.clone();
    Ok(var_snapshot)
}

#[derive(Clone, Copy)]
struct MomentumStep {
    lr: f32,
    momentum: f32,
    nesterov: bool,
}

impl MomentumStep {
    fn apply(self, var: ArrayViewMutD<f32>, accum: ArrayViewMutD<f32>, grad: ArrayViewD<f32>) {
        let Self {
            lr,
            momentum,
            nesterov,
        } = self;

        Zip::from(var)
            .and(accum)
            .and(grad)
            .for_each(|v, a, &g| {
                *a = *a * momentum + g;
                if nesterov {
                    *v -= lr * g + lr * momentum * *a;
                } else {
                    *v -= lr * *a;
                }
            });
    }
}
