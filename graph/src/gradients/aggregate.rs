use super::{AggregationMethod, Gradient, IndexedSlices};
use crate::{error::Result, graph::Graph, op::Node};

impl Graph {
    /// Combines every gradient that reached a node into one.
    ///
    /// Sparse contributions stay sparse when all of them are, their rows are
    /// concatenated. Mixed contributions are densified first.
    pub(super) fn aggregate(
        &mut self,
        mut grads: Vec<Gradient>,
        method: AggregationMethod,
    ) -> Result<Gradient> {
        if grads.len() == 1
            && let Some(grad) = grads.pop()
        {
            return Ok(grad);
        }

        if grads.iter().all(Gradient::is_sparse) {
            return self.concat_slices(&grads);
        }

        let dense = grads
            .iter()
            .map(|grad| self.densify(grad))
            .collect::<Result<Vec<_>>>()?;

        let sum = match method {
            AggregationMethod::AddN => self.add_n(&dense)?,
            AggregationMethod::ExperimentalTree => self.add_tree(&dense)?,
            AggregationMethod::ExperimentalAccumulateN => self.add_running(&dense)?,
        };

        Ok(Gradient::Dense(sum))
    }

    fn concat_slices(&mut self, grads: &[Gradient]) -> Result<Gradient> {
        let mut values = Vec::with_capacity(grads.len());
        let mut indices = Vec::new();
        let mut dense_shape = None;

        for grad in grads {
            if let Gradient::Sparse(slices) = grad {
                values.push(slices.values);
                indices.extend_from_slice(&slices.indices);
                dense_shape.get_or_insert(slices.dense_shape);
            }
        }

        let values = self.concat(&values)?;
        let dense_shape = dense_shape.unwrap_or(values);
        Ok(Gradient::Sparse(IndexedSlices {
            values,
            indices,
            dense_shape,
        }))
    }

    fn add_tree(&mut self, nodes: &[Node]) -> Result<Node> {
        match nodes {
            [] => self.add_n(nodes),
            [node] => Ok(*node),
            _ => {
                let (left, right) = nodes.split_at(nodes.len() / 2);
                let left = self.add_tree(left)?;
                let right = self.add_tree(right)?;
                self.add(left, right)
            }
        }
    }

    fn add_running(&mut self, nodes: &[Node]) -> Result<Node> {
        let Some((&first, rest)) = nodes.split_first() else {
            return self.add_n(nodes);
        };

        rest.iter().try_fold(first, |acc, &node| self.add(acc, node))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr1;

    use super::*;

    #[test]
    fn test_tree_aggregation_adds_pairwise() {
        let mut graph = Graph::new();
        let grads: Vec<Gradient> = (0..4)
            .map(|i| Gradient::Dense(graph.scalar(i as f32).unwrap()))
            .collect();

        let sum = graph
            .aggregate(grads, AggregationMethod::ExperimentalTree)
            .unwrap();
        let root = graph.op(sum.values()).unwrap();
        assert_eq!(root.type_name(), "Add");
        for input in root.inputs() {
            assert_eq!(graph.op(input).unwrap().type_name(), "Add");
        }
    }

    #[test]
    fn test_sparse_gradients_stay_sparse() {
        let mut graph = Graph::new();
        let params = graph.constant(arr1(&[1.0, 2.0, 3.0]).into_dyn()).unwrap();
        let a = graph.scalar(1.0).unwrap();
        let b = graph.scalar(2.0).unwrap();
        let grads = vec![
            Gradient::Sparse(IndexedSlices {
                values: a,
                indices: vec![0],
                dense_shape: params,
            }),
            Gradient::Sparse(IndexedSlices {
                values: b,
                indices: vec![2],
                dense_shape: params,
            }),
        ];

        let Gradient::Sparse(slices) = graph.aggregate(grads, AggregationMethod::AddN).unwrap()
        else {
            panic!("expected a sparse gradient");
        };
        assert_eq!(slices.indices, vec![0, 2]);
        assert_eq!(slices.dense_shape, params);
        assert_eq!(graph.op(slices.values).unwrap().type_name(), "Concat");
    }
}
