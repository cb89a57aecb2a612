//! Executes graphs.

mod kernels;

use std::collections::HashMap;

use log::{debug, trace};
use ndarray::ArrayD;
use rayon::prelude::*;

use crate::{
    error::{GraphErr, Result},
    graph::Graph,
    op::{Node, Op},
};

/// Runs the nodes of a graph.
///
/// A run executes every node a fetched node depends on, through data inputs
/// and control inputs alike. Nodes whose dependencies are all done run in
/// parallel with each other.
#[derive(Debug, Clone, Copy)]
pub struct Session<'g> {
    graph: &'g Graph,
}

impl<'g> Session<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Executes the graph to compute `fetches`.
    ///
    /// # Arguments
    /// * `fetches` - The nodes whose values are returned.
    /// * `feeds` - Values replacing nodes for this run, every placeholder the
    ///   fetches depend on must be fed.
    ///
    /// # Returns
    /// The value of each fetched node, in order, or the first error raised by
    /// a node.
    pub fn run(&self, fetches: &[Node], feeds: &[(Node, ArrayD<f32>)]) -> Result<Vec<ArrayD<f32>>> {
        let mut values: HashMap<Node, ArrayD<f32>> = HashMap::with_capacity(feeds.len());
        for (node, value) in feeds {
            self.graph.def(*node)?;
            values.insert(*node, value.clone());
        }

        let levels = self.schedule(fetches, &values)?;
        debug!(
            fetches = fetches.len(),
            levels = levels.len();
            "running graph"
        );

        for level in levels {
            let stateful = level
                .iter()
                .filter(|&&node| self.graph.op(node).is_ok_and(Op::is_stateful))
                .count();
            trace!(nodes = level.len(), stateful = stateful; "running level");

            let results: Vec<_> = level
                .par_iter()
                .map(|&node| kernels::evaluate(self.graph, node, &values).map(|value| (node, value)))
                .collect();

            for result in results {
                let (node, value) = result?;
                values.insert(node, value);
            }
        }

        fetches
            .iter()
            .map(|node| values.get(node).cloned().ok_or(GraphErr::UnknownNode(node.index())))
            .collect()
    }

    /// Executes `target` for its side effects.
    pub fn run_target(&self, target: Node) -> Result<()> {
        self.run(&[target], &[]).map(|_| ())
    }

    /// Groups the nodes a run needs by dependency depth.
    ///
    /// # Arguments
    /// * `fetches` - The nodes to compute.
    /// * `fed` - The nodes that already have a value.
    ///
    /// # Returns
    /// The levels in execution order, the nodes of a level only depend on
    /// nodes of earlier levels.
    fn schedule(
        &self,
        fetches: &[Node],
        fed: &HashMap<Node, ArrayD<f32>>,
    ) -> Result<Vec<Vec<Node>>> {
        let mut needed = vec![false; self.graph.len()];
        let mut stack = fetches.to_vec();

        while let Some(node) = stack.pop() {
            let def = self.graph.def(node)?;
            if needed[node.index()] {
                continue;
            }

            needed[node.index()] = true;
            if fed.contains_key(&node) {
                continue;
            }

            stack.extend(def.op.inputs());
            stack.extend_from_slice(&def.control_inputs);
        }

        // Inputs always precede their consumers, so one forward pass settles
        // every depth.
        let mut depth = vec![0usize; self.graph.len()];
        let mut levels: Vec<Vec<Node>> = Vec::new();

        for index in (0..needed.len()).filter(|&i| needed[i]) {
            let node = Node(index);
            if fed.contains_key(&node) {
                continue;
            }

            let def = self.graph.def(node)?;
            let level = def
                .op
                .inputs()
                .iter()
                .chain(&def.control_inputs)
                .filter(|dep| !fed.contains_key(dep))
                .map(|dep| depth[dep.index()] + 1)
                .max()
                .unwrap_or(0);

            depth[index] = level;
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(node);
        }

        Ok(levels)
    }
}
