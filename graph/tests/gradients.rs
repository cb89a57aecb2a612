use graph::{
    AggregationMethod, Gradient, GradientOptions, Graph, GraphErr, Node, Session,
};
use ndarray::{ArrayD, arr0, arr1, arr2};

const EPS: f32 = 1e-3;
const TOLERANCE: f32 = 1e-2;

fn assert_close(got: &ArrayD<f32>, expected: &ArrayD<f32>) {
    assert_eq!(got.shape(), expected.shape());
    for (g, e) in got.iter().zip(expected) {
        assert!((g - e).abs() < TOLERANCE, "got {got}, expected {expected}");
    }
}

fn dense(grad: Option<Gradient>) -> Node {
    match grad {
        Some(Gradient::Dense(node)) => node,
        other => panic!("expected a dense gradient, got {other:?}"),
    }
}

/// Central differences of `loss` with respect to the placeholder `x`.
fn numeric_gradient(graph: &Graph, loss: Node, x: Node, at: &ArrayD<f32>) -> ArrayD<f32> {
    let session = Session::new(graph);
    let mut grad = ArrayD::zeros(at.raw_dim());

    for (i, g) in grad.iter_mut().enumerate() {
        let mut plus = at.clone();
        let mut minus = at.clone();
        *plus.iter_mut().nth(i).unwrap() += EPS;
        *minus.iter_mut().nth(i).unwrap() -= EPS;

        let up = session.run(&[loss], &[(x, plus)]).unwrap()[0].sum();
        let down = session.run(&[loss], &[(x, minus)]).unwrap()[0].sum();
        *g = (up - down) / (2.0 * EPS);
    }

    grad
}

#[test]
fn logistic_loss_gradient_matches_finite_differences() {
    let mut graph = Graph::new();
    let x = graph
        .constant(arr2(&[[0.5, -1.0], [1.5, 0.25], [-0.5, 2.0]]).into_dyn())
        .unwrap();
    let y = graph.constant(arr2(&[[1.0], [0.0], [1.0]]).into_dyn()).unwrap();
    let w = graph.placeholder("w").unwrap();
    let b = graph.constant(arr1(&[0.1]).into_dyn()).unwrap();

    let logits = graph.matmul(x, w).unwrap();
    let logits = graph.add(logits, b).unwrap();
    let pred = graph.sigmoid(logits).unwrap();
    let err = graph.sub(pred, y).unwrap();
    let sq = graph.square(err).unwrap();
    let loss = graph.mean(sq).unwrap();

    let grads = graph
        .gradients(&[loss], &[w], None, GradientOptions::default())
        .unwrap();
    let grad = dense(grads.into_iter().next().flatten());

    let at = arr2(&[[0.3], [-0.7]]).into_dyn();
    let symbolic = Session::new(&graph)
        .run(&[grad], &[(w, at.clone())])
        .unwrap()
        .remove(0);

    assert_close(&symbolic, &numeric_gradient(&graph, loss, w, &at));
}

#[test]
fn division_gradient_matches_finite_differences() {
    let mut graph = Graph::new();
    let a = graph.placeholder("a").unwrap();
    let b = graph.constant(arr1(&[2.0, 4.0]).into_dyn()).unwrap();
    let q = graph.div(b, a).unwrap();
    let neg = graph.neg(q).unwrap();
    let loss = graph.sum(neg).unwrap();

    let grads = graph
        .gradients(&[loss], &[a], None, GradientOptions::default())
        .unwrap();
    let grad = dense(grads.into_iter().next().flatten());

    let at = arr1(&[1.0, 2.0]).into_dyn();
    let symbolic = Session::new(&graph)
        .run(&[grad], &[(a, at.clone())])
        .unwrap()
        .remove(0);

    // d(-b/a)/da = b/a^2
    assert_close(&symbolic, &arr1(&[2.0, 1.0]).into_dyn());
    assert_close(&symbolic, &numeric_gradient(&graph, loss, a, &at));
}

#[test]
fn every_aggregation_method_sums_contributions() {
    for method in [
        AggregationMethod::AddN,
        AggregationMethod::ExperimentalTree,
        AggregationMethod::ExperimentalAccumulateN,
    ] {
        let mut graph = Graph::new();
        let x = graph.placeholder("x").unwrap();
        let sq = graph.square(x).unwrap();
        let twice = graph.add(x, x).unwrap();
        let y = graph.add(sq, twice).unwrap();

        let options = GradientOptions {
            aggregation_method: method,
            ..Default::default()
        };
        let grads = graph.gradients(&[y], &[x], None, options).unwrap();
        let grad = dense(grads.into_iter().next().flatten());

        // d(x^2 + 2x)/dx = 2x + 2
        let out = Session::new(&graph)
            .run(&[grad], &[(x, arr0(3.0).into_dyn())])
            .unwrap();
        assert_eq!(out[0], arr0(8.0).into_dyn(), "{method:?}");
    }
}

#[test]
fn unconnected_and_stopped_inputs_have_no_gradient() {
    let mut graph = Graph::new();
    let x = graph.placeholder("x").unwrap();
    let z = graph.placeholder("z").unwrap();
    let stopped = graph.stop_gradient(x).unwrap();
    let y = graph.square(stopped).unwrap();

    let grads = graph
        .gradients(&[y], &[x, z], None, GradientOptions::default())
        .unwrap();
    assert_eq!(grads, vec![None, None]);
}

#[test]
fn gradients_live_in_their_own_scope() {
    let mut graph = Graph::new();
    let x = graph.placeholder("x").unwrap();
    let y = graph.square(x).unwrap();

    let first = graph
        .gradients(&[y], &[x], None, GradientOptions::default())
        .unwrap();
    let second = graph
        .gradients(&[y], &[x], None, GradientOptions::default())
        .unwrap();

    let first = graph.name(dense(first.into_iter().next().flatten())).unwrap();
    assert!(first.starts_with("gradients/"), "{first}");
    let second = graph.name(dense(second.into_iter().next().flatten())).unwrap();
    assert!(second.starts_with("gradients_1/"), "{second}");
}

#[test]
fn initial_gradients_scale_the_result() {
    let mut graph = Graph::new();
    let x = graph.placeholder("x").unwrap();
    let y = graph.square(x).unwrap();
    let seed = graph.scalar(10.0).unwrap();

    let grads = graph
        .gradients(&[y], &[x], Some(&[seed]), GradientOptions::default())
        .unwrap();
    let grad = dense(grads.into_iter().next().flatten());

    let out = Session::new(&graph)
        .run(&[grad], &[(x, arr0(2.0).into_dyn())])
        .unwrap();
    assert_eq!(out[0], arr0(40.0).into_dyn());

    let err = graph
        .gradients(&[y], &[x], Some(&[]), GradientOptions::default())
        .unwrap_err();
    assert!(matches!(err, GraphErr::InvalidArgument(_)));
}

#[test]
fn gather_produces_a_sparse_gradient() {
    let mut graph = Graph::new();
    let table = graph.variable("table", arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]).into_dyn(), true);
    let rows = graph.gather(table.node(), &[2, 0, 2]).unwrap();
    let loss = graph.sum(rows).unwrap();

    let grads = graph
        .gradients(&[loss], &[table.node()], None, GradientOptions::default())
        .unwrap();
    let Some(Gradient::Sparse(slices)) = grads.into_iter().next().flatten() else {
        panic!("expected a sparse gradient");
    };
    assert_eq!(slices.indices, vec![2, 0, 2]);
    assert_eq!(slices.dense_shape, table.node());

    let dense = graph.densify(&Gradient::Sparse(slices)).unwrap();
    let out = Session::new(&graph).run(&[dense], &[]).unwrap();
    assert_eq!(
        out[0],
        arr2(&[[1.0, 1.0], [0.0, 0.0], [2.0, 2.0]]).into_dyn()
    );
}

#[test]
fn gated_gradients_wait_for_each_other() {
    let mut graph = Graph::new();
    let a = graph.placeholder("a").unwrap();
    let b = graph.placeholder("b").unwrap();
    let y = graph.mul(a, b).unwrap();

    let options = GradientOptions {
        gate_gradients: true,
        ..Default::default()
    };
    let grads = graph.gradients(&[y], &[a, b], None, options).unwrap();
    let ga = dense(grads[0].clone());
    let gb = dense(grads[1].clone());

    let gate = graph.control_inputs(ga).unwrap().to_vec();
    assert_eq!(gate.len(), 1);
    assert_eq!(graph.control_inputs(gb).unwrap(), gate.as_slice());
    assert!(graph.name(gate[0]).unwrap().contains("tuple/control_dependency"));

    let out = Session::new(&graph)
        .run(
            &[ga, gb],
            &[(a, arr0(3.0).into_dyn()), (b, arr0(5.0).into_dyn())],
        )
        .unwrap();
    assert_eq!(out, vec![arr0(5.0).into_dyn(), arr0(3.0).into_dyn()]);
}

#[test]
fn ops_without_a_rule_are_rejected() {
    let mut graph = Graph::new();
    let x = graph.placeholder("x").unwrap();
    let segments = graph.segment_sum(x, &[0, 0], 1).unwrap();
    let loss = graph.sum(segments).unwrap();

    let err = graph
        .gradients(&[loss], &[x], None, GradientOptions::default())
        .unwrap_err();
    assert_eq!(
        err,
        GraphErr::NoGradient {
            op: "SegmentSum",
            node: "SegmentSum".into(),
        }
    );
}

#[test]
fn mixed_sparse_and_dense_contributions_are_densified() {
    for method in [
        AggregationMethod::AddN,
        AggregationMethod::ExperimentalTree,
        AggregationMethod::ExperimentalAccumulateN,
    ] {
        let mut graph = Graph::new();
        let w = graph.variable("w", arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn(), true);
        let row = graph.gather(w.node(), &[1]).unwrap();
        let picked = graph.sum(row).unwrap();
        let all = graph.sum(w.node()).unwrap();
        let loss = graph.add(picked, all).unwrap();

        let options = GradientOptions {
            aggregation_method: method,
            ..Default::default()
        };
        let grads = graph.gradients(&[loss], &[w.node()], None, options).unwrap();
        let grad = dense(grads.into_iter().next().flatten());

        let out = Session::new(&graph).run(&[grad], &[]).unwrap();
        assert_eq!(
            out[0],
            arr2(&[[1.0, 1.0], [2.0, 2.0]]).into_dyn(),
            "{method:?}"
        );
    }
}

#[test]
fn scattered_values_get_their_rows_back() {
    let mut graph = Graph::new();
    let v = graph.placeholder("v").unwrap();
    let like = graph.constant(ArrayD::zeros(ndarray::IxDyn(&[3, 1]))).unwrap();
    let scattered = graph.scatter_dense(v, &[2, 0], like).unwrap();
    let scale = graph
        .constant(arr2(&[[1.0], [2.0], [3.0]]).into_dyn())
        .unwrap();
    let weighted = graph.mul(scattered, scale).unwrap();
    let loss = graph.sum(weighted).unwrap();

    let grads = graph
        .gradients(&[loss], &[v], None, GradientOptions::default())
        .unwrap();
    let grad = dense(grads.into_iter().next().flatten());

    let out = Session::new(&graph)
        .run(&[grad], &[(v, arr2(&[[5.0], [7.0]]).into_dyn())])
        .unwrap();
    assert_eq!(out[0], arr2(&[[3.0], [1.0]]).into_dyn());
}
