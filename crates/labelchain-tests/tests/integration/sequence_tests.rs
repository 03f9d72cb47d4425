use labelchain_core::{
    chain_y_edges, frame_major_lambda_y_edges, EdgeKind, FixedClassBalance, InferenceMethod,
    InferenceStrategy, LabelGraph, LabelMatrix, LabelModel, LabelModelConfig, SequenceBatcher,
};
use labelchain_tests::{agreement, chain, frame_stream, majority_vote, SignalSpec};

fn frame_signals() -> [SignalSpec; 2] {
    [SignalSpec::new(0.85, 0.1), SignalSpec::new(0.75, 0.1)]
}

#[test]
fn explicit_chain_marginals_follow_unanimous_rows() {
    let graph = LabelGraph::new(
        6,
        3,
        &[(0, 1), (1, 2)],
        &[(0, 0), (1, 0), (2, 1), (3, 1), (4, 2), (5, 2)],
        &[],
    )
    .expect("graph");
    let data = chain(5_000, &frame_signals(), 3, 0.8, 0.5, 1);
    let mut model = LabelModel::new(graph);
    model.fit(&data.batch).expect("fit");

    let unanimous = LabelMatrix::from_rows(&[[1i8; 6], [-1i8; 6]]).expect("rows");
    let marginals = model.predict_proba_marginalized(&unanimous).expect("predict");
    assert_eq!(marginals.len(), 6);
    for (k, p) in marginals[..3].iter().enumerate() {
        assert!(*p > 0.5, "all-positive row: P(Y_{} = +1) = {}", k, p);
    }
    for (k, p) in marginals[3..].iter().enumerate() {
        assert!(*p < 0.5, "all-negative row: P(Y_{} = +1) = {}", k, p);
    }
}

#[test]
fn fitted_chain_returns_class_balance_for_silent_rows() {
    let data = chain(20_000, &frame_signals(), 3, 0.8, 0.8, 17);
    let mut model = LabelModel::new(LabelGraph::sequence(2, 3).expect("graph"))
        .with_class_balance(FixedClassBalance::new(0.8).expect("balance"));
    model.fit(&data.batch).expect("fit");

    let params = model.parameters().expect("fitted");
    assert!(params
        .edges()
        .iter()
        .filter(|p| p.edge.kind == EdgeKind::LatentLatent)
        .all(|p| p.theta > 0.5));

    let silent = LabelMatrix::new(1, 6, vec![0; 6]).expect("row");
    let marginals = model.predict_proba_marginalized(&silent).expect("predict");
    for (k, p) in marginals.iter().enumerate() {
        assert!((p - 0.8).abs() < 1e-9, "P(Y_{} = +1) = {} with every signal silent", k, p);
    }
}

#[test]
fn sequence_constructor_matches_explicit_wiring() {
    let explicit = LabelGraph::new(
        6,
        3,
        &chain_y_edges(3),
        &frame_major_lambda_y_edges(2, 3),
        &[],
    )
    .expect("graph");
    let sequence = LabelGraph::sequence(2, 3).expect("graph");
    assert_eq!(explicit.edges(), sequence.edges());
    for j in 0..6 {
        assert_eq!(sequence.target(j), Some(j / 2));
    }
}

#[test]
fn batched_stream_beats_majority_vote() {
    let v = 3;
    let stream = frame_stream(30_001, &frame_signals(), 0.9, 42);
    let batcher = SequenceBatcher::new(v).expect("batcher");
    assert_eq!(batcher.dropped_frames(stream.batch.rows()), 1);
    let windows = batcher.batch(&stream.batch);
    assert_eq!(windows.rows(), 10_000);
    assert_eq!(windows.cols(), 6);

    let mut model = LabelModel::new(LabelGraph::sequence(2, v).expect("graph"));
    model.fit(&windows).expect("fit");
    let predicted = model.predict(&windows, 0.5).expect("predict");
    let truth = &stream.truth[..windows.rows() * v];

    let model_agreement = agreement(&predicted, truth);
    let vote_agreement = agreement(&majority_vote(&windows, 2), truth);
    assert!(
        model_agreement > vote_agreement,
        "label model {} did not beat majority vote {}",
        model_agreement,
        vote_agreement
    );
}

#[test]
fn marginals_are_frame_major_and_calibrated() {
    let data = chain(20_000, &frame_signals(), 4, 0.85, 0.5, 8);
    let mut model = LabelModel::new(LabelGraph::sequence(2, 4).expect("graph"));
    model.fit(&data.batch).expect("fit");
    let marginals = model.predict_proba_marginalized(&data.batch).expect("predict");
    assert_eq!(marginals.len(), data.truth.len());

    // Mean predicted probability of the positive class tracks its frequency.
    let mean_p = marginals.iter().sum::<f64>() / marginals.len() as f64;
    let positive = data.truth.iter().filter(|&&y| y == 1).count() as f64 / data.truth.len() as f64;
    assert!((mean_p - positive).abs() < 0.03, "mean {} vs freq {}", mean_p, positive);
}

#[test]
fn long_chain_tree_passing_matches_enumeration() {
    let v = 14;
    let data = chain(4_000, &frame_signals(), v, 0.85, 0.5, 3);
    let mut auto = LabelModel::new(LabelGraph::sequence(2, v).expect("graph"));
    auto.fit(&data.batch).expect("fit");
    assert_eq!(auto.inference_method(), Ok(InferenceMethod::TreeMessagePassing));

    let mut enumerate = LabelModel::new(LabelGraph::sequence(2, v).expect("graph"))
        .with_config(LabelModelConfig {
            inference: InferenceStrategy::Enumerate,
            ..Default::default()
        })
        .expect("config");
    enumerate
        .set_parameters(auto.parameters().expect("fitted").clone())
        .expect("same graph");

    let sample = LabelMatrix::from_rows(&data.batch.iter_rows().take(10).collect::<Vec<_>>())
        .expect("sample");
    let lhs = auto.predict_proba_marginalized(&sample).expect("tree");
    let rhs = enumerate.predict_proba_marginalized(&sample).expect("enumerate");
    for (a, b) in lhs.iter().zip(&rhs) {
        assert!((a - b).abs() < 1e-9, "tree {} vs enumeration {}", a, b);
    }
}

#[test]
fn joint_posterior_is_normalised_per_row() {
    let data = chain(3_000, &frame_signals(), 3, 0.8, 0.5, 12);
    let mut model = LabelModel::new(LabelGraph::sequence(2, 3).expect("graph"));
    model.fit(&data.batch).expect("fit");
    let sample =
        LabelMatrix::from_rows(&data.batch.iter_rows().take(20).collect::<Vec<_>>()).expect("rows");
    let joint = model.predict_proba_joint(&sample).expect("joint");
    let marginals = model.predict_proba_marginalized(&sample).expect("marginals");
    assert_eq!(joint.len(), 20 * 8);
    for (row, states) in joint.chunks(8).enumerate() {
        let total: f64 = states.iter().sum();
        assert!((total - 1.0).abs() < 1e-9, "row {} sums to {}", row, total);
        for k in 0..3 {
            let mass: f64 = states
                .iter()
                .enumerate()
                .filter(|(assignment, _)| (assignment >> k) & 1 == 1)
                .map(|(_, p)| p)
                .sum();
            assert!((mass - marginals[row * 3 + k]).abs() < 1e-9);
        }
    }
}
