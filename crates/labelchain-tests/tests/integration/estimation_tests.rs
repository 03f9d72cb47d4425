use labelchain_core::{
    EdgeKind, FixedClassBalance, LabelGraph, LabelModel, LabelModelConfig, SignResolution,
    TripletAggregation,
};
use labelchain_tests::{independent, SignalSpec};

fn specs(accuracies: &[f64]) -> Vec<SignalSpec> {
    accuracies.iter().map(|&a| SignalSpec::always(a)).collect()
}

#[test]
fn round_trip_recovers_three_signal_accuracies() {
    let data = independent(10_000, &specs(&[0.9, 0.8, 0.7]), 0.5, 2024);
    let mut model = LabelModel::new(LabelGraph::independent(3).expect("graph"));
    model.fit(&data.batch).expect("fit");

    let recovered = model.estimated_accuracies().expect("fitted");
    for (got, want) in recovered.iter().zip([0.9_f64, 0.8, 0.7]) {
        assert!(
            (got - want).abs() < 0.02,
            "recovered accuracy {} vs true {}",
            got,
            want
        );
    }
}

#[test]
fn recovered_parameter_grows_with_accuracy() {
    let mut previous = 0.0;
    for accuracy in [0.6, 0.7, 0.8, 0.9] {
        let data = independent(20_000, &specs(&[accuracy, 0.8, 0.75, 0.7]), 0.5, 77);
        let graph = LabelGraph::independent(4).expect("graph");
        let edge = graph.signal_edge(0);
        let mut model = LabelModel::new(graph);
        model.fit(&data.batch).expect("fit");
        let theta = model
            .parameters()
            .expect("fitted")
            .theta(edge)
            .expect("signal edge")
            .abs();
        assert!(
            theta > previous,
            "|theta| {} at accuracy {} did not exceed {}",
            theta,
            accuracy,
            previous
        );
        previous = theta;
    }
}

#[test]
fn refitting_is_idempotent() {
    let data = independent(8_000, &specs(&[0.85, 0.7, 0.65, 0.8, 0.75]), 0.4, 5);
    let mut model = LabelModel::new(LabelGraph::independent(5).expect("graph"));
    model.fit(&data.batch).expect("first fit");
    let first = model.parameters().expect("fitted").clone();
    model.fit(&data.batch).expect("second fit");
    assert_eq!(model.parameters().expect("fitted"), &first);
}

#[test]
fn abstaining_signals_are_still_recovered() {
    let signals = [
        SignalSpec::new(0.9, 0.3),
        SignalSpec::new(0.8, 0.5),
        SignalSpec::new(0.75, 0.2),
        SignalSpec::new(0.7, 0.4),
    ];
    let data = independent(30_000, &signals, 0.5, 31);
    let mut model = LabelModel::new(LabelGraph::independent(4).expect("graph"));
    model.fit(&data.batch).expect("fit");
    let recovered = model.estimated_accuracies().expect("fitted");
    for (got, spec) in recovered.iter().zip(&signals) {
        assert!(
            (got - spec.accuracy).abs() < 0.03,
            "recovered accuracy {} vs true {}",
            got,
            spec.accuracy
        );
    }
}

#[test]
fn informative_class_balance_resolves_adversarial_signs() {
    let data = independent(20_000, &specs(&[0.2, 0.3, 0.25]), 0.8, 13);

    let mut informed = LabelModel::new(LabelGraph::independent(3).expect("graph"))
        .with_class_balance(FixedClassBalance::new(0.8).expect("balance"));
    let diagnostics = informed.fit(&data.batch).expect("fit");
    assert_eq!(diagnostics.anchors[0].sign, SignResolution::ClassBalance);
    assert!(informed
        .estimated_accuracies()
        .expect("fitted")
        .iter()
        .all(|&a| a < 0.5));

    // Without an informative balance the signals are assumed better than random.
    let mut uninformed = LabelModel::new(LabelGraph::independent(3).expect("graph"))
        .with_class_balance(FixedClassBalance::new(0.5).expect("balance"));
    let diagnostics = uninformed.fit(&data.batch).expect("fit");
    assert_eq!(diagnostics.anchors[0].sign, SignResolution::BetterThanRandom);
    assert!(uninformed
        .estimated_accuracies()
        .expect("fitted")
        .iter()
        .all(|&a| a > 0.5));
}

#[test]
fn lambda_edge_between_independent_signals_stays_small() {
    let data = independent(20_000, &specs(&[0.8, 0.8, 0.8, 0.8]), 0.5, 404);
    let lambda_y: Vec<(usize, usize)> = (0..4).map(|j| (j, 0)).collect();
    let graph = LabelGraph::new(4, 1, &[], &lambda_y, &[(0, 1)]).expect("graph");
    let mut model = LabelModel::new(graph);
    model.fit(&data.batch).expect("fit");

    let params = model.parameters().expect("fitted");
    let lambda_edge = params
        .edges()
        .iter()
        .find(|p| p.edge.kind == EdgeKind::ObservedObserved)
        .expect("lambda edge");
    assert!(lambda_edge.theta.abs() < 0.1, "theta {}", lambda_edge.theta);
    for acc in model.estimated_accuracies().expect("fitted") {
        assert!((acc - 0.8).abs() < 0.03, "accuracy {}", acc);
    }
}

#[test]
fn nearest_and_mean_aggregation_agree_on_clean_data() {
    let data = independent(20_000, &specs(&[0.9, 0.85, 0.8, 0.75, 0.7]), 0.5, 9);
    let mut mean = LabelModel::new(LabelGraph::independent(5).expect("graph"));
    mean.fit(&data.batch).expect("fit");
    let mut nearest = LabelModel::new(LabelGraph::independent(5).expect("graph"))
        .with_config(LabelModelConfig {
            aggregation: TripletAggregation::Nearest,
            ..Default::default()
        })
        .expect("config");
    nearest.fit(&data.batch).expect("fit");

    let lhs = mean.estimated_accuracies().expect("fitted");
    let rhs = nearest.estimated_accuracies().expect("fitted");
    for (a, b) in lhs.iter().zip(&rhs) {
        assert!((a - b).abs() < 0.03, "mean {} vs nearest {}", a, b);
    }
}
