use labelchain_core::{LabelGraph, LabelMatrix, LabelModel, LabelModelError, SequenceBatcher};
use labelchain_tests::{chain, SignalSpec};

fn chain_model() -> LabelModel {
    LabelModel::new(LabelGraph::sequence(2, 3).expect("graph"))
}

#[test]
fn fit_rejects_column_mismatch() {
    let mut model = chain_model();
    let batch = LabelMatrix::new(4, 5, vec![1; 20]).expect("batch");
    let err = model.fit(&batch).expect_err("5 columns for 6 signals");
    assert!(
        matches!(err, LabelModelError::Shape(_)),
        "unexpected error: {}",
        err
    );
    assert!(!model.is_fitted());
}

#[test]
fn fit_rejects_empty_batch() {
    let mut model = chain_model();
    let batch = LabelMatrix::new(0, 6, Vec::new()).expect("batch");
    let err = model.fit(&batch).expect_err("no rows");
    assert!(matches!(err, LabelModelError::Shape(_)), "unexpected error: {}", err);
}

#[test]
fn fit_rejects_all_abstain_batch() {
    let mut model = chain_model();
    let batch = LabelMatrix::new(50, 6, vec![0; 300]).expect("batch");
    let err = model.fit(&batch).expect_err("nothing observed");
    assert!(
        matches!(err, LabelModelError::Estimation(_)),
        "unexpected error: {}",
        err
    );
    assert!(err.to_string().contains("weak signal 0"), "unexpected error: {}", err);
}

#[test]
fn failed_fit_leaves_parameters_untouched() {
    let mut model = chain_model();
    let data = chain(2_000, &[SignalSpec::always(0.8), SignalSpec::always(0.7)], 3, 0.8, 0.5, 6);
    model.fit(&data.batch).expect("fit");
    let before = model.parameters().expect("fitted").clone();

    let wrong = LabelMatrix::new(3, 7, vec![1; 21]).expect("batch");
    assert!(model.fit(&wrong).is_err());
    assert_eq!(model.parameters().expect("fitted"), &before);
}

#[test]
fn inference_rejects_column_mismatch() {
    let mut model = chain_model();
    let data = chain(2_000, &[SignalSpec::always(0.8), SignalSpec::always(0.7)], 3, 0.8, 0.5, 6);
    model.fit(&data.batch).expect("fit");
    let batch = LabelMatrix::new(1, 4, vec![1; 4]).expect("batch");
    assert!(matches!(
        model.predict_proba_marginalized(&batch),
        Err(LabelModelError::Shape(_))
    ));
}

#[test]
fn inference_rejects_empty_batch() {
    let mut model = chain_model();
    let data = chain(2_000, &[SignalSpec::always(0.8), SignalSpec::always(0.7)], 3, 0.8, 0.5, 6);
    model.fit(&data.batch).expect("fit");

    // Two frames cannot fill a window of three.
    let frames = LabelMatrix::new(2, 2, vec![1, -1, 1, 1]).expect("frames");
    let windows = SequenceBatcher::new(3).expect("batcher").batch(&frames);
    assert!(windows.is_empty());
    for result in [
        model.predict_proba_marginalized(&windows),
        model.predict_proba_joint(&windows),
    ] {
        assert!(
            matches!(result, Err(LabelModelError::Shape(_))),
            "unexpected result: {:?}",
            result
        );
    }
    assert!(matches!(
        model.predict(&windows, 0.5),
        Err(LabelModelError::Shape(_))
    ));
}

#[test]
fn queries_before_fit_report_not_fitted() {
    let model = chain_model();
    let batch = LabelMatrix::new(1, 6, vec![1; 6]).expect("batch");
    assert_eq!(
        model.predict_proba_marginalized(&batch),
        Err(LabelModelError::NotFitted)
    );
    assert_eq!(model.predict_proba_joint(&batch), Err(LabelModelError::NotFitted));
    assert_eq!(model.estimated_accuracies(), Err(LabelModelError::NotFitted));
}

#[test]
fn matrix_rejects_out_of_range_entries() {
    let err = LabelMatrix::from_rows(&[[1i8, 0, -1], [1, 2, 0]]).expect_err("2 is not a vote");
    assert!(matches!(err, LabelModelError::Shape(_)));
    assert!(err.to_string().contains("(1, 1)"), "unexpected error: {}", err);
}

#[test]
fn structural_errors_surface_before_data() {
    let cases: Vec<(&str, Result<LabelGraph, LabelModelError>)> = vec![
        ("zero signals", LabelGraph::new(0, 1, &[], &[], &[])),
        ("too few signals", LabelGraph::independent(2)),
        (
            "uncovered signal",
            LabelGraph::new(4, 1, &[], &[(0, 0), (1, 0), (2, 0)], &[]),
        ),
        (
            "latent without signals",
            LabelGraph::new(3, 2, &[(0, 1)], &[(0, 0), (1, 0), (2, 0)], &[]),
        ),
        (
            "lambda edge removes separation",
            LabelGraph::new(3, 1, &[], &[(0, 0), (1, 0), (2, 0)], &[(1, 2)]),
        ),
        (
            "latent index out of range",
            LabelGraph::new(3, 1, &[(0, 1)], &[(0, 0), (1, 0), (2, 0)], &[]),
        ),
    ];
    for (name, result) in cases {
        assert!(
            matches!(result, Err(LabelModelError::Structural(_))),
            "{}: expected structural error, got {:?}",
            name,
            result.map(|g| g.num_signals())
        );
    }
}
