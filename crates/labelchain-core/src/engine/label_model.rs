//! The label model: graph, configuration, and fitted state.

use std::sync::Arc;

use crate::engine::balance::{AgreementRateBalance, ClassBalanceEstimator};
use crate::engine::config::LabelModelConfig;
use crate::engine::errors::{LabelModelError, Result};
use crate::engine::estimator::{fit_parameters, FitDiagnostics};
use crate::engine::graph::LabelGraph;
use crate::engine::inference::{InferenceEngine, InferenceMethod};
use crate::engine::matrix::LabelMatrix;
use crate::engine::params::FittedParameters;

#[derive(Debug, Clone)]
struct Fitted {
    params: FittedParameters,
    engine: InferenceEngine,
}

/// Sequential weak-supervision label model.
///
/// ```text
/// let graph = LabelGraph::sequence(2, 3)?;
/// let mut model = LabelModel::new(graph);
/// model.fit(&batch)?;
/// let marginals = model.predict_proba_marginalized(&batch)?;
/// ```
///
/// Fitting replaces the parameters as a whole; a failed fit leaves the
/// previous parameters (if any) in place.
#[derive(Debug, Clone)]
pub struct LabelModel {
    graph: LabelGraph,
    config: LabelModelConfig,
    class_balance: Arc<dyn ClassBalanceEstimator>,
    fitted: Option<Fitted>,
}

impl LabelModel {
    /// Model over `graph` with default configuration and the agreement-rate
    /// class-balance heuristic.
    pub fn new(graph: LabelGraph) -> Self {
        Self {
            graph,
            config: LabelModelConfig::default(),
            class_balance: Arc::new(AgreementRateBalance),
            fitted: None,
        }
    }

    /// Replaces the configuration. Drops any fitted state, since inference
    /// strategy and estimates both depend on it.
    pub fn with_config(mut self, config: LabelModelConfig) -> Result<Self> {
        self.config = config.validate()?;
        self.fitted = None;
        Ok(self)
    }

    /// Replaces the class-balance strategy used by subsequent fits.
    pub fn with_class_balance<B>(mut self, strategy: B) -> Self
    where
        B: ClassBalanceEstimator + 'static,
    {
        self.class_balance = Arc::new(strategy);
        self
    }

    pub fn graph(&self) -> &LabelGraph {
        &self.graph
    }

    pub fn config(&self) -> &LabelModelConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Estimates every edge parameter from an unlabeled batch.
    ///
    /// `batch` must have exactly `m` columns (already reshaped by a
    /// [`crate::SequenceBatcher`] for sequential graphs).
    pub fn fit(&mut self, batch: &LabelMatrix) -> Result<FitDiagnostics> {
        let (params, diagnostics) =
            fit_parameters(&self.graph, batch, self.config, self.class_balance.as_ref())?;
        let engine = InferenceEngine::new(&self.graph, &params, &self.config)?;
        self.fitted = Some(Fitted { params, engine });
        Ok(diagnostics)
    }

    /// Installs externally supplied parameters after validating them
    /// against the graph. Latent biases are used as given; see
    /// [`FittedParameters::calibrated`] for biases that reproduce the class
    /// balance.
    pub fn set_parameters(&mut self, params: FittedParameters) -> Result<()> {
        let engine = InferenceEngine::new(&self.graph, &params, &self.config)?;
        self.fitted = Some(Fitted { params, engine });
        Ok(())
    }

    pub fn parameters(&self) -> Result<&FittedParameters> {
        Ok(&self.fitted()?.params)
    }

    /// `P(λ_j = Y_target | λ_j ≠ 0)` for every weak signal.
    pub fn estimated_accuracies(&self) -> Result<Vec<f64>> {
        Ok(self.fitted()?.params.accuracies(&self.graph))
    }

    /// `P(Y = +1)` per latent connected component.
    pub fn class_balance(&self) -> Result<&[f64]> {
        Ok(self.fitted()?.params.class_balances())
    }

    /// Exact inference algorithm in use.
    pub fn inference_method(&self) -> Result<InferenceMethod> {
        Ok(self.fitted()?.engine.method())
    }

    /// `P(Y_k = +1 | row)` for every row, flattened frame-major
    /// (`out[r * v + k]`, `n × v` values in `[0, 1]`).
    pub fn predict_proba_marginalized(&self, batch: &LabelMatrix) -> Result<Vec<f64>> {
        self.fitted()?.engine.marginals(batch)
    }

    /// Posterior over all `2^v` latent assignments per row
    /// (`out[r * 2^v + assignment]`, bit `k` set means `Y_k = +1`).
    pub fn predict_proba_joint(&self, batch: &LabelMatrix) -> Result<Vec<f64>> {
        self.fitted()?.engine.joint(batch)
    }

    /// Hard `±1` labels per frame: `+1` where the marginal reaches `threshold`.
    pub fn predict(&self, batch: &LabelMatrix, threshold: f64) -> Result<Vec<i8>> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(LabelModelError::Config(format!(
                "prediction threshold must be in [0, 1], got {}",
                threshold
            )));
        }
        let marginals = self.predict_proba_marginalized(batch)?;
        Ok(marginals
            .into_iter()
            .map(|p| if p >= threshold { 1 } else { -1 })
            .collect())
    }

    fn fitted(&self) -> Result<&Fitted> {
        self.fitted.as_ref().ok_or(LabelModelError::NotFitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::balance::FixedClassBalance;
    use crate::engine::config::InferenceStrategy;

    fn chain_batch() -> LabelMatrix {
        // Every frame's two signals mostly agree with a slowly changing label.
        let mut rows = Vec::new();
        for i in 0..400u32 {
            let y: i8 = if (i / 3) % 2 == 0 { 1 } else { -1 };
            let noisy = |k: u32| if (i * 7 + k * 13) % 10 < 2 { -y } else { y };
            rows.push([y, noisy(1), noisy(2), y, noisy(3), noisy(4)]);
        }
        LabelMatrix::from_rows(&rows).expect("batch")
    }

    #[test]
    fn queries_before_fit_fail_with_not_fitted() {
        let model = LabelModel::new(LabelGraph::independent(3).expect("graph"));
        let batch = LabelMatrix::from_rows(&[[1i8, 1, 1]]).expect("batch");
        assert!(!model.is_fitted());
        assert_eq!(
            model.predict_proba_marginalized(&batch),
            Err(LabelModelError::NotFitted)
        );
        assert_eq!(model.estimated_accuracies(), Err(LabelModelError::NotFitted));
        assert!(matches!(model.parameters(), Err(LabelModelError::NotFitted)));
    }

    #[test]
    fn failed_fit_keeps_previous_parameters() {
        let mut model = LabelModel::new(LabelGraph::sequence(2, 3).expect("graph"));
        model.fit(&chain_batch()).expect("fit");
        let before = model.parameters().expect("fitted").clone();

        let empty_signal = LabelMatrix::from_rows(&[[1i8, 0, 1, 1, 1, 1]]).expect("batch");
        let err = model.fit(&empty_signal).expect_err("signal 1 never votes");
        assert!(matches!(err, LabelModelError::Estimation(_)));
        assert_eq!(model.parameters().expect("still fitted"), &before);
    }

    #[test]
    fn fit_then_predict_on_chain() {
        let mut model = LabelModel::new(LabelGraph::sequence(2, 3).expect("graph"));
        let diagnostics = model.fit(&chain_batch()).expect("fit");
        assert_eq!(diagnostics.rows, 400);
        assert_eq!(diagnostics.anchors.len(), 3);
        assert_eq!(model.inference_method(), Ok(InferenceMethod::Enumerate));

        let unanimous = LabelMatrix::from_rows(&[[1i8; 6], [-1i8; 6]]).expect("rows");
        let marginals = model.predict_proba_marginalized(&unanimous).expect("predict");
        assert_eq!(marginals.len(), 6);
        assert!(marginals[..3].iter().all(|&p| p > 0.5));
        assert!(marginals[3..].iter().all(|&p| p < 0.5));
        assert_eq!(
            model.predict(&unanimous, 0.5).expect("labels"),
            vec![1, 1, 1, -1, -1, -1]
        );
    }

    #[test]
    fn set_parameters_validates_against_graph() {
        let mut source = LabelModel::new(LabelGraph::independent(3).expect("graph"));
        let batch = LabelMatrix::from_rows(&[
            [1i8, 1, 1],
            [-1, -1, -1],
            [1, 1, -1],
            [-1, 1, -1],
            [1, -1, 1],
            [-1, -1, 1],
        ])
        .expect("batch");
        source.fit(&batch).expect("fit");
        let params = source.parameters().expect("fitted").clone();

        let mut same = LabelModel::new(LabelGraph::independent(3).expect("graph"));
        same.set_parameters(params.clone()).expect("same graph");
        assert_eq!(
            same.predict_proba_marginalized(&batch),
            source.predict_proba_marginalized(&batch)
        );

        let mut other = LabelModel::new(LabelGraph::independent(4).expect("graph"));
        assert!(other.set_parameters(params).is_err());
        assert!(!other.is_fitted());
    }

    #[test]
    fn with_config_validates_and_resets() {
        let mut model = LabelModel::new(LabelGraph::independent(3).expect("graph"))
            .with_class_balance(FixedClassBalance::new(0.6).expect("balance"));
        let batch = LabelMatrix::from_rows(&[[1i8, 1, 1], [-1, -1, 1], [1, -1, 1]]).expect("batch");
        model.fit(&batch).expect("fit");
        assert_eq!(model.class_balance().expect("fitted"), &[0.6]);

        let model = model
            .with_config(LabelModelConfig {
                inference: InferenceStrategy::TreeMessagePassing,
                ..Default::default()
            })
            .expect("valid config");
        assert!(!model.is_fitted());

        let bad = LabelModel::new(LabelGraph::independent(3).expect("graph")).with_config(
            LabelModelConfig {
                correlation_clip: 2.0,
                ..Default::default()
            },
        );
        assert!(matches!(bad, Err(LabelModelError::Config(_))));
    }

    #[test]
    fn predict_rejects_bad_threshold() {
        let mut model = LabelModel::new(LabelGraph::independent(3).expect("graph"));
        let batch = LabelMatrix::from_rows(&[[1i8, 1, 1], [-1, -1, 1], [1, -1, -1]]).expect("batch");
        model.fit(&batch).expect("fit");
        assert!(matches!(
            model.predict(&batch, 1.5),
            Err(LabelModelError::Config(_))
        ));
    }
}
