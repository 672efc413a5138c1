//! Decision Service
//!
//! Request-level orchestration shared by the HTTP handlers and integration
//! tests: validate, load the model (so a missing or mismatched model fails
//! before any price fetch), fetch returns, then run the CPU-bound work on the
//! blocking pool.

use crate::causal::{CausalGraph, MarkovBlanket, PcAlgorithm, StructureLearner};
use crate::decision::{rollout, DecisionProcess, PolicyModel, PolicyTrainer, ReinforceTrainer};
use crate::error::{EngineError, EngineResult};
use crate::explain::{
    self, AttributionEstimator, CounterfactualResult, SamplingShapleyEstimator, SensitivityReport,
    DEFAULT_SWEEP_DELTAS,
};
use crate::market::{fetch_returns, PriceSource, ReturnSeries, YahooPriceSource};
use crate::models::{
    CausalPathRequest, CausalPathResponse, Config, CounterfactualRequest, DiscoverRequest,
    DiscoverResponse, FeatureSelectRequest, GlobalExplainResponse, PerDecisionItem,
    PerDecisionResponse, PredictRequest, PredictResponse, SensitivityRequest, StoreBackend,
    SymbolSeries, TrainRequest, TrainResponse,
};
use crate::store::{
    FsKvStore, KeyValueStore, MemoryKvStore, ModelId, ModelMetadata, ModelStore, SqliteKvStore,
    TrainingRecord,
};
use anyhow::Context;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::info;

/// Run CPU-bound or blocking-IO work off the async runtime.
async fn blocking<T, F>(work: F) -> EngineResult<T>
where
    F: FnOnce() -> EngineResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

#[derive(Clone)]
pub struct DecisionService {
    prices: Arc<dyn PriceSource>,
    models: ModelStore,
    trainer: Arc<dyn PolicyTrainer>,
    learner: Arc<dyn StructureLearner>,
    estimator: Arc<dyn AttributionEstimator>,
}

impl DecisionService {
    pub fn new(
        prices: Arc<dyn PriceSource>,
        models: ModelStore,
        trainer: Arc<dyn PolicyTrainer>,
        learner: Arc<dyn StructureLearner>,
        estimator: Arc<dyn AttributionEstimator>,
    ) -> Self {
        Self {
            prices,
            models,
            trainer,
            learner,
            estimator,
        }
    }

    /// Wire the default collaborators from configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let kv: Arc<dyn KeyValueStore> = match config.store {
            StoreBackend::Sqlite => Arc::new(
                SqliteKvStore::new(&config.store_path).with_context(|| {
                    format!("Failed to open model store {}", config.store_path.display())
                })?,
            ),
            StoreBackend::Fs => Arc::new(FsKvStore::new(&config.store_path).with_context(|| {
                format!("Failed to open model directory {}", config.store_path.display())
            })?),
            StoreBackend::Memory => Arc::new(MemoryKvStore::new()),
        };
        info!(
            backend = %config.store,
            path = %config.store_path.display(),
            "Model store ready"
        );

        let prices = YahooPriceSource::new(config.price_api_base.clone())?;

        Ok(Self::new(
            Arc::new(prices),
            ModelStore::new(kv),
            Arc::new(ReinforceTrainer::new(config.trainer.clone())),
            Arc::new(PcAlgorithm::new()),
            Arc::new(SamplingShapleyEstimator::new(config.attribution.clone())),
        ))
    }

    pub fn models(&self) -> &ModelStore {
        &self.models
    }

    async fn returns(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<ReturnSeries> {
        fetch_returns(self.prices.as_ref(), symbols, start, end).await
    }

    /// Load the requested model and check its symbols, then fetch returns.
    async fn prepare(
        &self,
        req: &PredictRequest,
    ) -> EngineResult<(Arc<PolicyModel>, ModelMetadata, ReturnSeries)> {
        req.validate()?;
        let model_id = ModelId::parse(&req.model_id)
            .ok_or_else(|| EngineError::ModelNotFound(req.model_id.clone()))?;

        let models = self.models.clone();
        let symbols = req.symbols.clone();
        let (policy, metadata) =
            blocking(move || models.load_for(&model_id, &symbols)).await?;

        let series = self.returns(&req.symbols, req.start_date, req.end_date).await?;
        Ok((Arc::new(policy), metadata, series))
    }

    // ===== Agent =====

    pub async fn train(&self, req: TrainRequest) -> EngineResult<TrainResponse> {
        req.validate()?;
        let series = self.returns(&req.symbols, req.start_date, req.end_date).await?;

        let trainer = self.trainer.clone();
        let models = self.models.clone();
        let metadata = blocking(move || {
            let process = DecisionProcess::new(&series.returns);
            let trained = trainer.train(&process, req.total_timesteps)?;
            models.save(
                &trained.policy,
                TrainingRecord {
                    symbols: req.symbols,
                    start_date: req.start_date,
                    end_date: req.end_date,
                    total_timesteps: req.total_timesteps,
                    summary: trained.summary,
                },
            )
        })
        .await?;

        Ok(TrainResponse {
            model_id: metadata.model_id.to_string(),
            summary: metadata.training,
        })
    }

    pub async fn predict(&self, req: PredictRequest) -> EngineResult<PredictResponse> {
        let (policy, _, series) = self.prepare(&req).await?;
        let trace = rollout(policy.as_ref(), &series.returns, &req.symbols)?;

        let returns = SymbolSeries(
            req.symbols
                .iter()
                .enumerate()
                .map(|(j, s)| (s.clone(), series.returns.column(j)))
                .collect(),
        );

        Ok(PredictResponse {
            dates: series
                .dates
                .iter()
                .map(|d| d.format("%Y-%m-%d").to_string())
                .collect(),
            returns,
            actions: trace.actions,
        })
    }

    pub async fn model_metadata(&self, model_id: &str) -> EngineResult<ModelMetadata> {
        let id = ModelId::parse(model_id)
            .ok_or_else(|| EngineError::ModelNotFound(model_id.to_string()))?;
        let models = self.models.clone();
        blocking(move || models.metadata(&id)).await
    }

    // ===== Causal =====

    async fn discover_graph(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
        alpha: f64,
    ) -> EngineResult<CausalGraph> {
        let series = self.returns(symbols, start, end).await?;
        let learner = self.learner.clone();
        let labels = symbols.to_vec();
        blocking(move || learner.discover(&series.returns, alpha, &labels)).await
    }

    pub async fn discover(&self, req: DiscoverRequest) -> EngineResult<DiscoverResponse> {
        req.validate()?;
        let graph = self
            .discover_graph(&req.symbols, req.start_date, req.end_date, req.alpha)
            .await?;
        Ok(DiscoverResponse {
            nodes: graph.nodes().to_vec(),
            edges: graph.edges(),
        })
    }

    pub async fn select_features(&self, req: FeatureSelectRequest) -> EngineResult<MarkovBlanket> {
        req.validate()?;
        let graph = self
            .discover_graph(&req.symbols, req.start_date, req.end_date, req.alpha)
            .await?;
        graph.markov_blanket(&req.target)
    }

    // ===== Explain =====

    pub async fn explain_per_decision(
        &self,
        req: PredictRequest,
    ) -> EngineResult<PerDecisionResponse> {
        let (policy, _, series) = self.prepare(&req).await?;
        let estimator = self.estimator.clone();
        let symbols = req.symbols.clone();
        let returns = series.returns;
        let records = blocking(move || {
            explain::per_decision(policy.as_ref(), &returns, &symbols, estimator.as_ref())
        })
        .await?;

        // Decision i acts on row i and is realised on the next return date
        let explains = records
            .into_iter()
            .map(|r| PerDecisionItem {
                date: series.dates[r.step + 1],
                action: r.action,
                contributions: r.contributions,
            })
            .collect();
        Ok(PerDecisionResponse { explains })
    }

    pub async fn explain_global(&self, req: PredictRequest) -> EngineResult<GlobalExplainResponse> {
        let (policy, _, series) = self.prepare(&req).await?;
        let estimator = self.estimator.clone();
        let symbols = req.symbols.clone();
        let importance = blocking(move || {
            let records =
                explain::per_decision(policy.as_ref(), &series.returns, &symbols, estimator.as_ref())?;
            Ok(explain::global_importance(&records, &symbols))
        })
        .await?;
        Ok(GlobalExplainResponse { importance })
    }

    pub async fn causal_paths(&self, req: CausalPathRequest) -> EngineResult<CausalPathResponse> {
        req.validate()?;
        blocking(move || {
            let graph = CausalGraph::from_edges(req.nodes.clone(), &req.edges)?;
            let paths = graph.simple_paths(&req.feature, &req.nodes)?;
            Ok(CausalPathResponse { paths })
        })
        .await
    }

    pub async fn counterfactual(
        &self,
        req: CounterfactualRequest,
    ) -> EngineResult<CounterfactualResult> {
        let (policy, _, series) = self.prepare(&req.predict).await?;
        blocking(move || {
            explain::simulate(
                policy.as_ref(),
                &series.returns,
                &req.predict.symbols,
                &req.feature,
                req.delta,
            )
        })
        .await
    }

    pub async fn sensitivity(&self, req: SensitivityRequest) -> EngineResult<SensitivityReport> {
        let (policy, _, series) = self.prepare(&req.predict).await?;
        let deltas = if req.deltas.is_empty() {
            DEFAULT_SWEEP_DELTAS.to_vec()
        } else {
            req.deltas
        };
        let symbols = req.predict.symbols;
        let feature = req.feature;
        blocking(move || {
            explain::sweep(policy.as_ref(), &series.returns, &symbols, &feature, &deltas)
        })
        .await
    }
}
