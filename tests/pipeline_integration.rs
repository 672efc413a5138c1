//! End-to-end tests for the decision service: train, predict, explain and
//! perturb against an in-memory price feed.

mod common;

use common::{end, service, service_with_store, start, symbols};
use std::sync::Arc;
use tcarp_backend::causal::CausalEdge;
use tcarp_backend::models::{
    CausalPathRequest, CounterfactualRequest, DiscoverRequest, FeatureSelectRequest,
    PredictRequest, SensitivityRequest, TrainRequest,
};
use tcarp_backend::store::SqliteKvStore;
use tcarp_backend::{DecisionService, EngineError};

fn train_request(total_timesteps: u64) -> TrainRequest {
    TrainRequest {
        symbols: symbols(),
        start_date: start(),
        end_date: end(),
        total_timesteps,
    }
}

fn predict_request(model_id: &str, symbols: Vec<String>) -> PredictRequest {
    PredictRequest {
        model_id: model_id.to_string(),
        symbols,
        start_date: start(),
        end_date: end(),
    }
}

async fn trained(service: &DecisionService) -> String {
    service.train(train_request(500)).await.unwrap().model_id
}

#[tokio::test]
async fn test_train_then_predict_roundtrip() {
    let service = service();
    let resp = service.train(train_request(500)).await.unwrap();
    assert_eq!(resp.summary.timesteps, 500);

    let prediction = service
        .predict(predict_request(&resp.model_id, symbols()))
        .await
        .unwrap();

    // 60 price days -> 59 return rows -> 58 decisions
    assert_eq!(prediction.dates.len(), 59);
    assert_eq!(prediction.actions.len(), 58);
    assert!(prediction.actions.iter().all(|a| symbols().contains(a)));
    for sym in symbols() {
        assert_eq!(prediction.returns.get(&sym).unwrap().len(), 59);
    }
    assert_eq!(prediction.dates[0], "2024-01-02");
}

#[tokio::test]
async fn test_prediction_is_deterministic() {
    let service = service();
    let model_id = trained(&service).await;
    let a = service.predict(predict_request(&model_id, symbols())).await.unwrap();
    let b = service.predict(predict_request(&model_id, symbols())).await.unwrap();
    assert_eq!(a.actions, b.actions);
}

#[tokio::test]
async fn test_symbol_mismatch_on_permuted_or_altered_symbols() {
    let service = service();
    let model_id = trained(&service).await;

    let mut permuted = symbols();
    permuted.reverse();
    let err = service
        .predict(predict_request(&model_id, permuted))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SymbolMismatch { .. }));

    let altered = vec!["AAPL".to_string(), "MSFT".to_string()];
    let err = service
        .predict(predict_request(&model_id, altered))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SymbolMismatch { .. }));
}

#[tokio::test]
async fn test_unknown_model_is_not_found() {
    let service = service();
    let missing = uuid::Uuid::new_v4().to_string();
    let err = service
        .predict(predict_request(&missing, symbols()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ModelNotFound(_)));

    let err = service
        .predict(predict_request("not-a-model", symbols()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ModelNotFound(_)));

    let err = service.model_metadata(&missing).await.unwrap_err();
    assert!(matches!(err, EngineError::ModelNotFound(_)));
}

#[tokio::test]
async fn test_model_metadata_records_training() {
    let service = service();
    let model_id = trained(&service).await;
    let meta = service.model_metadata(&model_id).await.unwrap();
    assert_eq!(meta.symbols, symbols());
    assert_eq!(meta.total_timesteps, 500);
    assert_eq!(meta.start_date, start());
    assert_eq!(meta.policy_sha256.len(), 64);
}

#[tokio::test]
async fn test_models_survive_restart_with_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("models.db");

    let model_id = {
        let service = service_with_store(Arc::new(SqliteKvStore::new(&path).unwrap()));
        trained(&service).await
    };

    let service = service_with_store(Arc::new(SqliteKvStore::new(&path).unwrap()));
    let prediction = service
        .predict(predict_request(&model_id, symbols()))
        .await
        .unwrap();
    assert_eq!(prediction.actions.len(), 58);
}

#[tokio::test]
async fn test_per_decision_and_global_explanations() {
    let service = service();
    let model_id = trained(&service).await;

    let prediction = service
        .predict(predict_request(&model_id, symbols()))
        .await
        .unwrap();
    let per = service
        .explain_per_decision(predict_request(&model_id, symbols()))
        .await
        .unwrap();

    assert_eq!(per.explains.len(), prediction.actions.len());
    for (i, item) in per.explains.iter().enumerate() {
        assert_eq!(item.action, prediction.actions[i]);
        assert_eq!(item.date.format("%Y-%m-%d").to_string(), prediction.dates[i + 1]);
        assert_eq!(
            item.contributions.symbols().collect::<Vec<_>>(),
            vec!["AAPL", "MSFT", "SPY"]
        );
    }

    let global = service
        .explain_global(predict_request(&model_id, symbols()))
        .await
        .unwrap();
    assert_eq!(global.importance.len(), 3);
    assert!(global.importance.values().all(|v| v >= 0.0 && v.is_finite()));
}

#[tokio::test]
async fn test_counterfactual_and_sweep() {
    let service = service();
    let model_id = trained(&service).await;

    let unchanged = service
        .counterfactual(CounterfactualRequest {
            predict: predict_request(&model_id, symbols()),
            feature: "MSFT".to_string(),
            delta: 0.0,
        })
        .await
        .unwrap();
    assert!(unchanged.difference_indices.is_empty());
    assert_eq!(unchanged.original_actions, unchanged.counterfactual_actions);

    let perturbed = service
        .counterfactual(CounterfactualRequest {
            predict: predict_request(&model_id, symbols()),
            feature: "AAPL".to_string(),
            delta: -3.0,
        })
        .await
        .unwrap();
    assert_eq!(
        perturbed.original_actions.len(),
        perturbed.counterfactual_actions.len()
    );
    assert!(perturbed
        .difference_indices
        .iter()
        .all(|&i| i < perturbed.original_actions.len()));

    let err = service
        .counterfactual(CounterfactualRequest {
            predict: predict_request(&model_id, symbols()),
            feature: "TSLA".to_string(),
            delta: 0.1,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownFeature(_)));

    let report = service
        .sensitivity(SensitivityRequest {
            predict: predict_request(&model_id, symbols()),
            feature: "SPY".to_string(),
            deltas: vec![],
        })
        .await
        .unwrap();
    assert_eq!(report.points.len(), 6);
    assert_eq!(report.steps, 58);
    assert!(report.points.iter().all(|p| (0.0..=1.0).contains(&p.flip_rate)));
}

#[tokio::test]
async fn test_discovery_and_feature_selection() {
    let service = service();
    let graph = service
        .discover(DiscoverRequest {
            symbols: symbols(),
            start_date: start(),
            end_date: end(),
            alpha: 0.05,
        })
        .await
        .unwrap();
    assert_eq!(graph.nodes, symbols());
    assert!(graph.edges.iter().all(|e| e.source != e.target));

    let blanket = service
        .select_features(FeatureSelectRequest {
            symbols: symbols(),
            start_date: start(),
            end_date: end(),
            alpha: 0.05,
            target: "AAPL".to_string(),
        })
        .await
        .unwrap();
    assert!(!blanket.spouses.contains(&"AAPL".to_string()));

    let err = service
        .select_features(FeatureSelectRequest {
            symbols: symbols(),
            start_date: start(),
            end_date: end(),
            alpha: 0.05,
            target: "QQQ".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_causal_paths_over_supplied_graph() {
    let service = service();
    let edge = |s: &str, t: &str| CausalEdge {
        source: s.to_string(),
        target: t.to_string(),
        weight: 0.5,
    };
    let resp = service
        .causal_paths(CausalPathRequest {
            nodes: vec!["A".into(), "B".into(), "C".into()],
            edges: vec![edge("A", "B"), edge("B", "C")],
            feature: "A".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(
        resp.paths,
        vec![
            vec!["A".to_string(), "B".to_string()],
            vec!["A".to_string(), "B".to_string(), "C".to_string()],
        ]
    );
}

#[tokio::test]
async fn test_window_without_data_is_insufficient() {
    let service = service();
    let err = service
        .train(TrainRequest {
            symbols: symbols(),
            start_date: common::day(200),
            end_date: common::day(210),
            total_timesteps: 10,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientData(_)));
}
