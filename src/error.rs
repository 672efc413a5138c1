//! Engine Error Taxonomy
//!
//! Every failure the decision/explainability core can surface carries a
//! distinguishing kind and a human-readable cause. The HTTP layer maps kinds to
//! status codes; nothing in the core swallows these except the rollout clamp.

use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed or semantically invalid request.
    Validation(String),
    /// Fewer than 2 usable aligned rows.
    InsufficientData(String),
    /// Missing policy blob or metadata for a model id.
    ModelNotFound(String),
    /// Trained vs. requested symbol lists differ (order-sensitive).
    SymbolMismatch {
        trained: Vec<String>,
        requested: Vec<String>,
    },
    /// Structure-learning procedure failed.
    Discovery(String),
    /// Attribution estimator returned fewer rows than decisions requested.
    AttributionShortfall { rows: usize, step: usize },
    /// Perturbation target is not a column of the return matrix.
    UnknownFeature(String),
    /// Price provider failure.
    MarketData(String),
    /// Persistence backend failure.
    Storage(StoreError),
    /// Worker task failed to complete.
    Internal(String),
}

impl EngineError {
    /// Stable snake_case tag used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InsufficientData(_) => "insufficient_data",
            Self::ModelNotFound(_) => "model_not_found",
            Self::SymbolMismatch { .. } => "symbol_mismatch",
            Self::Discovery(_) => "discovery_error",
            Self::AttributionShortfall { .. } => "attribution_shortfall",
            Self::UnknownFeature(_) => "unknown_feature",
            Self::MarketData(_) => "market_data_error",
            Self::Storage(_) => "storage_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "Invalid request: {}", msg),
            Self::InsufficientData(msg) => write!(f, "Insufficient data: {}", msg),
            Self::ModelNotFound(id) => write!(f, "Model {} not found", id),
            Self::SymbolMismatch { trained, requested } => write!(
                f,
                "Model trained on {:?}, not {:?}",
                trained, requested
            ),
            Self::Discovery(msg) => write!(f, "Causal discovery failed: {}", msg),
            Self::AttributionShortfall { rows, step } => write!(
                f,
                "Attribution array too short ({}) for decision index {}",
                rows, step
            ),
            Self::UnknownFeature(feature) => {
                write!(f, "Feature {} not in returns data", feature)
            }
            Self::MarketData(msg) => write!(f, "Error fetching data: {}", msg),
            Self::Storage(e) => write!(f, "Model store error: {}", e),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Storage(e)
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct() {
        let errors = [
            EngineError::Validation("x".into()),
            EngineError::InsufficientData("x".into()),
            EngineError::ModelNotFound("x".into()),
            EngineError::SymbolMismatch {
                trained: vec![],
                requested: vec![],
            },
            EngineError::Discovery("x".into()),
            EngineError::AttributionShortfall { rows: 0, step: 0 },
            EngineError::UnknownFeature("x".into()),
            EngineError::MarketData("x".into()),
            EngineError::Storage(StoreError::AlreadyExists("k".into())),
            EngineError::Internal("x".into()),
        ];
        let mut kinds: Vec<_> = errors.iter().map(|e| e.kind()).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn test_symbol_mismatch_message_names_both_lists() {
        let err = EngineError::SymbolMismatch {
            trained: vec!["AAPL".into(), "MSFT".into()],
            requested: vec!["MSFT".into(), "AAPL".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("\"AAPL\", \"MSFT\""));
        assert!(msg.contains("\"MSFT\", \"AAPL\""));
    }
}
