use crate::causal::CausalEdge;
use crate::decision::{TrainerConfig, TrainingSummary};
use crate::error::{EngineError, EngineResult};
use crate::explain::{AttributionConfig, Contributions};
use crate::market::yahoo::YAHOO_API_BASE;
use chrono::NaiveDate;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

// ===== Configuration =====

/// Persistence backend for trained models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Fs,
    Memory,
}

impl StoreBackend {
    pub fn as_str(&self) -> &str {
        match self {
            StoreBackend::Sqlite => "sqlite",
            StoreBackend::Fs => "fs",
            StoreBackend::Memory => "memory",
        }
    }

    pub fn default_path(&self) -> PathBuf {
        match self {
            StoreBackend::Sqlite => PathBuf::from("./tcarp_models.db"),
            StoreBackend::Fs => PathBuf::from("./models"),
            StoreBackend::Memory => PathBuf::new(),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "fs" | "file" | "filesystem" => Ok(StoreBackend::Fs),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown model store backend: {}", other)),
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store: StoreBackend,
    pub store_path: PathBuf,
    pub price_api_base: String,
    pub trainer: TrainerConfig,
    pub attribution: AttributionConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .unwrap_or(8000);

        let store = match std::env::var("MODEL_STORE") {
            Ok(v) => v.parse().map_err(anyhow::Error::msg)?,
            Err(_) => StoreBackend::Sqlite,
        };

        let store_path = std::env::var("MODEL_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| store.default_path());

        let price_api_base =
            std::env::var("PRICE_API_BASE").unwrap_or_else(|_| YAHOO_API_BASE.to_string());

        Ok(Self {
            port,
            store,
            store_path,
            price_api_base,
            trainer: TrainerConfig::from_env(),
            attribution: AttributionConfig::from_env(),
        })
    }
}

// ===== Requests =====

fn default_alpha() -> f64 {
    0.05
}

fn default_total_timesteps() -> u64 {
    10_000
}

fn validate_symbols(symbols: &[String]) -> EngineResult<()> {
    if symbols.is_empty() {
        return Err(EngineError::Validation("symbols must not be empty".to_string()));
    }
    let mut seen = HashSet::with_capacity(symbols.len());
    for symbol in symbols {
        if symbol.trim().is_empty() {
            return Err(EngineError::Validation("symbols must not be blank".to_string()));
        }
        if !seen.insert(symbol.as_str()) {
            return Err(EngineError::Validation(format!("duplicate symbol {}", symbol)));
        }
    }
    Ok(())
}

fn validate_window(start: NaiveDate, end: NaiveDate) -> EngineResult<()> {
    if start >= end {
        return Err(EngineError::Validation(format!(
            "start_date {} must be before end_date {}",
            start, end
        )));
    }
    Ok(())
}

fn validate_alpha(alpha: f64) -> EngineResult<()> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(EngineError::Validation(format!(
            "alpha must lie in (0, 1), got {}",
            alpha
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoverRequest {
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

impl DiscoverRequest {
    pub fn validate(&self) -> EngineResult<()> {
        validate_symbols(&self.symbols)?;
        validate_window(self.start_date, self.end_date)?;
        validate_alpha(self.alpha)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeatureSelectRequest {
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    pub target: String,
}

impl FeatureSelectRequest {
    pub fn validate(&self) -> EngineResult<()> {
        validate_symbols(&self.symbols)?;
        validate_window(self.start_date, self.end_date)?;
        validate_alpha(self.alpha)?;
        if !self.symbols.contains(&self.target) {
            return Err(EngineError::Validation(format!(
                "Target {} must be in symbols list",
                self.target
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrainRequest {
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_total_timesteps")]
    pub total_timesteps: u64,
}

impl TrainRequest {
    pub fn validate(&self) -> EngineResult<()> {
        validate_symbols(&self.symbols)?;
        validate_window(self.start_date, self.end_date)?;
        if self.total_timesteps == 0 {
            return Err(EngineError::Validation(
                "total_timesteps must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PredictRequest {
    pub model_id: String,
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl PredictRequest {
    pub fn validate(&self) -> EngineResult<()> {
        validate_symbols(&self.symbols)?;
        validate_window(self.start_date, self.end_date)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CausalPathRequest {
    pub nodes: Vec<String>,
    pub edges: Vec<CausalEdge>,
    pub feature: String,
}

impl CausalPathRequest {
    pub fn validate(&self) -> EngineResult<()> {
        if !self.nodes.contains(&self.feature) {
            return Err(EngineError::Validation(format!(
                "Feature {} not in graph nodes",
                self.feature
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CounterfactualRequest {
    #[serde(flatten)]
    pub predict: PredictRequest,
    pub feature: String,
    pub delta: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SensitivityRequest {
    #[serde(flatten)]
    pub predict: PredictRequest,
    pub feature: String,
    /// Empty means the default delta grid
    #[serde(default)]
    pub deltas: Vec<f64>,
}

// ===== Responses =====

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoverResponse {
    pub nodes: Vec<String>,
    pub edges: Vec<CausalEdge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainResponse {
    pub model_id: String,
    pub summary: TrainingSummary,
}

/// Per-symbol return columns, serialized as an object in symbol order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SymbolSeries(pub Vec<(String, Vec<f64>)>);

impl SymbolSeries {
    pub fn get(&self, symbol: &str) -> Option<&[f64]> {
        self.0
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, v)| v.as_slice())
    }
}

impl Serialize for SymbolSeries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictResponse {
    /// One date per return row (T)
    pub dates: Vec<String>,
    pub returns: SymbolSeries,
    /// One action per decision (T - 1)
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerDecisionItem {
    pub date: NaiveDate,
    pub action: String,
    pub contributions: Contributions,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerDecisionResponse {
    pub explains: Vec<PerDecisionItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalExplainResponse {
    pub importance: Contributions,
}

#[derive(Debug, Clone, Serialize)]
pub struct CausalPathResponse {
    pub paths: Vec<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_request_defaults() {
        let req: TrainRequest = serde_json::from_str(
            r#"{"symbols":["AAPL"],"start_date":"2023-01-01","end_date":"2023-06-01"}"#,
        )
        .unwrap();
        assert_eq!(req.total_timesteps, 10_000);
        assert_eq!(req.start_date, d("2023-01-01"));

        let req: DiscoverRequest = serde_json::from_str(
            r#"{"symbols":["A","B"],"start_date":"2023-01-01","end_date":"2023-06-01"}"#,
        )
        .unwrap();
        assert_eq!(req.alpha, 0.05);
    }

    #[test]
    fn test_counterfactual_request_is_flat() {
        let req: CounterfactualRequest = serde_json::from_str(
            r#"{"model_id":"x","symbols":["A"],"start_date":"2023-01-01",
                "end_date":"2023-02-01","feature":"A","delta":0.1}"#,
        )
        .unwrap();
        assert_eq!(req.predict.model_id, "x");
        assert_eq!(req.delta, 0.1);
    }

    #[test]
    fn test_validation_rules() {
        let mut req = TrainRequest {
            symbols: vec!["A".into(), "A".into()],
            start_date: d("2023-01-01"),
            end_date: d("2023-02-01"),
            total_timesteps: 10,
        };
        assert!(req.validate().is_err());
        req.symbols = vec!["A".into()];
        assert!(req.validate().is_ok());
        req.end_date = d("2022-12-01");
        assert!(req.validate().is_err());

        let fs = FeatureSelectRequest {
            symbols: vec!["A".into(), "B".into()],
            start_date: d("2023-01-01"),
            end_date: d("2023-02-01"),
            alpha: 0.05,
            target: "C".into(),
        };
        assert!(matches!(fs.validate(), Err(EngineError::Validation(_))));

        let cp = CausalPathRequest {
            nodes: vec!["A".into()],
            edges: vec![],
            feature: "B".into(),
        };
        assert!(cp.validate().is_err());
    }

    #[test]
    fn test_store_backend_parse() {
        assert_eq!("SQLite".parse::<StoreBackend>().unwrap(), StoreBackend::Sqlite);
        assert_eq!("fs".parse::<StoreBackend>().unwrap(), StoreBackend::Fs);
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_symbol_series_keeps_order() {
        let s = SymbolSeries(vec![("MSFT".into(), vec![0.1]), ("AAPL".into(), vec![0.2])]);
        assert_eq!(
            serde_json::to_string(&s).unwrap(),
            r#"{"MSFT":[0.1],"AAPL":[0.2]}"#
        );
    }
}
