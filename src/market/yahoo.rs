//! Yahoo Finance chart API price source
//!
//! Daily adjusted closes per symbol, merged on the union of trading dates.

use super::{PriceSource, PriceTable};
use crate::error::{EngineError, EngineResult};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, warn};

pub const YAHOO_API_BASE: &str = "https://query1.finance.yahoo.com";

#[derive(Clone)]
pub struct YahooPriceSource {
    client: Client,
    base_url: String,
}

impl YahooPriceSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("tcarp-backend/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build price client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// `<base>/v8/finance/chart/<symbol>` with the symbol as one encoded segment.
    fn chart_url(&self, symbol: &str) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid price API base {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Price API base {} cannot take a path", self.base_url))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart"])
            .push(symbol);
        Ok(url)
    }

    async fn fetch_symbol(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, Option<f64>)>> {
        let url = self.chart_url(symbol)?;
        let period1 = start.and_hms_opt(0, 0, 0).map(|t| t.and_utc().timestamp());
        let period2 = end.and_hms_opt(0, 0, 0).map(|t| t.and_utc().timestamp());
        let (Some(period1), Some(period2)) = (period1, period2) else {
            anyhow::bail!("invalid date window {}..{}", start, end);
        };

        let resp = self
            .client
            .get(url)
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", "1d".to_string()),
                ("events", "history".to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("GET chart/{} failed", symbol))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("GET chart/{} {}: {}", symbol, status, text);
        }

        let body: ChartResponse = resp
            .json()
            .await
            .with_context(|| format!("Failed to decode chart/{}", symbol))?;
        body.into_closes(symbol, end)
    }
}

#[async_trait::async_trait]
impl PriceSource for YahooPriceSource {
    async fn fetch_closes(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<PriceTable> {
        let mut per_symbol: Vec<HashMap<NaiveDate, f64>> = Vec::with_capacity(symbols.len());
        let mut all_dates: BTreeMap<NaiveDate, ()> = BTreeMap::new();

        for symbol in symbols {
            let series = self
                .fetch_symbol(symbol, start, end)
                .await
                .map_err(|e| EngineError::MarketData(format!("{:#}", e)))?;
            if series.is_empty() {
                warn!(symbol = %symbol, "No price history returned");
            }
            let mut closes = HashMap::with_capacity(series.len());
            for (date, close) in series {
                all_dates.insert(date, ());
                if let Some(px) = close {
                    closes.insert(date, px);
                }
            }
            per_symbol.push(closes);
        }

        if per_symbol.iter().all(HashMap::is_empty) {
            return Err(EngineError::InsufficientData(
                "No data returned for given symbols/dates".to_string(),
            ));
        }

        let dates: Vec<NaiveDate> = all_dates.into_keys().collect();
        let closes = dates
            .iter()
            .map(|d| per_symbol.iter().map(|m| m.get(d).copied()).collect())
            .collect();

        debug!(symbols = symbols.len(), dates = dates.len(), "Fetched price table");

        Ok(PriceTable {
            symbols: symbols.to_vec(),
            dates,
            closes,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
    #[serde(default)]
    adjclose: Vec<AdjClose>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

impl ChartResponse {
    /// Adjusted closes when present, raw closes otherwise. Dates at or past `end` are dropped.
    fn into_closes(self, symbol: &str, end: NaiveDate) -> Result<Vec<(NaiveDate, Option<f64>)>> {
        if let Some(err) = self.chart.error {
            anyhow::bail!("{} for {}: {}", err.code, symbol, err.description);
        }
        let Some(result) = self.chart.result.and_then(|r| r.into_iter().next()) else {
            return Ok(Vec::new());
        };

        let closes = result
            .indicators
            .adjclose
            .into_iter()
            .next()
            .map(|a| a.adjclose)
            .or_else(|| result.indicators.quote.into_iter().next().map(|q| q.close))
            .unwrap_or_default();

        let mut out = Vec::with_capacity(result.timestamp.len());
        for (i, ts) in result.timestamp.iter().enumerate() {
            let Some(date) = DateTime::from_timestamp(*ts, 0).map(|t| t.date_naive()) else {
                continue;
            };
            if date >= end {
                continue;
            }
            out.push((date, closes.get(i).copied().flatten()));
        }
        Ok(out)
    }
}
