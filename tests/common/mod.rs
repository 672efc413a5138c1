//! Shared fixtures: a synthetic price table served from memory and a service
//! wired with fast, seeded collaborators.

#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

use tcarp_backend::causal::PcAlgorithm;
use tcarp_backend::decision::{ReinforceTrainer, TrainerConfig};
use tcarp_backend::explain::{AttributionConfig, SamplingShapleyEstimator};
use tcarp_backend::market::{InMemoryPriceSource, PriceTable};
use tcarp_backend::store::{KeyValueStore, MemoryKvStore, ModelStore};
use tcarp_backend::DecisionService;

pub const PRICE_DAYS: usize = 60;

pub fn symbols() -> Vec<String> {
    vec!["AAPL".to_string(), "MSFT".to_string(), "SPY".to_string()]
}

pub fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
}

pub fn start() -> NaiveDate {
    day(0)
}

/// One past the last price date
pub fn end() -> NaiveDate {
    day(PRICE_DAYS as i64)
}

/// Random-walk closes; AAPL drifts upward so a trained policy has something to find.
pub fn price_table() -> PriceTable {
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let drift = [0.004, 0.0, -0.001];
    let mut prices = vec![100.0, 250.0, 400.0];
    let mut dates = Vec::with_capacity(PRICE_DAYS);
    let mut closes = Vec::with_capacity(PRICE_DAYS);

    for t in 0..PRICE_DAYS {
        dates.push(day(t as i64));
        closes.push(prices.iter().map(|p| Some(*p)).collect());
        for (p, mu) in prices.iter_mut().zip(drift) {
            *p *= 1.0 + mu + rng.gen_range(-0.02..0.02);
        }
    }

    PriceTable {
        symbols: symbols(),
        dates,
        closes,
    }
}

pub fn service_with_store(kv: Arc<dyn KeyValueStore>) -> DecisionService {
    DecisionService::new(
        Arc::new(InMemoryPriceSource::new(price_table())),
        ModelStore::new(kv),
        Arc::new(ReinforceTrainer::new(TrainerConfig {
            learning_rate: 0.05,
            gamma: 0.9,
            seed: 17,
        })),
        Arc::new(PcAlgorithm::new()),
        Arc::new(SamplingShapleyEstimator::new(AttributionConfig {
            permutations: 8,
            seed: 3,
        })),
    )
}

pub fn service() -> DecisionService {
    service_with_store(Arc::new(MemoryKvStore::new()))
}
