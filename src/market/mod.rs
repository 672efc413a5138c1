//! Return Series Adapter
//!
//! Turns raw close prices into the aligned `ReturnMatrix` every downstream
//! component consumes:
//! 1. forward-fill missing closes per symbol
//! 2. drop rows that are still incomplete (leading gaps)
//! 3. simple period-over-period returns
//! 4. drop the first (undefined) return row
//!
//! Price retrieval itself sits behind [`PriceSource`] so the provider can be
//! swapped (HTTP in production, in-memory tables in tests).

pub mod yahoo;

use crate::error::{EngineError, EngineResult};
use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::debug;

pub use yahoo::YahooPriceSource;

/// Aligned close prices: one row per date, one optional close per symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    pub symbols: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub closes: Vec<Vec<Option<f64>>>,
}

/// Ordered `T x N` matrix of period returns. Column order is symbol order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnMatrix {
    symbols: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl ReturnMatrix {
    pub fn new(symbols: Vec<String>, rows: Vec<Vec<f64>>) -> EngineResult<Self> {
        if symbols.is_empty() {
            return Err(EngineError::Validation(
                "return matrix needs at least one symbol".to_string(),
            ));
        }
        let mut seen = HashSet::with_capacity(symbols.len());
        if let Some(dup) = symbols.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(EngineError::Validation(format!("duplicate symbol {}", dup)));
        }
        let width = symbols.len();
        for (t, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(EngineError::Validation(format!(
                    "row {} has {} values, expected {}",
                    t,
                    row.len(),
                    width
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(EngineError::Validation(format!(
                    "row {} contains a non-finite return",
                    t
                )));
            }
        }
        if rows.len() < 2 {
            return Err(EngineError::InsufficientData(format!(
                "{} return rows after preprocessing, need at least 2",
                rows.len()
            )));
        }
        Ok(Self { symbols, rows })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn row(&self, t: usize) -> &[f64] {
        &self.rows[t]
    }

    /// Number of periods (T).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of symbols (N).
    pub fn width(&self) -> usize {
        self.symbols.len()
    }

    pub fn column_index(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        self.rows.iter().map(|row| row[j]).collect()
    }

    /// Copy of this matrix with column `j` multiplied by `factor`.
    pub fn with_scaled_column(&self, j: usize, factor: f64) -> Self {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                row[j] *= factor;
                row
            })
            .collect();
        Self {
            symbols: self.symbols.clone(),
            rows,
        }
    }
}

/// Returns plus the date of each return row.
#[derive(Debug, Clone)]
pub struct ReturnSeries {
    pub returns: ReturnMatrix,
    pub dates: Vec<NaiveDate>,
}

/// Forward-fill, drop incomplete rows, compute simple returns, drop first row.
pub fn returns_from_prices(table: &PriceTable) -> EngineResult<ReturnSeries> {
    if table.dates.len() != table.closes.len() {
        return Err(EngineError::Validation(format!(
            "price table has {} dates but {} rows",
            table.dates.len(),
            table.closes.len()
        )));
    }
    let width = table.symbols.len();
    let mut last: Vec<Option<f64>> = vec![None; width];
    let mut aligned: Vec<(NaiveDate, Vec<f64>)> = Vec::with_capacity(table.dates.len());

    for (date, row) in table.dates.iter().zip(&table.closes) {
        for (j, slot) in last.iter_mut().enumerate() {
            if let Some(px) = row.get(j).copied().flatten().filter(|p| p.is_finite()) {
                *slot = Some(px);
            }
        }
        if last.iter().all(Option::is_some) {
            aligned.push((*date, last.iter().map(|p| p.unwrap_or_default()).collect()));
        }
    }

    if aligned.len() < 2 {
        return Err(EngineError::InsufficientData(format!(
            "{} usable price rows after preprocessing",
            aligned.len()
        )));
    }

    let mut dates = Vec::with_capacity(aligned.len() - 1);
    let mut rows = Vec::with_capacity(aligned.len() - 1);
    for pair in aligned.windows(2) {
        let (_, prev) = &pair[0];
        let (date, cur) = &pair[1];
        let row: Vec<f64> = prev
            .iter()
            .zip(cur)
            .map(|(p, c)| if *p == 0.0 { 0.0 } else { c / p - 1.0 })
            .collect();
        dates.push(*date);
        rows.push(row);
    }

    debug!(
        symbols = width,
        price_rows = aligned.len(),
        return_rows = rows.len(),
        "Aligned return series"
    );

    Ok(ReturnSeries {
        returns: ReturnMatrix::new(table.symbols.clone(), rows)?,
        dates,
    })
}

/// Raw price provider.
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    /// Daily closes for `symbols` in `[start, end)`, aligned on the union of dates.
    async fn fetch_closes(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<PriceTable>;
}

/// Fetch prices and run the full preprocessing chain.
pub async fn fetch_returns(
    source: &dyn PriceSource,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> EngineResult<ReturnSeries> {
    if start >= end {
        return Err(EngineError::Validation(format!(
            "start_date {} must be before end_date {}",
            start, end
        )));
    }
    let table = source.fetch_closes(symbols, start, end).await?;
    returns_from_prices(&table)
}

/// Fixed price table served from memory, filtered by the requested window.
#[derive(Debug, Clone)]
pub struct InMemoryPriceSource {
    table: PriceTable,
}

impl InMemoryPriceSource {
    pub fn new(table: PriceTable) -> Self {
        Self { table }
    }
}

#[async_trait::async_trait]
impl PriceSource for InMemoryPriceSource {
    async fn fetch_closes(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<PriceTable> {
        let mut cols = Vec::with_capacity(symbols.len());
        for sym in symbols {
            let j = self
                .table
                .symbols
                .iter()
                .position(|s| s == sym)
                .ok_or_else(|| EngineError::MarketData(format!("no data for symbol {}", sym)))?;
            cols.push(j);
        }

        let mut dates = Vec::new();
        let mut closes = Vec::new();
        for (date, row) in self.table.dates.iter().zip(&self.table.closes) {
            if *date < start || *date >= end {
                continue;
            }
            dates.push(*date);
            closes.push(cols.iter().map(|&j| row.get(j).copied().flatten()).collect());
        }

        Ok(PriceTable {
            symbols: symbols.to_vec(),
            dates,
            closes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn syms(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_returns_forward_fill_and_drop_leading() {
        let table = PriceTable {
            symbols: syms(&["A", "B"]),
            dates: vec![d(1), d(2), d(3), d(4), d(5)],
            closes: vec![
                vec![Some(100.0), None],
                vec![Some(110.0), Some(50.0)],
                vec![None, Some(55.0)],
                vec![Some(121.0), Some(55.0)],
                vec![Some(121.0), Some(44.0)],
            ],
        };

        let series = returns_from_prices(&table).unwrap();
        // Row 1 dropped (B missing), first aligned row is d(2), returns start at d(3)
        assert_eq!(series.dates, vec![d(3), d(4), d(5)]);
        let r = series.returns.rows();
        assert!((r[0][0] - 0.0).abs() < 1e-12); // A forward-filled at 110
        assert!((r[0][1] - 0.1).abs() < 1e-12);
        assert!((r[1][0] - 0.1).abs() < 1e-12);
        assert!((r[2][1] + 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_insufficient_price_rows() {
        let table = PriceTable {
            symbols: syms(&["A"]),
            dates: vec![d(1), d(2)],
            closes: vec![vec![None], vec![Some(1.0)]],
        };
        let err = returns_from_prices(&table).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData(_)));
    }

    #[test]
    fn test_single_return_row_is_insufficient() {
        let table = PriceTable {
            symbols: syms(&["A"]),
            dates: vec![d(1), d(2)],
            closes: vec![vec![Some(1.0)], vec![Some(2.0)]],
        };
        let err = returns_from_prices(&table).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData(_)));
    }

    #[test]
    fn test_matrix_rejects_ragged_and_duplicates() {
        let err = ReturnMatrix::new(syms(&["A", "B"]), vec![vec![0.1, 0.2], vec![0.1]]).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = ReturnMatrix::new(syms(&["A", "A"]), vec![vec![0.1, 0.2]; 3]).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = ReturnMatrix::new(syms(&["A"]), vec![vec![f64::NAN], vec![0.1]]).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_scaled_column_leaves_others_untouched() {
        let m = ReturnMatrix::new(syms(&["A", "B"]), vec![vec![0.1, 0.2], vec![-0.1, 0.4]]).unwrap();
        let scaled = m.with_scaled_column(1, 1.5);
        assert_eq!(scaled.column(0), m.column(0));
        assert!((scaled.row(1)[1] - 0.6).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_in_memory_source_filters_window() {
        let source = InMemoryPriceSource::new(PriceTable {
            symbols: syms(&["A", "B"]),
            dates: vec![d(1), d(2), d(3), d(4)],
            closes: vec![
                vec![Some(1.0), Some(2.0)],
                vec![Some(1.1), Some(2.2)],
                vec![Some(1.2), Some(2.4)],
                vec![Some(1.3), Some(2.6)],
            ],
        });

        let table = source
            .fetch_closes(&syms(&["B", "A"]), d(2), d(4))
            .await
            .unwrap();
        assert_eq!(table.dates, vec![d(2), d(3)]);
        assert_eq!(table.closes[0], vec![Some(2.2), Some(1.1)]);

        let err = fetch_returns(&source, &syms(&["A"]), d(4), d(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
