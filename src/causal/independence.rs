//! Fisher-z conditional independence test on partial correlations.

use crate::error::{EngineError, EngineResult};
use crate::market::ReturnMatrix;
use nalgebra::DMatrix;
use statrs::distribution::{ContinuousCDF, Normal};

/// Minimum sample size for an unconditional Fisher-z test.
pub const FISHER_Z_MIN_ROWS: usize = 4;

const MAX_ABS_CORRELATION: f64 = 1.0 - 1e-12;

/// Pearson correlation matrix of the return columns.
pub fn correlation_matrix(returns: &ReturnMatrix) -> EngineResult<DMatrix<f64>> {
    let n = returns.width();
    let t = returns.len() as f64;
    let columns: Vec<Vec<f64>> = (0..n).map(|j| returns.column(j)).collect();

    let mut centered = Vec::with_capacity(n);
    let mut norms = Vec::with_capacity(n);
    for (j, col) in columns.iter().enumerate() {
        let mean = col.iter().sum::<f64>() / t;
        let c: Vec<f64> = col.iter().map(|v| v - mean).collect();
        let norm = c.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm <= 1e-12 {
            return Err(EngineError::Discovery(format!(
                "{} has zero variance",
                returns.symbols()[j]
            )));
        }
        centered.push(c);
        norms.push(norm);
    }

    let mut corr = DMatrix::identity(n, n);
    for i in 0..n {
        for j in (i + 1)..n {
            let dot: f64 = centered[i].iter().zip(&centered[j]).map(|(a, b)| a * b).sum();
            let r = (dot / (norms[i] * norms[j])).clamp(-1.0, 1.0);
            corr[(i, j)] = r;
            corr[(j, i)] = r;
        }
    }
    Ok(corr)
}

/// Partial correlation of `i` and `j` given `cond`, from the inverse of the
/// correlation submatrix over `[i, j, cond..]`.
pub fn partial_correlation(
    corr: &DMatrix<f64>,
    i: usize,
    j: usize,
    cond: &[usize],
) -> EngineResult<f64> {
    if cond.is_empty() {
        return Ok(corr[(i, j)]);
    }

    let vars: Vec<usize> = [i, j].iter().chain(cond).copied().collect();
    let k = vars.len();
    let sub = DMatrix::from_fn(k, k, |a, b| corr[(vars[a], vars[b])]);
    let precision = sub.try_inverse().ok_or_else(|| {
        EngineError::Discovery(format!(
            "singular correlation submatrix testing {} and {} given {:?}",
            i, j, cond
        ))
    })?;

    let denom = (precision[(0, 0)] * precision[(1, 1)]).sqrt();
    let r = -precision[(0, 1)] / denom;
    if !r.is_finite() {
        return Err(EngineError::Discovery(format!(
            "degenerate partial correlation for {} and {} given {:?}",
            i, j, cond
        )));
    }
    Ok(r)
}

pub struct FisherZ {
    corr: DMatrix<f64>,
    sample_size: usize,
    normal: Normal,
}

impl FisherZ {
    pub fn new(returns: &ReturnMatrix) -> EngineResult<Self> {
        if returns.len() < FISHER_Z_MIN_ROWS {
            return Err(EngineError::Discovery(format!(
                "{} rows, Fisher-z test needs at least {}",
                returns.len(),
                FISHER_Z_MIN_ROWS
            )));
        }
        let normal =
            Normal::new(0.0, 1.0).map_err(|e| EngineError::Discovery(e.to_string()))?;
        Ok(Self {
            corr: correlation_matrix(returns)?,
            sample_size: returns.len(),
            normal,
        })
    }

    pub fn correlation(&self) -> &DMatrix<f64> {
        &self.corr
    }

    /// Largest conditioning set this sample size supports.
    pub fn max_conditioning(&self) -> usize {
        self.sample_size - FISHER_Z_MIN_ROWS
    }

    /// Two-sided p-value for `H0: i ⊥ j | cond`.
    pub fn p_value(&self, i: usize, j: usize, cond: &[usize]) -> EngineResult<f64> {
        if cond.len() > self.max_conditioning() {
            return Err(EngineError::Discovery(format!(
                "conditioning set of {} too large for {} rows",
                cond.len(),
                self.sample_size
            )));
        }
        let r = partial_correlation(&self.corr, i, j, cond)?
            .clamp(-MAX_ABS_CORRELATION, MAX_ABS_CORRELATION);
        let z = 0.5 * ((1.0 + r) / (1.0 - r)).ln();
        let dof = (self.sample_size - cond.len() - 3) as f64;
        let stat = dof.sqrt() * z.abs();
        Ok((2.0 * (1.0 - self.normal.cdf(stat))).clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: Vec<Vec<f64>>) -> ReturnMatrix {
        let n = rows[0].len();
        let symbols = (0..n).map(|i| format!("s{}", i)).collect();
        ReturnMatrix::new(symbols, rows).unwrap()
    }

    #[test]
    fn test_correlation_of_linear_columns() {
        let m = matrix(vec![
            vec![1.0, 2.0, 3.0],
            vec![2.0, 4.0, 1.0],
            vec![3.0, 6.0, 2.0],
            vec![4.0, 8.0, 0.5],
        ]);
        let corr = correlation_matrix(&m).unwrap();
        assert!((corr[(0, 1)] - 1.0).abs() < 1e-12);
        assert_eq!(corr[(0, 0)], 1.0);
        assert_eq!(corr[(1, 2)], corr[(2, 1)]);
    }

    #[test]
    fn test_zero_variance_is_discovery_error() {
        let m = matrix(vec![vec![1.0, 0.1], vec![2.0, 0.1], vec![3.0, 0.1], vec![1.5, 0.1]]);
        assert!(matches!(
            correlation_matrix(&m),
            Err(EngineError::Discovery(_))
        ));
    }

    #[test]
    fn test_partial_correlation_removes_common_driver() {
        // x = z + a, y = z + b with a, b, z mutually orthogonal and centered
        let z = [1.0, -1.0, 1.0, -1.0];
        let a = [1.0, 1.0, -1.0, -1.0];
        let b = [1.0, -1.0, -1.0, 1.0];
        let rows: Vec<Vec<f64>> = (0..4)
            .map(|t| vec![z[t] + a[t], z[t] + b[t], z[t]])
            .collect();
        let corr = correlation_matrix(&matrix(rows)).unwrap();
        assert!((corr[(0, 1)] - 0.5).abs() < 1e-12);
        assert!(partial_correlation(&corr, 0, 1, &[2]).unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_p_value_bounds() {
        let m = matrix(vec![
            vec![0.1, 0.3],
            vec![0.2, -0.1],
            vec![-0.1, 0.2],
            vec![0.05, 0.0],
            vec![0.3, -0.2],
        ]);
        let test = FisherZ::new(&m).unwrap();
        let p = test.p_value(0, 1, &[]).unwrap();
        assert!((0.0..=1.0).contains(&p));
        assert!(test.p_value(0, 1, &[0, 1]).is_err());
    }

    #[test]
    fn test_too_few_rows() {
        let m = matrix(vec![vec![0.1, 0.2], vec![0.2, 0.1], vec![0.0, 0.3]]);
        assert!(matches!(FisherZ::new(&m), Err(EngineError::Discovery(_))));
    }
}
