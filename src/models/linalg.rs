use crate::error::{EngineError, EngineResult};

/// Solves `a * x = b` for symmetric positive-definite `a` via Cholesky.
pub(crate) fn solve_spd(mut a: Vec<Vec<f64>>, b: &[f64]) -> EngineResult<Vec<f64>> {
    let size = b.len();
    if a.len() != size || a.iter().any(|row| row.len() != size) {
        return Err(EngineError::ModelFit {
            model: "linear system".to_string(),
            reason: format!("expected a {size}x{size} matrix"),
        });
    }

    // In-place lower-triangular factor.
    for i in 0..size {
        for j in 0..=i {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= a[i][k] * a[j][k];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return Err(EngineError::ModelFit {
                        model: "linear system".to_string(),
                        reason: format!("matrix is not positive definite at pivot {i}"),
                    });
                }
                a[i][i] = sum.sqrt();
            } else {
                a[i][j] = sum / a[j][j];
            }
        }
    }

    let mut y = vec![0.0; size];
    for i in 0..size {
        let mut sum = b[i];
        for k in 0..i {
            sum -= a[i][k] * y[k];
        }
        y[i] = sum / a[i][i];
    }

    let mut x = vec![0.0; size];
    for i in (0..size).rev() {
        let mut sum = y[i];
        for k in (i + 1)..size {
            sum -= a[k][i] * x[k];
        }
        x[i] = sum / a[i][i];
    }

    Ok(x)
}
