/// Solves the ridge system `(XᵀX + diag(penalties)) β = Xᵀy` with a Cholesky factorisation.
///
/// Returns `None` when the normal matrix is not positive definite.
pub fn ridge_solve(rows: &[Vec<f64>], targets: &[f64], penalties: &[f64]) -> Option<Vec<f64>> {
    let p = penalties.len();
    if p == 0 {
        return Some(Vec::new());
    }

    let mut normal = vec![0.0; p * p];
    let mut rhs = vec![0.0; p];
    for (row, &y) in rows.iter().zip(targets.iter()) {
        debug_assert_eq!(row.len(), p);
        for i in 0..p {
            let xi = row[i];
            if xi == 0.0 {
                continue;
            }
            rhs[i] += xi * y;
            for j in 0..=i {
                normal[i * p + j] += xi * row[j];
            }
        }
    }
    for (i, penalty) in penalties.iter().enumerate() {
        normal[i * p + i] += penalty;
    }

    let lower = cholesky(&normal, p)?;

    // L z = rhs, then Lᵀ β = z
    let mut z = vec![0.0; p];
    for i in 0..p {
        let mut sum = rhs[i];
        for k in 0..i {
            sum -= lower[i * p + k] * z[k];
        }
        z[i] = sum / lower[i * p + i];
    }
    let mut beta = vec![0.0; p];
    for i in (0..p).rev() {
        let mut sum = z[i];
        for k in (i + 1)..p {
            sum -= lower[k * p + i] * beta[k];
        }
        beta[i] = sum / lower[i * p + i];
    }

    if beta.iter().all(|value| value.is_finite()) {
        Some(beta)
    } else {
        None
    }
}

/// Lower-triangular factor of a symmetric matrix stored row-major (only the lower half is read).
fn cholesky(matrix: &[f64], p: usize) -> Option<Vec<f64>> {
    let mut lower = vec![0.0; p * p];
    for i in 0..p {
        for j in 0..=i {
            let mut sum = matrix[i * p + j];
            for k in 0..j {
                sum -= lower[i * p + k] * lower[j * p + k];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                lower[i * p + i] = sum.sqrt();
            } else {
                lower[i * p + j] = sum / lower[j * p + j];
            }
        }
    }
    Some(lower)
}

pub fn dot(left: &[f64], right: &[f64]) -> f64 {
    left.iter().zip(right.iter()).map(|(a, b)| a * b).sum()
}
