use crate::error::{Result, StabilityError};
use statrs::statistics::{Data, OrderStatistics};

/// Sign of a ranking difference, with an explicit zero for ties.
pub fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Median of `values`; NaN for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut data = Data::new(values.to_vec());
    data.median()
}

/// Assign 1-based ranks to `data`, averaging ranks over ties.
pub fn rank_average(data: &[f64]) -> Vec<f64> {
    let n = data.len();
    let mut indexed: Vec<(f64, usize)> = data.iter().copied().enumerate().map(|(i, v)| (v, i)).collect();
    indexed.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && indexed[j].0.total_cmp(&indexed[i].0).is_eq() {
            j += 1;
        }
        // Ranks in the tie group are (i+1)..=j, 1-based.
        let rank_val = (i + 1..=j).map(|r| r as f64).sum::<f64>() / (j - i) as f64;
        for k in i..j {
            ranks[indexed[k].1] = rank_val;
        }
        i = j;
    }
    ranks
}

/// Pearson correlation coefficient between `x` and `y`.
///
/// # Errors
/// * Returns `StabilityError::InvalidInput` if the slices differ in length
///   or hold fewer than two points.
pub fn pearson(x: &[f64], y: &[f64]) -> Result<f64> {
    if x.len() != y.len() {
        return Err(StabilityError::InvalidInput(format!(
            "correlation inputs differ in length: {} vs {}",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 2 {
        return Err(StabilityError::InvalidInput(
            "correlation requires at least two points".into(),
        ));
    }

    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    Ok(cov / (var_x.sqrt() * var_y.sqrt()))
}

/// Spearman rank correlation between `x` and `y`.
///
/// Ranks both inputs with average tie handling and returns the Pearson
/// correlation of the ranks.
pub fn spearman(x: &[f64], y: &[f64]) -> Result<f64> {
    if x.len() != y.len() {
        return Err(StabilityError::InvalidInput(format!(
            "correlation inputs differ in length: {} vs {}",
            x.len(),
            y.len()
        )));
    }
    pearson(&rank_average(x), &rank_average(y))
}
