//! Statistics engine: mean, median, and population standard deviation.
//!
//! Every reduction takes a non-empty slice. An empty slice is reported as
//! [`EmptyInputError`] instead of producing `NaN` from a division by zero.
//!
//! The standard deviation divides by `N`, not `N - 1`: the branches and
//! networks of one image are the whole population being described.

use serde::{Deserialize, Serialize};

/// Returned when a reduction is asked to summarize zero values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot summarize an empty sequence")]
pub struct EmptyInputError;

/// Arithmetic mean.
///
/// # Errors
///
/// Returns [`EmptyInputError`] if `xs` is empty.
pub fn mean(xs: &[f64]) -> Result<f64, EmptyInputError> {
    if xs.is_empty() {
        return Err(EmptyInputError);
    }
    #[allow(clippy::cast_precision_loss)]
    let n = xs.len() as f64;
    Ok(xs.iter().sum::<f64>() / n)
}

/// Median: the middle element of the sorted values, or the mean of the
/// two middle elements when the count is even.
///
/// # Errors
///
/// Returns [`EmptyInputError`] if `xs` is empty.
pub fn median(xs: &[f64]) -> Result<f64, EmptyInputError> {
    if xs.is_empty() {
        return Err(EmptyInputError);
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(f64::total_cmp);

    let index = (sorted.len() - 1) / 2;
    if sorted.len() % 2 == 1 {
        Ok(sorted[index])
    } else {
        Ok(f64::midpoint(sorted[index], sorted[index + 1]))
    }
}

/// Population standard deviation (variance divided by `N`).
///
/// # Errors
///
/// Returns [`EmptyInputError`] if `xs` is empty.
pub fn population_stdev(xs: &[f64]) -> Result<f64, EmptyInputError> {
    let avg = mean(xs)?;
    #[allow(clippy::cast_precision_loss)]
    let n = xs.len() as f64;
    let variance = xs
        .iter()
        .map(|x| {
            let d = x - avg;
            d * d
        })
        .sum::<f64>()
        / n;
    Ok(variance.sqrt())
}

/// The three reductions reported for every measured series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Arithmetic mean.
    pub mean: f64,
    /// Median.
    pub median: f64,
    /// Population standard deviation.
    pub stdevp: f64,
}

impl Summary {
    /// Summarize a series.
    ///
    /// # Errors
    ///
    /// Returns [`EmptyInputError`] if `xs` is empty.
    pub fn of(xs: &[f64]) -> Result<Self, EmptyInputError> {
        Ok(Self {
            mean: mean(xs)?,
            median: median(xs)?,
            stdevp: population_stdev(xs)?,
        })
    }
}
