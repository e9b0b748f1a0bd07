//! Interpolation engine
//!
//! Turns sparse, irregularly timed anchors into dense per-sample series.
//! Outside the anchor range the boundary value is held constant.

use crate::error::AnalysisError;

/// Piecewise-linear interpolation with flat extrapolation
///
/// `anchors` must be non-decreasing. Duplicate anchors keep the value of the
/// last duplicate for queries to their right.
pub fn interp_flat(anchors: &[f64], values: &[f64], queries: &[f64]) -> Result<Vec<f64>, AnalysisError> {
    if anchors.len() != values.len() {
        return Err(AnalysisError::InvalidParameter(format!(
            "{} anchors but {} values",
            anchors.len(),
            values.len()
        )));
    }
    if anchors.is_empty() {
        return Err(AnalysisError::InsufficientData(
            "interpolation needs at least one anchor".to_string(),
        ));
    }
    if anchors.windows(2).any(|w| w[1] < w[0]) {
        return Err(AnalysisError::InvalidParameter(
            "interpolation anchors must be non-decreasing".to_string(),
        ));
    }

    let first = values[0];
    let last = values[values.len() - 1];
    let (lo, hi) = (anchors[0], anchors[anchors.len() - 1]);

    Ok(queries
        .iter()
        .map(|&q| {
            if q <= lo {
                return first;
            }
            if q >= hi {
                return last;
            }
            // First anchor strictly greater than q; lo < q < hi guarantees 1..len
            let right = anchors.partition_point(|&a| a <= q);
            let left = right - 1;
            let (x0, x1) = (anchors[left], anchors[right]);
            let (y0, y1) = (values[left], values[right]);
            y0 + (q - x0) * (y1 - y0) / (x1 - x0)
        })
        .collect())
}

/// Interpolate integer-sample anchors over the sample range `0..n_samples`
pub fn interp_samples(anchors: &[i64], values: &[f64], n_samples: usize) -> Result<Vec<f64>, AnalysisError> {
    let anchors: Vec<f64> = anchors.iter().map(|&a| a as f64).collect();
    let queries: Vec<f64> = (0..n_samples).map(|s| s as f64).collect();
    interp_flat(&anchors, values, &queries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_reproduces_anchor_values() {
        let anchors = [2.0, 5.0, 9.0, 14.0];
        let values = [800.0, 820.0, 790.0, 805.0];
        let out = interp_flat(&anchors, &values, &anchors).unwrap();
        assert_eq!(out, values.to_vec());
    }

    #[test]
    fn test_flat_extrapolation() {
        let anchors = [2.0, 4.0];
        let values = [1.0, 3.0];
        let out = interp_flat(&anchors, &values, &[-10.0, 0.0, 3.0, 4.0, 100.0]).unwrap();
        assert_eq!(out, vec![1.0, 1.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_linear_between_anchors() {
        let out = interp_samples(&[0, 10], &[0.0, 1.0], 11).unwrap();
        for (i, v) in out.iter().enumerate() {
            assert_abs_diff_eq!(*v, i as f64 / 10.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_single_anchor_is_constant() {
        let out = interp_samples(&[3], &[0.4], 6).unwrap();
        assert_eq!(out, vec![0.4; 6]);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(interp_flat(&[], &[], &[1.0]).is_err());
        assert!(interp_flat(&[1.0, 2.0], &[1.0], &[1.0]).is_err());
        assert!(interp_flat(&[2.0, 1.0], &[1.0, 2.0], &[1.0]).is_err());
    }
}
