//! Intensity thresholds for electrode material in CT volumes

/// Fraction of the sorted non-zero intensities below the electrode threshold
pub const ELECTRODE_PERCENTILE: f64 = 0.45;

/// Percentile threshold over the non-zero values of `data`
///
/// Exact zeros are discarded, the rest sorted ascending, and the value at
/// rank `floor(fraction * count)` returned. `None` when no value is non-zero.
///
/// # Arguments
/// * `data` - Input data (e.g. flattened 3D image)
/// * `fraction` - Rank fraction in `[0, 1)`
pub fn nonzero_percentile(data: &[f64], fraction: f64) -> Option<f64> {
    let mut values: Vec<f64> = data.iter().copied().filter(|&v| v != 0.0).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let rank = ((values.len() as f64) * fraction).floor() as usize;
    Some(values[rank.min(values.len() - 1)])
}

/// Threshold separating contact metal from tissue: 45th percentile of non-zero voxels
pub fn electrode_threshold(data: &[f64]) -> Option<f64> {
    nonzero_percentile(data, ELECTRODE_PERCENTILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_rank() {
        // non-zero sorted: [1, 2, 3, 4, 5], floor(0.45 * 5) = 2
        let data = vec![0.0, 5.0, 0.0, 1.0, 3.0, 2.0, 4.0, 0.0];
        assert_eq!(electrode_threshold(&data), Some(3.0));
    }

    #[test]
    fn test_percentile_ignores_zeros() {
        let data: Vec<f64> = (1..=20).map(|v| v as f64).collect();
        let mut padded = data.clone();
        padded.extend(std::iter::repeat(0.0).take(100));
        assert_eq!(electrode_threshold(&data), electrode_threshold(&padded));
        // floor(0.45 * 20) = 9 -> tenth smallest value
        assert_eq!(electrode_threshold(&data), Some(10.0));
    }

    #[test]
    fn test_percentile_scales_with_intensity() {
        let data: Vec<f64> = (0..50).map(|v| ((v * 37) % 101) as f64).collect();
        let scaled: Vec<f64> = data.iter().map(|v| v * 4.0).collect();
        let t = electrode_threshold(&data).unwrap();
        assert_eq!(electrode_threshold(&scaled), Some(t * 4.0));
    }

    #[test]
    fn test_percentile_keeps_negative_values() {
        let data = vec![-1000.0, -1000.0, 0.0, 40.0, 3000.0];
        // non-zero sorted: [-1000, -1000, 40, 3000], floor(1.8) = 1
        assert_eq!(electrode_threshold(&data), Some(-1000.0));
    }

    #[test]
    fn test_percentile_all_zero() {
        assert_eq!(electrode_threshold(&[0.0; 16]), None);
        assert_eq!(electrode_threshold(&[]), None);
    }

    #[test]
    fn test_percentile_single_value() {
        assert_eq!(nonzero_percentile(&[7.0], 0.45), Some(7.0));
        assert_eq!(nonzero_percentile(&[7.0, 8.0], 0.99), Some(8.0));
    }
}
