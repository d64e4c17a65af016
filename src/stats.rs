//! Descriptive statistics over sample windows.

/// Summary statistics on a slice of readings
pub trait SliceStatsExt {
    fn mean(&self) -> Option<f64>;
    /// Population standard deviation
    fn std_dev(&self) -> Option<f64>;
    /// Sorted midpoint, averaging the two middle values on even length
    fn median(&self) -> Option<f64>;
    /// `std_dev / mean`; `None` when the mean is zero
    fn coefficient_of_variation(&self) -> Option<f64>;
}

impl SliceStatsExt for [f64] {
    fn mean(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some(self.iter().sum::<f64>() / self.len() as f64)
    }

    fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let variance = self.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.len() as f64;
        Some(variance.sqrt())
    }

    fn median(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let mut sorted = self.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }

    fn coefficient_of_variation(&self) -> Option<f64> {
        let mean = self.mean()?;
        if mean == 0.0 {
            return None;
        }
        Some(self.std_dev()? / mean.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_slice() {
        let empty: &[f64] = &[];
        assert!(empty.mean().is_none());
        assert!(empty.median().is_none());
        assert!(empty.std_dev().is_none());
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!([3.0, 1.0, 2.0][..].median(), Some(2.0));
        assert_eq!([4.0, 1.0, 3.0, 2.0][..].median(), Some(2.5));
    }

    #[test]
    fn test_std_dev_and_cv() {
        let values = [50_000.0, 150_000.0, 50_000.0, 150_000.0];
        assert_eq!(values[..].mean(), Some(100_000.0));
        assert!((values[..].std_dev().unwrap() - 50_000.0).abs() < 1e-6);
        assert!((values[..].coefficient_of_variation().unwrap() - 0.5).abs() < 1e-9);
        assert!([0.0, 0.0][..].coefficient_of_variation().is_none());
    }
}
