use crate::error::{ReweightError, Result};
use crate::model::BracketSet;

/// 累積人口割合（%）と各階級の上限値の対応
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileCurve {
    percentiles: Vec<f64>,
    upper: Vec<f64>,
}

impl PercentileCurve {
    pub fn new(brackets: &BracketSet, percentiles: Vec<f64>) -> Result<Self> {
        if percentiles.len() != brackets.len() {
            return Err(ReweightError::InvalidBracketSet(format!(
                "{} percentiles for {} brackets",
                percentiles.len(),
                brackets.len()
            )));
        }
        if percentiles.iter().any(|p| !p.is_finite()) {
            return Err(ReweightError::InterpolationDomain(
                "percentiles must be finite".to_string(),
            ));
        }
        if let Some(i) = percentiles.windows(2).position(|w| w[1] < w[0]) {
            return Err(ReweightError::InterpolationDomain(format!(
                "percentiles decrease at index {}: {} -> {}",
                i + 1,
                percentiles[i],
                percentiles[i + 1]
            )));
        }

        Ok(Self {
            percentiles,
            upper: brackets.upper().to_vec(),
        })
    }

    /// 階級ごとの人口から累積割合を計算する。
    ///
    /// `reported_total` が無い（または 0 の）場合は階級の合計を母数とする。
    pub fn from_counts(
        brackets: &BracketSet,
        counts: &[f64],
        reported_total: Option<f64>,
    ) -> Result<Self> {
        if counts.len() != brackets.len() {
            return Err(ReweightError::InvalidBracketSet(format!(
                "{} population counts for {} brackets",
                counts.len(),
                brackets.len()
            )));
        }

        let sum: f64 = counts.iter().sum();
        let total = match reported_total {
            Some(t) if t > 0.0 => t,
            _ => sum,
        };
        if total <= 0.0 {
            return Err(ReweightError::InterpolationDomain(
                "total population is zero".to_string(),
            ));
        }
        if total < sum {
            tracing::warn!(
                "Reported total {} is smaller than bracket sum {}",
                total,
                sum
            );
        }

        let percentiles = counts
            .iter()
            .scan(0.0, |acc, &c| {
                *acc += c;
                Some(*acc / total * 100.0)
            })
            .collect();

        Self::new(brackets, percentiles)
    }

    pub fn percentiles(&self) -> &[f64] {
        &self.percentiles
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// 指定した累積割合に対応する所得を線形補間で求める
    pub fn value_at(&self, percentile: f64) -> Result<f64> {
        let first = self.percentiles[0];
        let last = self.percentiles[self.percentiles.len() - 1];
        if !percentile.is_finite() || percentile < first || percentile > last {
            return Err(ReweightError::InterpolationDomain(format!(
                "percentile {} outside [{}, {}]",
                percentile, first, last
            )));
        }

        // 同値が続く場合は最初に到達した点を使う
        let idx = self.percentiles.partition_point(|&p| p < percentile);
        if self.percentiles[idx] == percentile || idx == 0 {
            return Ok(self.upper[idx]);
        }

        let (p0, p1) = (self.percentiles[idx - 1], self.percentiles[idx]);
        let (v0, v1) = (self.upper[idx - 1], self.upper[idx]);
        Ok(v0 + (percentile - p0) / (p1 - p0) * (v1 - v0))
    }

    pub fn median(&self) -> Result<f64> {
        self.value_at(50.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-9, "{:?} != {:?}", actual, expected);
        }
    }

    fn brackets() -> BracketSet {
        BracketSet::new(vec![0.0, 100.0, 200.0], vec![100.0, 200.0, 400.0]).unwrap()
    }

    #[test]
    fn test_median_interpolation() {
        let curve = PercentileCurve::new(&brackets(), vec![30.0, 80.0, 100.0]).unwrap();
        let median = curve.median().unwrap();

        assert!((median - 140.0).abs() < 1e-9, "median was {}", median);
    }

    #[test]
    fn test_exact_hit_returns_upper_bound() {
        let curve = PercentileCurve::new(&brackets(), vec![20.0, 50.0, 100.0]).unwrap();
        assert_eq!(curve.median().unwrap(), 200.0);
    }

    #[test]
    fn test_median_outside_domain() {
        let curve = PercentileCurve::new(&brackets(), vec![60.0, 80.0, 100.0]).unwrap();
        assert!(matches!(
            curve.median(),
            Err(ReweightError::InterpolationDomain(_))
        ));

        let curve = PercentileCurve::new(&brackets(), vec![10.0, 20.0, 40.0]).unwrap();
        assert!(matches!(
            curve.median(),
            Err(ReweightError::InterpolationDomain(_))
        ));
    }

    #[test]
    fn test_rejects_decreasing_percentiles() {
        let result = PercentileCurve::new(&brackets(), vec![30.0, 20.0, 100.0]);
        assert!(matches!(result, Err(ReweightError::InterpolationDomain(_))));
    }

    #[test]
    fn test_ties_use_first_point_reaching_percentile() {
        // 上位の階級に人口が無い場合、累積割合が 100 で並ぶ
        let curve = PercentileCurve::new(&brackets(), vec![40.0, 100.0, 100.0]).unwrap();
        let median = curve.median().unwrap();

        assert!((median - (100.0 + 10.0 / 60.0 * 100.0)).abs() < 1e-9);
        assert_eq!(curve.value_at(100.0).unwrap(), 200.0);
    }

    #[test]
    fn test_from_counts_uses_reported_total() {
        let curve =
            PercentileCurve::from_counts(&brackets(), &[30.0, 50.0, 20.0], Some(200.0)).unwrap();
        assert_close(curve.percentiles(), &[15.0, 40.0, 50.0]);

        let curve = PercentileCurve::from_counts(&brackets(), &[30.0, 50.0, 20.0], None).unwrap();
        assert_close(curve.percentiles(), &[30.0, 80.0, 100.0]);
    }

    #[test]
    fn test_from_counts_rejects_empty_population() {
        let result = PercentileCurve::from_counts(&brackets(), &[0.0, 0.0, 0.0], None);
        assert!(matches!(result, Err(ReweightError::InterpolationDomain(_))));
    }
}
