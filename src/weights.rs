use tracing::debug;

use crate::config::ReweightConfig;
use crate::error::{ReweightError, Result};
use crate::model::{dot, round_to, BracketSet, WeightMatrix};
use crate::percentile::PercentileCurve;

/// 元の階級 `[lower, upper)` のうち、対象区間に含まれる幅の割合
///
/// 階級の幅は正であること（`upper > lower`）。`BracketSet` はこれを保証する。
pub fn overlap_fraction(bracket: (f64, f64), target: (f64, f64)) -> f64 {
    let (lower, upper) = bracket;
    debug_assert!(
        upper > lower,
        "bracket [{}, {}) must have positive width",
        lower,
        upper
    );
    let overlap = upper.min(target.1) - lower.max(target.0);
    overlap.max(0.0) / (upper - lower)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetBracket {
    pub name: String,
    pub lower: f64,
    /// 最上位の階級は上限なし
    pub upper: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightResult {
    pub weights: WeightMatrix,
    /// 新しい階級ごとの人口割合（%、小数点以下2桁）
    pub shares: Vec<f64>,
    /// 中央値（小数点以下1桁）
    pub median: f64,
    pub steps: Vec<f64>,
    pub bracket_names: Vec<String>,
}

impl WeightResult {
    pub fn target_brackets(&self) -> Vec<TargetBracket> {
        let last = self.bracket_names.len().saturating_sub(1);
        self.bracket_names
            .iter()
            .enumerate()
            .map(|(i, name)| TargetBracket {
                name: name.clone(),
                lower: self.steps[i],
                upper: (i != last).then(|| self.steps[i + 1]),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BinReweighter {
    config: ReweightConfig,
}

impl BinReweighter {
    pub fn new(config: ReweightConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ReweightConfig {
        &self.config
    }

    pub fn compute_weights(
        &self,
        brackets: &BracketSet,
        cumulative_percentile: &[f64],
        population: &[f64],
    ) -> Result<WeightResult> {
        if population.len() != brackets.len() {
            return Err(ReweightError::InvalidBracketSet(format!(
                "{} population counts for {} brackets",
                population.len(),
                brackets.len()
            )));
        }
        if population.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(ReweightError::InvalidBracketSet(
                "population counts must be finite and non-negative".to_string(),
            ));
        }

        let curve = PercentileCurve::new(brackets, cumulative_percentile.to_vec())?;
        let median = curve.value_at(self.config.median_percentile)?;
        if median <= 0.0 {
            return Err(ReweightError::InterpolationDomain(format!(
                "median income {} must be positive",
                median
            )));
        }

        let steps: Vec<f64> = self
            .config
            .step_multipliers
            .iter()
            .map(|m| m * median)
            .collect();
        debug!("Median income {:.1}, steps {:?}", median, steps);

        let mut weights = WeightMatrix::zeros(self.config.target_count(), brackets.len());
        for i in 0..weights.rows {
            let target = (steps[i], steps[i + 1]);
            for (j, bracket) in brackets.iter().enumerate() {
                weights.set(i, j, overlap_fraction(bracket, target));
            }
        }

        let total: f64 = population.iter().sum();
        let shares = (0..weights.rows)
            .map(|i| {
                if total > 0.0 {
                    round_to(dot(weights.row(i), population) / total * 100.0, 2)
                } else {
                    0.0
                }
            })
            .collect();

        Ok(WeightResult {
            weights,
            shares,
            median: round_to(median, 1),
            steps,
            bracket_names: self.config.bracket_names.clone(),
        })
    }

    pub fn compute_weights_from_bounds(
        &self,
        bins: &[f64],
        ubins: &[f64],
        cumulative_percentile: &[f64],
        population: &[f64],
    ) -> Result<WeightResult> {
        let brackets = BracketSet::new(bins.to_vec(), ubins.to_vec())?;
        self.compute_weights(&brackets, cumulative_percentile, population)
    }
}

/// 既定の設定（中央値の 0, 0.5, 0.8, 1.2, 2, 100 倍）で重み行列を計算する
pub fn compute_weights(
    bins: &[f64],
    ubins: &[f64],
    cumulative_percentile: &[f64],
    population: &[f64],
) -> Result<WeightResult> {
    BinReweighter::default().compute_weights_from_bounds(
        bins,
        ubins,
        cumulative_percentile,
        population,
    )
}
