use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::error::ReweightError;

pub const DEFAULT_STEP_MULTIPLIERS: [f64; 6] = [0.0, 0.5, 0.8, 1.2, 2.0, 100.0];
pub const DEFAULT_BRACKET_NAMES: [&str; 5] = ["VERY_LOW", "LOW", "MID", "HIGH", "VERY_HIGH"];

/// 中央値に対する倍率で新しい所得階級を定義する設定
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReweightConfig {
    pub step_multipliers: Vec<f64>,
    pub bracket_names: Vec<String>,
    pub median_percentile: f64,
    /// 地域ごとの割合を丸める小数点以下の桁数
    pub round_decimals: Option<u32>,
}

impl Default for ReweightConfig {
    fn default() -> Self {
        Self {
            step_multipliers: DEFAULT_STEP_MULTIPLIERS.to_vec(),
            bracket_names: DEFAULT_BRACKET_NAMES.iter().map(|s| s.to_string()).collect(),
            median_percentile: 50.0,
            round_decimals: Some(4),
        }
    }
}

impl ReweightConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_yaml_str(&yaml).with_context(|| format!("Invalid config file: {:?}", path))
    }

    pub fn target_count(&self) -> usize {
        self.step_multipliers.len().saturating_sub(1)
    }

    pub fn validate(&self) -> std::result::Result<(), ReweightError> {
        if self.step_multipliers.len() < 2 {
            return Err(ReweightError::InvalidConfig(format!(
                "at least 2 step multipliers required, got {}",
                self.step_multipliers.len()
            )));
        }
        if self
            .step_multipliers
            .iter()
            .any(|m| !m.is_finite() || *m < 0.0)
        {
            return Err(ReweightError::InvalidConfig(
                "step multipliers must be finite and non-negative".to_string(),
            ));
        }
        if self.step_multipliers.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ReweightError::InvalidConfig(
                "step multipliers must be strictly increasing".to_string(),
            ));
        }
        if self.bracket_names.len() != self.target_count() {
            return Err(ReweightError::InvalidConfig(format!(
                "{} bracket names for {} target brackets",
                self.bracket_names.len(),
                self.target_count()
            )));
        }
        if !(self.median_percentile > 0.0 && self.median_percentile < 100.0) {
            return Err(ReweightError::InvalidConfig(format!(
                "median percentile {} must lie in (0, 100)",
                self.median_percentile
            )));
        }

        Ok(())
    }
}
