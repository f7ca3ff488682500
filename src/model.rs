use crate::error::{ReweightError, Result};

/// 所得階級の集合（下限・上限のペア）
#[derive(Debug, Clone, PartialEq)]
pub struct BracketSet {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl BracketSet {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(ReweightError::InvalidBracketSet(format!(
                "{} lower bounds but {} upper bounds",
                lower.len(),
                upper.len()
            )));
        }
        if lower.len() < 2 {
            return Err(ReweightError::InvalidBracketSet(format!(
                "at least 2 brackets required, got {}",
                lower.len()
            )));
        }
        if lower.iter().chain(upper.iter()).any(|v| !v.is_finite()) {
            return Err(ReweightError::InvalidBracketSet(
                "bounds must be finite".to_string(),
            ));
        }
        if let Some(i) = lower.windows(2).position(|w| w[1] <= w[0]) {
            return Err(ReweightError::InvalidBracketSet(format!(
                "lower bounds not strictly increasing at index {}: {} -> {}",
                i + 1,
                lower[i],
                lower[i + 1]
            )));
        }
        for (i, (&lo, &hi)) in lower.iter().zip(upper.iter()).enumerate() {
            if hi < lo {
                return Err(ReweightError::InvalidBracketSet(format!(
                    "bracket {} has upper bound {} below lower bound {}",
                    i, hi, lo
                )));
            }
            if hi == lo {
                return Err(ReweightError::DivisionByZeroBracket {
                    index: i,
                    bound: lo,
                });
            }
        }
        // 隣接する階級は隙間なく連続していること
        if let Some(i) = (0..lower.len() - 1).find(|&i| upper[i] != lower[i + 1]) {
            return Err(ReweightError::InvalidBracketSet(format!(
                "bracket {} ends at {} but bracket {} starts at {}",
                i,
                upper[i],
                i + 1,
                lower[i + 1]
            )));
        }

        Ok(Self { lower, upper })
    }

    /// 下限値のみから階級を構成する。最後の階級の上限は外挿する。
    pub fn from_lower_bounds(lower: Vec<f64>) -> Result<Self> {
        let n = lower.len();
        if n < 2 {
            return Err(ReweightError::InvalidBracketSet(format!(
                "at least 2 lower bounds required, got {}",
                n
            )));
        }

        let mut upper: Vec<f64> = lower[1..].to_vec();
        upper.push(2.0 * lower[n - 1] - lower[n - 2]);

        Self::new(lower, upper)
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn width(&self, index: usize) -> f64 {
        self.upper[index] - self.lower[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.lower.iter().copied().zip(self.upper.iter().copied())
    }
}

/// 行優先で格納した重み行列（行: 新しい階級, 列: 元の階級）
#[derive(Debug, Clone, PartialEq)]
pub struct WeightMatrix {
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<f64>,
}

impl WeightMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            values: vec![0.0; rows * cols],
        }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if let Some(bad) = rows.iter().find(|r| r.len() != cols) {
            return Err(ReweightError::ShapeMismatch {
                expected: cols,
                actual: bad.len(),
            });
        }

        Ok(Self {
            rows: rows.len(),
            cols,
            values: rows.into_iter().flatten().collect(),
        })
    }

    pub fn identity(size: usize) -> Self {
        let mut matrix = Self::zeros(size, size);
        for i in 0..size {
            matrix.set(i, i, 1.0);
        }
        matrix
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.values[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.cols..(row + 1) * self.cols]
    }

    pub fn column_sum(&self, col: usize) -> f64 {
        (0..self.rows).map(|r| self.get(r, col)).sum()
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.rows).map(|r| self.row(r).to_vec()).collect()
    }

    /// 行列とベクトルの積
    pub fn mul_vec(&self, vector: &[f64]) -> Result<Vec<f64>> {
        if vector.len() != self.cols {
            return Err(ReweightError::ShapeMismatch {
                expected: self.cols,
                actual: vector.len(),
            });
        }

        Ok((0..self.rows)
            .map(|r| dot(self.row(r), vector))
            .collect())
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

// f64 の有効桁数を超える桁数では丸めない
const MAX_ROUND_DECIMALS: u32 = 15;

pub(crate) fn round_to(value: f64, decimals: u32) -> f64 {
    if decimals > MAX_ROUND_DECIMALS {
        return value;
    }
    let Ok(exponent) = i32::try_from(decimals) else {
        return value;
    };

    let factor = 10f64.powi(exponent);
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub code: String,
    pub values: Vec<f64>,
    /// 入力データ上の総人口（階級の合計と一致しない場合がある）
    pub reported_total: Option<f64>,
}

/// 地域 × 所得階級の表
#[derive(Debug, Clone, PartialEq)]
pub struct RegionTable {
    pub index_name: String,
    pub bracket_names: Vec<String>,
    pub regions: Vec<Region>,
}

impl RegionTable {
    pub fn new(index_name: impl Into<String>, bracket_names: Vec<String>) -> Self {
        Self {
            index_name: index_name.into(),
            bracket_names,
            regions: Vec::new(),
        }
    }

    pub fn push(&mut self, region: Region) -> Result<()> {
        if region.values.len() != self.bracket_names.len() {
            return Err(ReweightError::ShapeMismatch {
                expected: self.bracket_names.len(),
                actual: region.values.len(),
            });
        }
        self.regions.push(region);
        Ok(())
    }

    pub fn bracket_count(&self) -> usize {
        self.bracket_names.len()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn find(&self, code: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.code == code)
    }
}
