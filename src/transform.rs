use rayon::prelude::*;

use crate::error::{ReweightError, Result};
use crate::model::{round_to, Region, RegionTable, WeightMatrix};

/// 重み行列を各地域に適用し、新しい階級ごとの割合の表を作る。
///
/// 各地域の値は新しい階級の合計で正規化される（人口の絶対数は残らない）。
/// 合計が 0 の地域はすべて 0 になる。
pub fn apply_weights(
    table: &RegionTable,
    weights: &WeightMatrix,
    output_bracket_names: &[String],
    round_decimals: Option<u32>,
) -> Result<RegionTable> {
    if weights.cols != table.bracket_count() {
        return Err(ReweightError::ShapeMismatch {
            expected: weights.cols,
            actual: table.bracket_count(),
        });
    }
    if output_bracket_names.len() != weights.rows {
        return Err(ReweightError::ShapeMismatch {
            expected: weights.rows,
            actual: output_bracket_names.len(),
        });
    }

    let regions = table
        .regions
        .par_iter()
        .map(|region| -> Result<Region> {
            let values = normalized_shares(weights.mul_vec(&region.values)?, round_decimals);
            Ok(Region {
                code: region.code.clone(),
                values,
                reported_total: region.reported_total,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(
        "Applied {}x{} weights to {} regions",
        weights.rows,
        weights.cols,
        regions.len()
    );

    Ok(RegionTable {
        index_name: table.index_name.clone(),
        bracket_names: output_bracket_names.to_vec(),
        regions,
    })
}

fn normalized_shares(values: Vec<f64>, round_decimals: Option<u32>) -> Vec<f64> {
    // NaN は合計から除外する
    let total: f64 = values.iter().filter(|v| !v.is_nan()).sum();

    values
        .into_iter()
        .map(|v| {
            let share = if total != 0.0 { v / total } else { 0.0 };
            match round_decimals {
                Some(d) => round_to(share, d),
                None => share,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("Bin{}", i)).collect()
    }

    fn table() -> RegionTable {
        let mut table = RegionTable::new("SA1_CODE7", vec!["0".into(), "100".into(), "200".into()]);
        table
            .push(Region {
                code: "1100701".into(),
                values: vec![30.0, 50.0, 20.0],
                reported_total: Some(110.0),
            })
            .unwrap();
        table
            .push(Region {
                code: "1100702".into(),
                values: vec![0.0, 0.0, 0.0],
                reported_total: None,
            })
            .unwrap();
        table
            .push(Region {
                code: "1100703".into(),
                values: vec![5.0, 0.0, 15.0],
                reported_total: Some(20.0),
            })
            .unwrap();
        table
    }

    #[test]
    fn test_identity_weights_keep_proportions() {
        let result = apply_weights(&table(), &WeightMatrix::identity(3), &names(3), None).unwrap();

        assert_eq!(result.index_name, "SA1_CODE7");
        assert_eq!(result.bracket_names, names(3));
        let first = &result.regions[0];
        assert!((first.values[0] - 0.3).abs() < 1e-12);
        assert!((first.values[1] - 0.5).abs() < 1e-12);
        assert!((first.values[2] - 0.2).abs() < 1e-12);
        assert_eq!(result.regions[2].values, vec![0.25, 0.0, 0.75]);
    }

    #[test]
    fn test_zero_region_gives_zero_shares() {
        let result = apply_weights(&table(), &WeightMatrix::identity(3), &names(3), None).unwrap();
        let empty = result.find("1100702").unwrap();

        assert_eq!(empty.values, vec![0.0, 0.0, 0.0]);
        assert!(empty.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_preserves_order_and_totals() {
        let result = apply_weights(&table(), &WeightMatrix::identity(3), &names(3), Some(4)).unwrap();
        let codes: Vec<&str> = result.regions.iter().map(|r| r.code.as_str()).collect();

        assert_eq!(codes, vec!["1100701", "1100702", "1100703"]);
        assert_eq!(result.regions[0].reported_total, Some(110.0));
    }

    #[test]
    fn test_merging_weights_with_rounding() {
        let weights = WeightMatrix::from_rows(vec![
            vec![1.0, 1.0 / 3.0, 0.0],
            vec![0.0, 2.0 / 3.0, 1.0],
        ])
        .unwrap();
        let result = apply_weights(&table(), &weights, &names(2), Some(2)).unwrap();

        let first = &result.regions[0].values;
        assert_eq!(first, &vec![0.47, 0.53]);
    }

    #[test]
    fn test_large_round_decimals_do_not_produce_nan() {
        let mut table = RegionTable::new("CODE", vec!["A".into(), "B".into()]);
        table
            .push(Region {
                code: "R1".into(),
                values: vec![1.0, 3.0],
                reported_total: None,
            })
            .unwrap();

        for decimals in [400, u32::MAX] {
            let result =
                apply_weights(&table, &WeightMatrix::identity(2), &names(2), Some(decimals))
                    .unwrap();
            assert_eq!(result.regions[0].values, vec![0.25, 0.75]);
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let weights = WeightMatrix::zeros(5, 4);
        let result = apply_weights(&table(), &weights, &names(5), None);

        assert_eq!(
            result,
            Err(ReweightError::ShapeMismatch {
                expected: 4,
                actual: 3
            })
        );
    }
}
