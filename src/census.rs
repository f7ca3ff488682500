use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

use crate::model::{BracketSet, Region, RegionTable};
use crate::percentile::PercentileCurve;
use crate::weights::{BinReweighter, WeightResult};

const TOTAL_LABEL: &str = "Total";

/// 国勢調査の所得階級別人口表
///
/// 1列目は地域コード、続く列の見出しは各所得階級の下限値、
/// 最後の `Total` 列（任意）は地域の総人口。
/// 地域コードが `Total` の行は全地域の集計行として扱う。
#[derive(Debug, Clone, PartialEq)]
pub struct CensusIncomeTable {
    pub lower_bounds: Vec<f64>,
    pub regions: RegionTable,
    pub aggregate: Region,
}

impl CensusIncomeTable {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let table = Self::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to read census table {:?}", path))?;

        info!(
            "Loaded {:?}: {} regions, {} income brackets",
            path,
            table.regions.len(),
            table.lower_bounds.len()
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader
            .headers()
            .context("Failed to read CSV header")?
            .clone();
        if headers.len() < 2 {
            bail!("Expected an index column followed by income bracket columns");
        }

        let has_total = headers
            .iter()
            .last()
            .is_some_and(|h| h.eq_ignore_ascii_case(TOTAL_LABEL));
        let bracket_end = if has_total {
            headers.len() - 1
        } else {
            headers.len()
        };
        if bracket_end < 2 {
            bail!("No income bracket columns found");
        }

        let bracket_names: Vec<String> = headers
            .iter()
            .skip(1)
            .take(bracket_end - 1)
            .map(|h| h.to_string())
            .collect();
        let lower_bounds = bracket_names
            .iter()
            .map(|name| {
                name.parse::<f64>()
                    .with_context(|| format!("Bracket column header is not a number: {:?}", name))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut regions = RegionTable::new(&headers[0], bracket_names);
        let mut aggregate = None;

        for (line, record) in csv_reader.records().enumerate() {
            let record = record.with_context(|| format!("Failed to read CSV row {}", line + 2))?;
            let code = record[0].to_string();

            let values = (1..bracket_end)
                .map(|i| parse_cell(&record[i], line + 2, &headers[i]))
                .collect::<Result<Vec<_>>>()?;
            let reported_total = if has_total {
                let cell = &record[bracket_end];
                if cell.is_empty() {
                    None
                } else {
                    Some(parse_cell(cell, line + 2, TOTAL_LABEL)?)
                }
            } else {
                None
            };

            let region = Region {
                code,
                values,
                reported_total,
            };
            if region.code.eq_ignore_ascii_case(TOTAL_LABEL) {
                if aggregate.is_some() {
                    bail!("Duplicate {:?} row at row {}", TOTAL_LABEL, line + 2);
                }
                aggregate = Some(region);
            } else {
                regions.push(region)?;
            }
        }

        let Some(aggregate) = aggregate else {
            bail!("Census table has no {:?} row", TOTAL_LABEL);
        };
        debug!("Aggregate row: {:?}", aggregate.values);

        Ok(Self {
            lower_bounds,
            regions,
            aggregate,
        })
    }

    pub fn bracket_set(&self) -> crate::Result<BracketSet> {
        BracketSet::from_lower_bounds(self.lower_bounds.clone())
    }

    pub fn percentile_curve(&self) -> crate::Result<PercentileCurve> {
        PercentileCurve::from_counts(
            &self.bracket_set()?,
            &self.aggregate.values,
            self.aggregate.reported_total,
        )
    }

    /// 集計行の分布から重み行列を計算する
    pub fn compute_weights(&self, reweighter: &BinReweighter) -> crate::Result<WeightResult> {
        let brackets = self.bracket_set()?;
        let curve = self.percentile_curve()?;
        reweighter.compute_weights(&brackets, curve.percentiles(), &self.aggregate.values)
    }
}

fn parse_cell(cell: &str, line: usize, column: &str) -> Result<f64> {
    if cell.is_empty() {
        return Ok(0.0);
    }
    cell.parse::<f64>()
        .with_context(|| format!("Invalid number {:?} at row {}, column {:?}", cell, line, column))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
SA1_CODE7,0,100,200,Total
1100701,10,20,5,40
1100702,20,30,,55
Total,30,50,20,100
";

    #[test]
    fn test_parse_census_table() {
        let table = CensusIncomeTable::from_reader(SAMPLE.as_bytes()).unwrap();

        assert_eq!(table.lower_bounds, vec![0.0, 100.0, 200.0]);
        assert_eq!(table.regions.index_name, "SA1_CODE7");
        assert_eq!(table.regions.len(), 2);
        assert_eq!(table.regions.regions[1].values, vec![20.0, 30.0, 0.0]);
        assert_eq!(table.regions.regions[0].reported_total, Some(40.0));
        assert_eq!(table.aggregate.values, vec![30.0, 50.0, 20.0]);
    }

    #[test]
    fn test_bracket_set_and_median() {
        let table = CensusIncomeTable::from_reader(SAMPLE.as_bytes()).unwrap();
        let brackets = table.bracket_set().unwrap();
        assert_eq!(brackets.upper(), &[100.0, 200.0, 300.0]);

        let result = table.compute_weights(&BinReweighter::default()).unwrap();
        assert_eq!(result.median, 140.0);
    }

    #[test]
    fn test_without_total_column() {
        let csv = "CODE,0,50,100\nA,1,2,3\nTotal,4,4,2\n";
        let table = CensusIncomeTable::from_reader(csv.as_bytes()).unwrap();

        assert_eq!(table.aggregate.reported_total, None);
        let curve = table.percentile_curve().unwrap();
        assert!((curve.percentiles()[2] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_aggregate_row() {
        let csv = "CODE,0,50\nA,1,2\n";
        assert!(CensusIncomeTable::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_duplicate_aggregate_row() {
        let csv = "CODE,0,50\nTotal,1,2\nA,1,2\nTOTAL,3,4\n";
        let err = CensusIncomeTable::from_reader(csv.as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("Duplicate"));
    }

    #[test]
    fn test_non_numeric_header() {
        let csv = "CODE,low,high\nTotal,1,2\n";
        assert!(CensusIncomeTable::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_non_numeric_cell() {
        let csv = "CODE,0,50\nA,x,2\nTotal,1,2\n";
        let err = CensusIncomeTable::from_reader(csv.as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("row 2"));
    }
}
