use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use crate::model::{round_to, BracketSet, RegionTable, WeightMatrix};
use crate::percentile::PercentileCurve;

const TOTAL_COLUMN: &str = "TOTAL";

#[derive(Default)]
pub struct CsvWriter {}

impl CsvWriter {
    pub fn new() -> Self {
        Self {}
    }

    /// 重み行列を書き出す（ヘッダーなし、1行 = 新しい階級1つ）
    pub fn write_weights(&self, weights: &WeightMatrix, output_path: &Path) -> Result<()> {
        let file = File::create(output_path)
            .with_context(|| format!("Failed to create {:?}", output_path))?;
        self.write_weights_to(weights, file)
    }

    pub fn write_weights_to<W: Write>(&self, weights: &WeightMatrix, writer: W) -> Result<()> {
        let mut csv_writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);

        for r in 0..weights.rows {
            csv_writer
                .write_record(weights.row(r).iter().map(|v| v.to_string()))
                .context("Failed to write weight row")?;
        }
        csv_writer.flush().context("Failed to flush weights")?;

        Ok(())
    }

    pub fn write_percentiles(
        &self,
        brackets: &BracketSet,
        curve: &PercentileCurve,
        output_path: &Path,
    ) -> Result<()> {
        let file = File::create(output_path)
            .with_context(|| format!("Failed to create {:?}", output_path))?;
        self.write_percentiles_to(brackets, curve, file)
    }

    pub fn write_percentiles_to<W: Write>(
        &self,
        brackets: &BracketSet,
        curve: &PercentileCurve,
        writer: W,
    ) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer
            .write_record(["Weekly_Income_From", "Weekly_Income_To", "Percentile"])
            .context("Failed to write percentile header")?;
        for ((lower, upper), percentile) in brackets.iter().zip(curve.percentiles()) {
            csv_writer
                .write_record([
                    lower.to_string(),
                    upper.to_string(),
                    percentile.round().to_string(),
                ])
                .context("Failed to write percentile row")?;
        }
        csv_writer.flush().context("Failed to flush percentiles")?;

        Ok(())
    }

    /// 地域ごとの割合の表を書き出す。最後の列は入力データ上の総人口。
    pub fn write_shares(&self, table: &RegionTable, output_path: &Path) -> Result<()> {
        let file = File::create(output_path)
            .with_context(|| format!("Failed to create {:?}", output_path))?;
        self.write_shares_to(table, file)?;
        tracing::info!("Written shares for {} regions: {:?}", table.len(), output_path);
        Ok(())
    }

    pub fn write_shares_to<W: Write>(&self, table: &RegionTable, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        let header = std::iter::once(table.index_name.as_str())
            .chain(table.bracket_names.iter().map(|s| s.as_str()))
            .chain(std::iter::once(TOTAL_COLUMN));
        csv_writer
            .write_record(header)
            .context("Failed to write shares header")?;

        for region in &table.regions {
            let total = region
                .reported_total
                .map(|t| t.to_string())
                .unwrap_or_default();
            let record = std::iter::once(region.code.clone())
                .chain(region.values.iter().map(|v| v.to_string()))
                .chain(std::iter::once(total));
            csv_writer
                .write_record(record)
                .with_context(|| format!("Failed to write region {}", region.code))?;
        }
        csv_writer.flush().context("Failed to flush shares")?;

        Ok(())
    }
}

/// 外部で用意された重み行列を読み込む
pub fn read_weights(path: &Path) -> Result<WeightMatrix> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    read_weights_from(BufReader::new(file))
        .with_context(|| format!("Failed to read weights {:?}", path))
}

pub fn read_weights_from<R: Read>(reader: R) -> Result<WeightMatrix> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (line, record) in csv_reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read weights row {}", line + 1))?;
        let row = record
            .iter()
            .map(|cell| {
                cell.parse::<f64>().with_context(|| {
                    format!("Invalid weight {:?} at row {}", cell, line + 1)
                })
            })
            .collect::<Result<Vec<_>>>()?;
        rows.push(row);
    }

    Ok(WeightMatrix::from_rows(rows)?)
}

/// ログ表示用に割合を丸める
pub fn format_shares(names: &[String], shares: &[f64]) -> String {
    names
        .iter()
        .zip(shares)
        .map(|(name, share)| format!("{}={}%", name, round_to(*share, 2)))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Region;
    use crate::ReweightError;
    use tempfile::TempDir;

    fn sample_table() -> RegionTable {
        let mut table = RegionTable::new("SA1_CODE7", vec!["VERY_LOW".into(), "LOW".into()]);
        table
            .push(Region {
                code: "1100701".to_string(),
                values: vec![0.25, 0.75],
                reported_total: Some(120.0),
            })
            .unwrap();
        table
            .push(Region {
                code: "1100702".to_string(),
                values: vec![0.0, 0.0],
                reported_total: None,
            })
            .unwrap();
        table
    }

    #[test]
    fn test_write_and_read_weights() {
        let temp_dir = TempDir::new().unwrap();
        let output_path = temp_dir.path().join("weights.csv");

        let weights = WeightMatrix::from_rows(vec![vec![0.7, 0.0], vec![0.3, 1.0]]).unwrap();
        let writer = CsvWriter::new();
        writer.write_weights(&weights, &output_path).unwrap();

        assert!(output_path.exists());
        let loaded = read_weights(&output_path).unwrap();
        assert_eq!(loaded, weights);
    }

    #[test]
    fn test_read_ragged_weights_fails() {
        let err = read_weights_from("1,0,0\n0,1\n".as_bytes()).unwrap_err();
        let reweight_err = err.downcast_ref::<ReweightError>();

        assert!(matches!(
            reweight_err,
            Some(ReweightError::ShapeMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_write_shares_layout() {
        let mut buffer = Vec::new();
        CsvWriter::new()
            .write_shares_to(&sample_table(), &mut buffer)
            .unwrap();

        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "SA1_CODE7,VERY_LOW,LOW,TOTAL");
        assert_eq!(lines[1], "1100701,0.25,0.75,120");
        assert_eq!(lines[2], "1100702,0,0,");
    }

    #[test]
    fn test_write_percentiles_layout() {
        let brackets = BracketSet::from_lower_bounds(vec![0.0, 100.0, 200.0]).unwrap();
        let curve = PercentileCurve::new(&brackets, vec![29.6, 80.2, 100.0]).unwrap();

        let mut buffer = Vec::new();
        CsvWriter::new()
            .write_percentiles_to(&brackets, &curve, &mut buffer)
            .unwrap();

        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Weekly_Income_From,Weekly_Income_To,Percentile");
        assert_eq!(lines[1], "0,100,30");
        assert_eq!(lines[3], "200,300,100");
    }

    #[test]
    fn test_format_shares() {
        let names = vec!["LOW".to_string(), "HIGH".to_string()];
        assert_eq!(format_shares(&names, &[21.004, 78.996]), "LOW=21%, HIGH=79%");
    }
}
