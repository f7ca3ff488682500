use anyhow::Result;
use clap::Parser;
use rayon::ThreadPoolBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use income_bins::writer::{format_shares, read_weights};
use income_bins::{
    apply_weights, BinReweighter, CensusIncomeTable, CsvWriter, ReweightConfig, WeightMatrix,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 入力CSVファイル、またはディレクトリ
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// 出力ディレクトリ
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,

    /// 設定ファイル（YAML）
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 計算済みの重み行列（CSV）を適用する
    #[arg(short, long, value_name = "FILE")]
    weights: Option<PathBuf>,

    /// 地域ごとの割合を丸める桁数
    #[arg(long)]
    round: Option<u32>,

    /// 並列処理スレッド数（デフォルト: CPUコア数）
    #[arg(short, long)]
    threads: Option<usize>,
}

struct Job {
    reweighter: BinReweighter,
    weights: Option<WeightMatrix>,
    output: PathBuf,
}

fn main() -> Result<()> {
    // ログの初期化
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // CLI引数の解析
    let args = Args::parse();

    // 処理開始時間を記録
    let start_time = std::time::Instant::now();

    // スレッドプールの設定
    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new().num_threads(threads).build_global()?;
    }

    // 設定の読み込み（CLI引数で上書き）
    let mut config = match &args.config {
        Some(path) => ReweightConfig::from_yaml_file(path)?,
        None => ReweightConfig::default(),
    };
    if let Some(round) = args.round {
        config.round_decimals = Some(round);
    }

    let weights = match &args.weights {
        Some(path) => {
            let weights = read_weights(path)?;
            info!(
                "Loaded weights {:?} ({}x{})",
                path, weights.rows, weights.cols
            );
            Some(weights)
        }
        None => None,
    };

    let job = Job {
        reweighter: BinReweighter::new(config)?,
        weights,
        output: args.output.clone(),
    };

    // 出力ディレクトリの作成
    fs::create_dir_all(&args.output)?;

    if args.input.is_file() {
        process_file(&args.input, &job.output, &job)?;
    } else if args.input.is_dir() {
        info!("Processing directory: {:?}", args.input);
        process_directory(&args.input, &job)?;
    } else {
        error!("Invalid input path: {:?}", args.input);
        anyhow::bail!("Input path must be a file or directory");
    }

    // 処理時間を表示
    let elapsed = start_time.elapsed();
    info!("Total processing time: {:?}", elapsed);

    Ok(())
}

fn process_file(path: &Path, output_dir: &Path, job: &Job) -> Result<()> {
    info!("Processing file: {:?}", path);

    let census = CensusIncomeTable::from_path(path)?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("census");
    let writer = CsvWriter::new();
    let config = job.reweighter.config();

    let (weights, names) = match &job.weights {
        Some(weights) => (weights.clone(), output_names(weights, &config.bracket_names)),
        None => {
            // 集計行から中央値と重み行列を計算
            let brackets = census.bracket_set()?;
            let curve = census.percentile_curve()?;
            let result = census.compute_weights(&job.reweighter)?;

            info!("{}: median income {}", stem, result.median);
            for target in result.target_brackets() {
                match target.upper {
                    Some(upper) => info!(
                        "  {}: {} to {}",
                        target.name,
                        target.lower.round(),
                        upper.round()
                    ),
                    None => info!("  {}: > {}", target.name, target.lower.round()),
                }
            }
            info!(
                "{}: population share {}",
                stem,
                format_shares(&result.bracket_names, &result.shares)
            );

            let percentile_path = output_dir.join(format!("{}_percentile.csv", stem));
            writer.write_percentiles(&brackets, &curve, &percentile_path)?;
            info!("Written percentiles: {:?}", percentile_path);

            let weights_path = output_dir.join(format!("{}_weights.csv", stem));
            writer.write_weights(&result.weights, &weights_path)?;
            info!("Written weights: {:?}", weights_path);

            (result.weights, result.bracket_names)
        }
    };

    let shares = apply_weights(&census.regions, &weights, &names, config.round_decimals)?;
    let shares_path = output_dir.join(format!("{}_shares.csv", stem));
    writer.write_shares(&shares, &shares_path)?;

    Ok(())
}

fn process_directory(dir: &Path, job: &Job) -> Result<()> {
    use rayon::prelude::*;

    // CSVファイルを再帰的に収集
    let input_files = collect_input_files(dir)?;
    info!("Found {} input files (CSV)", input_files.len());

    // 並列処理でファイルを変換
    let results: Vec<Result<()>> = input_files
        .par_iter()
        .map(|path| {
            let output_dir = mirrored_output_dir(dir, path, &job.output);
            fs::create_dir_all(&output_dir)?;
            process_file(path, &output_dir, job)
        })
        .collect();

    // エラーをチェック
    let mut errors = Vec::new();
    for (i, result) in results.into_iter().enumerate() {
        if let Err(e) = result {
            errors.push(format!("{}: {:#}", input_files[i].display(), e));
        }
    }

    if !errors.is_empty() {
        error!("Failed to process {} files:", errors.len());
        for err in &errors {
            error!("  {}", err);
        }
        anyhow::bail!("{} files failed to process", errors.len());
    }

    Ok(())
}

fn collect_input_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();

        if path.is_dir() {
            // サブディレクトリを再帰的に探索
            files.extend(collect_input_files(&path)?);
        } else if path.extension().and_then(|s| s.to_str()) == Some("csv") && !is_output(&path) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

// 入力ディレクトリ内のサブディレクトリ構成を出力側にも作る
fn mirrored_output_dir(input_root: &Path, path: &Path, output_root: &Path) -> PathBuf {
    match path.parent().and_then(|p| p.strip_prefix(input_root).ok()) {
        Some(relative) => output_root.join(relative),
        None => output_root.to_path_buf(),
    }
}

// 行数が設定と合わない重み行列には Bin0, Bin1, ... を使う
fn output_names(weights: &WeightMatrix, configured: &[String]) -> Vec<String> {
    if weights.rows == configured.len() {
        configured.to_vec()
    } else {
        (0..weights.rows).map(|i| format!("Bin{}", i)).collect()
    }
}

// 前回の出力ファイルは入力として扱わない
fn is_output(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| {
            OUTPUT_SUFFIXES
                .iter()
                .any(|suffix| stem.ends_with(suffix))
        })
}

const OUTPUT_SUFFIXES: [&str; 3] = ["_percentile", "_weights", "_shares"];
