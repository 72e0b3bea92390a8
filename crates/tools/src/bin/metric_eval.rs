//! JSONL の予測レコードからメトリクスを計算する
//!
//! ```text
//! metric_eval preds.jsonl.gz --kind auc --shards 4
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, bail};
use clap::Parser;
use rmetric_core::{
    MetricConfig, MetricKind, MetricRegistry, MetricReport, Reducer, SharedMemoryGroup, SingleNode,
};
use serde::Serialize;
use tools::common::io::{open_output, open_reader};
use tools::records::{ColumnBatch, SampleRecord, read_records, split_shards};

const METRIC_NAME: &str = "eval";

#[derive(Parser, Debug)]
#[command(author, version, about = "Compute streaming AUC / calibration / WUAUC metrics from JSONL records")]
struct Cli {
    /// 入力 JSONL（`.gz` 可、`-` で標準入力）
    input: PathBuf,

    /// メトリクス設定（TOML）
    #[arg(long)]
    config: Option<PathBuf>,

    /// メトリクスの種類（auc, mask_auc, float_mask_auc, continue_bucket, wuauc）
    #[arg(long, default_value = "auc")]
    kind: MetricKind,

    /// シャード数。2 以上ならシャードごとにスレッドを立て、共有メモリ allreduce で集約する
    #[arg(long, default_value_t = 1)]
    shards: usize,

    /// 1 回の取り込みで渡すレコード数
    #[arg(long, default_value_t = 4096)]
    batch_size: usize,

    /// ヒストグラムの分解能（設定ファイルより優先）
    #[arg(long)]
    table_size: Option<usize>,

    /// 出力先（未指定時: 標準出力）
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// JSON を整形して出力
    #[arg(long)]
    pretty: bool,
}

#[derive(Serialize)]
struct EvalOutput<'a> {
    input: String,
    kind: MetricKind,
    shards: usize,
    records: usize,
    report: &'a MetricReport,
}

/// 1 シャード分を取り込んで report する。
///
/// 取り込みで失敗しても report は呼ぶ。report は集約のバリアなので、
/// 1 シャードだけ抜けると他のシャードが待ち続けるため。
fn run_shard(
    reducer: Arc<dyn Reducer>,
    config: MetricConfig,
    kind: MetricKind,
    records: &[SampleRecord],
    batch_size: usize,
) -> Result<MetricReport> {
    let rank = reducer.rank();
    let mut registry = MetricRegistry::new(reducer);
    registry.init_metric(METRIC_NAME, kind, 0, config)?;
    let entry = registry.get(METRIC_NAME)?;

    let ingest = ColumnBatch::from_records(records, kind).and_then(|batch| {
        for start in (0..batch.len()).step_by(batch_size) {
            let end = (start + batch_size).min(batch.len());
            entry
                .add_source(&batch.slice(start..end), batch.is_weighted())
                .with_context(|| format!("shard {rank}: records {start}..{end}"))?;
        }
        Ok(batch.len())
    });

    let report = registry.report(METRIC_NAME);
    let count = ingest?;
    log::info!("shard {rank}: ingested {count} records");
    Ok(report?)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    if cli.shards == 0 {
        bail!("--shards must be >= 1");
    }
    if cli.batch_size == 0 {
        bail!("--batch-size must be >= 1");
    }

    let mut config = match &cli.config {
        Some(path) => MetricConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => MetricConfig::default(),
    };
    if let Some(table_size) = cli.table_size {
        config.table_size = table_size;
    }
    config.validate().context("invalid metric configuration")?;

    let reader = open_reader(&cli.input)
        .with_context(|| format!("Failed to open {}", cli.input.display()))?;
    let records = read_records(reader)?;
    log::info!("loaded {} records from {}", records.len(), cli.input.display());

    let report = if cli.shards == 1 {
        run_shard(Arc::new(SingleNode), config, cli.kind, &records, cli.batch_size)?
    } else {
        let parts = split_shards(&records, cli.kind, cli.shards);
        let results: Vec<Result<MetricReport>> = thread::scope(|s| {
            let handles: Vec<_> = SharedMemoryGroup::new(cli.shards)
                .into_iter()
                .zip(&parts)
                .map(|(member, part)| {
                    let config = config.clone();
                    s.spawn(move || run_shard(Arc::new(member), config, cli.kind, part, cli.batch_size))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|_| Err(anyhow::anyhow!("shard thread panicked"))))
                .collect()
        });
        // 集約後の値は全シャードで同じなので rank 0 の結果を使う
        let mut first = None;
        for result in results {
            let report = result?;
            first.get_or_insert(report);
        }
        first.context("no shard produced a report")?
    };
    log::info!("{}: {report}", cli.kind);

    let out = EvalOutput {
        input: cli.input.display().to_string(),
        kind: cli.kind,
        shards: cli.shards,
        records: records.len(),
        report: &report,
    };
    let json = if cli.pretty {
        serde_json::to_string_pretty(&out)?
    } else {
        serde_json::to_string(&out)?
    };
    let mut w = open_output(cli.output.as_deref())?;
    writeln!(w, "{json}")?;
    w.flush()?;
    Ok(())
}
