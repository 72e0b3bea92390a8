//! 名前付きメトリクスのレジストリ
//!
//! 学習フェーズ（`phase`）ごとに複数のアキュムレータを持つ。プロセス全体の
//! シングルトンにはせず、呼び出し側が所有して引き回す。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::accumulator::{BatchKind, MetricAccumulator};
use crate::config::MetricConfig;
use crate::continuous::ContinuousReport;
use crate::error::{MetricError, MetricResult};
use crate::histogram::HistogramMetrics;
use crate::reducer::Reducer;
use crate::source::SampleSource;
use crate::wuauc::WuaucMetrics;

/// メトリクスの種類。取り込むバッチの形と `report` の内容が決まる
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// pred + 0/1 label（weight 列があれば重み付き）
    Auc,
    MaskAuc,
    FloatMaskAuc,
    ContinueBucket,
    WuAuc,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Auc,
        MetricKind::MaskAuc,
        MetricKind::FloatMaskAuc,
        MetricKind::ContinueBucket,
        MetricKind::WuAuc,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Auc => "auc",
            MetricKind::MaskAuc => "mask_auc",
            MetricKind::FloatMaskAuc => "float_mask_auc",
            MetricKind::ContinueBucket => "continue_bucket",
            MetricKind::WuAuc => "wuauc",
        }
    }

    /// このメトリクスへ流すバッチの種類。`weighted` は weight 列の有無
    pub fn batch_kind(self, weighted: bool) -> BatchKind {
        match self {
            MetricKind::Auc if weighted => BatchKind::Weighted,
            MetricKind::Auc => BatchKind::Plain,
            MetricKind::MaskAuc => BatchKind::Mask,
            MetricKind::FloatMaskAuc => BatchKind::FloatMask,
            MetricKind::ContinueBucket => BatchKind::ContinueMask,
            MetricKind::WuAuc => BatchKind::Uid,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| MetricError::InvalidConfig(format!("unknown metric kind: {s}")))
    }
}

/// `report` の結果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricReport {
    Histogram(HistogramMetrics),
    Continuous(ContinuousReport),
    Wuauc(WuaucMetrics),
}

impl fmt::Display for MetricReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricReport::Histogram(m) => write!(f, "{m}"),
            MetricReport::Wuauc(m) => write!(f, "{m}"),
            MetricReport::Continuous(r) => {
                write!(f, "Continuous buckets={} INS Count={}", r.buckets.len(), r.size)?;
                for b in &r.buckets {
                    write!(
                        f,
                        "\n  [{}] MAE={:.6} RMSE={:.6} Actual={:.6} Predicted={:.6} Count={} OrderRatio={:.6}",
                        b.index, b.mae, b.rmse, b.actual_value, b.predicted_value, b.count, b.order_ratio
                    )?;
                }
                Ok(())
            }
        }
    }
}

/// 登録済みメトリクス 1 件
pub struct MetricEntry {
    kind: MetricKind,
    phase: i32,
    accumulator: MetricAccumulator,
}

impl MetricEntry {
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn phase(&self) -> i32 {
        self.phase
    }

    pub fn accumulator(&self) -> &MetricAccumulator {
        &self.accumulator
    }

    /// 種類に合った形でバッチを取り込む
    pub fn add_source(&self, source: &dyn SampleSource, weighted: bool) -> MetricResult<()> {
        self.accumulator.add_source(source, self.kind.batch_kind(weighted))
    }

    /// 種類に応じたメトリクスを導出する
    pub fn report(&self) -> MetricResult<MetricReport> {
        Ok(match self.kind {
            MetricKind::Auc | MetricKind::MaskAuc | MetricKind::FloatMaskAuc => {
                MetricReport::Histogram(self.accumulator.compute()?)
            }
            MetricKind::ContinueBucket => {
                MetricReport::Continuous(self.accumulator.compute_continue_msg()?)
            }
            MetricKind::WuAuc => MetricReport::Wuauc(self.accumulator.compute_wuauc()?),
        })
    }

    fn reset(&self) {
        self.accumulator.reset();
        self.accumulator.reset_records();
    }
}

/// 名前 → メトリクスの表。全メトリクスが同じ reducer を共有する
pub struct MetricRegistry {
    reducer: Arc<dyn Reducer>,
    metrics: BTreeMap<String, MetricEntry>,
}

impl MetricRegistry {
    pub fn new(reducer: Arc<dyn Reducer>) -> Self {
        Self {
            reducer,
            metrics: BTreeMap::new(),
        }
    }

    /// メトリクスを追加する。同名があればエラー
    pub fn init_metric(
        &mut self,
        name: &str,
        kind: MetricKind,
        phase: i32,
        config: MetricConfig,
    ) -> MetricResult<&MetricEntry> {
        if self.metrics.contains_key(name) {
            return Err(MetricError::DuplicateMetric(name.to_string()));
        }
        let accumulator = MetricAccumulator::new(config, Arc::clone(&self.reducer))?;
        log::info!("init metric {name}: kind={kind} phase={phase}");
        let entry = MetricEntry {
            kind,
            phase,
            accumulator,
        };
        Ok(self.metrics.entry(name.to_string()).or_insert(entry))
    }

    pub fn get(&self, name: &str) -> MetricResult<&MetricEntry> {
        self.metrics
            .get(name)
            .ok_or_else(|| MetricError::UnknownMetric(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// `phase` に属するメトリクス名（名前順）
    pub fn metric_names(&self, phase: i32) -> Vec<&str> {
        self.metrics
            .iter()
            .filter(|(_, e)| e.phase == phase)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn report(&self, name: &str) -> MetricResult<MetricReport> {
        self.get(name)?.report()
    }

    /// `phase` に属する全メトリクスの状態（WUAUC バッファ含む）をクリアする
    pub fn reset_phase(&self, phase: i32) {
        for (name, entry) in self.metrics.iter().filter(|(_, e)| e.phase == phase) {
            entry.reset();
            log::debug!("reset metric {name}");
        }
    }
}
