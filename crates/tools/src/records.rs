//! 評価用レコード
//!
//! JSONL 形式で 1 行 1 サンプルを読み込み、メトリクスの種類に合わせた
//! 列形式のバッチに詰め直す。
//!
//! ```text
//! {"pred": 0.83, "label": 1, "uid": 42}
//! {"pred": 0.12, "label": 0.4, "mask": 1, "weight": 2.0}
//! ```

use std::io::BufRead;

use anyhow::{Context, Result, bail, ensure};
use rmetric_core::{HostBatch, MetricKind};
use serde::Deserialize;

/// JSONL の 1 レコード
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SampleRecord {
    pub pred: f32,
    /// ハードラベル系では 0/1、連続・ソフトラベル系では実数
    pub label: f64,
    #[serde(default)]
    pub uid: Option<u64>,
    #[serde(default)]
    pub mask: Option<i64>,
    #[serde(default)]
    pub weight: Option<f32>,
}

/// JSONL を全件読み込む。空行は読み飛ばす
pub fn read_records<R: BufRead>(reader: R) -> Result<Vec<SampleRecord>> {
    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", i + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: SampleRecord = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse line {}: {line}", i + 1))?;
        records.push(record);
    }
    Ok(records)
}

/// 列形式のバッチ。`kind` が使わない列は空
#[derive(Debug, Default, Clone)]
pub struct ColumnBatch {
    pub preds: Vec<f32>,
    pub int_labels: Vec<i64>,
    pub float_labels: Vec<f32>,
    pub mask: Vec<i64>,
    pub weights: Vec<f32>,
    pub uids: Vec<u64>,
}

impl ColumnBatch {
    /// レコード列を `kind` 用の列に詰める。
    ///
    /// 重みは全レコードが `weight` を持つときだけ使う。一部だけ持つ場合はエラー。
    pub fn from_records(records: &[SampleRecord], kind: MetricKind) -> Result<Self> {
        let mut batch = Self::default();
        let weighted = kind == MetricKind::Auc && records.iter().any(|r| r.weight.is_some());
        for (i, r) in records.iter().enumerate() {
            batch.preds.push(r.pred);
            match kind {
                MetricKind::Auc | MetricKind::MaskAuc | MetricKind::WuAuc => {
                    batch.int_labels.push(hard_label(r.label).with_context(|| format!("record {i}"))?);
                }
                MetricKind::FloatMaskAuc | MetricKind::ContinueBucket => {
                    batch.float_labels.push(r.label as f32);
                }
            }
            if matches!(
                kind,
                MetricKind::MaskAuc | MetricKind::FloatMaskAuc | MetricKind::ContinueBucket
            ) {
                batch.mask.push(r.mask.unwrap_or(1));
            }
            if weighted {
                let w = r.weight.with_context(|| format!("record {i}: weight is missing"))?;
                batch.weights.push(w);
            }
            if kind == MetricKind::WuAuc {
                let uid = r.uid.with_context(|| format!("record {i}: uid is required for wuauc"))?;
                batch.uids.push(uid);
            }
        }
        Ok(batch)
    }

    pub fn len(&self) -> usize {
        self.preds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.preds.is_empty()
    }

    pub fn is_weighted(&self) -> bool {
        !self.weights.is_empty()
    }

    /// `range` の範囲を [`HostBatch`] として切り出す
    pub fn slice(&self, range: std::ops::Range<usize>) -> HostBatch<'_> {
        fn part<'a, T>(v: &'a [T], r: &std::ops::Range<usize>) -> &'a [T] {
            if v.is_empty() { v } else { &v[r.clone()] }
        }
        HostBatch::new(&self.preds[range.clone()])
            .int_labels(part(&self.int_labels, &range))
            .float_labels(part(&self.float_labels, &range))
            .mask(part(&self.mask, &range))
            .weights(part(&self.weights, &range))
            .uids(part(&self.uids, &range))
    }
}

fn hard_label(label: f64) -> Result<i64> {
    ensure!(label.fract() == 0.0, "hard label must be an integer, got {label}");
    if !(i64::MIN as f64..=i64::MAX as f64).contains(&label) {
        bail!("hard label out of range: {label}");
    }
    Ok(label as i64)
}

/// シャード数 `shards` にレコードを振り分ける。
///
/// 基本は到着順のラウンドロビン。WUAUC は entity を分割すると値が変わるため
/// `uid % shards` で振り分ける。
pub fn split_shards(records: &[SampleRecord], kind: MetricKind, shards: usize) -> Vec<Vec<SampleRecord>> {
    let mut parts = vec![Vec::with_capacity(records.len() / shards.max(1) + 1); shards.max(1)];
    let n = parts.len();
    for (i, r) in records.iter().enumerate() {
        let shard = match (kind, r.uid) {
            (MetricKind::WuAuc, Some(uid)) => (uid % n as u64) as usize,
            _ => i % n,
        };
        parts[shard].push(*r);
    }
    parts
}
