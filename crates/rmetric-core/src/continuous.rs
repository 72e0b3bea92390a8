//! 連続ラベル用バケット集計
//!
//! ラベル値を昇順の閾値列で 100 個のバケットに振り分け、バケットごとに
//! 6 個の累積値を持つ。
//!
//! | index | 内容 |
//! |---|---|
//! | 0 | `|pred - label|` の和 |
//! | 1 | `(pred - label)^2` の和 |
//! | 2 | label の和 |
//! | 3 | pred の和 |
//! | 4 | 件数 |
//! | 5 | positive order ratio（サンプラーが上書き） |

use serde::Serialize;

use crate::error::MetricResult;
use crate::order_ratio::OrderRatioSampler;
use crate::reducer::{Reducer, reduce_if_sharded};

/// バケット数
pub const CONTINUE_BUCKET_NUM: usize = 100;

/// 1 バケットあたりの累積値の数
pub const CONTINUE_MSG_SIZE: usize = 6;

const ABSERR: usize = 0;
const SQRERR: usize = 1;
const LABEL: usize = 2;
const PRED: usize = 3;
const COUNT: usize = 4;
const ORDER_RATIO: usize = 5;

/// `label` が超えない最初の閾値の位置。全閾値を超えたら最後のバケット
pub fn bucket_index(label: f64, thresholds: &[f64]) -> usize {
    thresholds
        .iter()
        .position(|&thr| label <= thr)
        .unwrap_or(thresholds.len())
        .min(CONTINUE_BUCKET_NUM - 1)
}

/// 連続ラベル用のバケット集計
#[derive(Debug, Clone)]
pub struct ContinuousBuckets {
    msg: Vec<[f64; CONTINUE_MSG_SIZE]>,
    pairs: Vec<Vec<(f64, f64)>>,
    keep_pairs: bool,
}

impl ContinuousBuckets {
    /// `keep_pairs` が真のときだけ order ratio 用の生ペアを保持する
    pub fn new(keep_pairs: bool) -> Self {
        Self {
            msg: vec![[0.0; CONTINUE_MSG_SIZE]; CONTINUE_BUCKET_NUM],
            pairs: vec![Vec::new(); CONTINUE_BUCKET_NUM],
            keep_pairs,
        }
    }

    pub fn reset(&mut self) {
        for (msg, pairs) in self.msg.iter_mut().zip(&mut self.pairs) {
            *msg = [0.0; CONTINUE_MSG_SIZE];
            pairs.clear();
        }
    }

    /// 1 件を加える。mask やラベル 0 の除外は呼び出し側で済ませておく
    pub fn add(&mut self, pred: f64, label: f64, thresholds: &[f64]) {
        let idx = bucket_index(label, thresholds);
        let err = pred - label;
        let msg = &mut self.msg[idx];
        msg[ABSERR] += err.abs();
        msg[SQRERR] += err * err;
        msg[LABEL] += label;
        msg[PRED] += pred;
        msg[COUNT] += 1.0;
        if self.keep_pairs {
            self.pairs[idx].push((pred, label));
        }
    }

    /// バケットの累積値（生の 6 要素）
    pub fn raw(&self, bucket: usize) -> &[f64; CONTINUE_MSG_SIZE] {
        &self.msg[bucket]
    }

    /// バケットが保持している生ペア
    pub fn pairs(&self, bucket: usize) -> &[(f64, f64)] {
        &self.pairs[bucket]
    }

    /// 空でない全バケットの order ratio を推定し直して上書きする
    pub fn compute_order_ratio(&mut self, sampler: &mut OrderRatioSampler) {
        for (bucket, (msg, pairs)) in self.msg.iter_mut().zip(&self.pairs).enumerate() {
            if pairs.is_empty() {
                continue;
            }
            msg[ORDER_RATIO] = match sampler.ratio(pairs) {
                Some(ratio) => ratio,
                None => {
                    log::warn!("bucket {bucket}: every sampled pair had tied labels; order ratio set to 0");
                    0.0
                }
            };
        }
    }

    /// シャード間で集約し、件数のあるバケットだけ統計を導出する。
    ///
    /// order ratio 以外は和、order ratio はシャード平均を取る。
    pub fn finalize(&self, reducer: &dyn Reducer) -> MetricResult<ContinuousReport> {
        let mut flat: Vec<f64> = self.msg.iter().flatten().copied().collect();
        reduce_if_sharded(reducer, &mut flat)?;
        let node_size = reducer.size().max(1) as f64;

        let mut buckets = Vec::new();
        let mut size = 0.0;
        for (index, msg) in flat.chunks_exact(CONTINUE_MSG_SIZE).enumerate() {
            let count = msg[COUNT];
            if count <= 0.0 {
                continue;
            }
            buckets.push(ContinuousBucketStats {
                index,
                mae: msg[ABSERR] / count,
                rmse: (msg[SQRERR] / count).sqrt(),
                actual_value: msg[LABEL] / count,
                predicted_value: msg[PRED] / count,
                count,
                order_ratio: msg[ORDER_RATIO] / node_size,
            });
            size += count;
        }
        Ok(ContinuousReport { buckets, size })
    }
}

/// 1 バケット分の導出値
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContinuousBucketStats {
    pub index: usize,
    pub mae: f64,
    pub rmse: f64,
    /// ラベルの平均
    pub actual_value: f64,
    /// 予測値の平均
    pub predicted_value: f64,
    pub count: f64,
    pub order_ratio: f64,
}

/// 連続ラベル集計の結果。件数 0 のバケットは含まない
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContinuousReport {
    pub buckets: Vec<ContinuousBucketStats>,
    pub size: f64,
}

impl ContinuousReport {
    pub fn bucket(&self, index: usize) -> Option<&ContinuousBucketStats> {
        self.buckets.iter().find(|b| b.index == index)
    }
}
