//! 予測値ヒストグラムによるストリーミング AUC
//!
//! 予測値 `p` を `floor(p * table_size)` のバケットに落とし、ラベルごとに
//! 件数（重み）を数える。離散化後の予測値に対しては厳密な AUC になる。
//!
//! - `table[0]`: 負例（non-click）
//! - `table[1]`: 正例（click）
//!
//! 誤差の累積和（abserr / sqrerr / pred）も同時に持ち、`compute` で
//! MAE / RMSE / 予測 CTR を導出する。

use serde::Serialize;

use crate::calibration::bucket_error;
use crate::error::{MetricError, MetricResult, check_label, check_prediction};
use crate::reducer::{Reducer, reduce_if_sharded};

/// 片方のクラスの質量がこれ未満なら AUC を定義しない
const MIN_CLASS_MASS: f64 = 1e-3;

/// 全件が片方のクラスだったときの AUC センチネル
pub const AUC_UNDEFINED: f64 = -0.5;

/// ヒストグラムと誤差の累積和
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramTable {
    table_size: usize,
    table: [Vec<f64>; 2],
    local_abserr: f64,
    local_sqrerr: f64,
    local_pred: f64,
}

impl HistogramTable {
    /// ゼロ埋めしたテーブルを確保する
    pub fn new(table_size: usize) -> Self {
        Self {
            table_size,
            table: [vec![0.0; table_size], vec![0.0; table_size]],
            local_abserr: 0.0,
            local_sqrerr: 0.0,
            local_pred: 0.0,
        }
    }

    pub fn table_size(&self) -> usize {
        self.table_size
    }

    /// 負例側のバケット列
    pub fn negatives(&self) -> &[f64] {
        &self.table[0]
    }

    /// 正例側のバケット列
    pub fn positives(&self) -> &[f64] {
        &self.table[1]
    }

    /// `(abserr, sqrerr, pred)` の累積和
    pub fn running_sums(&self) -> [f64; 3] {
        [self.local_abserr, self.local_sqrerr, self.local_pred]
    }

    /// 全カウンタをゼロに戻す（確保済みの領域は再利用）
    pub fn reset(&mut self) {
        for row in &mut self.table {
            row.fill(0.0);
        }
        self.local_abserr = 0.0;
        self.local_sqrerr = 0.0;
        self.local_pred = 0.0;
    }

    /// `pred == 1.0` は `table_size` 番目に落ちるため、最後のバケットに寄せる
    #[inline]
    fn bucket(&self, pred: f64) -> usize {
        ((pred * self.table_size as f64) as usize).min(self.table_size - 1)
    }

    /// ハードラベル 1 件を加える
    pub fn add(&mut self, pred: f64, label: i64) -> MetricResult<()> {
        check_prediction(pred)?;
        check_label(label)?;
        let pos = self.bucket(pred);
        let err = pred - label as f64;
        self.local_abserr += err.abs();
        self.local_sqrerr += err * err;
        self.local_pred += pred;
        self.table[label as usize][pos] += 1.0;
        Ok(())
    }

    /// 重み付きで 1 件を加える。
    ///
    /// 重みが掛かるのはバケット加算と予測値の和だけで、誤差の和には掛けない。
    pub fn add_scaled(&mut self, pred: f64, label: i64, sample_scale: f64) -> MetricResult<()> {
        check_prediction(pred)?;
        check_label(label)?;
        if sample_scale.is_nan() || sample_scale < 0.0 {
            return Err(MetricError::InvalidSampleScale { scale: sample_scale });
        }
        let pos = self.bucket(pred);
        let err = pred - label as f64;
        self.local_abserr += err.abs();
        self.local_sqrerr += err * err;
        self.local_pred += pred * sample_scale;
        self.table[label as usize][pos] += sample_scale;
        Ok(())
    }

    /// ソフトラベル（[0, 1]）で 1 件を加える。`1 - label` を負例、`label` を正例に配分する
    pub fn add_soft(&mut self, pred: f64, label: f64) -> MetricResult<()> {
        check_prediction(pred)?;
        if !(0.0..=1.0).contains(&label) {
            return Err(MetricError::InvalidSoftLabel { label });
        }
        let pos = (pred * self.table_size as f64) as i64;
        if pos < 0 || pos >= self.table_size as i64 {
            return Err(MetricError::BucketOutOfRange {
                pos,
                table_size: self.table_size,
            });
        }
        let pos = pos as usize;
        let err = pred - label;
        self.local_abserr += err.abs();
        self.local_sqrerr += err * err;
        self.local_pred += pred;
        self.table[0][pos] += 1.0 - label;
        self.table[1][pos] += label;
        Ok(())
    }

    /// シャード間で集約したテーブルから各種メトリクスを導出する。
    ///
    /// `reducer.size() > 1` のときは allreduce を呼ぶため、全シャードが
    /// 同じ順序で呼ぶ必要がある。
    pub fn compute(&self, reducer: &dyn Reducer) -> MetricResult<HistogramMetrics> {
        let mut neg = self.table[0].clone();
        let mut pos = self.table[1].clone();
        reduce_if_sharded(reducer, &mut neg)?;
        reduce_if_sharded(reducer, &mut pos)?;

        let TrapezoidArea { area, fp, tp } = trapezoid_area(&neg, &pos);
        let auc = if fp < MIN_CLASS_MASS || tp < MIN_CLASS_MASS {
            log::warn!("all samples belong to one class (fp={fp}, tp={tp}); auc is undefined");
            AUC_UNDEFINED
        } else {
            area / (fp * tp)
        };

        let mut sums = self.running_sums();
        reduce_if_sharded(reducer, &mut sums)?;
        let [abserr, sqrerr, pred_sum] = sums;
        let total = fp + tp;

        Ok(HistogramMetrics {
            auc,
            bucket_error: bucket_error(&neg, &pos),
            mae: abserr / total,
            rmse: (sqrerr / total).sqrt(),
            actual_ctr: tp / total,
            predicted_ctr: pred_sum / total,
            size: total,
        })
    }
}

struct TrapezoidArea {
    area: f64,
    fp: f64,
    tp: f64,
}

/// 予測値の高いバケットから低いバケットへ台形積分する
fn trapezoid_area(neg: &[f64], pos: &[f64]) -> TrapezoidArea {
    let mut area = 0.0;
    let mut fp = 0.0;
    let mut tp = 0.0;
    for (&n, &p) in neg.iter().zip(pos).rev() {
        let newfp = fp + n;
        let newtp = tp + p;
        area += (newfp - fp) * (tp + newtp) / 2.0;
        fp = newfp;
        tp = newtp;
    }
    TrapezoidArea { area, fp, tp }
}

/// ヒストグラムから導出したメトリクス
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramMetrics {
    /// AUC。片方のクラスしかなければ [`AUC_UNDEFINED`]
    pub auc: f64,
    pub bucket_error: f64,
    pub mae: f64,
    pub rmse: f64,
    pub actual_ctr: f64,
    pub predicted_ctr: f64,
    /// 件数（重み付きなら重みの和）
    pub size: f64,
}

impl HistogramMetrics {
    /// AUC が定義されているか
    pub fn auc_defined(&self) -> bool {
        self.auc != AUC_UNDEFINED
    }

    /// 実 CTR / 予測 CTR
    pub fn copc(&self) -> f64 {
        if self.predicted_ctr == 0.0 {
            0.0
        } else {
            self.actual_ctr / self.predicted_ctr
        }
    }
}

impl std::fmt::Display for HistogramMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AUC={:.6} BUCKET_ERROR={:.6} MAE={:.6} RMSE={:.6} Actual CTR={:.6} Predicted CTR={:.6} COPC={:.6} INS Count={}",
            self.auc,
            self.bucket_error,
            self.mae,
            self.rmse,
            self.actual_ctr,
            self.predicted_ctr,
            self.copc(),
            self.size
        )
    }
}
