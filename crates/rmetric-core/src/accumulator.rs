//! メトリクスアキュムレータ
//!
//! ヒストグラム・連続ラベルバケット・WUAUC レコードを 1 つの `Mutex` で守る。
//! 取り込みはバッチ単位でロックを取り、バッチ内は逐次処理する。
//!
//! 不正なサンプルに当たった時点でそのバッチの残りは処理せずにエラーを返す。
//! それまでに加えた分は巻き戻さない。
//!
//! `compute*` はロックを保持したまま allreduce を呼ぶ。集約はシャード間の
//! バリアなので、全シャードが同じ順序で呼ぶこと。

use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::MetricConfig;
use crate::continuous::{ContinuousBuckets, ContinuousReport};
use crate::error::{MetricResult, check_len};
use crate::histogram::{HistogramMetrics, HistogramTable};
use crate::order_ratio::OrderRatioSampler;
use crate::reducer::{Reducer, SingleNode};
use crate::source::{SampleSource, StagedBatch};
use crate::wuauc::{WuaucEngine, WuaucMetrics};

/// ラベル 0 とみなす幅（ignore_zero_label 用）
const ZERO_LABEL_EPS: f64 = 1e-5;

/// [`MetricAccumulator::add_source`] で取り込むバッチの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// pred + 0/1 label
    Plain,
    /// pred + 0/1 label + weight
    Weighted,
    /// pred + 0/1 label + mask
    Mask,
    /// pred + soft label + mask
    FloatMask,
    /// pred + continuous label + mask
    ContinueMask,
    /// pred + 0/1 label + uid
    Uid,
}

struct AccumulatorState {
    histogram: HistogramTable,
    continuous: ContinuousBuckets,
    wuauc: WuaucEngine,
    sampler: OrderRatioSampler,
}

/// ストリーミングメトリクスのアキュムレータ
pub struct MetricAccumulator {
    config: MetricConfig,
    thresholds: Vec<f64>,
    reducer: Arc<dyn Reducer>,
    state: Mutex<AccumulatorState>,
}

impl MetricAccumulator {
    /// 設定を検証してゼロ埋めの状態を確保する
    pub fn new(config: MetricConfig, reducer: Arc<dyn Reducer>) -> MetricResult<Self> {
        config.validate()?;
        let thresholds = config.thresholds()?;
        let state = AccumulatorState {
            histogram: HistogramTable::new(config.table_size),
            continuous: ContinuousBuckets::new(config.compute_order_ratio),
            wuauc: WuaucEngine::with_capacity(config.max_batch_size),
            sampler: OrderRatioSampler::new(config.order_ratio_pairs, config.seed),
        };
        log::debug!(
            "metric accumulator initialised: table_size={} shards={} rank={}",
            config.table_size,
            reducer.size(),
            reducer.rank()
        );
        Ok(Self {
            config,
            thresholds,
            reducer,
            state: Mutex::new(state),
        })
    }

    /// 単一ノード用
    pub fn single_node(config: MetricConfig) -> MetricResult<Self> {
        Self::new(config, Arc::new(SingleNode))
    }

    pub fn config(&self) -> &MetricConfig {
        &self.config
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    pub fn reducer(&self) -> &dyn Reducer {
        &*self.reducer
    }

    /// 途中で panic したバッチがあっても、加算済みの状態をそのまま使う
    fn lock(&self) -> MutexGuard<'_, AccumulatorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// pred + 0/1 label
    pub fn add_data(&self, preds: &[f32], labels: &[i64]) -> MetricResult<()> {
        check_len("labels", preds.len(), labels.len())?;
        let mut st = self.lock();
        for (&pred, &label) in preds.iter().zip(labels) {
            st.histogram.add(pred as f64, label)?;
        }
        Ok(())
    }

    /// pred + 0/1 label + サンプル重み
    pub fn add_sample_data(&self, preds: &[f32], labels: &[i64], scales: &[f32]) -> MetricResult<()> {
        check_len("labels", preds.len(), labels.len())?;
        check_len("sample_scale", preds.len(), scales.len())?;
        let mut st = self.lock();
        for ((&pred, &label), &scale) in preds.iter().zip(labels).zip(scales) {
            st.histogram.add_scaled(pred as f64, label, scale as f64)?;
        }
        Ok(())
    }

    /// mask が 0 のサンプルを飛ばす
    pub fn add_mask_data(&self, preds: &[f32], labels: &[i64], mask: &[i64]) -> MetricResult<()> {
        check_len("labels", preds.len(), labels.len())?;
        check_len("mask", preds.len(), mask.len())?;
        let mut st = self.lock();
        for ((&pred, &label), &m) in preds.iter().zip(labels).zip(mask) {
            if m != 0 {
                st.histogram.add(pred as f64, label)?;
            }
        }
        Ok(())
    }

    /// ソフトラベル版の [`add_mask_data`](Self::add_mask_data)
    pub fn add_float_mask_data(&self, preds: &[f32], labels: &[f32], mask: &[i64]) -> MetricResult<()> {
        check_len("labels", preds.len(), labels.len())?;
        check_len("mask", preds.len(), mask.len())?;
        let mut st = self.lock();
        for ((&pred, &label), &m) in preds.iter().zip(labels).zip(mask) {
            if m != 0 {
                st.histogram.add_soft(pred as f64, label as f64)?;
            }
        }
        Ok(())
    }

    /// 連続ラベルをバケット集計に加える。
    ///
    /// `ignore_zero_label` が真ならラベル 0 を除外する。`compute_order_ratio` が
    /// 真ならバッチの最後に order ratio を推定し直す。
    pub fn add_continue_mask_data(&self, preds: &[f32], labels: &[f32], mask: &[i64]) -> MetricResult<()> {
        check_len("labels", preds.len(), labels.len())?;
        check_len("mask", preds.len(), mask.len())?;
        let ignore_zero = self.config.ignore_zero_label;
        let mut guard = self.lock();
        let st = &mut *guard;
        for ((&pred, &label), &m) in preds.iter().zip(labels).zip(mask) {
            let label = label as f64;
            if m != 0 && (label.abs() > ZERO_LABEL_EPS || !ignore_zero) {
                st.continuous.add(pred as f64, label, &self.thresholds);
            }
        }
        if self.config.compute_order_ratio {
            st.continuous.compute_order_ratio(&mut st.sampler);
        }
        Ok(())
    }

    /// entity id 付きのレコードを WUAUC バッファに加える
    pub fn add_uid_data(&self, preds: &[f32], labels: &[i64], uids: &[u64]) -> MetricResult<()> {
        check_len("labels", preds.len(), labels.len())?;
        check_len("uids", preds.len(), uids.len())?;
        let mut st = self.lock();
        for ((&pred, &label), &uid) in preds.iter().zip(labels).zip(uids) {
            st.wuauc.add(pred as f64, label, uid)?;
        }
        Ok(())
    }

    /// [`SampleSource`] からホストにコピーしてから取り込む。
    ///
    /// コピーはロックの外で、この呼び出し専用のバッファに対して行う。
    pub fn add_source(&self, source: &dyn SampleSource, kind: BatchKind) -> MetricResult<()> {
        let mut staged = StagedBatch::with_capacity(self.config.max_batch_size.max(source.len()));
        source.copy_to_host(&mut staged)?;
        staged.check_lengths()?;
        let b = &staged;
        match kind {
            BatchKind::Plain => self.add_data(&b.predictions, &b.int_labels),
            BatchKind::Weighted => self.add_sample_data(&b.predictions, &b.int_labels, &b.weights),
            BatchKind::Mask => self.add_mask_data(&b.predictions, &b.int_labels, &b.mask),
            BatchKind::FloatMask => self.add_float_mask_data(&b.predictions, &b.float_labels, &b.mask),
            BatchKind::ContinueMask => {
                self.add_continue_mask_data(&b.predictions, &b.float_labels, &b.mask)
            }
            BatchKind::Uid => self.add_uid_data(&b.predictions, &b.int_labels, &b.uids),
        }
    }

    /// ヒストグラムから AUC 等を導出する
    pub fn compute(&self) -> MetricResult<HistogramMetrics> {
        let st = self.lock();
        let metrics = st.histogram.compute(&*self.reducer)?;
        log::debug!("compute: {metrics}");
        Ok(metrics)
    }

    /// 連続ラベルバケットの統計を導出する
    pub fn compute_continue_msg(&self) -> MetricResult<ContinuousReport> {
        let st = self.lock();
        st.continuous.finalize(&*self.reducer)
    }

    /// 連続ラベルバケットの order ratio を推定し直す
    pub fn compute_order_ratio(&self) {
        let mut guard = self.lock();
        let st = &mut *guard;
        st.continuous.compute_order_ratio(&mut st.sampler);
    }

    /// WUAUC バッファをソート・集約する
    pub fn compute_wuauc(&self) -> MetricResult<WuaucMetrics> {
        let mut st = self.lock();
        let metrics = st.wuauc.compute(&*self.reducer)?;
        log::debug!("compute_wuauc: {metrics}");
        Ok(metrics)
    }

    /// ヒストグラムと連続ラベルバケットをクリアする。WUAUC バッファは残す
    pub fn reset(&self) {
        let mut st = self.lock();
        st.histogram.reset();
        st.continuous.reset();
        log::debug!("histogram and continuous buckets reset");
    }

    /// WUAUC バッファだけをクリアする
    pub fn reset_records(&self) {
        let mut st = self.lock();
        st.wuauc.reset();
        log::debug!("wuauc records reset");
    }

    /// WUAUC バッファの件数
    pub fn record_count(&self) -> usize {
        self.lock().wuauc.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetricError;
    use crate::histogram::AUC_UNDEFINED;
    use crate::source::HostBatch;

    fn acc(table_size: usize) -> MetricAccumulator {
        MetricAccumulator::single_node(MetricConfig::with_table_size(table_size)).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let cfg = MetricConfig::with_table_size(0);
        assert!(matches!(
            MetricAccumulator::single_node(cfg),
            Err(MetricError::InvalidConfig(_))
        ));
    }

    #[test]
    fn plain_batch_counts_every_sample() {
        let a = acc(10);
        a.add_data(&[0.95, 0.91, 0.05, 0.02], &[1, 1, 0, 0]).unwrap();
        let m = a.compute().unwrap();
        assert_eq!(m.size, 4.0);
        assert_eq!(m.auc, 1.0);
    }

    #[test]
    fn invalid_sample_aborts_rest_of_batch() {
        let a = acc(10);
        let err = a.add_data(&[0.9, 0.1, 1.5, 0.2], &[1, 0, 1, 0]).unwrap_err();
        assert!(matches!(err, MetricError::InvalidPrediction { .. }));
        // 失敗した手前の 2 件は残る
        assert_eq!(a.compute().unwrap().size, 2.0);
    }

    #[test]
    fn length_mismatch_rejected_before_mutation() {
        let a = acc(10);
        assert!(matches!(
            a.add_data(&[0.9, 0.1], &[1]),
            Err(MetricError::LengthMismatch { context: "labels", .. })
        ));
        assert_eq!(a.compute().unwrap().size, 0.0);
    }

    #[test]
    fn mask_skips_zero_entries() {
        let a = acc(10);
        // mask 0 のサンプルは検証もされない
        a.add_mask_data(&[0.9, 7.0, 0.1], &[1, 5, 0], &[1, 0, 1]).unwrap();
        assert_eq!(a.compute().unwrap().size, 2.0);
    }

    #[test]
    fn float_mask_uses_soft_labels() {
        let a = acc(10);
        a.add_float_mask_data(&[0.85, 0.15, 0.5], &[0.75, 0.25, 1.0], &[1, 1, 0]).unwrap();
        let m = a.compute().unwrap();
        assert!((m.size - 2.0).abs() < 1e-12);
        assert!((m.actual_ctr - 0.5).abs() < 1e-12);
    }

    #[test]
    fn weighted_batch_scales_counts() {
        let a = acc(10);
        a.add_sample_data(&[0.9, 0.1], &[1, 0], &[2.0, 3.0]).unwrap();
        let m = a.compute().unwrap();
        assert_eq!(m.size, 5.0);
        assert!((m.predicted_ctr - (0.9f32 as f64 * 2.0 + 0.1f32 as f64 * 3.0) / 5.0).abs() < 1e-9);
    }

    #[test]
    fn continue_mask_honours_ignore_zero_label() {
        let cfg = MetricConfig {
            table_size: 10,
            continue_bucket_thr: "0.2,0.5,0.8".to_string(),
            ignore_zero_label: true,
            ..MetricConfig::default()
        };
        let a = MetricAccumulator::single_node(cfg).unwrap();
        a.add_continue_mask_data(&[0.1, 0.3, 0.6, 0.9], &[0.0, 0.19, 0.5, 0.95], &[1, 1, 1, 0])
            .unwrap();
        let report = a.compute_continue_msg().unwrap();
        let indices: Vec<usize> = report.buckets.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(report.size, 2.0);
    }

    #[test]
    fn continue_mask_keeps_zero_labels_by_default() {
        let cfg = MetricConfig {
            continue_bucket_thr: "0.2,0.5,0.8".to_string(),
            ..MetricConfig::with_table_size(10)
        };
        let a = MetricAccumulator::single_node(cfg).unwrap();
        a.add_continue_mask_data(&[0.1], &[0.0], &[1]).unwrap();
        assert_eq!(a.compute_continue_msg().unwrap().size, 1.0);
    }

    #[test]
    fn order_ratio_recomputed_per_batch() {
        let cfg = MetricConfig {
            compute_order_ratio: true,
            seed: Some(9),
            ..MetricConfig::with_table_size(10)
        };
        let a = MetricAccumulator::single_node(cfg).unwrap();
        a.add_continue_mask_data(&[0.9, 0.1], &[1.0, 0.0], &[1, 1]).unwrap();
        let report = a.compute_continue_msg().unwrap();
        assert_eq!(report.buckets[0].order_ratio, 1.0);
    }

    #[test]
    fn uid_records_and_reset_records_are_independent() {
        let a = acc(10);
        a.add_data(&[0.9, 0.1], &[1, 0]).unwrap();
        a.add_uid_data(&[0.9, 0.1], &[1, 0], &[42, 42]).unwrap();
        assert_eq!(a.record_count(), 2);
        let before = a.compute().unwrap();

        a.reset_records();
        assert_eq!(a.record_count(), 0);
        assert_eq!(a.compute().unwrap(), before);
        assert_eq!(a.compute_wuauc().unwrap().user_count, 0);
    }

    #[test]
    fn reset_keeps_wuauc_records() {
        let a = acc(10);
        a.add_data(&[0.9], &[1]).unwrap();
        a.add_uid_data(&[0.9, 0.1], &[1, 0], &[1, 1]).unwrap();
        a.reset();
        let m = a.compute().unwrap();
        assert_eq!(m.size, 0.0);
        assert_eq!(m.auc, AUC_UNDEFINED);
        assert_eq!(a.compute_wuauc().unwrap().user_count, 1);
    }

    #[test]
    fn add_source_dispatches_by_kind() {
        let a = acc(10);
        let preds = [0.9f32, 0.1, 0.6];
        let labels = [1i64, 0, 1];
        let uids = [5u64, 5, 6];
        a.add_source(&HostBatch::new(&preds).int_labels(&labels), BatchKind::Plain)
            .unwrap();
        a.add_source(
            &HostBatch::new(&preds).int_labels(&labels).uids(&uids),
            BatchKind::Uid,
        )
        .unwrap();
        assert_eq!(a.compute().unwrap().size, 3.0);
        assert_eq!(a.record_count(), 3);

        // 必要な列が無ければ長さ不一致
        let err = a.add_source(&HostBatch::new(&preds), BatchKind::Mask).unwrap_err();
        assert!(matches!(err, MetricError::LengthMismatch { .. }));
    }
}
