//! バッチ入力の受け渡し
//!
//! アキュムレータはホストメモリ上のスライスしか扱わない。デバイス上の配列を
//! 持つ呼び出し側は [`SampleSource`] を実装し、`copy_to_host` の中で
//! [`StagedBatch`] へ同期コピーする。ステージングはロックを取る前に、
//! 呼び出しごとに確保したバッファで行うため、別スレッドの呼び出し同士が
//! ステージング領域で競合しない。

use crate::error::{MetricResult, check_len};

/// ホストにコピー済みのバッチ。使わない列は空のまま
#[derive(Debug, Default, Clone)]
pub struct StagedBatch {
    pub predictions: Vec<f32>,
    pub int_labels: Vec<i64>,
    pub float_labels: Vec<f32>,
    pub mask: Vec<i64>,
    pub weights: Vec<f32>,
    pub uids: Vec<u64>,
}

impl StagedBatch {
    /// `cap` 件分を事前確保したバッファ
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            predictions: Vec::with_capacity(cap),
            int_labels: Vec::with_capacity(cap),
            float_labels: Vec::with_capacity(cap),
            mask: Vec::with_capacity(cap),
            weights: Vec::with_capacity(cap),
            uids: Vec::with_capacity(cap),
        }
    }

    pub fn clear(&mut self) {
        self.predictions.clear();
        self.int_labels.clear();
        self.float_labels.clear();
        self.mask.clear();
        self.weights.clear();
        self.uids.clear();
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    /// 埋まっている列の長さが予測値列と揃っているか
    pub fn check_lengths(&self) -> MetricResult<()> {
        let n = self.predictions.len();
        for (context, len) in [
            ("int_labels", self.int_labels.len()),
            ("float_labels", self.float_labels.len()),
            ("mask", self.mask.len()),
            ("weights", self.weights.len()),
            ("uids", self.uids.len()),
        ] {
            if len != 0 {
                check_len(context, n, len)?;
            }
        }
        Ok(())
    }
}

/// バッチの供給元
pub trait SampleSource {
    /// バッチ件数
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `staged` に全列をホストコピーする。`staged` は空の状態で渡される
    fn copy_to_host(&self, staged: &mut StagedBatch) -> MetricResult<()>;
}

/// ホスト上のスライスを束ねた [`SampleSource`]
#[derive(Debug, Clone, Copy, Default)]
pub struct HostBatch<'a> {
    predictions: &'a [f32],
    int_labels: &'a [i64],
    float_labels: &'a [f32],
    mask: &'a [i64],
    weights: &'a [f32],
    uids: &'a [u64],
}

impl<'a> HostBatch<'a> {
    pub fn new(predictions: &'a [f32]) -> Self {
        Self {
            predictions,
            ..Self::default()
        }
    }

    pub fn int_labels(mut self, labels: &'a [i64]) -> Self {
        self.int_labels = labels;
        self
    }

    pub fn float_labels(mut self, labels: &'a [f32]) -> Self {
        self.float_labels = labels;
        self
    }

    pub fn mask(mut self, mask: &'a [i64]) -> Self {
        self.mask = mask;
        self
    }

    pub fn weights(mut self, weights: &'a [f32]) -> Self {
        self.weights = weights;
        self
    }

    pub fn uids(mut self, uids: &'a [u64]) -> Self {
        self.uids = uids;
        self
    }
}

impl SampleSource for HostBatch<'_> {
    fn len(&self) -> usize {
        self.predictions.len()
    }

    fn copy_to_host(&self, staged: &mut StagedBatch) -> MetricResult<()> {
        staged.predictions.extend_from_slice(self.predictions);
        staged.int_labels.extend_from_slice(self.int_labels);
        staged.float_labels.extend_from_slice(self.float_labels);
        staged.mask.extend_from_slice(self.mask);
        staged.weights.extend_from_slice(self.weights);
        staged.uids.extend_from_slice(self.uids);
        Ok(())
    }
}
