//! entity（ユーザー）単位の AUC（UAUC / WUAUC）
//!
//! ヒストグラムでは entity ごとの AUC が取れないため、生レコードを溜めて
//! `compute` でソート・グループ化・集約する。
//!
//! 1. `(entity_id 降順, pred 降順, label 昇順)` でソート
//! 2. 同じ entity_id の連続区間ごとに AUC を計算（同じ予測値は 1 ステップにまとめる）
//! 3. 片方のクラスしかない entity は除外し、件数・AUC 和・件数加重 AUC 和を集計

use std::cmp::Ordering;

use serde::Serialize;

use crate::error::{MetricResult, check_label, check_prediction};
use crate::reducer::{Reducer, reduce_if_sharded};

/// 片方のクラスしかない entity の AUC センチネル
pub const ENTITY_AUC_UNDEFINED: f64 = -1.0;

const AUC_DENOM_EPS: f64 = 1e-9;

/// 生レコード
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WuaucRecord {
    pub uid: u64,
    pub label: u8,
    pub pred: f64,
}

impl WuaucRecord {
    /// ソート順: entity_id 降順 → pred 降順 → label 昇順
    fn sort_order(&self, other: &Self) -> Ordering {
        other
            .uid
            .cmp(&self.uid)
            .then_with(|| other.pred.total_cmp(&self.pred))
            .then_with(|| self.label.cmp(&other.label))
    }
}

/// 1 entity 分の ROC 集計
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityRoc {
    pub tp: f64,
    pub fp: f64,
    /// 単一クラスなら [`ENTITY_AUC_UNDEFINED`]
    pub auc: f64,
}

/// 予測値降順に並んだ 1 entity 分のレコードから AUC を求める。
///
/// 同じ予測値のレコードはまとめて 1 ステップとして積分する。
pub fn entity_auc(records: &[WuaucRecord]) -> EntityRoc {
    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut area = 0.0;
    for step in records.chunk_by(|a, b| a.pred == b.pred) {
        let positives = step.iter().filter(|r| r.label == 1).count() as f64;
        let newtp = tp + positives;
        let newfp = fp + (step.len() as f64 - positives);
        area += (newfp - fp) * (tp + newtp) / 2.0;
        tp = newtp;
        fp = newfp;
    }
    let auc = if tp > 0.0 && fp > 0.0 {
        area / (fp * tp + AUC_DENOM_EPS)
    } else {
        ENTITY_AUC_UNDEFINED
    };
    EntityRoc { tp, fp, auc }
}

/// entity 単位 AUC のレコードバッファ
#[derive(Debug, Clone, Default)]
pub struct WuaucEngine {
    records: Vec<WuaucRecord>,
}

impl WuaucEngine {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            records: Vec::with_capacity(cap),
        }
    }

    /// 1 件を検証して追加する
    pub fn add(&mut self, pred: f64, label: i64, uid: u64) -> MetricResult<()> {
        check_prediction(pred)?;
        check_label(label)?;
        self.records.push(WuaucRecord {
            uid,
            label: label as u8,
            pred,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[WuaucRecord] {
        &self.records
    }

    /// バッファを空にする（ヒストグラムとは独立）
    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// このシャードのバッファだけで集計値を求める。バッファはソートされる
    pub fn local_sums(&mut self) -> WuaucSums {
        self.records.sort_unstable_by(WuaucRecord::sort_order);
        let mut sums = WuaucSums::default();
        for entity in self.records.chunk_by(|a, b| a.uid == b.uid) {
            let roc = entity_auc(entity);
            if roc.auc == ENTITY_AUC_UNDEFINED {
                continue;
            }
            let ins_num = roc.tp + roc.fp;
            sums.user_count += 1.0;
            sums.size += ins_num;
            sums.uauc_sum += roc.auc;
            sums.wuauc_sum += roc.auc * ins_num;
        }
        sums
    }

    /// シャード間で集計値を足し合わせ、平均を導出する
    pub fn compute(&mut self, reducer: &dyn Reducer) -> MetricResult<WuaucMetrics> {
        let local = self.local_sums();
        let mut buf = local.to_array();
        reduce_if_sharded(reducer, &mut buf)?;
        Ok(WuaucSums::from_array(buf).into_metrics())
    }
}

/// 集計値（シャード間で足せる形）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WuaucSums {
    pub user_count: f64,
    pub size: f64,
    pub uauc_sum: f64,
    pub wuauc_sum: f64,
}

impl WuaucSums {
    fn to_array(self) -> [f64; 4] {
        [self.user_count, self.size, self.uauc_sum, self.wuauc_sum]
    }

    fn from_array([user_count, size, uauc_sum, wuauc_sum]: [f64; 4]) -> Self {
        Self {
            user_count,
            size,
            uauc_sum,
            wuauc_sum,
        }
    }

    /// 対象 entity が 0 件なら両平均とも 0
    pub fn into_metrics(self) -> WuaucMetrics {
        let (uauc, wuauc) = if self.user_count > 0.0 {
            (self.uauc_sum / self.user_count, self.wuauc_sum / self.size)
        } else {
            (0.0, 0.0)
        };
        WuaucMetrics {
            user_count: self.user_count as u64,
            size: self.size,
            uauc,
            wuauc,
        }
    }
}

/// UAUC / WUAUC
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WuaucMetrics {
    /// AUC が定義できた entity 数
    pub user_count: u64,
    /// それらの entity のレコード数
    pub size: f64,
    /// entity AUC の単純平均
    pub uauc: f64,
    /// entity AUC のレコード数加重平均
    pub wuauc: f64,
}

impl std::fmt::Display for WuaucMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "User Count={} INS Count={} UAUC={:.6} WUAUC={:.6}",
            self.user_count, self.size, self.uauc, self.wuauc
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::SingleNode;

    fn rec(uid: u64, pred: f64, label: u8) -> WuaucRecord {
        WuaucRecord { uid, label, pred }
    }

    #[test]
    fn sort_order_is_uid_desc_pred_desc_label_asc() {
        let mut e = WuaucEngine::default();
        e.add(0.2, 1, 1).unwrap();
        e.add(0.9, 0, 1).unwrap();
        e.add(0.9, 1, 1).unwrap();
        e.add(0.5, 0, 7).unwrap();
        e.add(0.9, 0, 1).unwrap();
        e.local_sums();
        let order: Vec<(u64, f64, u8)> = e.records().iter().map(|r| (r.uid, r.pred, r.label)).collect();
        assert_eq!(
            order,
            vec![(7, 0.5, 0), (1, 0.9, 0), (1, 0.9, 0), (1, 0.9, 1), (1, 0.2, 1)]
        );
    }

    #[test]
    fn ties_move_together() {
        // 同じ予測値の正例・負例は 1 ステップ: 面積 1 * (0 + 1) / 2 = 0.5
        let roc = entity_auc(&[rec(1, 0.7, 0), rec(1, 0.7, 1)]);
        assert_eq!(roc.tp, 1.0);
        assert_eq!(roc.fp, 1.0);
        assert!((roc.auc - 0.5).abs() < 1e-6);
    }

    #[test]
    fn ties_match_manual_coalescing() {
        // pred 降順: 0.9(+), 0.6(+,-,-), 0.3(-)
        let recs = [
            rec(1, 0.9, 1),
            rec(1, 0.6, 0),
            rec(1, 0.6, 0),
            rec(1, 0.6, 1),
            rec(1, 0.3, 0),
        ];
        // 手計算: step1 tp=1 fp=0 / step2 tp=2 fp=2 面積 2*(1+2)/2=3 / step3 fp=3 面積 1*(2+2)/2=2
        let expected = 5.0 / (3.0 * 2.0);
        let roc = entity_auc(&recs);
        assert!((roc.auc - expected).abs() < 1e-6);
        // ステップを分けて積分すると別の値になる
        assert!((roc.auc - 4.0 / 6.0).abs() > 1e-3);
    }

    #[test]
    fn single_class_entity_is_sentinel() {
        assert_eq!(entity_auc(&[rec(1, 0.4, 1), rec(1, 0.8, 1)]).auc, ENTITY_AUC_UNDEFINED);
        assert_eq!(entity_auc(&[rec(1, 0.4, 0)]).auc, ENTITY_AUC_UNDEFINED);
        assert_eq!(entity_auc(&[]).auc, ENTITY_AUC_UNDEFINED);
    }

    #[test]
    fn single_class_entities_are_excluded() {
        let mut e = WuaucEngine::default();
        // uid 1: 完全分離 (auc 1), 2 件
        e.add(0.9, 1, 1).unwrap();
        e.add(0.1, 0, 1).unwrap();
        // uid 2: 逆順 (auc 0), 4 件
        e.add(0.2, 1, 2).unwrap();
        e.add(0.3, 1, 2).unwrap();
        e.add(0.8, 0, 2).unwrap();
        e.add(0.9, 0, 2).unwrap();
        // uid 3: 正例のみ → 除外
        e.add(0.5, 1, 3).unwrap();
        e.add(0.6, 1, 3).unwrap();

        let m = e.compute(&SingleNode).unwrap();
        assert_eq!(m.user_count, 2);
        assert_eq!(m.size, 6.0);
        assert!((m.uauc - 0.5).abs() < 1e-6);
        assert!((m.wuauc - 2.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn compute_is_recomputed_wholesale() {
        let mut e = WuaucEngine::default();
        e.add(0.9, 1, 1).unwrap();
        e.add(0.1, 0, 1).unwrap();
        let first = e.compute(&SingleNode).unwrap();
        let second = e.compute(&SingleNode).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.user_count, 1);
    }

    #[test]
    fn uid_zero_is_an_ordinary_entity() {
        let mut e = WuaucEngine::default();
        e.add(0.9, 1, 0).unwrap();
        e.add(0.1, 0, 0).unwrap();
        let m = e.compute(&SingleNode).unwrap();
        assert_eq!(m.user_count, 1);
    }

    #[test]
    fn empty_buffer_yields_zero_means() {
        let mut e = WuaucEngine::default();
        let m = e.compute(&SingleNode).unwrap();
        assert_eq!(m, WuaucMetrics { user_count: 0, size: 0.0, uauc: 0.0, wuauc: 0.0 });
    }

    #[test]
    fn invalid_records_are_rejected() {
        let mut e = WuaucEngine::default();
        assert!(e.add(1.2, 1, 1).is_err());
        assert!(e.add(0.5, 3, 1).is_err());
        assert!(e.is_empty());
    }
}
