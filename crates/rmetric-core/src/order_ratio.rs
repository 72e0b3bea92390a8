//! 連続ラベルバケットの positive order ratio
//!
//! バケット内の生ペア `(pred, label)` から 2 件を復元抽出し、予測値の大小と
//! ラベルの大小が一致する割合を Monte-Carlo で推定する。
//! ラベルが（`LABEL_TIE_EPS` 以内で）等しいドローは分子・分母のどちらにも
//! 数えない。捨てた分の補正はしないため、有効ドロー数はドロー数を下回る。

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

/// ラベルが等しいとみなす幅
pub const LABEL_TIE_EPS: f64 = 1e-5;

/// 固定ドロー数の復元抽出サンプラー
pub struct OrderRatioSampler {
    rng: Xoshiro256PlusPlus,
    draws: usize,
}

impl OrderRatioSampler {
    /// `seed` が `None` ならスレッド RNG からシードを取る
    pub fn new(draws: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_rng(&mut rand::rng()),
        };
        Self { rng, draws }
    }

    pub fn draws(&self) -> usize {
        self.draws
    }

    /// 1 バケット分の比率を推定する。
    ///
    /// ペアが空、または全ドローがラベル同値で捨てられた場合は `None`。
    pub fn ratio(&mut self, pairs: &[(f64, f64)]) -> Option<f64> {
        if pairs.is_empty() {
            return None;
        }
        let mut concordant = 0u64;
        let mut discordant = 0u64;
        for _ in 0..self.draws {
            let (pred1, label1) = pairs[self.rng.random_range(0..pairs.len())];
            let (pred2, label2) = pairs[self.rng.random_range(0..pairs.len())];
            if (label1 - label2).abs() < LABEL_TIE_EPS {
                continue;
            }
            if (pred1 > pred2 && label1 > label2) || (pred1 < pred2 && label1 < label2) {
                concordant += 1;
            } else {
                discordant += 1;
            }
        }
        let informative = concordant + discordant;
        if informative == 0 {
            None
        } else {
            Some(concordant as f64 / informative as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_concordant_pairs_always_give_one() {
        let pairs = [(0.9, 1.0), (0.1, 0.0)];
        for seed in 0..20 {
            let mut s = OrderRatioSampler::new(10_000, Some(seed));
            assert_eq!(s.ratio(&pairs), Some(1.0));
        }
        let mut s = OrderRatioSampler::new(10_000, None);
        assert_eq!(s.ratio(&pairs), Some(1.0));
    }

    #[test]
    fn reversed_pairs_give_zero() {
        let pairs = [(0.1, 1.0), (0.9, 0.0)];
        let mut s = OrderRatioSampler::new(1_000, Some(7));
        assert_eq!(s.ratio(&pairs), Some(0.0));
    }

    #[test]
    fn equal_predictions_count_as_discordant() {
        let pairs = [(0.5, 1.0), (0.5, 0.0)];
        let mut s = OrderRatioSampler::new(1_000, Some(3));
        assert_eq!(s.ratio(&pairs), Some(0.0));
    }

    #[test]
    fn label_ties_are_discarded() {
        let pairs = [(0.1, 0.5), (0.9, 0.5 + 1e-6)];
        let mut s = OrderRatioSampler::new(1_000, Some(11));
        assert_eq!(s.ratio(&pairs), None);
        assert_eq!(s.ratio(&[]), None);
    }

    #[test]
    fn same_seed_is_reproducible() {
        let pairs: Vec<(f64, f64)> = (0..50)
            .map(|i| ((i * 37 % 50) as f64 / 50.0, i as f64 / 50.0))
            .collect();
        let a = OrderRatioSampler::new(5_000, Some(42)).ratio(&pairs);
        let b = OrderRatioSampler::new(5_000, Some(42)).ratio(&pairs);
        assert_eq!(a, b);
        let r = a.unwrap();
        assert!((0.0..=1.0).contains(&r));
    }
}
