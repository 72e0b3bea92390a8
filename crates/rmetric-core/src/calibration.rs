//! バケット較正誤差（bucket error）
//!
//! 予測 CTR の昇順にバケットを走査し、統計的に安定するまで隣接バケットを
//! 1 つの窓にまとめる。窓は固定幅ではなくデータ量で決まる。
//!
//! 窓の中では表示数・CTR 加重表示数・クリック数を積み上げ、
//! 調整 CTR の相対誤差 `sqrt((1 - ctr) / (ctr * impressions))` が
//! [`K_RELATIVE_ERROR_BOUND`] を下回った時点で `|actual / adjusted - 1|` を
//! 表示数で重み付けして記録し、窓を閉じる。

/// 窓のアンカー CTR からこれ以上離れたバケットで窓を張り直す
pub const K_MAX_SPAN: f64 = 0.01;

/// 窓を安定とみなす相対誤差の上限
pub const K_RELATIVE_ERROR_BOUND: f64 = 0.05;

/// 窓が開いていないことを表すアンカー値
const NO_ANCHOR: f64 = -1.0;

#[derive(Default)]
struct Window {
    impressions: f64,
    ctr_mass: f64,
    clicks: f64,
}

/// 負例・正例のバケット列から較正誤差を求める。
///
/// 安定した窓が 1 つもなければ 0 を返す。
pub fn bucket_error(neg: &[f64], pos: &[f64]) -> f64 {
    debug_assert_eq!(neg.len(), pos.len());
    let table_size = neg.len();
    let mut anchor = NO_ANCHOR;
    let mut window = Window::default();
    let mut error_sum = 0.0;
    let mut error_count = 0.0;

    for (i, (&n, &p)) in neg.iter().zip(pos).enumerate() {
        let show = n + p;
        let ctr = i as f64 / table_size as f64;
        if (ctr - anchor).abs() > K_MAX_SPAN {
            anchor = ctr;
            window = Window::default();
        }
        window.impressions += show;
        window.ctr_mass += ctr * show;
        window.clicks += p;

        let adjust_ctr = window.ctr_mass / window.impressions;
        let relative_error = ((1.0 - adjust_ctr) / (adjust_ctr * window.impressions)).sqrt();
        // 表示 0 や CTR 0 の窓では NaN / inf になり、ここを通らない
        if relative_error < K_RELATIVE_ERROR_BOUND {
            let actual_ctr = window.clicks / window.impressions;
            let relative_ctr_error = (actual_ctr / adjust_ctr - 1.0).abs();
            error_sum += relative_ctr_error * window.impressions;
            error_count += window.impressions;
            anchor = NO_ANCHOR;
        }
    }

    if error_count > 0.0 {
        error_sum / error_count
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_has_zero_error() {
        assert_eq!(bucket_error(&[0.0; 10], &[0.0; 10]), 0.0);
    }

    #[test]
    fn sparse_table_never_stabilises() {
        let mut neg = vec![0.0; 100];
        let mut pos = vec![0.0; 100];
        neg[50] = 3.0;
        pos[50] = 2.0;
        assert_eq!(bucket_error(&neg, &pos), 0.0);
    }

    #[test]
    fn perfectly_calibrated_bucket_has_zero_error() {
        // バケット 50 (ctr=0.5) に 1000 表示・500 クリック
        // 相対誤差 sqrt(0.5 / (0.5 * 1000)) ≈ 0.0316 < 0.05
        let mut neg = vec![0.0; 100];
        let mut pos = vec![0.0; 100];
        neg[50] = 500.0;
        pos[50] = 500.0;
        assert!(bucket_error(&neg, &pos).abs() < 1e-12);
    }

    #[test]
    fn miscalibrated_bucket_reports_relative_error() {
        let mut neg = vec![0.0; 100];
        let mut pos = vec![0.0; 100];
        neg[50] = 400.0;
        pos[50] = 600.0;
        // actual 0.6 / adjusted 0.5 - 1 = 0.2
        assert!((bucket_error(&neg, &pos) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn errors_are_weighted_by_impressions() {
        let mut neg = vec![0.0; 100];
        let mut pos = vec![0.0; 100];
        // バケット 50: 誤差 0.2、1000 表示
        neg[50] = 400.0;
        pos[50] = 600.0;
        // バケット 80: 誤差 0、3000 表示（相対誤差 sqrt(0.2/(0.8*3000)) ≈ 0.0091）
        neg[80] = 600.0;
        pos[80] = 2400.0;
        let expected = (0.2 * 1000.0) / 4000.0;
        assert!((bucket_error(&neg, &pos) - expected).abs() < 1e-12);
    }
}
