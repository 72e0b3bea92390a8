//! エラー型
//!
//! 入力の前提条件違反（予測値・ラベル・バケット位置）と、
//! 集約トランスポート（allreduce）の失敗を区別する。
//! 統計的な縮退（全件 click、単一クラスの entity 等）はエラーにせず、
//! センチネル値で表現する。

use crate::reducer::ReduceError;

/// メトリクス計算のエラー
#[derive(thiserror::Error, Debug)]
pub enum MetricError {
    /// 予測値が [0, 1] の範囲外
    #[error("pred should be in [0, 1], pred={pred}")]
    InvalidPrediction { pred: f64 },

    /// ハードラベルが 0/1 以外
    #[error("label must be equal to 0 or 1, but its value is: {label}")]
    InvalidLabel { label: i64 },

    /// ソフトラベルが [0, 1] の範囲外
    #[error("soft label should be in [0, 1], label={label}")]
    InvalidSoftLabel { label: f64 },

    /// サンプル重みが負または NaN
    #[error("sample_scale must be non-negative, got {scale}")]
    InvalidSampleScale { scale: f64 },

    /// 計算したバケット位置がテーブル外
    #[error("pos must be in [0, {table_size}), but its value is: {pos}")]
    BucketOutOfRange { pos: i64, table_size: usize },

    /// バッチ内の配列長が一致しない
    #[error("{context} length mismatch: expected {expected}, got {got}")]
    LengthMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    /// 設定値が不正
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// レジストリに存在しないメトリクス名
    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    /// レジストリに同名のメトリクスが既にある
    #[error("metric already registered: {0}")]
    DuplicateMetric(String),

    /// allreduce の失敗（リトライしない）
    #[error(transparent)]
    Reduce(#[from] ReduceError),

    /// File I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// 設定ファイルの TOML 解析エラー
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// Result type for metric operations
pub type MetricResult<T> = Result<T, MetricError>;

/// 予測値の範囲チェック。NaN も弾く。
#[inline]
pub(crate) fn check_prediction(pred: f64) -> MetricResult<()> {
    if (0.0..=1.0).contains(&pred) {
        Ok(())
    } else {
        Err(MetricError::InvalidPrediction { pred })
    }
}

/// ハードラベルのチェック（`label * label == label`）
#[inline]
pub(crate) fn check_label(label: i64) -> MetricResult<()> {
    if label == 0 || label == 1 {
        Ok(())
    } else {
        Err(MetricError::InvalidLabel { label })
    }
}

/// バッチ内の補助配列の長さを予測値配列に揃える
#[inline]
pub(crate) fn check_len(context: &'static str, expected: usize, got: usize) -> MetricResult<()> {
    if expected == got {
        Ok(())
    } else {
        Err(MetricError::LengthMismatch {
            context,
            expected,
            got,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prediction_bounds_are_inclusive() {
        assert!(check_prediction(0.0).is_ok());
        assert!(check_prediction(1.0).is_ok());
        assert!(check_prediction(-1e-9).is_err());
        assert!(check_prediction(1.0 + 1e-9).is_err());
        assert!(check_prediction(f64::NAN).is_err());
    }

    #[test]
    fn label_must_be_binary() {
        assert!(check_label(0).is_ok());
        assert!(check_label(1).is_ok());
        let err = check_label(2).unwrap_err();
        assert_eq!(err.to_string(), "label must be equal to 0 or 1, but its value is: 2");
        assert!(check_label(-1).is_err());
    }

    #[test]
    fn length_mismatch_message() {
        let err = check_len("labels", 4, 3).unwrap_err();
        assert_eq!(err.to_string(), "labels length mismatch: expected 4, got 3");
    }
}
