//! メトリクス設定
//!
//! TOML から読み込む。未指定の項目は `Default` の値になる。
//!
//! ```toml
//! table_size = 1000000
//! continue_bucket_thr = "0.2,0.5,0.8"
//! ignore_zero_label = true
//! compute_order_ratio = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::continuous::CONTINUE_BUCKET_NUM;
use crate::error::{MetricError, MetricResult};

/// order ratio サンプラーの既定ドロー数
pub const DEFAULT_ORDER_RATIO_PAIRS: usize = 10_000;

/// 1 アキュムレータ分の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// ヒストグラムの分解能（予測値のバケット数）
    pub table_size: usize,
    /// バッチサイズの見込み。ステージングバッファの事前確保にのみ使う
    pub max_batch_size: usize,
    /// 連続ラベル用バケットの閾値（カンマ区切り、昇順）
    pub continue_bucket_thr: String,
    /// ラベルが 0 のサンプルを連続ラベル集計から除外する
    pub ignore_zero_label: bool,
    /// 連続ラベル集計でバッチごとに order ratio を再計算する
    pub compute_order_ratio: bool,
    /// order ratio の 1 バケットあたりのドロー数
    pub order_ratio_pairs: usize,
    /// order ratio サンプラーのシード（未指定ならスレッド RNG から取る）
    pub seed: Option<u64>,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            table_size: 1_000_000,
            max_batch_size: 0,
            continue_bucket_thr: String::new(),
            ignore_zero_label: false,
            compute_order_ratio: false,
            order_ratio_pairs: DEFAULT_ORDER_RATIO_PAIRS,
            seed: None,
        }
    }
}

impl MetricConfig {
    /// `table_size` だけを指定した設定
    pub fn with_table_size(table_size: usize) -> Self {
        Self {
            table_size,
            ..Self::default()
        }
    }

    /// TOML 文字列から読み込み、検証する
    pub fn from_toml_str(src: &str) -> MetricResult<Self> {
        let cfg: Self = toml::from_str(src)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// TOML ファイルから読み込み、検証する
    pub fn load<P: AsRef<Path>>(path: P) -> MetricResult<Self> {
        let src = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&src)
    }

    pub fn validate(&self) -> MetricResult<()> {
        if self.table_size == 0 {
            return Err(MetricError::InvalidConfig(
                "table_size must be greater than zero".to_string(),
            ));
        }
        if self.order_ratio_pairs == 0 {
            return Err(MetricError::InvalidConfig(
                "order_ratio_pairs must be greater than zero".to_string(),
            ));
        }
        self.thresholds().map(|_| ())
    }

    /// 連続ラベル用バケット閾値を解析する
    pub fn thresholds(&self) -> MetricResult<Vec<f64>> {
        parse_thresholds(&self.continue_bucket_thr)
    }
}

/// `"0.2,0.5,0.8"` 形式の閾値リストを解析する。
///
/// 空文字列は空リスト（全ラベルがバケット 0）。
/// 閾値は有限・狭義昇順で、最後のバケットを残すため `CONTINUE_BUCKET_NUM - 1` 個まで。
pub fn parse_thresholds(src: &str) -> MetricResult<Vec<f64>> {
    let mut out = Vec::new();
    for token in src.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let v: f64 = token.parse().map_err(|_| {
            MetricError::InvalidConfig(format!("continue_bucket_thr: cannot parse {token:?}"))
        })?;
        if !v.is_finite() {
            return Err(MetricError::InvalidConfig(format!(
                "continue_bucket_thr: threshold must be finite, got {v}"
            )));
        }
        if let Some(&prev) = out.last() {
            if v <= prev {
                return Err(MetricError::InvalidConfig(format!(
                    "continue_bucket_thr must be ascending: {prev} then {v}"
                )));
            }
        }
        out.push(v);
    }
    if out.len() >= CONTINUE_BUCKET_NUM {
        return Err(MetricError::InvalidConfig(format!(
            "continue_bucket_thr has {} thresholds, at most {} allowed",
            out.len(),
            CONTINUE_BUCKET_NUM - 1
        )));
    }
    Ok(out)
}
