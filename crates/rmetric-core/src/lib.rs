//! # rmetric-core
//!
//! 予測ストリーム向けのオンラインメトリクスエンジン。
//!
//! ## モジュール構成
//!
//! - `histogram`: 予測値ヒストグラムによる AUC / MAE / RMSE / CTR
//! - `calibration`: バケットキャリブレーション誤差
//! - `continuous`: 連続ラベルのバケット集計
//! - `order_ratio`: 連続ラベルバケットの positive order ratio 推定
//! - `wuauc`: entity 単位 AUC（UAUC / WUAUC）
//! - `reducer`: シャード間 allreduce（単一ノード・共有メモリ・チャネル）
//! - `source`: バッチ入力のホストステージング
//! - `accumulator`: 上記をロック 1 つで束ねたアキュムレータ
//! - `registry`: 名前付きメトリクスの管理
//!

// 基本型・設定
pub mod config;
pub mod error;

// 集計
pub mod calibration;
pub mod continuous;
pub mod histogram;
pub mod order_ratio;
pub mod wuauc;

// 分散集約
pub mod reducer;

// 入力と管理
pub mod accumulator;
pub mod registry;
pub mod source;

pub use accumulator::{BatchKind, MetricAccumulator};
pub use config::MetricConfig;
pub use continuous::{ContinuousBucketStats, ContinuousReport};
pub use error::{MetricError, MetricResult};
pub use histogram::{AUC_UNDEFINED, HistogramMetrics, HistogramTable};
pub use reducer::{
    ChannelGroup, ChannelMember, ReduceError, Reducer, SharedMemoryGroup, SharedMemoryMember,
    SingleNode,
};
pub use registry::{MetricEntry, MetricKind, MetricRegistry, MetricReport};
pub use source::{HostBatch, SampleSource, StagedBatch};
pub use wuauc::{WuaucEngine, WuaucMetrics};
