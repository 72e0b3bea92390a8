//! シャード間集約（allreduce）
//!
//! アキュムレータは集約バックエンドを知らず、[`Reducer`] だけに依存する。
//!
//! - [`SingleNode`]: 単一ノード。集約しない
//! - [`SharedMemoryGroup`]: 同一プロセス内のスレッド間 collective（バリア方式）
//! - [`ChannelGroup`]: rank 0 を root とする star 型 collective（channel 方式）
//!
//! MPI や gloo 等の外部トランスポートはこの trait を実装して差し込む。
//!
//! # 呼び出し規約
//!
//! allreduce は全シャードを同期させるバリアでもある。全シャードが同じ回数・
//! 同じ順序・同じ長さで呼ばなければならない。崩れた場合はデッドロックするか、
//! 検出できた範囲で [`ReduceError`] を返す。失敗はリトライしない。

mod channel;
mod shared;

pub use channel::{ChannelGroup, ChannelMember};
pub use shared::{SharedMemoryGroup, SharedMemoryMember};

/// 集約トランスポートのエラー
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReduceError {
    /// 他シャードとの接続が切れた
    #[error("reducer peer disconnected")]
    Disconnected,

    /// シャード間でバッファ長が一致しない
    #[error("allreduce length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    /// 他シャードの失敗によりグループが使用不能
    #[error("reducer group aborted by a failed peer")]
    Aborted,

    /// 内部ロックが poison された
    #[error("reducer state poisoned")]
    Poisoned,
}

/// シャード間の和を取る collective
pub trait Reducer: Send + Sync {
    /// グループ内のシャード数
    fn size(&self) -> usize;

    /// このシャードの rank（0 始まり）
    fn rank(&self) -> usize {
        0
    }

    /// `buf` を全シャードの要素ごとの和で上書きする
    fn allreduce_sum(&self, buf: &mut [f64]) -> Result<(), ReduceError>;
}

/// 単一ノード用。何もしない
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleNode;

impl Reducer for SingleNode {
    fn size(&self) -> usize {
        1
    }

    fn allreduce_sum(&self, _buf: &mut [f64]) -> Result<(), ReduceError> {
        Ok(())
    }
}

/// シャード数が 1 なら集約を省略する
pub(crate) fn reduce_if_sharded(reducer: &dyn Reducer, buf: &mut [f64]) -> Result<(), ReduceError> {
    if reducer.size() > 1 {
        reducer.allreduce_sum(buf)?;
    }
    Ok(())
}
