//! 同一プロセス内のスレッド間 allreduce
//!
//! 全メンバーが 1 つの加算バッファを共有する。最後に到着したメンバーが
//! 結果を確定し、全員が結果を読み終えるまで次のラウンドを開始させない。

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use super::{ReduceError, Reducer};

#[derive(Debug, PartialEq, Eq)]
enum Phase {
    /// 寄与を受け付け中
    Collecting,
    /// 結果の読み出し中
    Draining,
}

#[derive(Debug)]
struct RoundState {
    phase: Phase,
    acc: Vec<f64>,
    arrived: usize,
    remaining: usize,
    generation: u64,
    failed: bool,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    state: Mutex<RoundState>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, RoundState>, ReduceError> {
        self.state.lock().map_err(|_| ReduceError::Poisoned)
    }

    fn wait<'a>(
        &self,
        guard: MutexGuard<'a, RoundState>,
    ) -> Result<MutexGuard<'a, RoundState>, ReduceError> {
        self.cv.wait(guard).map_err(|_| ReduceError::Poisoned)
    }
}

/// バリア方式の collective グループ
pub struct SharedMemoryGroup;

impl SharedMemoryGroup {
    /// `size` 人分のメンバーを作る。各メンバーを 1 シャード（スレッド）に渡す
    pub fn new(size: usize) -> Vec<SharedMemoryMember> {
        assert!(size > 0, "group size must be positive");
        let shared = Arc::new(Shared {
            size,
            state: Mutex::new(RoundState {
                phase: Phase::Collecting,
                acc: Vec::new(),
                arrived: 0,
                remaining: 0,
                generation: 0,
                failed: false,
            }),
            cv: Condvar::new(),
        });
        (0..size)
            .map(|rank| SharedMemoryMember {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

/// [`SharedMemoryGroup`] の 1 メンバー
#[derive(Debug)]
pub struct SharedMemoryMember {
    rank: usize,
    shared: Arc<Shared>,
}

impl Reducer for SharedMemoryMember {
    fn size(&self) -> usize {
        self.shared.size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn allreduce_sum(&self, buf: &mut [f64]) -> Result<(), ReduceError> {
        let shared = &*self.shared;
        let mut st = shared.lock()?;

        // 前ラウンドの読み出しが終わるまで待つ
        while st.phase == Phase::Draining && !st.failed {
            st = shared.wait(st)?;
        }
        if st.failed {
            return Err(ReduceError::Aborted);
        }

        if st.arrived == 0 {
            st.acc.clear();
            st.acc.extend_from_slice(buf);
        } else if st.acc.len() != buf.len() {
            let expected = st.acc.len();
            st.failed = true;
            shared.cv.notify_all();
            return Err(ReduceError::LengthMismatch {
                expected,
                got: buf.len(),
            });
        } else {
            for (a, &b) in st.acc.iter_mut().zip(buf.iter()) {
                *a += b;
            }
        }
        st.arrived += 1;

        if st.arrived == shared.size {
            st.phase = Phase::Draining;
            st.remaining = shared.size;
            st.generation = st.generation.wrapping_add(1);
            shared.cv.notify_all();
        } else {
            let generation = st.generation;
            while st.generation == generation && !st.failed {
                st = shared.wait(st)?;
            }
            if st.failed {
                return Err(ReduceError::Aborted);
            }
        }

        buf.copy_from_slice(&st.acc);
        st.remaining -= 1;
        if st.remaining == 0 {
            st.phase = Phase::Collecting;
            st.arrived = 0;
            shared.cv.notify_all();
        }
        Ok(())
    }
}
