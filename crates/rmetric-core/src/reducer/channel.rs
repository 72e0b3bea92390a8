//! channel 経由の star 型 allreduce
//!
//! rank 0 が root。他 rank は寄与を root に送り、root が合計して全員に返す。
//! 各 rank は結果を受け取るまで次の寄与を送らないため、ラウンドは混ざらない。

use crossbeam_channel::{Receiver, Sender, unbounded};

use super::{ReduceError, Reducer};

type Reply = Result<Vec<f64>, ReduceError>;

enum Role {
    Root {
        inbox: Receiver<(usize, Vec<f64>)>,
        replies: Vec<Sender<Reply>>,
    },
    Leaf {
        to_root: Sender<(usize, Vec<f64>)>,
        reply: Receiver<Reply>,
    },
}

/// star 型 collective グループ
pub struct ChannelGroup;

impl ChannelGroup {
    /// `size` 人分のメンバーを作る。戻り値の先頭が root（rank 0）
    pub fn new(size: usize) -> Vec<ChannelMember> {
        assert!(size > 0, "group size must be positive");
        let (to_root, inbox) = unbounded();
        let mut replies = Vec::with_capacity(size - 1);
        let mut leaves = Vec::with_capacity(size - 1);
        for rank in 1..size {
            let (tx, rx) = unbounded();
            replies.push(tx);
            leaves.push(ChannelMember {
                rank,
                size,
                role: Role::Leaf {
                    to_root: to_root.clone(),
                    reply: rx,
                },
            });
        }
        let mut members = Vec::with_capacity(size);
        members.push(ChannelMember {
            rank: 0,
            size,
            role: Role::Root { inbox, replies },
        });
        members.extend(leaves);
        members
    }
}

/// [`ChannelGroup`] の 1 メンバー
pub struct ChannelMember {
    rank: usize,
    size: usize,
    role: Role,
}

impl ChannelMember {
    fn reduce_at_root(
        &self,
        inbox: &Receiver<(usize, Vec<f64>)>,
        replies: &[Sender<Reply>],
        buf: &mut [f64],
    ) -> Result<(), ReduceError> {
        let mut failure = None;
        for _ in 1..self.size {
            let (_rank, part) = inbox.recv().map_err(|_| ReduceError::Disconnected)?;
            if part.len() != buf.len() {
                failure.get_or_insert(ReduceError::LengthMismatch {
                    expected: buf.len(),
                    got: part.len(),
                });
                continue;
            }
            for (a, b) in buf.iter_mut().zip(part) {
                *a += b;
            }
        }

        let reply: Reply = match &failure {
            Some(_) => Err(ReduceError::Aborted),
            None => Ok(buf.to_vec()),
        };
        for tx in replies {
            tx.send(reply.clone()).map_err(|_| ReduceError::Disconnected)?;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Reducer for ChannelMember {
    fn size(&self) -> usize {
        self.size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn allreduce_sum(&self, buf: &mut [f64]) -> Result<(), ReduceError> {
        match &self.role {
            Role::Root { inbox, replies } => self.reduce_at_root(inbox, replies, buf),
            Role::Leaf { to_root, reply } => {
                to_root
                    .send((self.rank, buf.to_vec()))
                    .map_err(|_| ReduceError::Disconnected)?;
                let total = reply.recv().map_err(|_| ReduceError::Disconnected)??;
                if total.len() != buf.len() {
                    return Err(ReduceError::LengthMismatch {
                        expected: buf.len(),
                        got: total.len(),
                    });
                }
                buf.copy_from_slice(&total);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn root_is_rank_zero() {
        let members = ChannelGroup::new(3);
        let ranks: Vec<usize> = members.iter().map(|m| m.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert!(members.iter().all(|m| m.size() == 3));
    }

    #[test]
    fn sums_across_threads() {
        let members = ChannelGroup::new(3);
        let handles: Vec<_> = members
            .into_iter()
            .map(|m| {
                thread::spawn(move || {
                    let mut first = vec![1.0, m.rank() as f64];
                    m.allreduce_sum(&mut first).unwrap();
                    let mut second = vec![10.0];
                    m.allreduce_sum(&mut second).unwrap();
                    (first, second)
                })
            })
            .collect();
        for h in handles {
            let (first, second) = h.join().unwrap();
            assert_eq!(first, vec![3.0, 3.0]);
            assert_eq!(second, vec![30.0]);
        }
    }

    #[test]
    fn dropped_root_disconnects_leaves() {
        let mut members = ChannelGroup::new(2);
        let leaf = members.pop().unwrap();
        drop(members);
        let mut buf = [1.0];
        assert_eq!(leaf.allreduce_sum(&mut buf), Err(ReduceError::Disconnected));
    }
}
