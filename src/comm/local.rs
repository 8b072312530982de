//! In-process backend: every rank is a thread and messages go through a shared mailbox.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use itertools::Itertools;
use log::error;
use parking_lot::{Condvar, Mutex};

use super::{check_peer, check_reduction, Communicator, Request};
use crate::{
    constants::COLLECTIVE_TAG,
    error::DomainError,
    tools::Reducible,
    types::{DataTypeCode, ReduceOp},
};

/// How long a receive waits for its message before giving up.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
struct MessageKey {
    context: u64,
    source: usize,
    dest: usize,
    tag: i32,
    collective: bool,
}

#[derive(Default)]
struct MailState {
    // Messages are stored under their key and their issue number for that key.
    messages: HashMap<(MessageKey, u64), Vec<u8>>,
    sent: HashMap<MessageKey, u64>,
    posted: HashMap<MessageKey, u64>,
    contexts: HashMap<(u64, u64, Vec<usize>), u64>,
    next_context: u64,
}

struct Mailbox {
    state: Mutex<MailState>,
    arrived: Condvar,
}

/// A set of ranks living in the current process.
pub struct LocalUniverse {
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalUniverse {
    /// Create a universe with `size` ranks.
    pub fn new(size: usize) -> Self {
        let state = MailState {
            next_context: 1,
            ..Default::default()
        };
        Self {
            size,
            mailbox: Arc::new(Mailbox {
                state: Mutex::new(state),
                arrived: Condvar::new(),
            }),
        }
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The world communicator as seen from `rank`.
    pub fn world(&self, rank: usize) -> LocalComm {
        LocalComm {
            mailbox: self.mailbox.clone(),
            context: 0,
            rank,
            size: self.size,
            splits: Cell::new(0),
        }
    }

    /// Run `f` on `size` ranks, one thread per rank, and collect the results by rank.
    ///
    /// A panic on any rank is propagated to the caller.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(LocalComm) -> R + Sync,
    {
        let universe = LocalUniverse::new(size);
        std::thread::scope(|scope| {
            let handles = (0..size)
                .map(|rank| {
                    let comm = universe.world(rank);
                    let f = &f;
                    scope.spawn(move || f(comm))
                })
                .collect_vec();

            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }
}

/// Communicator of the in-process backend.
pub struct LocalComm {
    mailbox: Arc<Mailbox>,
    context: u64,
    rank: usize,
    size: usize,
    splits: Cell<u64>,
}

/// Request of the in-process backend.
pub struct LocalRequest {
    pending: Pending,
}

enum Pending {
    // Sends are buffered, so they are complete as soon as they are issued.
    Send,
    Receive {
        mailbox: Arc<Mailbox>,
        key: MessageKey,
        seq: u64,
        len: Option<usize>,
    },
}

impl Request for LocalRequest {
    fn wait(self) -> Result<Option<Vec<u8>>, DomainError> {
        match self.pending {
            Pending::Send => Ok(None),
            Pending::Receive {
                mailbox,
                key,
                seq,
                len,
            } => {
                let deadline = Instant::now() + RECEIVE_TIMEOUT;
                let mut state = mailbox.state.lock();
                loop {
                    if let Some(data) = state.messages.remove(&(key, seq)) {
                        if let Some(len) = len {
                            if data.len() != len {
                                return Err(DomainError::MessagePassing(format!(
                                    "expected {len} bytes from rank {} with tag {}, got {}",
                                    key.source,
                                    key.tag,
                                    data.len()
                                )));
                            }
                        }
                        return Ok(Some(data));
                    }
                    if mailbox.arrived.wait_until(&mut state, deadline).timed_out() {
                        return Err(DomainError::MessagePassing(format!(
                            "timed out waiting for rank {} with tag {}",
                            key.source, key.tag
                        )));
                    }
                }
            }
        }
    }
}

impl LocalComm {
    fn key(&self, source: usize, dest: usize, tag: i32, collective: bool) -> MessageKey {
        MessageKey {
            context: self.context,
            source,
            dest,
            tag,
            collective,
        }
    }

    fn post_send(&self, dest: usize, tag: i32, collective: bool, data: Vec<u8>) {
        let key = self.key(self.rank, dest, tag, collective);
        {
            let mut state = self.mailbox.state.lock();
            let counter = state.sent.entry(key).or_insert(0);
            let seq = *counter;
            *counter += 1;
            state.messages.insert((key, seq), data);
        }
        self.mailbox.arrived.notify_all();
    }

    fn post_receive(
        &self,
        source: usize,
        tag: i32,
        collective: bool,
        len: Option<usize>,
    ) -> LocalRequest {
        let key = self.key(source, self.rank, tag, collective);
        let mut state = self.mailbox.state.lock();
        let counter = state.posted.entry(key).or_insert(0);
        let seq = *counter;
        *counter += 1;
        LocalRequest {
            pending: Pending::Receive {
                mailbox: self.mailbox.clone(),
                key,
                seq,
                len,
            },
        }
    }
}

impl Communicator for LocalComm {
    type Request = LocalRequest;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, dest: usize, tag: i32, data: Vec<u8>) -> Result<LocalRequest, DomainError> {
        check_peer(dest, tag, self.size)?;
        self.post_send(dest, tag, false, data);
        Ok(LocalRequest {
            pending: Pending::Send,
        })
    }

    fn irecv(&self, source: usize, tag: i32, len: usize) -> Result<LocalRequest, DomainError> {
        check_peer(source, tag, self.size)?;
        Ok(self.post_receive(source, tag, false, Some(len)))
    }

    fn barrier(&self) -> Result<(), DomainError> {
        self.all_gather(&[])?;
        Ok(())
    }

    fn broadcast(&self, root: usize, data: &mut Vec<u8>) -> Result<(), DomainError> {
        check_peer(root, COLLECTIVE_TAG, self.size)?;
        if self.rank == root {
            for dest in (0..self.size).filter(|&dest| dest != root) {
                self.post_send(dest, COLLECTIVE_TAG, true, data.clone());
            }
        } else if let Some(received) = self
            .post_receive(root, COLLECTIVE_TAG, true, None)
            .wait()?
        {
            *data = received;
        }
        Ok(())
    }

    fn all_gather(&self, data: &[u8]) -> Result<Vec<Vec<u8>>, DomainError> {
        for dest in (0..self.size).filter(|&dest| dest != self.rank) {
            self.post_send(dest, COLLECTIVE_TAG, true, data.to_vec());
        }

        (0..self.size)
            .map(|source| {
                if source == self.rank {
                    Ok(data.to_vec())
                } else {
                    self.post_receive(source, COLLECTIVE_TAG, true, None)
                        .wait()
                        .map(Option::unwrap_or_default)
                }
            })
            .collect()
    }

    fn gather(&self, root: usize, data: &[u8]) -> Result<Option<Vec<Vec<u8>>>, DomainError> {
        check_peer(root, COLLECTIVE_TAG, self.size)?;
        if self.rank != root {
            self.post_send(root, COLLECTIVE_TAG, true, data.to_vec());
            return Ok(None);
        }

        (0..self.size)
            .map(|source| {
                if source == root {
                    Ok(data.to_vec())
                } else {
                    self.post_receive(source, COLLECTIVE_TAG, true, None)
                        .wait()
                        .map(Option::unwrap_or_default)
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    fn all_reduce(
        &self,
        data: &[u8],
        dtype: DataTypeCode,
        op: ReduceOp,
    ) -> Result<Vec<u8>, DomainError> {
        check_reduction(data, dtype, op)?;
        let contributions = self.all_gather(data)?;

        if let Some(other) = contributions.iter().find(|other| other.len() != data.len()) {
            return Err(DomainError::MessagePassing(format!(
                "reduction over buffers of {} and {} bytes",
                data.len(),
                other.len()
            )));
        }

        Ok(match dtype {
            DataTypeCode::U8 => fold::<u8>(&contributions, op),
            DataTypeCode::I32 => fold::<i32>(&contributions, op),
            DataTypeCode::I64 => fold::<i64>(&contributions, op),
            DataTypeCode::U64 => fold::<u64>(&contributions, op),
            DataTypeCode::F32 => fold::<f32>(&contributions, op),
            DataTypeCode::F64 => fold::<f64>(&contributions, op),
        })
    }

    fn split(&self, ranks: &[usize]) -> Result<Option<Self>, DomainError> {
        if ranks.is_empty() || ranks.iter().any(|&rank| rank >= self.size) {
            return Err(DomainError::InvalidArgument(format!(
                "cannot form a communicator from ranks {ranks:?} of {}",
                self.size
            )));
        }
        if ranks.iter().duplicates().next().is_some() {
            return Err(DomainError::InvalidArgument(format!(
                "rank list {ranks:?} contains duplicates"
            )));
        }

        // All members of the parent call `split` in the same order, so the pair
        // (parent context, split number) identifies the new communicator.
        let seq = self.splits.get();
        self.splits.set(seq + 1);

        let context = {
            let mut guard = self.mailbox.state.lock();
            let state = &mut *guard;
            let key = (self.context, seq, ranks.to_vec());
            match state.contexts.get(&key) {
                Some(&context) => context,
                None => {
                    let context = state.next_context;
                    state.next_context += 1;
                    state.contexts.insert(key, context);
                    context
                }
            }
        };

        Ok(ranks
            .iter()
            .position(|&rank| rank == self.rank)
            .map(|rank| LocalComm {
                mailbox: self.mailbox.clone(),
                context,
                rank,
                size: ranks.len(),
                splits: Cell::new(0),
            }))
    }

    fn abort(&self, code: i32) -> ! {
        error!("Rank {} aborts with code {}.", self.rank, code);
        std::process::exit(code)
    }
}

/// Combine the contributions of all ranks in rank order.
///
/// Every rank folds the same buffers in the same order, so results are bitwise identical.
fn fold<T: Reducible>(contributions: &[Vec<u8>], op: ReduceOp) -> Vec<u8> {
    let mut buffers = contributions
        .iter()
        .map(|bytes| bytemuck::pod_collect_to_vec::<u8, T>(bytes));
    let first = buffers.next().unwrap_or_default();
    let result = buffers.fold(first, |mut acc, other| {
        for (value, &contribution) in acc.iter_mut().zip(other.iter()) {
            *value = value.combine(contribution, op);
        }
        acc
    });
    bytemuck::cast_slice(&result).to_vec()
}

#[cfg(test)]
mod test {
    use super::LocalUniverse;
    use crate::{
        comm::{Communicator, Request},
        types::{DataTypeCode, ReduceOp},
    };

    #[test]
    fn test_round_trip_two_ranks() {
        let results = LocalUniverse::run(2, |comm| {
            let peer = 1 - comm.rank();
            let recv = comm.irecv(peer, 7, 4).unwrap();
            let send = comm.isend(peer, 7, vec![comm.rank() as u8; 4]).unwrap();
            send.wait().unwrap();
            recv.wait().unwrap().unwrap()
        });

        assert_eq!(results[0], vec![1; 4]);
        assert_eq!(results[1], vec![0; 4]);
    }

    #[test]
    fn test_fifo_order_for_equal_tags() {
        let results = LocalUniverse::run(2, |comm| {
            if comm.rank() == 0 {
                for value in 0..10_u8 {
                    comm.isend(1, 3, vec![value]).unwrap().wait().unwrap();
                }
                Vec::new()
            } else {
                let requests = (0..10)
                    .map(|_| comm.irecv(0, 3, 1).unwrap())
                    .collect::<Vec<_>>();
                // Waiting out of order still matches in issue order.
                let mut values = requests
                    .into_iter()
                    .rev()
                    .map(|request| request.wait().unwrap().unwrap()[0])
                    .collect::<Vec<_>>();
                values.reverse();
                values
            }
        });

        assert_eq!(results[1], (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn test_size_mismatch_is_an_error() {
        let results = LocalUniverse::run(2, |comm| {
            if comm.rank() == 0 {
                comm.isend(1, 0, vec![1, 2, 3]).unwrap().wait().unwrap();
                true
            } else {
                comm.irecv(0, 0, 2).unwrap().wait().is_err()
            }
        });
        assert!(results[1]);
    }

    #[test]
    fn test_invalid_peer() {
        let universe = LocalUniverse::new(2);
        let comm = universe.world(0);
        assert!(comm.isend(2, 0, Vec::new()).is_err());
        assert!(comm.irecv(0, -1, 0).is_err());
    }

    #[test]
    fn test_collectives() {
        let results = LocalUniverse::run(3, |comm| {
            comm.barrier().unwrap();

            let mut data = if comm.rank() == 1 {
                b"hello".to_vec()
            } else {
                Vec::new()
            };
            comm.broadcast(1, &mut data).unwrap();

            let gathered = comm.all_gather(&vec![comm.rank() as u8; comm.rank()]).unwrap();
            (data, gathered)
        });

        for (data, gathered) in results {
            assert_eq!(data, b"hello".to_vec());
            assert_eq!(gathered, vec![vec![], vec![1], vec![2, 2]]);
        }
    }

    #[test]
    fn test_split() {
        let results = LocalUniverse::run(4, |comm| {
            let sub = comm.split(&[3, 1]).unwrap();
            sub.map(|sub| {
                let gathered = sub.all_gather(&[comm.rank() as u8]).unwrap();
                (sub.rank(), sub.size(), gathered)
            })
        });

        assert!(results[0].is_none());
        assert!(results[2].is_none());
        assert_eq!(results[3], Some((0, 2, vec![vec![3], vec![1]])));
        assert_eq!(results[1], Some((1, 2, vec![vec![3], vec![1]])));
    }

    #[test]
    fn test_gather_and_reduce() {
        let results = LocalUniverse::run(3, |comm| {
            let rank = comm.rank();
            let gathered = comm.gather(1, &vec![rank as u8; rank + 1]).unwrap();

            let values = [rank as i32 - 1, 2];
            let sum = comm
                .all_reduce(bytemuck::cast_slice(&values), DataTypeCode::I32, ReduceOp::Sum)
                .unwrap();
            let flag = comm
                .all_reduce(&[u8::from(rank != 2)], DataTypeCode::U8, ReduceOp::LogicalAnd)
                .unwrap();

            // Logical operators are rejected for floats, partial elements always.
            assert!(comm
                .all_reduce(&[0; 8], DataTypeCode::F64, ReduceOp::LogicalOr)
                .is_err());
            assert!(comm
                .all_reduce(&[0; 3], DataTypeCode::I32, ReduceOp::Max)
                .is_err());

            (gathered, bytemuck::pod_collect_to_vec::<u8, i32>(&sum), flag)
        });

        for (rank, (gathered, sum, flag)) in results.into_iter().enumerate() {
            if rank == 1 {
                assert_eq!(gathered, Some(vec![vec![0], vec![1, 1], vec![2, 2, 2]]));
            } else {
                assert_eq!(gathered, None);
            }
            assert_eq!(sum, vec![0, 6]);
            assert_eq!(flag, vec![0]);
        }
    }
}
