//! MPI backend.

use bytemuck::Pod;
use itertools::{izip, Itertools};
use log::error;
use mpi::{
    collective::SystemOperation,
    datatype::PartitionMut,
    request::StaticScope,
    topology::{Color, SimpleCommunicator},
    traits::{
        Communicator as _, CommunicatorCollectives, Destination, Equivalence, Root, Source,
    },
};

use super::{check_peer, check_reduction, Communicator, Request};
use crate::{
    error::DomainError,
    tools::displacements,
    types::{DataTypeCode, ReduceOp},
};

/// The MPI operator of each reduction.
fn system_operation(op: ReduceOp) -> SystemOperation {
    match op {
        ReduceOp::Max => SystemOperation::max(),
        ReduceOp::Min => SystemOperation::min(),
        ReduceOp::Sum => SystemOperation::sum(),
        ReduceOp::Prod => SystemOperation::product(),
        ReduceOp::LogicalAnd => SystemOperation::logical_and(),
        ReduceOp::LogicalOr => SystemOperation::logical_or(),
    }
}

/// Split a gathered buffer into the contributions of the individual ranks.
fn split_buffer(buffer: &[u8], counts: &[i32], displs: &[i32]) -> Vec<Vec<u8>> {
    izip!(counts.iter(), displs.iter())
        .map(|(&count, &displ)| buffer[displ as usize..(displ + count) as usize].to_vec())
        .collect()
}

/// Communicator backed by an MPI communicator.
pub struct MpiComm {
    comm: SimpleCommunicator,
}

impl MpiComm {
    /// Wrap an MPI communicator.
    pub fn new(comm: SimpleCommunicator) -> Self {
        Self { comm }
    }

    /// The wrapped MPI communicator.
    pub fn raw(&self) -> &SimpleCommunicator {
        &self.comm
    }

    fn reduce_typed<T: Pod + Equivalence>(
        &self,
        data: &[u8],
        operation: SystemOperation,
    ) -> Vec<u8> {
        let send = bytemuck::pod_collect_to_vec::<u8, T>(data);
        let mut recv = bytemuck::zeroed_vec::<T>(send.len());
        self.comm.all_reduce_into(&send[..], &mut recv[..], operation);
        bytemuck::cast_slice(&recv).to_vec()
    }
}

/// Request of the MPI backend.
///
/// The message buffer is owned by the request until it is waited on.
#[must_use]
pub struct MpiRequest {
    finish: Box<dyn FnOnce() -> Result<Option<Vec<u8>>, DomainError>>,
}

impl Request for MpiRequest {
    fn wait(self) -> Result<Option<Vec<u8>>, DomainError> {
        (self.finish)()
    }
}

impl Communicator for MpiComm {
    type Request = MpiRequest;

    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn isend(&self, dest: usize, tag: i32, data: Vec<u8>) -> Result<MpiRequest, DomainError> {
        check_peer(dest, tag, self.size())?;

        // The buffer must outlive the request, so it is released only after the wait.
        let raw: *mut [u8] = Box::into_raw(data.into_boxed_slice());
        let buffer: &'static [u8] = unsafe { &*raw };
        let request = self
            .comm
            .process_at_rank(dest as i32)
            .immediate_send_with_tag(StaticScope, buffer, tag);

        Ok(MpiRequest {
            finish: Box::new(move || {
                request.wait();
                drop(unsafe { Box::from_raw(raw) });
                Ok(None)
            }),
        })
    }

    fn irecv(&self, source: usize, tag: i32, len: usize) -> Result<MpiRequest, DomainError> {
        check_peer(source, tag, self.size())?;

        let raw: *mut [u8] = Box::into_raw(vec![0_u8; len].into_boxed_slice());
        let buffer: &'static mut [u8] = unsafe { &mut *raw };
        let request = self
            .comm
            .process_at_rank(source as i32)
            .immediate_receive_into_with_tag(StaticScope, buffer, tag);

        Ok(MpiRequest {
            finish: Box::new(move || {
                let status = request.wait();
                let data = unsafe { Box::from_raw(raw) }.into_vec();
                let count = status.count(u8::equivalent_datatype()) as usize;
                if count != len {
                    return Err(DomainError::MessagePassing(format!(
                        "expected {len} bytes from rank {source} with tag {tag}, got {count}"
                    )));
                }
                Ok(Some(data))
            }),
        })
    }

    fn barrier(&self) -> Result<(), DomainError> {
        self.comm.barrier();
        Ok(())
    }

    fn broadcast(&self, root: usize, data: &mut Vec<u8>) -> Result<(), DomainError> {
        check_peer(root, 0, self.size())?;
        let root_process = self.comm.process_at_rank(root as i32);

        // We first broadcast the length so that the other ranks can size their buffers.
        let mut len = data.len() as u64;
        root_process.broadcast_into(&mut len);
        if self.rank() != root {
            data.resize(len as usize, 0);
        }

        root_process.broadcast_into(&mut data[..]);
        Ok(())
    }

    fn all_gather(&self, data: &[u8]) -> Result<Vec<Vec<u8>>, DomainError> {
        let size = self.size();

        // First we need to gather the individual sizes on each process.
        let local_len = data.len() as i32;
        let mut counts = vec![0_i32; size];
        self.comm.all_gather_into(&local_len, &mut counts[..]);

        let displs = displacements(&counts);
        let total = counts.iter().sum::<i32>() as usize;
        let mut buffer = vec![0_u8; total];

        {
            let mut partition = PartitionMut::new(&mut buffer[..], &counts[..], &displs[..]);
            self.comm.all_gather_varcount_into(data, &mut partition);
        }

        Ok(split_buffer(&buffer, &counts, &displs))
    }

    fn gather(&self, root: usize, data: &[u8]) -> Result<Option<Vec<Vec<u8>>>, DomainError> {
        check_peer(root, 0, self.size())?;
        let root_process = self.comm.process_at_rank(root as i32);
        let local_len = data.len() as i32;

        if self.rank() != root {
            root_process.gather_into(&local_len);
            root_process.gather_varcount_into(data);
            return Ok(None);
        }

        let mut counts = vec![0_i32; self.size()];
        root_process.gather_into_root(&local_len, &mut counts[..]);

        let displs = displacements(&counts);
        let total = counts.iter().sum::<i32>() as usize;
        let mut buffer = vec![0_u8; total];

        {
            let mut partition = PartitionMut::new(&mut buffer[..], &counts[..], &displs[..]);
            root_process.gather_varcount_into_root(data, &mut partition);
        }

        Ok(Some(split_buffer(&buffer, &counts, &displs)))
    }

    fn all_reduce(
        &self,
        data: &[u8],
        dtype: DataTypeCode,
        op: ReduceOp,
    ) -> Result<Vec<u8>, DomainError> {
        check_reduction(data, dtype, op)?;
        let operation = system_operation(op);

        Ok(match dtype {
            DataTypeCode::U8 => self.reduce_typed::<u8>(data, operation),
            DataTypeCode::I32 => self.reduce_typed::<i32>(data, operation),
            DataTypeCode::I64 => self.reduce_typed::<i64>(data, operation),
            DataTypeCode::U64 => self.reduce_typed::<u64>(data, operation),
            DataTypeCode::F32 => self.reduce_typed::<f32>(data, operation),
            DataTypeCode::F64 => self.reduce_typed::<f64>(data, operation),
        })
    }

    fn split(&self, ranks: &[usize]) -> Result<Option<Self>, DomainError> {
        if ranks.is_empty() || ranks.iter().any(|&rank| rank >= self.size()) {
            return Err(DomainError::InvalidArgument(format!(
                "cannot form a communicator from ranks {ranks:?} of {}",
                self.size()
            )));
        }
        if ranks.iter().duplicates().next().is_some() {
            return Err(DomainError::InvalidArgument(format!(
                "rank list {ranks:?} contains duplicates"
            )));
        }

        // Members are ordered by their position in the list.
        let position = ranks.iter().position(|&rank| rank == self.rank());
        let color = match position {
            Some(_) => Color::with_value(0),
            None => Color::undefined(),
        };
        let key = position.unwrap_or(0) as i32;

        Ok(self
            .comm
            .split_by_color_with_key(color, key)
            .map(MpiComm::new))
    }

    fn abort(&self, code: i32) -> ! {
        error!("Rank {} aborts with code {}.", self.rank(), code);
        self.comm.abort(code)
    }
}
