//! Thin typed facade over the message passing substrate.
//!
//! Messages are contiguous byte buffers. Non-blocking sends and receives return
//! requests that must be completed with [Request::wait]; waiting is the only
//! suspension point of a message. Messages between the same ordered pair of ranks
//! with the same tag are matched in the order in which they were issued.
mod local;
#[cfg(feature = "mpi")]
mod mpi_backend;

pub use local::{LocalComm, LocalRequest, LocalUniverse};
#[cfg(feature = "mpi")]
pub use mpi_backend::{MpiComm, MpiRequest};

use crate::{
    error::DomainError,
    types::{DataTypeCode, ReduceOp},
};

/// Something that can be waited on.
pub trait Request {
    /// Block until the operation has completed.
    ///
    /// Receives return the received bytes, sends return `None`.
    fn wait(self) -> Result<Option<Vec<u8>>, DomainError>;
}

/// A communication context: a set of ranks that can exchange messages.
pub trait Communicator {
    /// Handle returned by the non-blocking operations.
    type Request: Request;

    /// Rank of this process in the communicator.
    fn rank(&self) -> usize;

    /// Number of ranks in the communicator.
    fn size(&self) -> usize;

    /// Start sending `data` to `dest`.
    fn isend(&self, dest: usize, tag: i32, data: Vec<u8>) -> Result<Self::Request, DomainError>;

    /// Start receiving exactly `len` bytes from `source`.
    fn irecv(&self, source: usize, tag: i32, len: usize) -> Result<Self::Request, DomainError>;

    /// Block until every rank of the communicator has entered the barrier.
    fn barrier(&self) -> Result<(), DomainError>;

    /// Broadcast a byte buffer of arbitrary length from `root`.
    ///
    /// On return `data` holds the root's buffer on every rank.
    fn broadcast(&self, root: usize, data: &mut Vec<u8>) -> Result<(), DomainError>;

    /// Gather one byte buffer of arbitrary length from every rank on every rank.
    ///
    /// The result is indexed by rank.
    fn all_gather(&self, data: &[u8]) -> Result<Vec<Vec<u8>>, DomainError>;

    /// Gather one byte buffer of arbitrary length from every rank on `root`.
    ///
    /// The root receives the buffers indexed by rank, all other ranks `None`.
    fn gather(&self, root: usize, data: &[u8]) -> Result<Option<Vec<Vec<u8>>>, DomainError>;

    /// Element-wise reduction of buffers holding elements of type `dtype`.
    ///
    /// Every rank must pass a buffer of the same length and receives the result.
    fn all_reduce(
        &self,
        data: &[u8],
        dtype: DataTypeCode,
        op: ReduceOp,
    ) -> Result<Vec<u8>, DomainError>;

    /// Create a communicator from a subset of the ranks of `self`.
    ///
    /// Collective over `self`: every rank must call it with the same list. Ranks that are not
    /// listed receive `None`. Rank `i` of the new communicator is `ranks[i]`.
    fn split(&self, ranks: &[usize]) -> Result<Option<Self>, DomainError>
    where
        Self: Sized;

    /// Terminate all ranks.
    fn abort(&self, code: i32) -> !;
}

/// Check that a peer rank and a tag are valid for a communicator of size `size`.
pub(crate) fn check_peer(peer: usize, tag: i32, size: usize) -> Result<(), DomainError> {
    if peer >= size {
        return Err(DomainError::InvalidArgument(format!(
            "rank {peer} is outside a communicator of size {size}"
        )));
    }
    if tag < 0 {
        return Err(DomainError::InvalidArgument(format!(
            "message tag {tag} must be non-negative"
        )));
    }
    Ok(())
}

/// Check that a reduction buffer holds whole elements and that the operator applies.
pub(crate) fn check_reduction(
    data: &[u8],
    dtype: DataTypeCode,
    op: ReduceOp,
) -> Result<(), DomainError> {
    if data.len() % dtype.size_in_bytes() != 0 {
        return Err(DomainError::InvalidArgument(format!(
            "{} bytes do not form whole {dtype:?} elements",
            data.len()
        )));
    }
    if matches!(op, ReduceOp::LogicalAnd | ReduceOp::LogicalOr) && !dtype.is_integer() {
        return Err(DomainError::InvalidArgument(format!(
            "{op:?} needs an integer type, got {dtype:?}"
        )));
    }
    Ok(())
}
