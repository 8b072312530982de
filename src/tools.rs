//! Utility routines.

use std::path::Path;

use bytemuck::Pod;
use itertools::Itertools;
use log::info;
use num::traits::{One, Zero};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    comm::Communicator,
    error::DomainError,
    octree::{LeafTree, TreeHeader},
    types::{HasTypeCode, ReduceOp},
};

/// Byte order of a binary file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Endianness {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

impl Endianness {
    /// Byte order of the running machine.
    pub fn native() -> Self {
        if cfg!(target_endian = "little") {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }

    /// The other byte order.
    pub fn swapped(self) -> Self {
        match self {
            Endianness::Little => Endianness::Big,
            Endianness::Big => Endianness::Little,
        }
    }
}

/// Sequential reader of native or byte-swapped values.
///
/// All reads return `None` once the input is exhausted.
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    position: usize,
    swap: bool,
}

macro_rules! read_impl {
    ($name:ident, $type:ty) => {
        #[doc = concat!("Read a `", stringify!($type), "`.")]
        pub fn $name(&mut self) -> Option<$type> {
            let bytes = self.read_bytes(std::mem::size_of::<$type>())?;
            let value = <$type>::from_ne_bytes(bytes.try_into().ok()?);
            Some(if self.swap {
                <$type>::from_bits(value.to_bits().swap_bytes())
            } else {
                value
            })
        }
    };
}

macro_rules! read_int_impl {
    ($name:ident, $type:ty) => {
        #[doc = concat!("Read a `", stringify!($type), "`.")]
        pub fn $name(&mut self) -> Option<$type> {
            let bytes = self.read_bytes(std::mem::size_of::<$type>())?;
            let value = <$type>::from_ne_bytes(bytes.try_into().ok()?);
            Some(if self.swap { value.swap_bytes() } else { value })
        }
    };
}

impl<'a> ByteReader<'a> {
    /// Read from the start of `bytes` without swapping.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            position: 0,
            swap: false,
        }
    }

    /// Swap all following multi-byte values.
    pub fn set_swap(&mut self, swap: bool) {
        self.swap = swap;
    }

    /// Are values swapped?
    pub fn swaps(&self) -> bool {
        self.swap
    }

    /// Number of bytes left.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    /// Take the next `n` bytes as they are.
    pub fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(n)?;
        let bytes = self.bytes.get(self.position..end)?;
        self.position = end;
        Some(bytes)
    }

    read_int_impl!(read_u32, u32);
    read_int_impl!(read_i32, i32);
    read_int_impl!(read_u64, u64);
    read_int_impl!(read_i64, i64);
    read_impl!(read_f64, f64);
}

/// Sequential writer in a chosen byte order.
pub struct ByteWriter {
    bytes: Vec<u8>,
    endianness: Endianness,
}

macro_rules! write_impl {
    ($name:ident, $type:ty) => {
        #[doc = concat!("Append a `", stringify!($type), "`.")]
        pub fn $name(&mut self, value: $type) {
            match self.endianness {
                Endianness::Little => self.bytes.extend_from_slice(&value.to_le_bytes()),
                Endianness::Big => self.bytes.extend_from_slice(&value.to_be_bytes()),
            }
        }
    };
}

impl ByteWriter {
    /// Create an empty writer.
    pub fn new(endianness: Endianness) -> Self {
        Self {
            bytes: Vec::new(),
            endianness,
        }
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    write_impl!(write_u32, u32);
    write_impl!(write_i32, i32);
    write_impl!(write_u64, u64);
    write_impl!(write_i64, i64);
    write_impl!(write_f64, f64);

    /// The written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Element types that can be combined by a [ReduceOp].
///
/// Logical operations treat zero as false and everything else as true.
pub trait Reducible: Pod + PartialOrd + Zero + One + HasTypeCode {
    /// Combine two values.
    fn combine(self, other: Self, op: ReduceOp) -> Self {
        let truth = |value: bool| if value { Self::one() } else { Self::zero() };
        match op {
            ReduceOp::Max => {
                if other > self {
                    other
                } else {
                    self
                }
            }
            ReduceOp::Min => {
                if other < self {
                    other
                } else {
                    self
                }
            }
            ReduceOp::Sum => self + other,
            ReduceOp::Prod => self * other,
            ReduceOp::LogicalAnd => truth(!self.is_zero() && !other.is_zero()),
            ReduceOp::LogicalOr => truth(!self.is_zero() || !other.is_zero()),
        }
    }
}

impl<T: Pod + PartialOrd + Zero + One + HasTypeCode> Reducible for T {}

/// Gather array to all processes
pub fn gather_to_all<T: Pod, C: Communicator>(arr: &[T], comm: &C) -> Result<Vec<T>, DomainError> {
    let gathered = comm.all_gather(bytemuck::cast_slice(arr))?;

    // The received byte buffers are not aligned for `T`, so they are copied.
    Ok(gathered
        .iter()
        .flat_map(|bytes| bytemuck::pod_collect_to_vec::<u8, T>(bytes))
        .collect_vec())
}

/// Gather distributed array to the root rank.
///
/// The result is a `Vec<T>` on root and `None` on all other ranks.
pub fn gather_to_root<T: Pod, C: Communicator>(
    arr: &[T],
    root: usize,
    comm: &C,
) -> Result<Option<Vec<T>>, DomainError> {
    Ok(comm.gather(root, bytemuck::cast_slice(arr))?.map(|gathered| {
        gathered
            .iter()
            .flat_map(|bytes| bytemuck::pod_collect_to_vec::<u8, T>(bytes))
            .collect_vec()
    }))
}

/// Broadcast an array of arbitrary length from `root`.
pub fn broadcast_values<T: Pod, C: Communicator>(
    values: &mut Vec<T>,
    root: usize,
    comm: &C,
) -> Result<(), DomainError> {
    let mut bytes = bytemuck::cast_slice::<T, u8>(values).to_vec();
    comm.broadcast(root, &mut bytes)?;
    *values = bytemuck::pod_collect_to_vec(&bytes);
    Ok(())
}

/// Element-wise reduction of equally sized arrays across all ranks.
///
/// Logical operators are only accepted for integer types.
pub fn all_reduce<T: Reducible, C: Communicator>(
    arr: &[T],
    op: ReduceOp,
    comm: &C,
) -> Result<Vec<T>, DomainError> {
    let reduced = comm.all_reduce(bytemuck::cast_slice(arr), T::CODE, op)?;
    Ok(bytemuck::pod_collect_to_vec::<u8, T>(&reduced))
}

/// Get global size of a distributed array.
///
/// Computes the size and broadcasts it to all ranks.
pub fn global_size<T, C: Communicator>(arr: &[T], comm: &C) -> Result<usize, DomainError> {
    let local_size = arr.len() as u64;
    Ok(all_reduce(&[local_size], ReduceOp::Sum, comm)?[0] as usize)
}

/// Get the maximum value across all ranks
pub fn global_max<T: Reducible, C: Communicator>(value: T, comm: &C) -> Result<T, DomainError> {
    Ok(all_reduce(&[value], ReduceOp::Max, comm)?[0])
}

/// Get the minimum value across all ranks
pub fn global_min<T: Reducible, C: Communicator>(value: T, comm: &C) -> Result<T, DomainError> {
    Ok(all_reduce(&[value], ReduceOp::Min, comm)?[0])
}

/// Read a file on `root` and broadcast its contents to all ranks of `comm`.
///
/// Collective over `comm`. If the root cannot read the file every rank returns the
/// same error.
pub fn read_file_on_root<P: AsRef<Path>, C: Communicator>(
    path: P,
    root: usize,
    comm: &C,
) -> Result<Vec<u8>, DomainError> {
    // The first byte flags a read failure on the root, in which case the message follows.
    let mut payload = Vec::new();
    if comm.rank() == root {
        match std::fs::read(path.as_ref()) {
            Ok(bytes) => {
                info!(
                    "Read {} ({} bytes).",
                    path.as_ref().display(),
                    bytes.len()
                );
                payload.push(0);
                payload.extend_from_slice(&bytes);
            }
            Err(err) => {
                payload.push(1);
                payload.extend_from_slice(
                    format!("cannot read {}: {err}", path.as_ref().display()).as_bytes(),
                );
            }
        }
    }

    comm.broadcast(root, &mut payload)?;

    match payload.split_first() {
        Some((0, bytes)) => Ok(bytes.to_vec()),
        Some((_, message)) => Err(DomainError::Io(std::io::Error::other(
            String::from_utf8_lossy(message).into_owned(),
        ))),
        None => Err(DomainError::MessagePassing(
            "received an empty file broadcast".to_string(),
        )),
    }
}

/// Get a seeded rng
pub fn seeded_rng(seed: usize) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed as u64)
}

/// Generate a random 2:1 balanced tree for testing.
///
/// Starting from one leaf per root cell, `nrefine` randomly chosen leaves are refined.
/// Refinements that would violate the balance or exceed the maximum level are skipped.
pub fn generate_random_tree<R: Rng>(
    header: TreeHeader,
    nrefine: usize,
    rng: &mut R,
) -> Result<LeafTree, DomainError> {
    let mut tree = LeafTree::uniform(header, 0)?;

    for _ in 0..nrefine {
        let leaf = rng.gen_range(0..tree.num_leaves());
        // A rejected refinement leaves the tree untouched.
        let _ = tree.refine(leaf);
    }

    Ok(tree)
}

/// Compute displacements from a vector of counts.
///
/// This is useful for global varcount operations. Let
/// count [ 3, 4, 5]. Then the corresponding displacements are
/// [0, 3, 7]. Note that the last element `5` is ignored.
pub fn displacements<T: Zero + Copy>(counts: &[T]) -> Vec<T> {
    counts
        .iter()
        .scan(T::zero(), |acc, &x| {
            let tmp = *acc;
            *acc = *acc + x;
            Some(tmp)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::{
        all_reduce, broadcast_values, displacements, gather_to_all, gather_to_root,
        generate_random_tree, global_max, global_min, global_size, seeded_rng, ByteReader,
        ByteWriter, Endianness, Reducible,
    };
    use crate::{
        comm::{Communicator, LocalUniverse},
        octree::TreeHeader,
        types::ReduceOp,
    };

    #[test]
    fn test_displacements() {
        assert_eq!(displacements(&[3, 4, 5]), vec![0, 3, 7]);
        assert_eq!(displacements::<usize>(&[]), Vec::<usize>::new());
    }

    #[test]
    fn test_byte_reader_swaps() {
        let mut writer = ByteWriter::new(Endianness::native().swapped());
        writer.write_u32(0x0102_0304);
        writer.write_i64(-5);
        writer.write_f64(1.25);

        let bytes = writer.into_bytes();
        let mut reader = ByteReader::new(&bytes);
        reader.set_swap(true);
        assert_eq!(reader.read_u32(), Some(0x0102_0304));
        assert_eq!(reader.read_i64(), Some(-5));
        assert_eq!(reader.read_f64(), Some(1.25));
        assert_eq!(reader.remaining(), 0);
        assert_eq!(reader.read_i32(), None);
    }

    #[test]
    fn test_combine() {
        assert_eq!(3.0_f64.combine(4.0, ReduceOp::Max), 4.0);
        assert_eq!(3_i32.combine(4, ReduceOp::Min), 3);
        assert_eq!(3_i64.combine(4, ReduceOp::Sum), 7);
        assert_eq!(3_u8.combine(4, ReduceOp::Prod), 12);
        assert_eq!(1_u8.combine(0, ReduceOp::LogicalAnd), 0);
        assert_eq!(1_u8.combine(0, ReduceOp::LogicalOr), 1);
    }

    #[test]
    fn test_collectives() {
        let results = LocalUniverse::run(3, |comm| {
            let rank = comm.rank();
            let all = gather_to_all(&vec![rank as i64; rank + 1], &comm).unwrap();
            let root = gather_to_root(&[rank as f64], 2, &comm).unwrap();
            let sum = all_reduce(&[rank as i32, 1], ReduceOp::Sum, &comm).unwrap();
            let max = global_max(rank as f64, &comm).unwrap();
            let min = global_min(rank as i32 + 10, &comm).unwrap();
            let size = global_size(&all, &comm).unwrap();
            assert!(all_reduce(&[1.0_f64], ReduceOp::LogicalAnd, &comm).is_err());

            let mut values = if rank == 0 { vec![1.5_f32, 2.5] } else { Vec::new() };
            broadcast_values(&mut values, 0, &comm).unwrap();

            (all, root, sum, max, min, size, values)
        });

        for (rank, (all, root, sum, max, min, size, values)) in results.into_iter().enumerate() {
            assert_eq!(all, vec![0, 1, 1, 2, 2, 2]);
            if rank == 2 {
                assert_eq!(root, Some(vec![0.0, 1.0, 2.0]));
            } else {
                assert_eq!(root, None);
            }
            assert_eq!(sum, vec![3, 3]);
            assert_eq!(max, 2.0);
            assert_eq!(min, 10);
            assert_eq!(size, 18);
            assert_eq!(values, vec![1.5, 2.5]);
        }
    }

    #[test]
    fn test_random_tree_is_balanced() {
        let header = TreeHeader::new([0.0; 3], [1.0; 3], [2, 1, 1], 3).unwrap();
        let mut rng = seeded_rng(0);
        let tree = generate_random_tree(header, 20, &mut rng).unwrap();

        assert!(tree.num_leaves() > 2);
        assert!(tree.pedigrees().iter().all(|p| p.level() <= 3));
    }
}
