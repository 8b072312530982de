//! Binary tree description files.
//!
//! ```text
//! magic       u32    "OCT "
//! origin      f64 x 3
//! region      f64 x 3
//! root dims   i32 x 3
//! max level   i32
//! leaf count  i64
//! pedigrees   u64 x leaf count
//! ```
//!
//! Files may be written in either byte order. The magic identifier decides whether
//! the whole file is byte swapped.

use std::path::Path;

use log::warn;

use super::{LeafTree, TreeHeader};
use crate::{
    comm::Communicator,
    constants::{MAX_LEVEL, PEDIGREE_BYTES, TREE_FILE_MAGIC, TREE_HEADER_BYTES},
    error::DomainError,
    pedigree::Pedigree,
    tools::{read_file_on_root, ByteReader, ByteWriter, Endianness},
};

/// Serialise a tree in the given byte order.
pub fn tree_file_bytes(tree: &LeafTree, endianness: Endianness) -> Vec<u8> {
    let header = tree.header();
    let mut writer = ByteWriter::new(endianness);

    writer.write_u32(TREE_FILE_MAGIC);
    for value in header.origin().into_iter().chain(header.region()) {
        writer.write_f64(value);
    }
    for d in header.root_dims() {
        writer.write_i32(d as i32);
    }
    writer.write_i32(header.max_level() as i32);
    writer.write_i64(tree.num_leaves() as i64);

    for pedigree in tree.pedigrees() {
        writer.write_u64(pedigree.to_bits());
    }

    writer.into_bytes()
}

/// Write a tree description file.
pub fn write_tree_file<P: AsRef<Path>>(
    path: P,
    tree: &LeafTree,
    endianness: Endianness,
) -> Result<(), DomainError> {
    std::fs::write(path.as_ref(), tree_file_bytes(tree, endianness))?;
    Ok(())
}

/// Read a tree description file on the calling rank only.
pub fn read_tree_file<P: AsRef<Path>>(path: P) -> Result<LeafTree, DomainError> {
    let bytes = std::fs::read(path.as_ref())?;
    parse_tree_file(&bytes)
}

/// Read a tree description file on `root` and distribute it to all ranks of `comm`.
///
/// Collective over `comm`. If the root cannot read the file every rank returns the
/// same error.
pub fn load_tree_file<P: AsRef<Path>, C: Communicator>(
    path: P,
    root: usize,
    comm: &C,
) -> Result<LeafTree, DomainError> {
    let bytes = read_file_on_root(path, root, comm)?;
    parse_tree_file(&bytes)
}

/// Parse the contents of a tree description file.
pub fn parse_tree_file(bytes: &[u8]) -> Result<LeafTree, DomainError> {
    let malformed = |reason: String| DomainError::MalformedTreeFile(reason);
    let truncated = || malformed("file ends inside the header".to_string());

    if bytes.len() < TREE_HEADER_BYTES {
        return Err(malformed(format!(
            "file has {} bytes but the header needs {TREE_HEADER_BYTES}",
            bytes.len()
        )));
    }

    let mut reader = ByteReader::new(bytes);
    let magic = reader.read_u32().ok_or_else(truncated)?;
    if magic != TREE_FILE_MAGIC {
        if magic.swap_bytes() == TREE_FILE_MAGIC {
            warn!("Tree file was written with the opposite byte order.");
            reader.set_swap(true);
        } else {
            return Err(malformed(format!("unknown identifier {magic:#010x}")));
        }
    }

    let mut origin = [0.0; 3];
    for value in origin.iter_mut() {
        *value = reader.read_f64().ok_or_else(truncated)?;
    }
    let mut region = [0.0; 3];
    for value in region.iter_mut() {
        *value = reader.read_f64().ok_or_else(truncated)?;
    }
    let mut root_dims = [0; 3];
    for d in root_dims.iter_mut() {
        let value = reader.read_i32().ok_or_else(truncated)?;
        if value <= 0 {
            return Err(malformed(format!("root dimension {value} must be positive")));
        }
        *d = value as usize;
    }
    let max_level = reader.read_i32().ok_or_else(truncated)?;
    if !(0..=MAX_LEVEL as i32).contains(&max_level) {
        return Err(malformed(format!("maximum level {max_level} out of range")));
    }
    let num_leaf = reader.read_i64().ok_or_else(truncated)?;
    if num_leaf <= 0 {
        return Err(malformed(format!("leaf count {num_leaf} must be positive")));
    }
    let num_leaf = num_leaf as usize;

    let payload = num_leaf
        .checked_mul(PEDIGREE_BYTES)
        .filter(|&payload| payload <= reader.remaining())
        .ok_or_else(|| {
            malformed(format!(
                "{num_leaf} pedigrees announced but only {} bytes follow the header",
                reader.remaining()
            ))
        })?;
    if reader.remaining() > payload {
        warn!(
            "Tree file has {} trailing bytes.",
            reader.remaining() - payload
        );
    }

    let mut pedigrees = Vec::with_capacity(num_leaf);
    for _ in 0..num_leaf {
        let bits = reader.read_u64().ok_or_else(truncated)?;
        pedigrees.push(Pedigree::from_bits(bits));
    }

    let header = TreeHeader::new(origin, region, root_dims, max_level as u32)
        .map_err(|err| malformed(err.to_string()))?;
    LeafTree::new(header, pedigrees).map_err(|err| malformed(err.to_string()))
}
