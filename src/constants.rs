//! Crate wide constants.

/// Number of faces of a rectangular region.
pub const NFACES: usize = 6;

/// Maximum number of neighbours across a single face.
///
/// A coarse leaf face is covered by at most four leaves one level finer.
pub const NSUBFACES: usize = 4;

/// Identifier of the universal process group.
pub const WORLD_GROUP: usize = 0;

/// Magic identifier at the start of a tree description file (`"OCT "`).
pub const TREE_FILE_MAGIC: u32 = u32::from_le_bytes(*b"OCT ");

/// Magic identifier at the start of an active subdomain file (`"SBDM"`).
pub const SUBDOMAIN_FILE_MAGIC: u32 = u32::from_le_bytes(*b"SBDM");

/// Size in bytes of the packed tree file header.
///
/// magic (4) + origin (24) + region (24) + root dims (12) + max level (4) + leaf count (8).
pub const TREE_HEADER_BYTES: usize = 76;

/// Size in bytes of a single pedigree record.
pub const PEDIGREE_BYTES: usize = 8;

/// Number of bits per axis offset in a pedigree.
pub const OFFSET_BITS: u32 = 13;

/// Number of bits storing the level in a pedigree.
pub const LEVEL_BITS: u32 = 4;

/// Number of bits storing the root id in a pedigree.
pub const ROOT_BITS: u32 = 64 - 3 * OFFSET_BITS - LEVEL_BITS;

/// Deepest refinement level representable by a pedigree.
pub const MAX_LEVEL: u32 = OFFSET_BITS;

/// Mask for a single axis offset.
pub const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

/// Mask for the level field.
pub const LEVEL_MASK: u64 = (1 << LEVEL_BITS) - 1;

/// Mask for the root id field.
pub const ROOT_MASK: u64 = (1 << ROOT_BITS) - 1;

/// Bit position of the level field.
pub const LEVEL_DISPLACEMENT: u32 = 3 * OFFSET_BITS;

/// Bit position of the root id field.
pub const ROOT_DISPLACEMENT: u32 = LEVEL_DISPLACEMENT + LEVEL_BITS;

/// Tag base for halo messages addressed through the regular neighbour tables.
pub const HALO_TAG_BASE: i32 = 100;

/// Tag base for halo messages addressed through the periodic neighbour tables.
pub const PERIODIC_TAG_BASE: i32 = 200;

/// Tag used by the in-process backend for collective traffic.
pub const COLLECTIVE_TAG: i32 = 32000;

/// Integer value reported for a missing rank in the integer result-code interface.
pub const NULL_RANK: i32 = -1;
