//! Routines for working with leaf pedigrees.
//!
//! A pedigree packs the root cell id, the refinement level and the per-axis
//! offset of a leaf inside its root cell into a single `u64`:
//!
//! ```text
//! bits  0..13  x offset
//! bits 13..26  y offset
//! bits 26..39  z offset
//! bits 39..43  level
//! bits 43..64  root id
//! ```

use crate::constants::{
    LEVEL_DISPLACEMENT, LEVEL_MASK, MAX_LEVEL, OFFSET_BITS, OFFSET_MASK, ROOT_DISPLACEMENT,
    ROOT_MASK,
};
use crate::error::DomainError;

/// A packed leaf position.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[repr(transparent)]
pub struct Pedigree {
    bits: u64,
}

impl Pedigree {
    /// Create a new pedigree.
    ///
    /// Fails if the level is too deep, the root id does not fit, or an offset
    /// is outside `[0, 2^level)`.
    pub fn new(root: usize, level: u32, offset: [u64; 3]) -> Result<Self, DomainError> {
        if level > MAX_LEVEL {
            return Err(DomainError::InvalidArgument(format!(
                "level {level} exceeds the deepest level {MAX_LEVEL}"
            )));
        }
        if root as u64 > ROOT_MASK {
            return Err(DomainError::InvalidArgument(format!(
                "root id {root} does not fit into a pedigree"
            )));
        }
        if offset.iter().any(|&o| o >= 1 << level) {
            return Err(DomainError::InvalidArgument(format!(
                "offset {offset:?} is outside a level {level} root cell"
            )));
        }

        let bits = offset[0]
            | (offset[1] << OFFSET_BITS)
            | (offset[2] << (2 * OFFSET_BITS))
            | ((level as u64) << LEVEL_DISPLACEMENT)
            | ((root as u64) << ROOT_DISPLACEMENT);

        Ok(Self { bits })
    }

    /// The root pedigree of a given root cell.
    pub fn root_cell(root: usize) -> Result<Self, DomainError> {
        Self::new(root, 0, [0, 0, 0])
    }

    /// Reinterpret raw bits as a pedigree. No validation is performed.
    pub fn from_bits(bits: u64) -> Self {
        Self { bits }
    }

    /// The raw bits.
    pub fn to_bits(self) -> u64 {
        self.bits
    }

    /// Root cell id.
    pub fn root(self) -> usize {
        ((self.bits >> ROOT_DISPLACEMENT) & ROOT_MASK) as usize
    }

    /// Refinement level.
    pub fn level(self) -> u32 {
        ((self.bits >> LEVEL_DISPLACEMENT) & LEVEL_MASK) as u32
    }

    /// Offset inside the root cell in units of the leaf size.
    pub fn offset(self) -> [u64; 3] {
        [
            self.bits & OFFSET_MASK,
            (self.bits >> OFFSET_BITS) & OFFSET_MASK,
            (self.bits >> (2 * OFFSET_BITS)) & OFFSET_MASK,
        ]
    }

    /// Check that the decoded fields are consistent.
    pub fn is_valid(self) -> bool {
        let level = self.level();
        level <= MAX_LEVEL && self.offset().iter().all(|&o| o < 1 << level)
    }

    /// The eight children one level finer, in x fastest order.
    pub fn children(self) -> Result<[Pedigree; 8], DomainError> {
        let level = self.level() + 1;
        let [x, y, z] = self.offset();
        let mut children = [Pedigree::default(); 8];
        for (index, child) in children.iter_mut().enumerate() {
            let index = index as u64;
            *child = Pedigree::new(
                self.root(),
                level,
                [2 * x + (index & 1), 2 * y + ((index >> 1) & 1), 2 * z + (index >> 2)],
            )?;
        }
        Ok(children)
    }

    /// The parent one level coarser, or `None` for a root cell.
    pub fn parent(self) -> Option<Pedigree> {
        let level = self.level();
        if level == 0 {
            return None;
        }
        let [x, y, z] = self.offset();
        Pedigree::new(self.root(), level - 1, [x >> 1, y >> 1, z >> 1]).ok()
    }

    /// Index of the leaf in the uniform grid of its level spanning all root cells.
    ///
    /// `root_dims` are the numbers of root cells per axis; root ids run x fastest.
    pub fn global_index(self, root_dims: [usize; 3]) -> [u64; 3] {
        let root = self.root();
        let root_pos = [
            root % root_dims[0],
            (root / root_dims[0]) % root_dims[1],
            root / (root_dims[0] * root_dims[1]),
        ];
        let level = self.level();
        let offset = self.offset();
        [
            ((root_pos[0] as u64) << level) + offset[0],
            ((root_pos[1] as u64) << level) + offset[1],
            ((root_pos[2] as u64) << level) + offset[2],
        ]
    }

    /// Inverse of [Pedigree::global_index].
    pub fn from_global_index(
        root_dims: [usize; 3],
        level: u32,
        index: [u64; 3],
    ) -> Result<Self, DomainError> {
        if level > MAX_LEVEL {
            return Err(DomainError::InvalidArgument(format!(
                "level {level} exceeds the deepest level {MAX_LEVEL}"
            )));
        }
        let root_pos = index.map(|i| (i >> level) as usize);
        if root_pos.iter().zip(root_dims.iter()).any(|(p, d)| p >= d) {
            return Err(DomainError::InvalidArgument(format!(
                "index {index:?} is outside the level {level} grid of {root_dims:?} root cells"
            )));
        }
        let root = root_pos[0] + root_dims[0] * (root_pos[1] + root_dims[1] * root_pos[2]);
        let mask = (1_u64 << level) - 1;
        Self::new(root, level, index.map(|i| i & mask))
    }
}

impl std::fmt::Display for Pedigree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [x, y, z] = self.offset();
        write!(
            f,
            "(root: {}, level: {}, offset: [{}, {}, {}])",
            self.root(),
            self.level(),
            x,
            y,
            z
        )
    }
}
