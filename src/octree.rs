//! Minimal leaf tree used for neighbour queries of the adaptive decomposition.
//!
//! A tree is a forest of octrees, one per root cell of a `root_dims` grid. Leaves
//! are identified by their position in the pedigree list. The tree must be 2:1
//! balanced across faces, including faces that wrap around periodically.
mod file;

use std::collections::HashMap;

use itertools::iproduct;
use log::debug;

pub use file::{load_tree_file, parse_tree_file, read_tree_file, tree_file_bytes, write_tree_file};

use crate::{
    constants::{MAX_LEVEL, NSUBFACES, ROOT_MASK},
    error::DomainError,
    geometry::PhysicalBox,
    pedigree::Pedigree,
    types::Face,
};

/// Global description of a tree.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TreeHeader {
    origin: [f64; 3],
    region: [f64; 3],
    root_dims: [usize; 3],
    max_level: u32,
}

impl TreeHeader {
    /// Create a new header.
    pub fn new(
        origin: [f64; 3],
        region: [f64; 3],
        root_dims: [usize; 3],
        max_level: u32,
    ) -> Result<Self, DomainError> {
        if root_dims.iter().any(|&d| d == 0) {
            return Err(DomainError::InvalidArgument(format!(
                "root dimensions {root_dims:?} must be positive"
            )));
        }
        let num_roots = root_dims
            .iter()
            .try_fold(1_usize, |acc, &d| acc.checked_mul(d));
        if num_roots.map_or(true, |n| n as u64 > ROOT_MASK + 1) {
            return Err(DomainError::InvalidArgument(format!(
                "too many root cells {root_dims:?}"
            )));
        }
        if region.iter().any(|&r| r.is_nan() || r <= 0.0) {
            return Err(DomainError::InvalidArgument(format!(
                "tree region {region:?} must be positive"
            )));
        }
        if max_level > MAX_LEVEL {
            return Err(DomainError::InvalidArgument(format!(
                "maximum level {max_level} exceeds {MAX_LEVEL}"
            )));
        }

        Ok(Self {
            origin,
            region,
            root_dims,
            max_level,
        })
    }

    /// Lower corner of the tree.
    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    /// Extent of the tree.
    pub fn region(&self) -> [f64; 3] {
        self.region
    }

    /// Number of root cells per axis.
    pub fn root_dims(&self) -> [usize; 3] {
        self.root_dims
    }

    /// Deepest level a leaf may have.
    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// Total number of root cells.
    pub fn num_roots(&self) -> usize {
        self.root_dims.iter().product()
    }

    /// Extent of a root cell.
    pub fn root_cell_size(&self) -> [f64; 3] {
        std::array::from_fn(|axis| self.region[axis] / self.root_dims[axis] as f64)
    }

    /// Extent of a leaf on `level`.
    pub fn leaf_size(&self, level: u32) -> [f64; 3] {
        let cells = (1_u64 << level) as f64;
        self.root_cell_size().map(|size| size / cells)
    }

    /// The box covered by the tree.
    pub fn bounding_box(&self) -> PhysicalBox {
        PhysicalBox::from_origin_and_region(self.origin, self.region)
    }
}

/// Neighbours of a leaf across one face.
///
/// Same level and coarser neighbours occupy slot 0. Finer neighbours occupy the
/// slot `iu + 2 * iv`, where `iu` and `iv` are the offsets of the neighbour along
/// the two in-plane axes in ascending axis order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct FaceNeighbours {
    /// Level of the neighbours relative to the leaf: -1 coarser, 0 same, +1 finer.
    pub level_diff: i8,
    /// Neighbour leaf ids by sub-face slot.
    pub leaves: [Option<usize>; NSUBFACES],
}

impl FaceNeighbours {
    fn single(level_diff: i8, leaf: usize) -> Self {
        let mut leaves = [None; NSUBFACES];
        leaves[0] = Some(leaf);
        Self { level_diff, leaves }
    }

    /// Is there no neighbour?
    pub fn is_empty(&self) -> bool {
        self.leaves.iter().all(Option::is_none)
    }

    /// Number of neighbours.
    pub fn count(&self) -> usize {
        self.leaves.iter().flatten().count()
    }

    /// Iterate over `(slot, leaf)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.leaves
            .iter()
            .enumerate()
            .filter_map(|(slot, leaf)| leaf.map(|leaf| (slot, leaf)))
    }
}

/// A complete, linear and 2:1 balanced forest of leaves.
#[derive(Clone, Debug)]
pub struct LeafTree {
    header: TreeHeader,
    pedigrees: Vec<Pedigree>,
    lookup: HashMap<Pedigree, usize>,
    periodic: [bool; 3],
}

impl LeafTree {
    /// Create a tree from its header and leaves.
    ///
    /// The leaves must cover every root cell exactly once and the tree must be
    /// 2:1 balanced across faces.
    pub fn new(header: TreeHeader, pedigrees: Vec<Pedigree>) -> Result<Self, DomainError> {
        let num_roots = header.num_roots();
        let invalid = |reason: String| Err(DomainError::InvalidArgument(reason));

        let mut lookup = HashMap::<Pedigree, usize>::with_capacity(pedigrees.len());
        for (index, &pedigree) in pedigrees.iter().enumerate() {
            if !pedigree.is_valid()
                || pedigree.root() >= num_roots
                || pedigree.level() > header.max_level
            {
                return invalid(format!("leaf {index} has an invalid pedigree {pedigree}"));
            }
            if lookup.insert(pedigree, index).is_some() {
                return invalid(format!("leaf {pedigree} appears twice"));
            }
        }

        // No leaf may contain another one.
        for &pedigree in &pedigrees {
            let mut ancestor = pedigree.parent();
            while let Some(current) = ancestor {
                if lookup.contains_key(&current) {
                    return invalid(format!("leaf {pedigree} lies inside leaf {current}"));
                }
                ancestor = current.parent();
            }
        }

        // Without overlaps the leaves cover the roots iff their volumes add up.
        let volume = pedigrees
            .iter()
            .map(|p| 1_u128 << (3 * (header.max_level - p.level())))
            .sum::<u128>();
        if volume != (num_roots as u128) << (3 * header.max_level) {
            return invalid("the leaves do not cover all root cells".to_string());
        }

        let tree = Self {
            header,
            pedigrees,
            lookup,
            periodic: [false; 3],
        };

        for (leaf, face) in iproduct!(0..tree.num_leaves(), Face::ALL) {
            let neighbours = tree.query(leaf, face, true)?;
            if neighbours.is_empty() || (neighbours.level_diff == 1 && neighbours.count() != 4) {
                return invalid(format!(
                    "tree is not 2:1 balanced at face {face} of leaf {}",
                    tree.pedigrees[leaf]
                ));
            }
        }

        Ok(tree)
    }

    /// A tree with every root cell refined uniformly to `level`.
    ///
    /// Leaves are ordered by root cell, then x fastest within the root cell.
    pub fn uniform(header: TreeHeader, level: u32) -> Result<Self, DomainError> {
        if level > header.max_level {
            return Err(DomainError::InvalidArgument(format!(
                "level {level} exceeds the maximum level {}",
                header.max_level
            )));
        }
        let n = 1_u64 << level;
        let pedigrees = iproduct!(0..header.num_roots(), 0..n, 0..n, 0..n)
            .map(|(root, z, y, x)| Pedigree::new(root, level, [x, y, z]))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(header, pedigrees)
    }

    /// Replace a leaf by its eight children.
    ///
    /// The children take the place of the leaf in the id order, so the ids of all
    /// later leaves grow by seven. The tree is unchanged if the result would not
    /// be balanced.
    pub fn refine(&mut self, leaf: usize) -> Result<(), DomainError> {
        let pedigree = self.pedigree(leaf)?;
        if pedigree.level() >= self.header.max_level {
            return Err(DomainError::InvalidArgument(format!(
                "leaf {pedigree} is already on the maximum level"
            )));
        }

        let mut pedigrees = Vec::with_capacity(self.pedigrees.len() + 7);
        pedigrees.extend_from_slice(&self.pedigrees[..leaf]);
        pedigrees.extend_from_slice(&pedigree.children()?);
        pedigrees.extend_from_slice(&self.pedigrees[leaf + 1..]);

        let mut refined = Self::new(self.header, pedigrees)?;
        refined.periodic = self.periodic;
        debug!("Refined leaf {leaf} {pedigree}.");
        *self = refined;
        Ok(())
    }

    /// The header.
    pub fn header(&self) -> &TreeHeader {
        &self.header
    }

    /// Number of leaves.
    pub fn num_leaves(&self) -> usize {
        self.pedigrees.len()
    }

    /// All pedigrees in id order.
    pub fn pedigrees(&self) -> &[Pedigree] {
        &self.pedigrees
    }

    /// Pedigree of a leaf.
    pub fn pedigree(&self, leaf: usize) -> Result<Pedigree, DomainError> {
        self.pedigrees.get(leaf).copied().ok_or_else(|| {
            DomainError::InvalidArgument(format!(
                "leaf {leaf} does not exist in a tree with {} leaves",
                self.pedigrees.len()
            ))
        })
    }

    /// Id of the leaf with a given pedigree.
    pub fn leaf_id(&self, pedigree: Pedigree) -> Option<usize> {
        self.lookup.get(&pedigree).copied()
    }

    /// Periodicity per axis.
    pub fn periodic(&self) -> [bool; 3] {
        self.periodic
    }

    /// Set the periodicity per axis.
    pub fn set_periodic(&mut self, periodic: [bool; 3]) {
        self.periodic = periodic;
    }

    /// Box covered by a leaf.
    pub fn leaf_box(&self, leaf: usize) -> Result<PhysicalBox, DomainError> {
        let pedigree = self.pedigree(leaf)?;
        Ok(self
            .header
            .bounding_box()
            .leaf_box(self.header.root_dims, pedigree))
    }

    /// Neighbours of a leaf across a face.
    ///
    /// Faces on the boundary of the root grid wrap around if the tree is periodic
    /// along the face normal, and have no neighbours otherwise.
    pub fn find_neighbours(&self, leaf: usize, face: Face) -> Result<FaceNeighbours, DomainError> {
        self.pedigree(leaf)?;
        self.query(leaf, face, self.periodic[face.axis().index()])
    }

    fn query(&self, leaf: usize, face: Face, wrap: bool) -> Result<FaceNeighbours, DomainError> {
        let root_dims = self.header.root_dims;
        let pedigree = self.pedigrees[leaf];
        let level = pedigree.level();
        let axis = face.axis().index();
        let extent = (root_dims[axis] as u64) << level;

        // We first step across the face on the level of the leaf.
        let mut index = pedigree.global_index(root_dims);
        if face.is_plus() {
            if index[axis] + 1 == extent {
                if !wrap {
                    return Ok(FaceNeighbours::default());
                }
                index[axis] = 0;
            } else {
                index[axis] += 1;
            }
        } else if index[axis] == 0 {
            if !wrap {
                return Ok(FaceNeighbours::default());
            }
            index[axis] = extent - 1;
        } else {
            index[axis] -= 1;
        }

        let same = Pedigree::from_global_index(root_dims, level, index)?;
        if let Some(neighbour) = self.leaf_id(same) {
            return Ok(FaceNeighbours::single(0, neighbour));
        }

        if level > 0 {
            let coarse = Pedigree::from_global_index(root_dims, level - 1, index.map(|i| i >> 1))?;
            if let Some(neighbour) = self.leaf_id(coarse) {
                return Ok(FaceNeighbours::single(-1, neighbour));
            }
        }

        if level < self.header.max_level {
            // The finer neighbours are the children of `same` touching the face.
            let (u, v) = face.axis().in_plane();
            let mut leaves = [None; NSUBFACES];
            for (slot, neighbour) in leaves.iter_mut().enumerate() {
                let mut child = index.map(|i| 2 * i);
                child[axis] += u64::from(!face.is_plus());
                child[u] += (slot & 1) as u64;
                child[v] += (slot >> 1) as u64;
                *neighbour =
                    self.leaf_id(Pedigree::from_global_index(root_dims, level + 1, child)?);
            }
            if leaves.iter().any(Option::is_some) {
                return Ok(FaceNeighbours {
                    level_diff: 1,
                    leaves,
                });
            }
        }

        Ok(FaceNeighbours::default())
    }
}
