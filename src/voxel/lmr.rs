//! Per leaf view of an adaptively refined decomposition.

use log::debug;

use super::VoxelInfo;
use crate::{
    constants::{NFACES, NSUBFACES},
    domain::{DomainInfo, GlobalDomainInfo, LocalDomainInfo},
    error::DomainError,
    octree::{FaceNeighbours, LeafTree, TreeHeader},
    partition::LeafPartition,
    pedigree::Pedigree,
    types::{BoundaryType, Face},
};

type SubfaceTable = [[Option<usize>; NSUBFACES]; NFACES];

/// A leaf of an adaptive decomposition together with its neighbours.
///
/// The embedded [VoxelInfo] describes the leaf as a subdomain of the uniform grid of
/// the leaf's level: its position is the leaf's global index on that level and its
/// voxels are the `leaf_block` cells of the leaf.
#[derive(Clone, Debug)]
pub struct VoxelInfoLmr {
    voxel: VoxelInfo,
    header: TreeHeader,
    num_leaf: usize,
    leaf: usize,
    pedigree: Pedigree,
    leaf_block: [usize; 3],
    neighbour_leaves: SubfaceTable,
    neighbour_ranks: SubfaceTable,
    periodic_leaves: SubfaceTable,
    periodic_ranks: SubfaceTable,
    level_diff: [i8; NFACES],
    periodic_level_diff: [i8; NFACES],
}

impl VoxelInfoLmr {
    /// Set up the view of `leaf`.
    ///
    /// The tree is queried with periodic wrap disabled and enabled. Its periodic flags
    /// are restored before returning.
    pub fn new(
        tree: &mut LeafTree,
        partition: &LeafPartition,
        leaf: usize,
        leaf_block: [usize; 3],
    ) -> Result<Self, DomainError> {
        check_leaf_block(leaf_block)?;
        if partition.num_leaves() != tree.num_leaves() {
            return Err(DomainError::DecompositionMismatch(format!(
                "partition of {} leaves for a tree with {} leaves",
                partition.num_leaves(),
                tree.num_leaves()
            )));
        }

        let pedigree = tree.pedigree(leaf)?;
        let rank = partition
            .rank_of(leaf)
            .ok_or_else(|| DomainError::InvalidArgument(format!("leaf {leaf} has no owner")))?;

        let saved = tree.periodic();
        tree.set_periodic([false; 3]);
        let hard = query_faces(tree, leaf);
        tree.set_periodic([true; 3]);
        let wrapped = query_faces(tree, leaf);
        tree.set_periodic(saved);
        let (hard, wrapped) = (hard?, wrapped?);

        let header = *tree.header();
        let level = pedigree.level();
        let index = pedigree.global_index(header.root_dims());
        let extent = header.root_dims().map(|d| (d as u64) << level);

        let mut neighbour_leaves = [[None; NSUBFACES]; NFACES];
        let mut neighbour_ranks = [[None; NSUBFACES]; NFACES];
        let mut periodic_leaves = [[None; NSUBFACES]; NFACES];
        let mut periodic_ranks = [[None; NSUBFACES]; NFACES];
        let mut level_diff = [0; NFACES];
        let mut periodic_level_diff = [0; NFACES];
        let mut boundary = [BoundaryType::Neighbour; NFACES];

        for face in Face::ALL {
            let f = face.index();
            let axis = face.axis().index();

            if hard[f].is_empty() {
                let at_edge = if face.is_plus() {
                    index[axis] + 1 == extent[axis]
                } else {
                    index[axis] == 0
                };
                boundary[f] = if at_edge {
                    BoundaryType::Outer
                } else {
                    BoundaryType::Inner
                };

                // A periodic neighbour only stands in for a missing regular one.
                periodic_level_diff[f] = wrapped[f].level_diff;
                for (slot, neighbour) in wrapped[f].iter() {
                    periodic_leaves[f][slot] = Some(neighbour);
                    periodic_ranks[f][slot] = partition.rank_of(neighbour);
                }
            } else {
                level_diff[f] = hard[f].level_diff;
                for (slot, neighbour) in hard[f].iter() {
                    neighbour_leaves[f][slot] = Some(neighbour);
                    neighbour_ranks[f][slot] = partition.rank_of(neighbour);
                }
            }
        }

        // The leaf as a subdomain of the uniform grid on its own level.
        let leaf_size = header.leaf_size(level);
        let divisions = extent.map(|e| e as usize);
        let voxel = std::array::from_fn(|axis| divisions[axis] * leaf_block[axis]);
        let global = GlobalDomainInfo::new(
            DomainInfo::new(header.origin(), header.region(), voxel)?,
            divisions,
        )?;
        let position = index.map(|i| i as usize);
        let origin = header.origin();
        let local = DomainInfo::from_pitch(
            std::array::from_fn(|axis| origin[axis] + index[axis] as f64 * leaf_size[axis]),
            std::array::from_fn(|axis| leaf_size[axis] / leaf_block[axis] as f64),
            leaf_block,
        )?;
        let head = std::array::from_fn(|axis| position[axis] * leaf_block[axis]);

        let voxel = VoxelInfo::from_parts(
            global,
            LocalDomainInfo::new(local, position),
            head,
            rank,
            partition.num_ranks(),
            neighbour_ranks.map(|ranks| ranks[0]),
            periodic_ranks.map(|ranks| ranks[0]),
            boundary,
        );

        debug!(
            "Leaf {leaf} {pedigree} on rank {rank}: level differences {level_diff:?}, neighbours {neighbour_leaves:?}."
        );

        Ok(Self {
            voxel,
            header,
            num_leaf: tree.num_leaves(),
            leaf,
            pedigree,
            leaf_block,
            neighbour_leaves,
            neighbour_ranks,
            periodic_leaves,
            periodic_ranks,
            level_diff,
            periodic_level_diff,
        })
    }

    /// The leaf as a subdomain of the uniform grid of its level.
    pub fn voxel(&self) -> &VoxelInfo {
        &self.voxel
    }

    /// Header of the tree.
    pub fn header(&self) -> &TreeHeader {
        &self.header
    }

    /// Total number of leaves of the tree.
    pub fn num_leaves(&self) -> usize {
        self.num_leaf
    }

    /// Id of the leaf.
    pub fn leaf_id(&self) -> usize {
        self.leaf
    }

    /// Pedigree of the leaf.
    pub fn pedigree(&self) -> Pedigree {
        self.pedigree
    }

    /// Refinement level of the leaf.
    pub fn level(&self) -> u32 {
        self.pedigree.level()
    }

    /// Number of cells of the leaf per axis.
    pub fn leaf_block(&self) -> [usize; 3] {
        self.leaf_block
    }

    /// Rank owning the leaf.
    pub fn rank(&self) -> usize {
        self.voxel.rank()
    }

    /// Neighbour leaves across a face by sub-face slot.
    pub fn neighbour_leaves(&self, face: Face) -> [Option<usize>; NSUBFACES] {
        self.neighbour_leaves[face.index()]
    }

    /// Ranks of the neighbour leaves across a face by sub-face slot.
    pub fn neighbour_ranks(&self, face: Face) -> [Option<usize>; NSUBFACES] {
        self.neighbour_ranks[face.index()]
    }

    /// Periodic neighbour leaves across a face by sub-face slot.
    pub fn periodic_leaves(&self, face: Face) -> [Option<usize>; NSUBFACES] {
        self.periodic_leaves[face.index()]
    }

    /// Ranks of the periodic neighbour leaves across a face by sub-face slot.
    pub fn periodic_ranks(&self, face: Face) -> [Option<usize>; NSUBFACES] {
        self.periodic_ranks[face.index()]
    }

    /// Level of the neighbours across a face relative to the leaf.
    pub fn level_diff(&self, face: Face) -> i8 {
        self.level_diff[face.index()]
    }

    /// Level of the periodic neighbours across a face relative to the leaf.
    pub fn periodic_level_diff(&self, face: Face) -> i8 {
        self.periodic_level_diff[face.index()]
    }

    /// Classification of a face.
    pub fn boundary(&self, face: Face) -> BoundaryType {
        self.voxel.boundary(face)
    }
}

/// A leaf block must have an even, non-zero number of cells along every axis.
pub(crate) fn check_leaf_block(leaf_block: [usize; 3]) -> Result<(), DomainError> {
    if leaf_block.iter().any(|&n| n == 0 || n % 2 != 0) {
        return Err(DomainError::InvalidArgument(format!(
            "leaf block {leaf_block:?} must be even and non-zero on every axis"
        )));
    }
    Ok(())
}

fn query_faces(tree: &LeafTree, leaf: usize) -> Result<[FaceNeighbours; NFACES], DomainError> {
    let mut result = [FaceNeighbours::default(); NFACES];
    for face in Face::ALL {
        result[face.index()] = tree.find_neighbours(leaf, face)?;
    }
    Ok(result)
}
