//! Per rank and per leaf views of a decomposition.
mod lmr;

use std::collections::HashMap;

use log::debug;

pub(crate) use lmr::check_leaf_block;
pub use lmr::VoxelInfoLmr;

use crate::{
    constants::{NFACES, NULL_RANK},
    domain::{DomainInfo, GlobalDomainInfo, LocalDomainInfo},
    error::DomainError,
    types::{BoundaryType, Face},
};

/// A rank's region of a Cartesian decomposition together with its neighbours.
#[derive(Clone, Debug)]
pub struct VoxelInfo {
    global: GlobalDomainInfo,
    local: LocalDomainInfo,
    head: [usize; 3],
    tail: [usize; 3],
    nrank: usize,
    rank: usize,
    neighbours: [Option<usize>; NFACES],
    periodic_neighbours: [Option<usize>; NFACES],
    boundary: [BoundaryType; NFACES],
}

impl VoxelInfo {
    /// Set up the view of `rank` out of `nrank` ranks.
    ///
    /// Rank `r` owns the `r`-th active subdomain in x fastest order, so the number of
    /// active subdomains must equal the number of ranks.
    pub fn new(global: GlobalDomainInfo, rank: usize, nrank: usize) -> Result<Self, DomainError> {
        let positions = global.active_positions();
        if positions.len() != nrank {
            return Err(DomainError::DecompositionMismatch(format!(
                "{} active subdomains for {nrank} ranks",
                positions.len()
            )));
        }
        if rank >= nrank {
            return Err(DomainError::InvalidArgument(format!(
                "rank {rank} out of {nrank} ranks"
            )));
        }

        let rank_of = positions
            .iter()
            .enumerate()
            .map(|(rank, &position)| (position, rank))
            .collect::<HashMap<_, _>>();
        let position = positions[rank];
        let divisions = global.divisions();

        let mut neighbours = [None; NFACES];
        let mut periodic_neighbours = [None; NFACES];
        let mut boundary = [BoundaryType::Neighbour; NFACES];

        for face in Face::ALL {
            let axis = face.axis().index();
            let mut far = position.map(|p| p as i64);
            far[axis] += face.sign();

            if !global.contains(far) {
                boundary[face.index()] = BoundaryType::Outer;
                far[axis] = far[axis].rem_euclid(divisions[axis] as i64);
                periodic_neighbours[face.index()] = rank_of.get(&far.map(|p| p as usize)).copied();
            } else if let Some(&neighbour) = rank_of.get(&far.map(|p| p as usize)) {
                neighbours[face.index()] = Some(neighbour);
            } else {
                boundary[face.index()] = BoundaryType::Inner;
            }
        }

        let (head, count) = global.subdomain_extent(position);
        let tail = std::array::from_fn(|axis| head[axis] + count[axis] - 1);
        let local = Self::local_domain(global.domain(), head, count)?;

        debug!(
            "Rank {rank} owns subdomain {position:?}, voxels {head:?} to {tail:?}, neighbours {neighbours:?}."
        );

        Ok(Self {
            global,
            local: LocalDomainInfo::new(local, position),
            head,
            tail,
            nrank,
            rank,
            neighbours,
            periodic_neighbours,
            boundary,
        })
    }

    /// Assemble a view from precomputed parts.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        global: GlobalDomainInfo,
        local: LocalDomainInfo,
        head: [usize; 3],
        rank: usize,
        nrank: usize,
        neighbours: [Option<usize>; NFACES],
        periodic_neighbours: [Option<usize>; NFACES],
        boundary: [BoundaryType; NFACES],
    ) -> Self {
        let count = local.domain().voxel();
        let tail = std::array::from_fn(|axis| head[axis] + count[axis] - 1);
        Self {
            global,
            local,
            head,
            tail,
            nrank,
            rank,
            neighbours,
            periodic_neighbours,
            boundary,
        }
    }

    fn local_domain(
        global: &DomainInfo,
        head: [usize; 3],
        count: [usize; 3],
    ) -> Result<DomainInfo, DomainError> {
        let origin = global.origin();
        let pitch = global.pitch();
        DomainInfo::from_pitch(
            std::array::from_fn(|axis| origin[axis] + head[axis] as f64 * pitch[axis]),
            pitch,
            count,
        )
    }

    /// The whole decomposition.
    pub fn global(&self) -> &GlobalDomainInfo {
        &self.global
    }

    /// The owned region.
    pub fn local(&self) -> &LocalDomainInfo {
        &self.local
    }

    /// Position in the division grid.
    pub fn position(&self) -> [usize; 3] {
        self.local.position()
    }

    /// Number of owned voxels per axis.
    pub fn local_voxel(&self) -> [usize; 3] {
        self.local.domain().voxel()
    }

    /// Global index of the first owned voxel.
    pub fn head(&self) -> [usize; 3] {
        self.head
    }

    /// Global index of the last owned voxel.
    pub fn tail(&self) -> [usize; 3] {
        self.tail
    }

    /// Rank of the owner.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of ranks of the decomposition.
    pub fn nrank(&self) -> usize {
        self.nrank
    }

    /// Neighbour rank across a face.
    pub fn neighbour(&self, face: Face) -> Option<usize> {
        self.neighbours[face.index()]
    }

    /// Neighbour ranks indexed by face.
    pub fn neighbours(&self) -> &[Option<usize>; NFACES] {
        &self.neighbours
    }

    /// Periodic neighbour rank across a face.
    pub fn periodic_neighbour(&self, face: Face) -> Option<usize> {
        self.periodic_neighbours[face.index()]
    }

    /// Periodic neighbour ranks indexed by face.
    pub fn periodic_neighbours(&self) -> &[Option<usize>; NFACES] {
        &self.periodic_neighbours
    }

    /// Classification of a face.
    pub fn boundary(&self, face: Face) -> BoundaryType {
        self.boundary[face.index()]
    }

    /// Is the face on the edge of the decomposition?
    pub fn is_outer_boundary(&self, face: Face) -> bool {
        self.boundary(face) == BoundaryType::Outer
    }

    /// Is the face next to an inactive subdomain?
    pub fn is_inner_boundary(&self, face: Face) -> bool {
        self.boundary(face) == BoundaryType::Inner
    }

    /// Neighbour ranks as integers with [NULL_RANK] for missing neighbours.
    pub fn neighbour_rank_codes(&self) -> [i32; NFACES] {
        self.neighbours
            .map(|n| n.map_or(NULL_RANK, |rank| rank as i32))
    }
}
