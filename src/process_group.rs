//! Process groups and the decompositions set up on them.
//!
//! A [ProcessGroupManager] owns a list of communicators. Group 0 is the communicator the
//! manager was created with. Further groups are subsets of an existing group. Every
//! group carries at most one decomposition, either Cartesian or adaptive.
//!
//! Operations on a group this rank does not belong to fail with
//! [DomainError::InvalidProcessGroup] instead of blocking.

use std::collections::BTreeMap;
use std::ops::Range;

use bytemuck::Pod;
use log::info;

use crate::{
    array::{ArrayShape, PaddedArray},
    comm::Communicator,
    config::{CartesianConfig, LmrConfig},
    constants::WORLD_GROUP,
    domain::{decide_divisions, parse_active_subdomains, GlobalDomainInfo},
    error::DomainError,
    halo::{self, HaloElement, HaloPlan, HaloRequest},
    octree::{load_tree_file, LeafTree},
    partition::LeafPartition,
    tools::{self, read_file_on_root, Reducible},
    types::{Axis, PeriodicDirection, ReduceOp},
    voxel::{check_leaf_block, VoxelInfo, VoxelInfoLmr},
};

/// Leaves of an adaptive decomposition owned by this rank.
#[derive(Clone, Debug)]
pub struct LeafDecomposition {
    tree: LeafTree,
    partition: LeafPartition,
    leaf_block: [usize; 3],
    leaves: BTreeMap<usize, VoxelInfoLmr>,
}

impl LeafDecomposition {
    /// The tree shared by all ranks.
    pub fn tree(&self) -> &LeafTree {
        &self.tree
    }

    /// Assignment of leaves to ranks.
    pub fn partition(&self) -> &LeafPartition {
        &self.partition
    }

    /// Number of cells per leaf and axis.
    pub fn leaf_block(&self) -> [usize; 3] {
        self.leaf_block
    }

    /// Local leaves in ascending id order.
    pub fn leaves(&self) -> impl Iterator<Item = &VoxelInfoLmr> + '_ {
        self.leaves.values()
    }

    /// Ids of the local leaves.
    pub fn local_range(&self) -> Range<usize> {
        self.leaves
            .keys()
            .next()
            .zip(self.leaves.keys().next_back())
            .map_or(0..0, |(&first, &last)| first..last + 1)
    }
}

#[derive(Clone, Debug)]
enum Decomposition {
    Cartesian(VoxelInfo),
    Lmr(LeafDecomposition),
}

/// A communicator together with its decomposition.
pub struct ProcessGroup<C: Communicator> {
    comm: C,
    decomposition: Option<Decomposition>,
}

/// Registry of the process groups of this rank.
pub struct ProcessGroupManager<C: Communicator> {
    groups: Vec<Option<ProcessGroup<C>>>,
}

impl<C: Communicator> ProcessGroupManager<C> {
    /// Create a manager whose group 0 is `world`.
    pub fn new(world: C) -> Self {
        info!(
            "Process group manager started on rank {} of {}.",
            world.rank(),
            world.size()
        );
        Self {
            groups: vec![Some(ProcessGroup {
                comm: world,
                decomposition: None,
            })],
        }
    }

    /// Create a group from ranks of `parent`.
    ///
    /// Collective over `parent`: every member must call it with the same list. `ranks`
    /// are ranks of `parent`; rank `i` of the new group is `ranks[i]`. Returns the id of the
    /// new group, which is the same on all members of `parent`.
    pub fn create_process_group(
        &mut self,
        parent: usize,
        ranks: &[usize],
    ) -> Result<usize, DomainError> {
        let comm = self.group(parent)?.comm.split(ranks)?;
        let id = self.groups.len();

        match &comm {
            Some(comm) => info!(
                "Created process group {id} from group {parent}: rank {} of {}.",
                comm.rank(),
                comm.size()
            ),
            None => info!("Created process group {id} from group {parent} without this rank."),
        }

        self.groups.push(comm.map(|comm| ProcessGroup {
            comm,
            decomposition: None,
        }));
        Ok(id)
    }

    fn group(&self, group: usize) -> Result<&ProcessGroup<C>, DomainError> {
        self.groups
            .get(group)
            .and_then(Option::as_ref)
            .ok_or(DomainError::InvalidProcessGroup(group))
    }

    fn group_mut(&mut self, group: usize) -> Result<&mut ProcessGroup<C>, DomainError> {
        self.groups
            .get_mut(group)
            .and_then(Option::as_mut)
            .ok_or(DomainError::InvalidProcessGroup(group))
    }

    /// Number of groups known to this rank, including those it does not belong to.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Is this rank a member of `group`?
    pub fn is_member(&self, group: usize) -> bool {
        self.group(group).is_ok()
    }

    /// Communicator of a group.
    pub fn comm(&self, group: usize) -> Result<&C, DomainError> {
        Ok(&self.group(group)?.comm)
    }

    /// Rank of this process in a group.
    pub fn rank(&self, group: usize) -> Result<usize, DomainError> {
        Ok(self.comm(group)?.rank())
    }

    /// Number of ranks of a group.
    pub fn size(&self, group: usize) -> Result<usize, DomainError> {
        Ok(self.comm(group)?.size())
    }

    /// Set up a Cartesian decomposition on a group.
    ///
    /// Collective over the group. Division counts come from the active subdomain file if
    /// one is configured, else from the configuration, else they are chosen to minimise the
    /// interface area. Replaces any previous decomposition of the group.
    pub fn voxel_init(
        &mut self,
        group: usize,
        config: &CartesianConfig,
    ) -> Result<&VoxelInfo, DomainError> {
        let comm = self.comm(group)?;
        let domain = config.domain().clone();

        let global = match config.active_subdomain_file() {
            Some(path) => {
                let bytes = read_file_on_root(path, 0, comm)?;
                let (divisions, active) = parse_active_subdomains(&bytes)?;
                if let Some(requested) = config.divisions() {
                    if requested != divisions {
                        return Err(DomainError::DecompositionMismatch(format!(
                            "{} divides the domain into {divisions:?}, requested {requested:?}",
                            path.display()
                        )));
                    }
                }
                let mut global = GlobalDomainInfo::new(domain, divisions)?;
                for position in active {
                    global.add_active(position)?;
                }
                global
            }
            None => {
                let divisions = match config.divisions() {
                    Some(divisions) => divisions,
                    None => decide_divisions(domain.voxel(), comm.size())?,
                };
                GlobalDomainInfo::new(domain, divisions)?
            }
        };

        let info = VoxelInfo::new(global, comm.rank(), comm.size())?;
        info!(
            "Group {group}: Cartesian decomposition into {:?} subdomains, {} active.",
            info.global().divisions(),
            info.global().active_count()
        );

        self.group_mut(group)?.decomposition = Some(Decomposition::Cartesian(info));
        self.voxel_info(group)
    }

    /// Set up an adaptive decomposition from a tree file.
    ///
    /// Collective over the group. The tree file is read on rank 0 of the group. Returns the
    /// ids of the local leaves.
    pub fn voxel_init_lmr(
        &mut self,
        group: usize,
        config: &LmrConfig,
    ) -> Result<Range<usize>, DomainError> {
        let tree = load_tree_file(config.tree_file(), 0, self.comm(group)?)?;
        info!(
            "Group {group}: tree {} with {} leaves, lengths in {}.",
            config.tree_file().display(),
            tree.num_leaves(),
            config.unit()
        );
        self.voxel_init_lmr_with_tree(group, tree, config.leaf_block())
    }

    /// Set up an adaptive decomposition from a tree held by every rank.
    ///
    /// Every rank of the group must pass the same tree. Returns the ids of the local leaves.
    pub fn voxel_init_lmr_with_tree(
        &mut self,
        group: usize,
        mut tree: LeafTree,
        leaf_block: [usize; 3],
    ) -> Result<Range<usize>, DomainError> {
        check_leaf_block(leaf_block)?;
        let comm = self.comm(group)?;
        let rank = comm.rank();

        let partition = LeafPartition::new(tree.num_leaves(), comm.size())?;
        partition.check_every_rank_owns_a_leaf()?;

        let range = partition.range(rank);
        let mut leaves = BTreeMap::new();
        for leaf in range.clone() {
            leaves.insert(
                leaf,
                VoxelInfoLmr::new(&mut tree, &partition, leaf, leaf_block)?,
            );
        }

        info!(
            "Group {group}: rank {rank} owns leaves {range:?} of {}.",
            tree.num_leaves()
        );

        self.group_mut(group)?.decomposition = Some(Decomposition::Lmr(LeafDecomposition {
            tree,
            partition,
            leaf_block,
            leaves,
        }));
        Ok(range)
    }

    /// The Cartesian decomposition of a group.
    pub fn voxel_info(&self, group: usize) -> Result<&VoxelInfo, DomainError> {
        match &self.group(group)?.decomposition {
            Some(Decomposition::Cartesian(info)) => Ok(info),
            _ => Err(DomainError::InvalidArgument(format!(
                "group {group} has no Cartesian decomposition"
            ))),
        }
    }

    /// The adaptive decomposition of a group.
    pub fn leaf_decomposition(&self, group: usize) -> Result<&LeafDecomposition, DomainError> {
        match &self.group(group)?.decomposition {
            Some(Decomposition::Lmr(leaves)) => Ok(leaves),
            _ => Err(DomainError::InvalidArgument(format!(
                "group {group} has no adaptive decomposition"
            ))),
        }
    }

    /// The local leaves of a group in ascending id order.
    pub fn leaf_infos(
        &self,
        group: usize,
    ) -> Result<impl Iterator<Item = &VoxelInfoLmr> + '_, DomainError> {
        Ok(self.leaf_decomposition(group)?.leaves())
    }

    /// A local leaf of a group.
    pub fn leaf_info(&self, group: usize, leaf: usize) -> Result<&VoxelInfoLmr, DomainError> {
        self.leaf_decomposition(group)?
            .leaves
            .get(&leaf)
            .ok_or_else(|| {
                DomainError::InvalidArgument(format!("leaf {leaf} is not owned by this rank"))
            })
    }

    /// Number of owned cells per axis of this rank's region, or of one leaf.
    pub fn local_voxel(&self, group: usize) -> Result<[usize; 3], DomainError> {
        match &self.group(group)?.decomposition {
            Some(Decomposition::Cartesian(info)) => Ok(info.local_voxel()),
            Some(Decomposition::Lmr(leaves)) => Ok(leaves.leaf_block),
            None => Err(DomainError::InvalidArgument(format!(
                "group {group} has no decomposition"
            ))),
        }
    }

    /// Allocate a zeroed field on the local region of a Cartesian decomposition.
    pub fn allocate<T: Pod>(
        &self,
        group: usize,
        shape: ArrayShape,
        vc: usize,
    ) -> Result<PaddedArray<T>, DomainError> {
        PaddedArray::zeroed(shape, self.voxel_info(group)?.local_voxel(), vc)
    }

    /// Allocate one zeroed field per local leaf, in ascending leaf order.
    pub fn allocate_leaves<T: Pod>(
        &self,
        group: usize,
        shape: ArrayShape,
        vc: usize,
    ) -> Result<Vec<PaddedArray<T>>, DomainError> {
        let leaves = self.leaf_decomposition(group)?;
        leaves
            .leaves
            .keys()
            .map(|_| PaddedArray::zeroed(shape, leaves.leaf_block, vc))
            .collect()
    }

    fn check_local_array<T: Pod>(
        expected: [usize; 3],
        array: &PaddedArray<T>,
    ) -> Result<(), DomainError> {
        if array.local() != expected {
            return Err(DomainError::InvalidArgument(format!(
                "field of extents {:?} on a region of {expected:?} cells",
                array.local()
            )));
        }
        Ok(())
    }

    fn cartesian_start<T: HaloElement>(
        &self,
        group: usize,
        array: &PaddedArray<T>,
        vc_comm: usize,
        plan: impl FnOnce(&VoxelInfo) -> HaloPlan,
    ) -> Result<HaloRequest<C::Request>, DomainError> {
        let info = self.voxel_info(group)?;
        Self::check_local_array(info.local_voxel(), array)?;
        halo::exchange_nowait(
            self.comm(group)?,
            &plan(info),
            std::slice::from_ref(array),
            vc_comm,
        )
    }

    fn leaf_start<T: HaloElement>(
        &self,
        group: usize,
        arrays: &[PaddedArray<T>],
        vc_comm: usize,
        plan: impl FnOnce(&LeafDecomposition) -> HaloPlan,
    ) -> Result<HaloRequest<C::Request>, DomainError> {
        let leaves = self.leaf_decomposition(group)?;
        if arrays.len() != leaves.leaves.len() {
            return Err(DomainError::InvalidArgument(format!(
                "{} fields for {} local leaves",
                arrays.len(),
                leaves.leaves.len()
            )));
        }
        for array in arrays {
            Self::check_local_array(leaves.leaf_block, array)?;
        }
        halo::exchange_nowait(self.comm(group)?, &plan(leaves), arrays, vc_comm)
    }

    /// Start exchanging `vc_comm` ghost layers with the neighbours of this rank.
    ///
    /// Collective over the group. Complete with [ProcessGroupManager::wait_halo].
    pub fn exchange_halo_nowait<T: HaloElement>(
        &self,
        group: usize,
        array: &PaddedArray<T>,
        vc_comm: usize,
    ) -> Result<HaloRequest<C::Request>, DomainError> {
        self.cartesian_start(group, array, vc_comm, HaloPlan::cartesian)
    }

    /// Complete an exchange on a Cartesian decomposition.
    pub fn wait_halo<T: HaloElement>(
        &self,
        request: HaloRequest<C::Request>,
        array: &mut PaddedArray<T>,
    ) -> Result<(), DomainError> {
        request.wait(std::slice::from_mut(array))
    }

    /// Exchange `vc_comm` ghost layers with the neighbours of this rank.
    pub fn exchange_halo<T: HaloElement>(
        &self,
        group: usize,
        array: &mut PaddedArray<T>,
        vc_comm: usize,
    ) -> Result<(), DomainError> {
        let request = self.exchange_halo_nowait(group, array, vc_comm)?;
        self.wait_halo(request, array)
    }

    /// Start exchanging ghost layers across the periodic boundary normal to `axis`.
    pub fn exchange_periodic_halo_nowait<T: HaloElement>(
        &self,
        group: usize,
        array: &PaddedArray<T>,
        vc_comm: usize,
        axis: Axis,
        direction: PeriodicDirection,
    ) -> Result<HaloRequest<C::Request>, DomainError> {
        self.cartesian_start(group, array, vc_comm, |info| {
            HaloPlan::cartesian_periodic(info, axis, direction)
        })
    }

    /// Exchange ghost layers across the periodic boundary normal to `axis`.
    pub fn exchange_periodic_halo<T: HaloElement>(
        &self,
        group: usize,
        array: &mut PaddedArray<T>,
        vc_comm: usize,
        axis: Axis,
        direction: PeriodicDirection,
    ) -> Result<(), DomainError> {
        let request = self.exchange_periodic_halo_nowait(group, array, vc_comm, axis, direction)?;
        self.wait_halo(request, array)
    }

    /// Start exchanging ghost layers between the local leaves and their neighbours.
    ///
    /// `arrays` holds one field per local leaf in ascending leaf order.
    pub fn exchange_leaf_halo_nowait<T: HaloElement>(
        &self,
        group: usize,
        arrays: &[PaddedArray<T>],
        vc_comm: usize,
    ) -> Result<HaloRequest<C::Request>, DomainError> {
        self.leaf_start(group, arrays, vc_comm, |leaves| {
            HaloPlan::leaves(leaves.leaves())
        })
    }

    /// Complete an exchange on an adaptive decomposition.
    pub fn wait_leaf_halo<T: HaloElement>(
        &self,
        request: HaloRequest<C::Request>,
        arrays: &mut [PaddedArray<T>],
    ) -> Result<(), DomainError> {
        request.wait(arrays)
    }

    /// Exchange ghost layers between the local leaves and their neighbours.
    pub fn exchange_leaf_halo<T: HaloElement>(
        &self,
        group: usize,
        arrays: &mut [PaddedArray<T>],
        vc_comm: usize,
    ) -> Result<(), DomainError> {
        let request = self.exchange_leaf_halo_nowait(group, arrays, vc_comm)?;
        self.wait_leaf_halo(request, arrays)
    }

    /// Exchange ghost layers of the local leaves across the periodic boundary normal to `axis`.
    pub fn exchange_leaf_periodic_halo<T: HaloElement>(
        &self,
        group: usize,
        arrays: &mut [PaddedArray<T>],
        vc_comm: usize,
        axis: Axis,
        direction: PeriodicDirection,
    ) -> Result<(), DomainError> {
        let request = self.leaf_start(group, arrays, vc_comm, |leaves| {
            HaloPlan::leaves_periodic(leaves.leaves(), axis, direction)
        })?;
        self.wait_leaf_halo(request, arrays)
    }

    /// Block until every rank of the group has arrived.
    pub fn barrier(&self, group: usize) -> Result<(), DomainError> {
        self.comm(group)?.barrier()
    }

    /// Broadcast values of arbitrary length from `root`.
    pub fn broadcast<T: Pod>(
        &self,
        group: usize,
        values: &mut Vec<T>,
        root: usize,
    ) -> Result<(), DomainError> {
        tools::broadcast_values(values, root, self.comm(group)?)
    }

    /// Element-wise reduction over the group.
    pub fn all_reduce<T: Reducible>(
        &self,
        group: usize,
        values: &[T],
        op: ReduceOp,
    ) -> Result<Vec<T>, DomainError> {
        tools::all_reduce(values, op, self.comm(group)?)
    }

    /// Concatenate the values of all ranks on `root`.
    ///
    /// Returns `None` on all other ranks.
    pub fn gather<T: Pod>(
        &self,
        group: usize,
        values: &[T],
        root: usize,
    ) -> Result<Option<Vec<T>>, DomainError> {
        tools::gather_to_root(values, root, self.comm(group)?)
    }

    /// Concatenate the values of all ranks on every rank.
    pub fn all_gather<T: Pod>(&self, group: usize, values: &[T]) -> Result<Vec<T>, DomainError> {
        tools::gather_to_all(values, self.comm(group)?)
    }

    /// Terminate every rank of the universal group.
    pub fn abort(&self, code: i32) -> ! {
        match self.groups.get(WORLD_GROUP).and_then(Option::as_ref) {
            Some(world) => world.comm.abort(code),
            None => std::process::exit(code),
        }
    }
}
