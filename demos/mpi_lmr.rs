//! Set up an adaptive decomposition on a random tree and exchange leaf ghost layers.

use bempp_domain::{
    array::ArrayShape,
    comm::MpiComm,
    octree::TreeHeader,
    tools::{generate_random_tree, seeded_rng},
    types::{Axis, PeriodicDirection},
    vtk::export_leaf_partition,
    ProcessGroupManager,
};

pub fn main() {
    // Initialise MPI
    let universe = mpi::initialize().unwrap();

    let mut manager = ProcessGroupManager::new(MpiComm::new(universe.world()));
    let rank = manager.rank(0).unwrap();

    // Every rank generates the same tree from the same seed.
    let header = TreeHeader::new([0.0; 3], [4.0, 2.0, 2.0], [4, 2, 2], 3).unwrap();
    let tree = generate_random_tree(header, 40, &mut seeded_rng(0)).unwrap();
    let range = manager
        .voxel_init_lmr_with_tree(0, tree, [8, 8, 8])
        .unwrap();
    println!("Rank {} owns leaves {:?}.", rank, range);

    let mut arrays = manager
        .allocate_leaves::<f64>(0, ArrayShape::Scalar3D, 2)
        .unwrap();
    for (array, leaf) in arrays.iter_mut().zip(range) {
        array.data_mut().fill(leaf as f64);
    }

    manager.exchange_leaf_halo(0, &mut arrays, 2).unwrap();
    manager
        .exchange_leaf_periodic_halo(0, &mut arrays, 2, Axis::X, PeriodicDirection::Both)
        .unwrap();
    manager.barrier(0).unwrap();

    if rank == 0 {
        let leaves = manager.leaf_decomposition(0).unwrap();
        export_leaf_partition("leaf_partition.vtu", leaves.tree(), leaves.partition()).unwrap();
        println!("Leaf halo exchange successful.");
    }
}
