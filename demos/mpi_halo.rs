//! Exchange ghost layers of a Cartesian decomposition across MPI ranks.

use bempp_domain::{
    array::ArrayShape, comm::MpiComm, config::CartesianConfig, domain::DomainInfo,
    types::{Face, ReduceOp},
    ProcessGroupManager,
};
use itertools::iproduct;

pub fn main() {
    // Initialise MPI
    let universe = mpi::initialize().unwrap();

    // Wrap the world communicator
    let mut manager = ProcessGroupManager::new(MpiComm::new(universe.world()));
    let rank = manager.rank(0).unwrap();

    // Let the manager choose the divisions of a 64^3 grid.
    let domain = DomainInfo::new([0.0; 3], [1.0; 3], [64, 64, 64]).unwrap();
    let info = manager
        .voxel_init(0, &CartesianConfig::new(domain))
        .unwrap()
        .clone();

    if rank == 0 {
        println!("Divisions: {:?}", info.global().divisions());
    }

    // Fill the owned cells with the global x index.
    let mut array = manager
        .allocate::<f64>(0, ArrayShape::Scalar3D, 2)
        .unwrap();
    let [nx, ny, nz] = info.local_voxel().map(|n| n as i64);
    for (k, j, i) in iproduct!(0..nz, 0..ny, 0..nx) {
        array.set([i, j, k], 0, (info.head()[0] as i64 + i) as f64);
    }

    manager.exchange_halo(0, &mut array, 2).unwrap();

    // The first ghost layer on the +x side continues the global index.
    let correct = info.neighbour(Face::XPlus).is_none()
        || array.get([nx, 0, 0], 0) == (info.tail()[0] + 1) as f64;
    let all_correct = manager
        .all_reduce(0, &[u8::from(correct)], ReduceOp::LogicalAnd)
        .unwrap();

    if rank == 0 {
        assert_eq!(all_correct[0], 1);
        println!("Halo exchange successful.");
    }
}
