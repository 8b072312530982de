//! Multi-rank halo exchange scenarios run on the in-process backend.

use bempp_domain::{
    array::{ArrayShape, PaddedArray},
    comm::{LocalComm, LocalUniverse},
    config::CartesianConfig,
    domain::DomainInfo,
    octree::{LeafTree, TreeHeader},
    types::{Axis, Face, PeriodicDirection},
    voxel::VoxelInfoLmr,
    ProcessGroupManager,
};
use itertools::iproduct;

/// Value of a cell of the global grid.
fn global_value(index: [i64; 3], component: usize) -> f64 {
    (1000 * component as i64 + 100 * index[0] + 10 * index[1] + index[2]) as f64 + 1.0
}

fn cartesian_manager(comm: LocalComm) -> ProcessGroupManager<LocalComm> {
    let mut manager = ProcessGroupManager::new(comm);
    let domain = DomainInfo::new([0.0; 3], [2.0, 1.0, 1.0], [8, 4, 4]).unwrap();
    let config = CartesianConfig::new(domain)
        .with_divisions([2, 1, 1])
        .unwrap();
    manager.voxel_init(0, &config).unwrap();
    manager
}

fn fill_owned(manager: &ProcessGroupManager<LocalComm>, array: &mut PaddedArray<f64>) {
    let head = manager.voxel_info(0).unwrap().head().map(|h| h as i64);
    let [nx, ny, nz] = array.local().map(|n| n as i64);
    for (c, k, j, i) in iproduct!(0..array.shape().components(), 0..nz, 0..ny, 0..nx) {
        let value = global_value([head[0] + i, head[1] + j, head[2] + k], c);
        array.set([i, j, k], c, value);
    }
}

#[test]
fn test_cartesian_halo() {
    LocalUniverse::run(2, |comm| {
        let manager = cartesian_manager(comm);
        let rank = manager.rank(0).unwrap();
        let mut array = manager.allocate::<f64>(0, ArrayShape::Scalar3D, 2).unwrap();
        fill_owned(&manager, &mut array);

        manager.exchange_halo(0, &mut array, 2).unwrap();

        for (d, k, j) in iproduct!(0..2_i64, 0..4_i64, 0..4_i64) {
            if rank == 0 {
                // Ghost layers on the +x side hold the first layers of rank 1.
                assert_eq!(array.get([4 + d, j, k], 0), global_value([4 + d, j, k], 0));
                // The outer boundary is untouched.
                assert_eq!(array.get([-1 - d, j, k], 0), 0.0);
            } else {
                assert_eq!(array.get([-1 - d, j, k], 0), global_value([3 - d, j, k], 0));
                assert_eq!(array.get([4 + d, j, k], 0), 0.0);
            }
        }

        // A second exchange without local writes changes nothing.
        let before = array.data().to_vec();
        manager.exchange_halo(0, &mut array, 2).unwrap();
        assert_eq!(array.data(), &before[..]);
    });
}

#[test]
fn test_split_phase_exchange_of_vector_fields() {
    LocalUniverse::run(2, |comm| {
        let manager = cartesian_manager(comm);
        let rank = manager.rank(0).unwrap();

        for shape in [ArrayShape::Vector3D, ArrayShape::Vector3DEx] {
            let mut array = manager.allocate::<f64>(0, shape, 2).unwrap();
            fill_owned(&manager, &mut array);

            // Only one of the two ghost layers is exchanged.
            let request = manager.exchange_halo_nowait(0, &array, 1).unwrap();
            manager.wait_halo(request, &mut array).unwrap();

            for (c, k, j) in iproduct!(0..3, 0..4_i64, 0..4_i64) {
                if rank == 0 {
                    assert_eq!(array.get([4, j, k], c), global_value([4, j, k], c));
                    assert_eq!(array.get([5, j, k], c), 0.0);
                } else {
                    assert_eq!(array.get([-1, j, k], c), global_value([3, j, k], c));
                    assert_eq!(array.get([-2, j, k], c), 0.0);
                }
            }
        }
    });
}

#[test]
fn test_reject_too_many_layers() {
    LocalUniverse::run(2, |comm| {
        let manager = cartesian_manager(comm);
        let array = manager.allocate::<f32>(0, ArrayShape::Scalar3D, 1).unwrap();
        assert!(manager.exchange_halo_nowait(0, &array, 2).is_err());

        let wrong = PaddedArray::<f32>::zeroed(ArrayShape::Scalar3D, [3, 4, 4], 1).unwrap();
        assert!(manager.exchange_halo_nowait(0, &wrong, 1).is_err());
    });
}

#[test]
fn test_cartesian_periodic_halo() {
    LocalUniverse::run(2, |comm| {
        let manager = cartesian_manager(comm);
        let rank = manager.rank(0).unwrap();

        let mut array = manager.allocate::<f64>(0, ArrayShape::Scalar3D, 1).unwrap();
        fill_owned(&manager, &mut array);
        manager
            .exchange_periodic_halo(0, &mut array, 1, Axis::X, PeriodicDirection::Both)
            .unwrap();
        for (k, j) in iproduct!(0..4_i64, 0..4_i64) {
            if rank == 0 {
                assert_eq!(array.get([-1, j, k], 0), global_value([7, j, k], 0));
            } else {
                assert_eq!(array.get([4, j, k], 0), global_value([0, j, k], 0));
            }
        }

        // Along y each rank is its own periodic neighbour; only the plus side receives.
        let mut array = manager.allocate::<f64>(0, ArrayShape::Scalar3D, 1).unwrap();
        fill_owned(&manager, &mut array);
        let offset = 4 * rank as i64;
        manager
            .exchange_periodic_halo(0, &mut array, 1, Axis::Y, PeriodicDirection::MinusToPlus)
            .unwrap();
        for (k, i) in iproduct!(0..4_i64, 0..4_i64) {
            assert_eq!(array.get([i, 4, k], 0), global_value([offset + i, 0, k], 0));
            assert_eq!(array.get([i, -1, k], 0), 0.0);
        }
    });
}

/// Two root cells along x; the second one is refined once.
fn refined_tree() -> LeafTree {
    let header = TreeHeader::new([0.0; 3], [2.0, 1.0, 1.0], [2, 1, 1], 2).unwrap();
    let mut tree = LeafTree::uniform(header, 0).unwrap();
    tree.refine(1).unwrap();
    tree
}

/// Value stored in every owned cell of a leaf.
fn leaf_value(leaf: usize) -> f64 {
    leaf as f64 + 1.0
}

/// Check the ghost cells of one face against the constant values of its neighbours.
fn check_face(
    array: &PaddedArray<f64>,
    face: Face,
    leaves: [Option<usize>; 4],
    level_diff: i8,
    vc_comm: usize,
) {
    let axis = face.axis().index();
    let (u, v) = face.axis().in_plane();
    let local = array.local();
    let n = local[axis] as i64;

    for (d, pv, pu) in iproduct!(0..vc_comm as i64, 0..local[v], 0..local[u]) {
        let mut cell = [0; 3];
        cell[axis] = if face.is_plus() { n + d } else { -1 - d };
        cell[u] = pu as i64;
        cell[v] = pv as i64;

        let slot = if level_diff > 0 {
            usize::from(2 * pu >= local[u]) + 2 * usize::from(2 * pv >= local[v])
        } else {
            0
        };
        let expected = leaves[slot].map_or(0.0, leaf_value);
        assert_eq!(array.get(cell, 0), expected, "{face} ghost {cell:?}");
    }
}

fn leaf_arrays(manager: &ProcessGroupManager<LocalComm>, vc: usize) -> Vec<PaddedArray<f64>> {
    let mut arrays = manager
        .allocate_leaves::<f64>(0, ArrayShape::Scalar3D, vc)
        .unwrap();
    let infos = manager.leaf_infos(0).unwrap().collect::<Vec<&VoxelInfoLmr>>();
    for (array, info) in arrays.iter_mut().zip(infos) {
        let [nx, ny, nz] = array.local().map(|n| n as i64);
        for (k, j, i) in iproduct!(0..nz, 0..ny, 0..nx) {
            array.set([i, j, k], 0, leaf_value(info.leaf_id()));
        }
    }
    arrays
}

#[test]
fn test_multi_level_leaf_halo() {
    LocalUniverse::run(2, |comm| {
        let mut manager = ProcessGroupManager::new(comm);
        let range = manager
            .voxel_init_lmr_with_tree(0, refined_tree(), [4, 4, 4])
            .unwrap();
        assert_eq!(range.len(), if manager.rank(0).unwrap() == 0 { 5 } else { 4 });

        let mut arrays = leaf_arrays(&manager, 2);
        manager.exchange_leaf_halo(0, &mut arrays, 2).unwrap();

        let infos = manager.leaf_infos(0).unwrap().collect::<Vec<_>>();
        for (array, info) in arrays.iter().zip(&infos) {
            for face in Face::ALL {
                check_face(
                    array,
                    face,
                    info.neighbour_leaves(face),
                    info.level_diff(face),
                    2,
                );
            }
        }

        // The coarse leaf sees four finer neighbours across +x.
        if let Ok(coarse) = manager.leaf_info(0, 0) {
            assert_eq!(coarse.level_diff(Face::XPlus), 1);
            assert_eq!(
                coarse.neighbour_leaves(Face::XPlus).iter().flatten().count(),
                4
            );
        }

        let before = arrays.iter().map(|a| a.data().to_vec()).collect::<Vec<_>>();
        let request = manager.exchange_leaf_halo_nowait(0, &arrays, 2).unwrap();
        manager.wait_leaf_halo(request, &mut arrays).unwrap();
        for (array, data) in arrays.iter().zip(&before) {
            assert_eq!(array.data(), &data[..]);
        }
    });
}

#[test]
fn test_multi_level_periodic_leaf_halo() {
    LocalUniverse::run(2, |comm| {
        let mut manager = ProcessGroupManager::new(comm);
        manager
            .voxel_init_lmr_with_tree(0, refined_tree(), [4, 4, 4])
            .unwrap();

        let mut arrays = leaf_arrays(&manager, 1);
        manager
            .exchange_leaf_periodic_halo(0, &mut arrays, 1, Axis::X, PeriodicDirection::Both)
            .unwrap();

        let infos = manager.leaf_infos(0).unwrap().collect::<Vec<_>>();
        for (array, info) in arrays.iter().zip(&infos) {
            for face in [Face::XMinus, Face::XPlus] {
                if info.neighbour_leaves(face).iter().all(Option::is_none) {
                    check_face(
                        array,
                        face,
                        info.periodic_leaves(face),
                        info.periodic_level_diff(face),
                        1,
                    );
                }
            }
        }

        // Across the periodic boundary the coarse leaf meets the fine leaves at the far end.
        if let Ok(coarse) = manager.leaf_info(0, 0) {
            assert_eq!(coarse.periodic_level_diff(Face::XMinus), 1);
        }
    });
}

/// Linear field sampled at cell centres.
fn linear_field(point: [f64; 3]) -> f64 {
    point[0] + 10.0 * point[1] + 100.0 * point[2]
}

/// Centre of a cell of a grid with spacing `h` starting at `origin`.
fn centre(origin: [f64; 3], h: [f64; 3], cell: [i64; 3]) -> [f64; 3] {
    std::array::from_fn(|axis| origin[axis] + (cell[axis] as f64 + 0.5) * h[axis])
}

/// Shift a point outside the tree by one period along each axis.
fn wrap(point: [f64; 3], header: &TreeHeader) -> [f64; 3] {
    std::array::from_fn(|axis| {
        let (lower, length) = (header.origin()[axis], header.region()[axis]);
        if point[axis] < lower {
            point[axis] + length
        } else if point[axis] > lower + length {
            point[axis] - length
        } else {
            point[axis]
        }
    })
}

/// Origin and cell spacing of a leaf.
fn leaf_grid(tree: &LeafTree, info: &VoxelInfoLmr) -> ([f64; 3], [f64; 3]) {
    let leaf_box = tree.leaf_box(info.leaf_id()).unwrap();
    let region = leaf_box.region();
    let block = info.leaf_block();
    (
        leaf_box.origin(),
        std::array::from_fn(|axis| region[axis] / block[axis] as f64),
    )
}

fn linear_leaf_arrays(
    manager: &ProcessGroupManager<LocalComm>,
    vc: usize,
) -> Vec<PaddedArray<f64>> {
    let tree = manager.leaf_decomposition(0).unwrap().tree();
    let mut arrays = manager
        .allocate_leaves::<f64>(0, ArrayShape::Scalar3D, vc)
        .unwrap();
    for (array, info) in arrays.iter_mut().zip(manager.leaf_infos(0).unwrap()) {
        let (origin, h) = leaf_grid(tree, info);
        let [nx, ny, nz] = array.local().map(|n| n as i64);
        for (k, j, i) in iproduct!(0..nz, 0..ny, 0..nx) {
            array.set([i, j, k], 0, linear_field(centre(origin, h, [i, j, k])));
        }
    }
    arrays
}

/// Check the ghost cells of one face of a leaf filled with [linear_field].
///
/// Ghosts next to a finer leaf hold the average over the fine cells, which for a linear
/// field is the value at the ghost centre. Ghosts next to a coarser leaf hold the value of
/// the coarse cell covering them.
fn check_linear_face(
    array: &PaddedArray<f64>,
    tree: &LeafTree,
    info: &VoxelInfoLmr,
    face: Face,
    level_diff: i8,
    vc_comm: usize,
) {
    let axis = face.axis().index();
    let (u, v) = face.axis().in_plane();
    let local = array.local();
    let n = local[axis] as i64;
    let (origin, h) = leaf_grid(tree, info);

    for (d, pv, pu) in iproduct!(0..vc_comm as i64, 0..local[v] as i64, 0..local[u] as i64) {
        let mut cell = [0; 3];
        cell[axis] = if face.is_plus() { n + d } else { -1 - d };
        cell[u] = pu;
        cell[v] = pv;

        let point = if level_diff < 0 {
            centre(origin, h.map(|h| 2.0 * h), cell.map(|c| c.div_euclid(2)))
        } else {
            centre(origin, h, cell)
        };
        let expected = linear_field(wrap(point, tree.header()));
        let value = array.get(cell, 0);
        assert!(
            (value - expected).abs() < 1e-9,
            "leaf {} {face} ghost {cell:?}: {value} instead of {expected}",
            info.leaf_id()
        );
    }
}

#[test]
fn test_multi_level_leaf_halo_of_linear_field() {
    LocalUniverse::run(2, |comm| {
        let mut manager = ProcessGroupManager::new(comm);
        manager
            .voxel_init_lmr_with_tree(0, refined_tree(), [4, 4, 4])
            .unwrap();

        let mut arrays = linear_leaf_arrays(&manager, 2);
        manager.exchange_leaf_halo(0, &mut arrays, 2).unwrap();

        let tree = manager.leaf_decomposition(0).unwrap().tree();
        let mut checked = 0;
        for (array, info) in arrays.iter().zip(manager.leaf_infos(0).unwrap()) {
            for face in Face::ALL {
                if info.neighbour_leaves(face).iter().any(Option::is_some) {
                    check_linear_face(array, tree, info, face, info.level_diff(face), 2);
                    checked += 1;
                }
            }
        }
        assert!(checked > 0);
    });
}

#[test]
fn test_multi_level_periodic_leaf_halo_of_linear_field() {
    LocalUniverse::run(2, |comm| {
        let mut manager = ProcessGroupManager::new(comm);
        manager
            .voxel_init_lmr_with_tree(0, refined_tree(), [4, 4, 4])
            .unwrap();

        let mut arrays = linear_leaf_arrays(&manager, 1);
        manager
            .exchange_leaf_periodic_halo(0, &mut arrays, 1, Axis::X, PeriodicDirection::Both)
            .unwrap();

        let tree = manager.leaf_decomposition(0).unwrap().tree();
        for (array, info) in arrays.iter().zip(manager.leaf_infos(0).unwrap()) {
            for face in [Face::XMinus, Face::XPlus] {
                let periodic = info.periodic_leaves(face).iter().any(Option::is_some);
                if periodic && info.neighbour_leaves(face).iter().all(Option::is_none) {
                    let level_diff = info.periodic_level_diff(face);
                    check_linear_face(array, tree, info, face, level_diff, 1);
                }
            }
        }
    });
}
