//! Ghost layer exchange.
//!
//! Every local field is a block. A Cartesian decomposition has one block per rank,
//! an adaptive decomposition one block per local leaf. A [HaloPlan] lists the links
//! between local blocks and their neighbours, one per face and neighbour.
//!
//! Per link one message travels from the sender to the receiver. It holds `vc_comm`
//! layers of the sender's owned cells next to the shared face, with the first
//! in-plane axis fastest, then the second in-plane axis, then the layer (0 next to
//! the face), then the component. Messages to a finer neighbour carry the matching
//! quadrant of the coarse face prolongated by injection. Messages to a coarser
//! neighbour carry the fine face restricted by averaging 2x2x2 cells.
//!
//! The tag of a message is the tag base plus the index of the sender's face. Sends
//! and receives are posted in the order of `(sender block, receiver block, sender face)`
//! on both sides, so messages with equal tags between two ranks pair up in order.

use bytemuck::Pod;
use itertools::iproduct;
use log::debug;

use crate::{
    array::PaddedArray,
    comm::{Communicator, Request},
    constants::{HALO_TAG_BASE, PERIODIC_TAG_BASE},
    error::DomainError,
    types::{Axis, Face, PeriodicDirection},
    voxel::{VoxelInfo, VoxelInfoLmr},
};

/// Field element types that can be exchanged.
pub trait HaloElement: Pod {
    /// The coarse value of eight fine values.
    fn restrict(values: [Self; 8]) -> Self;
}

macro_rules! halo_element_float {
    ($type:ty) => {
        impl HaloElement for $type {
            fn restrict(values: [Self; 8]) -> Self {
                values.iter().sum::<$type>() / 8.0
            }
        }
    };
}

macro_rules! halo_element_int {
    ($type:ty, $wide:ty) => {
        impl HaloElement for $type {
            fn restrict(values: [Self; 8]) -> Self {
                (values.iter().map(|&v| v as $wide).sum::<$wide>() / 8) as $type
            }
        }
    };
}

halo_element_float!(f32);
halo_element_float!(f64);
halo_element_int!(i32, i64);
halo_element_int!(i64, i128);

/// One message route between a local block and a neighbour.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HaloLink {
    /// Index of the local block in the array list.
    pub block: usize,
    /// Global id of the local block.
    pub block_id: usize,
    /// Face of the local block shared with the neighbour.
    pub face: Face,
    /// Rank owning the neighbour.
    pub peer_rank: usize,
    /// Global id of the neighbour block.
    pub peer_block_id: usize,
    /// Level of the neighbour relative to the local block.
    pub level_diff: i8,
    /// Sub-face slot of a finer neighbour.
    pub slot: usize,
    /// Does the local block send along this link?
    pub send: bool,
    /// Does the local block receive along this link?
    pub receive: bool,
}

/// The links of one exchange.
#[derive(Clone, Debug, Default)]
pub struct HaloPlan {
    links: Vec<HaloLink>,
    tag_base: i32,
    refined: bool,
}

impl HaloPlan {
    /// Exchange with the regular neighbours of a Cartesian subdomain.
    pub fn cartesian(info: &VoxelInfo) -> Self {
        let links = Face::ALL
            .into_iter()
            .filter_map(|face| {
                info.neighbour(face)
                    .map(|peer| Self::cartesian_link(info, face, peer, true, true))
            })
            .collect();

        Self {
            links,
            tag_base: HALO_TAG_BASE,
            refined: false,
        }
    }

    /// Exchange across the periodic boundary normal to `axis` of a Cartesian subdomain.
    pub fn cartesian_periodic(info: &VoxelInfo, axis: Axis, direction: PeriodicDirection) -> Self {
        let (minus, plus) = axis.faces();
        let links = [minus, plus]
            .into_iter()
            .filter_map(|face| {
                info.periodic_neighbour(face).map(|peer| {
                    Self::cartesian_link(
                        info,
                        face,
                        peer,
                        direction.sends_through(face),
                        direction.receives_through(face),
                    )
                })
            })
            .collect();

        Self {
            links,
            tag_base: PERIODIC_TAG_BASE,
            refined: false,
        }
    }

    fn cartesian_link(
        info: &VoxelInfo,
        face: Face,
        peer: usize,
        send: bool,
        receive: bool,
    ) -> HaloLink {
        HaloLink {
            block: 0,
            block_id: info.rank(),
            face,
            peer_rank: peer,
            peer_block_id: peer,
            level_diff: 0,
            slot: 0,
            send,
            receive,
        }
    }

    /// Exchange with the regular neighbours of local leaves.
    ///
    /// Block `i` is the `i`-th leaf yielded by `leaves`.
    pub fn leaves<'a>(leaves: impl IntoIterator<Item = &'a VoxelInfoLmr>) -> Self {
        let mut links = Vec::new();
        for (block, info) in leaves.into_iter().enumerate() {
            for face in Face::ALL {
                Self::leaf_links(
                    &mut links,
                    block,
                    info,
                    face,
                    (
                        info.neighbour_leaves(face),
                        info.neighbour_ranks(face),
                        info.level_diff(face),
                    ),
                    (true, true),
                );
            }
        }

        Self {
            links,
            tag_base: HALO_TAG_BASE,
            refined: true,
        }
    }

    /// Exchange across the periodic boundary normal to `axis` of local leaves.
    pub fn leaves_periodic<'a>(
        leaves: impl IntoIterator<Item = &'a VoxelInfoLmr>,
        axis: Axis,
        direction: PeriodicDirection,
    ) -> Self {
        let (minus, plus) = axis.faces();
        let mut links = Vec::new();
        for (block, info) in leaves.into_iter().enumerate() {
            for face in [minus, plus] {
                Self::leaf_links(
                    &mut links,
                    block,
                    info,
                    face,
                    (
                        info.periodic_leaves(face),
                        info.periodic_ranks(face),
                        info.periodic_level_diff(face),
                    ),
                    (
                        direction.sends_through(face),
                        direction.receives_through(face),
                    ),
                );
            }
        }

        Self {
            links,
            tag_base: PERIODIC_TAG_BASE,
            refined: true,
        }
    }

    fn leaf_links(
        links: &mut Vec<HaloLink>,
        block: usize,
        info: &VoxelInfoLmr,
        face: Face,
        (leaves, ranks, level_diff): ([Option<usize>; 4], [Option<usize>; 4], i8),
        (send, receive): (bool, bool),
    ) {
        for (slot, (leaf, rank)) in leaves.into_iter().zip(ranks).enumerate() {
            if let (Some(leaf), Some(rank)) = (leaf, rank) {
                links.push(HaloLink {
                    block,
                    block_id: info.leaf_id(),
                    face,
                    peer_rank: rank,
                    peer_block_id: leaf,
                    level_diff,
                    slot,
                    send,
                    receive,
                });
            }
        }
    }

    /// The links of the plan.
    pub fn links(&self) -> &[HaloLink] {
        &self.links
    }

    /// Tag of a message sent through `face`.
    pub fn tag(&self, face: Face) -> i32 {
        self.tag_base + face.index() as i32
    }
}

/// Messages of an exchange in flight.
///
/// Must be completed with [HaloRequest::wait].
#[must_use = "a halo exchange must be completed with `wait`"]
pub struct HaloRequest<R: Request> {
    sends: Vec<R>,
    receives: Vec<(R, HaloLink)>,
    vc_comm: usize,
    element_size: usize,
}

impl<R: Request> HaloRequest<R> {
    /// Wait for all messages and write the received layers into the ghost cells.
    ///
    /// `arrays` must be the arrays the exchange was started with.
    pub fn wait<T: HaloElement>(self, arrays: &mut [PaddedArray<T>]) -> Result<(), DomainError> {
        let mut first_error = None;
        if self.element_size != std::mem::size_of::<T>() {
            first_error = Some(DomainError::InvalidArgument(format!(
                "exchange of {}-byte elements completed with {}-byte elements",
                self.element_size,
                std::mem::size_of::<T>()
            )));
        }

        // Every request is completed, even after an error.
        for (request, link) in self.receives {
            let received = request.wait();
            if first_error.is_some() {
                continue;
            }
            let result = received.and_then(|data| {
                let data = data.ok_or_else(|| {
                    DomainError::MessagePassing("receive completed without data".to_string())
                })?;
                let array = arrays.get_mut(link.block).ok_or_else(|| {
                    DomainError::InvalidArgument(format!("no array for block {}", link.block))
                })?;
                unpack(
                    &link,
                    array,
                    self.vc_comm,
                    &bytemuck::pod_collect_to_vec::<u8, T>(&data),
                );
                Ok(())
            });
            if let Err(err) = result {
                first_error = Some(err);
            }
        }
        for request in self.sends {
            if let Err(err) = request.wait() {
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Start an exchange of `vc_comm` ghost layers.
pub fn exchange_nowait<T: HaloElement, C: Communicator>(
    comm: &C,
    plan: &HaloPlan,
    arrays: &[PaddedArray<T>],
    vc_comm: usize,
) -> Result<HaloRequest<C::Request>, DomainError> {
    check_plan(comm, plan, arrays, vc_comm)?;

    let mut receives = plan
        .links
        .iter()
        .filter(|link| link.receive)
        .collect::<Vec<_>>();
    receives.sort_by_key(|link| {
        (
            link.peer_block_id,
            link.block_id,
            link.face.opposite().index(),
        )
    });

    let mut sends = plan.links.iter().filter(|link| link.send).collect::<Vec<_>>();
    sends.sort_by_key(|link| (link.block_id, link.peer_block_id, link.face.index()));

    let element_size = std::mem::size_of::<T>();
    let mut request = HaloRequest {
        sends: Vec::with_capacity(sends.len()),
        receives: Vec::with_capacity(receives.len()),
        vc_comm,
        element_size,
    };

    for link in receives {
        let len = receive_len(link, &arrays[link.block], vc_comm);
        let tag = plan.tag(link.face.opposite());
        request.receives.push((
            comm.irecv(link.peer_rank, tag, len * element_size)?,
            *link,
        ));
    }

    for link in sends {
        let buffer = pack(link, &arrays[link.block], vc_comm);
        let bytes = bytemuck::cast_slice::<T, u8>(&buffer).to_vec();
        request
            .sends
            .push(comm.isend(link.peer_rank, plan.tag(link.face), bytes)?);
    }

    debug!(
        "Rank {} started a halo exchange with {} sends and {} receives.",
        comm.rank(),
        request.sends.len(),
        request.receives.len()
    );

    Ok(request)
}

/// Exchange `vc_comm` ghost layers and wait for completion.
pub fn exchange<T: HaloElement, C: Communicator>(
    comm: &C,
    plan: &HaloPlan,
    arrays: &mut [PaddedArray<T>],
    vc_comm: usize,
) -> Result<(), DomainError> {
    exchange_nowait(comm, plan, arrays, vc_comm)?.wait(arrays)
}

fn check_plan<T: HaloElement, C: Communicator>(
    comm: &C,
    plan: &HaloPlan,
    arrays: &[PaddedArray<T>],
    vc_comm: usize,
) -> Result<(), DomainError> {
    let invalid = |reason: String| Err(DomainError::InvalidArgument(reason));

    for array in arrays {
        if vc_comm > array.vc() {
            return invalid(format!(
                "cannot exchange {vc_comm} layers of a field with {} ghost layers",
                array.vc()
            ));
        }
        if plan.refined
            && array
                .local()
                .iter()
                .any(|&n| n % 2 != 0 || 2 * vc_comm > n)
        {
            return invalid(format!(
                "leaf block {:?} must be even and hold twice the {vc_comm} exchanged layers",
                array.local()
            ));
        }
    }

    for link in &plan.links {
        let Some(array) = arrays.get(link.block) else {
            return invalid(format!("no array for block {}", link.block));
        };
        if vc_comm > array.local()[link.face.axis().index()] {
            return invalid(format!(
                "cannot send {vc_comm} layers of a block with extents {:?}",
                array.local()
            ));
        }
        if link.peer_rank >= comm.size() {
            return invalid(format!(
                "neighbour rank {} outside a group of {} ranks",
                link.peer_rank,
                comm.size()
            ));
        }
    }

    Ok(())
}

/// In-plane extents and the in-plane axes of a face.
fn face_frame<T: HaloElement>(face: Face, array: &PaddedArray<T>) -> (usize, usize, usize, usize) {
    let (u, v) = face.axis().in_plane();
    let local = array.local();
    (u, v, local[u], local[v])
}

fn cell(face: Face, u: usize, v: usize, normal: i64, pu: usize, pv: usize) -> [i64; 3] {
    let mut cell = [0; 3];
    cell[face.axis().index()] = normal;
    cell[u] = pu as i64;
    cell[v] = pv as i64;
    cell
}

fn receive_len<T: HaloElement>(link: &HaloLink, array: &PaddedArray<T>, vc_comm: usize) -> usize {
    let (_, _, bu, bv) = face_frame(link.face, array);
    let nc = array.shape().components();
    if link.level_diff > 0 {
        (bu / 2) * (bv / 2) * vc_comm * nc
    } else {
        bu * bv * vc_comm * nc
    }
}

fn pack<T: HaloElement>(link: &HaloLink, array: &PaddedArray<T>, vc_comm: usize) -> Vec<T> {
    let face = link.face;
    let (u, v, bu, bv) = face_frame(face, array);
    let n = array.local()[face.axis().index()] as i64;
    let nc = array.shape().components();

    // Owned layer at distance `d` from the face.
    let owned = |d: usize| {
        if face.is_plus() {
            n - 1 - d as i64
        } else {
            d as i64
        }
    };

    match link.level_diff {
        0 => iproduct!(0..nc, 0..vc_comm, 0..bv, 0..bu)
            .map(|(c, d, pv, pu)| array.get(cell(face, u, v, owned(d), pu, pv), c))
            .collect(),
        diff if diff > 0 => {
            let (ou, ov) = ((link.slot & 1) * bu / 2, (link.slot >> 1) * bv / 2);
            iproduct!(0..nc, 0..vc_comm, 0..bv, 0..bu)
                .map(|(c, d, fv, fu)| {
                    array.get(cell(face, u, v, owned(d / 2), ou + fu / 2, ov + fv / 2), c)
                })
                .collect()
        }
        _ => iproduct!(0..nc, 0..vc_comm, 0..bv / 2, 0..bu / 2)
            .map(|(c, d, cv, cu)| {
                let mut values = [T::zeroed(); 8];
                for (index, value) in values.iter_mut().enumerate() {
                    let (du, dv, dd) = (index & 1, (index >> 1) & 1, index >> 2);
                    *value = array.get(
                        cell(face, u, v, owned(2 * d + dd), 2 * cu + du, 2 * cv + dv),
                        c,
                    );
                }
                T::restrict(values)
            })
            .collect(),
    }
}

fn unpack<T: HaloElement>(
    link: &HaloLink,
    array: &mut PaddedArray<T>,
    vc_comm: usize,
    data: &[T],
) {
    let face = link.face;
    let (u, v, bu, bv) = face_frame(face, array);
    let n = array.local()[face.axis().index()] as i64;
    let nc = array.shape().components();

    // Ghost layer at distance `d` from the face.
    let ghost = |d: usize| {
        if face.is_plus() {
            n + d as i64
        } else {
            -1 - d as i64
        }
    };

    if link.level_diff > 0 {
        let (ou, ov) = ((link.slot & 1) * bu / 2, (link.slot >> 1) * bv / 2);
        for ((c, d, cv, cu), &value) in
            iproduct!(0..nc, 0..vc_comm, 0..bv / 2, 0..bu / 2).zip(data)
        {
            array.set(cell(face, u, v, ghost(d), ou + cu, ov + cv), c, value);
        }
    } else {
        for ((c, d, pv, pu), &value) in iproduct!(0..nc, 0..vc_comm, 0..bv, 0..bu).zip(data) {
            array.set(cell(face, u, v, ghost(d), pu, pv), c, value);
        }
    }
}

#[cfg(test)]
mod test {
    use super::{exchange, pack, HaloElement, HaloLink, HaloPlan};
    use crate::{
        array::{ArrayShape, PaddedArray},
        comm::{Communicator, LocalUniverse},
        domain::{DomainInfo, GlobalDomainInfo},
        types::{Axis, Face, PeriodicDirection},
        voxel::VoxelInfo,
    };

    fn link(face: Face, level_diff: i8, slot: usize) -> HaloLink {
        HaloLink {
            block: 0,
            block_id: 0,
            face,
            peer_rank: 0,
            peer_block_id: 1,
            level_diff,
            slot,
            send: true,
            receive: true,
        }
    }

    #[test]
    fn test_restrict() {
        assert_eq!(f64::restrict([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]), 4.5);
        assert_eq!(i32::restrict([8; 8]), 8);
        assert_eq!(i64::restrict([i64::MAX; 8]), i64::MAX);
    }

    #[test]
    fn test_pack_layout() {
        let mut array = PaddedArray::<i64>::zeroed(ArrayShape::Scalar3D, [4, 2, 2], 1).unwrap();
        for (i, j, k) in itertools::iproduct!(0..4_i64, 0..2_i64, 0..2_i64) {
            array.set([i, j, k], 0, 100 * i + 10 * j + k);
        }

        // Layer 0 of the +x face is i = 3, then y fastest, then z.
        let packed = pack(&link(Face::XPlus, 0, 0), &array, 2);
        assert_eq!(packed, vec![300, 310, 301, 311, 200, 210, 201, 211]);

        // Restriction of the -x face averages i in {0, 1}.
        let packed = pack(&link(Face::XMinus, -1, 0), &array, 1);
        assert_eq!(packed, vec![(0 + 100 + 10 + 110 + 1 + 101 + 11 + 111) / 8]);
    }

    #[test]
    fn test_pack_prolongation() {
        let mut array = PaddedArray::<f64>::zeroed(ArrayShape::Scalar3D, [4, 4, 4], 2).unwrap();
        for (i, j, k) in itertools::iproduct!(0..4_i64, 0..4_i64, 0..4_i64) {
            array.set([i, j, k], 0, (i + 4 * j + 16 * k) as f64);
        }

        // Quadrant 3 of the +z face covers x and y in {2, 3} of layer z = 3.
        let packed = pack(&link(Face::ZPlus, 1, 3), &array, 2);
        assert_eq!(packed.len(), 32);
        assert_eq!(packed[0], (2 + 4 * 2 + 16 * 3) as f64);
        assert_eq!(packed[1], packed[0]);
        assert_eq!(packed[2], (3 + 4 * 2 + 16 * 3) as f64);
        // Fine layers 0 and 1 both sample the first coarse layer.
        assert_eq!(packed[16], packed[0]);
    }

    #[test]
    fn test_periodic_self_exchange() {
        let results = LocalUniverse::run(1, |comm| {
            let domain = DomainInfo::new([0.0; 3], [1.0; 3], [4, 3, 3]).unwrap();
            let info =
                VoxelInfo::new(GlobalDomainInfo::new(domain, [1, 1, 1]).unwrap(), 0, 1).unwrap();
            let mut arrays =
                vec![PaddedArray::<f32>::zeroed(ArrayShape::Scalar3D, [4, 3, 3], 1).unwrap()];
            for i in 0..4 {
                arrays[0].set([i, 1, 1], 0, i as f32 + 1.0);
            }

            let plan = HaloPlan::cartesian_periodic(&info, Axis::X, PeriodicDirection::PlusToMinus);
            exchange(&comm, &plan, &mut arrays, 1).unwrap();
            assert_eq!(comm.rank(), 0);
            (arrays[0].get([-1, 1, 1], 0), arrays[0].get([4, 1, 1], 0))
        });

        // Only the minus side received data.
        assert_eq!(results[0], (4.0, 0.0));
    }
}
