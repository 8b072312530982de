//! Export of leaf decompositions for visualisation.

use std::path::Path;

use vtkio::{
    model::{
        Attribute, Attributes, ByteOrder, CellType, Cells, DataArrayBase, DataSet, ElementType,
        Piece, UnstructuredGridPiece, VertexNumbers,
    },
    IOBuffer, Vtk,
};

use crate::{error::DomainError, octree::LeafTree, partition::LeafPartition};

/// Write the leaves of a tree as hexahedra.
///
/// Every cell carries the owning rank and the refinement level of its leaf.
pub fn export_leaf_partition<P: AsRef<Path>>(
    path: P,
    tree: &LeafTree,
    partition: &LeafPartition,
) -> Result<(), DomainError> {
    if partition.num_leaves() != tree.num_leaves() {
        return Err(DomainError::InvalidArgument(format!(
            "partition of {} leaves for a tree with {} leaves",
            partition.num_leaves(),
            tree.num_leaves()
        )));
    }

    let nleaves = tree.num_leaves();
    let mut vertices = Vec::with_capacity(24 * nleaves);
    let mut connectivity = Vec::with_capacity(8 * nleaves);
    let mut offsets = Vec::with_capacity(nleaves);
    let mut ranks = Vec::with_capacity(nleaves);
    let mut levels = Vec::with_capacity(nleaves);

    for (leaf, pedigree) in tree.pedigrees().iter().enumerate() {
        // Corners are not shared between leaves.
        for corner in tree.leaf_box(leaf)?.corners() {
            connectivity.push((vertices.len() / 3) as u64);
            vertices.extend(corner);
        }
        offsets.push(connectivity.len() as u64);

        let rank = partition.rank_of(leaf).ok_or_else(|| {
            DomainError::InvalidArgument(format!("leaf {leaf} has no owner"))
        })?;
        ranks.push(rank as i32);
        levels.push(pedigree.level() as i32);
    }

    let scalars = |name: &str, data: Vec<i32>| {
        Attribute::DataArray(DataArrayBase {
            name: name.to_string(),
            elem: ElementType::Scalars {
                num_comp: 1,
                lookup_table: None,
            },
            data: IOBuffer::new(data),
        })
    };

    let piece = UnstructuredGridPiece {
        points: IOBuffer::new(vertices),
        cells: Cells {
            cell_verts: VertexNumbers::XML {
                connectivity,
                offsets,
            },
            types: vec![CellType::Hexahedron; nleaves],
        },
        data: Attributes {
            point: Vec::new(),
            cell: vec![scalars("rank", ranks), scalars("level", levels)],
        },
    };

    let model = Vtk {
        version: (2, 2).into(),
        title: "leaf partition".to_string(),
        byte_order: ByteOrder::LittleEndian,
        data: DataSet::UnstructuredGrid {
            meta: None,
            pieces: vec![Piece::Inline(Box::new(piece))],
        },
        file_path: None,
    };

    model
        .export(path.as_ref())
        .map_err(|err| DomainError::Export(format!("{}: {err}", path.as_ref().display())))
}
