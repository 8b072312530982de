//! Geometry information

use crate::pedigree::Pedigree;

/// An axis aligned box in physical space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PhysicalBox {
    coords: [f64; 6],
}

impl PhysicalBox {
    /// Create a new bounding box.
    ///
    /// The coordinates are given by `[xmin, ymin, zmin, xmax, ymax, zmax]`.
    pub fn new(coords: [f64; 6]) -> Self {
        Self { coords }
    }

    /// Create a box from its lower corner and its extent.
    pub fn from_origin_and_region(origin: [f64; 3], region: [f64; 3]) -> Self {
        Self {
            coords: [
                origin[0],
                origin[1],
                origin[2],
                origin[0] + region[0],
                origin[1] + region[1],
                origin[2] + region[2],
            ],
        }
    }

    /// Return coordinates
    pub fn coordinates(&self) -> [f64; 6] {
        self.coords
    }

    /// Lower corner.
    pub fn origin(&self) -> [f64; 3] {
        [self.coords[0], self.coords[1], self.coords[2]]
    }

    /// Extent along each axis.
    pub fn region(&self) -> [f64; 3] {
        [
            self.coords[3] - self.coords[0],
            self.coords[4] - self.coords[1],
            self.coords[5] - self.coords[2],
        ]
    }

    /// The eight corners in VTK hexahedron order.
    pub fn corners(&self) -> [[f64; 3]; 8] {
        let [xmin, ymin, zmin, xmax, ymax, zmax] = self.coords;
        [
            [xmin, ymin, zmin],
            [xmax, ymin, zmin],
            [xmax, ymax, zmin],
            [xmin, ymax, zmin],
            [xmin, ymin, zmax],
            [xmax, ymin, zmax],
            [xmax, ymax, zmax],
            [xmin, ymax, zmax],
        ]
    }

    /// Map a point from the reference box [0, 1]^3 to the bounding box.
    pub fn reference_to_physical(&self, point: [f64; 3]) -> [f64; 3] {
        let [xmin, ymin, zmin, xmax, ymax, zmax] = self.coords;

        [
            xmin + (xmax - xmin) * point[0],
            ymin + (ymax - ymin) * point[1],
            zmin + (zmax - zmin) * point[2],
        ]
    }

    /// Map a point from the physical domain to the reference box.
    pub fn physical_to_reference(&self, point: [f64; 3]) -> [f64; 3] {
        let [xmin, ymin, zmin, xmax, ymax, zmax] = self.coords;

        [
            (point[0] - xmin) / (xmax - xmin),
            (point[1] - ymin) / (ymax - ymin),
            (point[2] - zmin) / (zmax - zmin),
        ]
    }

    /// The box covered by a leaf of a tree spanning `self`.
    ///
    /// The tree has `root_dims` root cells per axis.
    pub fn leaf_box(&self, root_dims: [usize; 3], pedigree: Pedigree) -> PhysicalBox {
        let index = pedigree.global_index(root_dims);
        let cells = (1_u64 << pedigree.level()) as f64;

        // Corners of the leaf in the reference box of the whole tree.
        let mut lower = [0.0; 3];
        let mut upper = [0.0; 3];
        for axis in 0..3 {
            let n = root_dims[axis] as f64 * cells;
            lower[axis] = index[axis] as f64 / n;
            upper[axis] = (index[axis] + 1) as f64 / n;
        }

        let lower = self.reference_to_physical(lower);
        let upper = self.reference_to_physical(upper);

        PhysicalBox::new([lower[0], lower[1], lower[2], upper[0], upper[1], upper[2]])
    }
}

impl std::fmt::Display for PhysicalBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [xmin, ymin, zmin, xmax, ymax, zmax] = self.coords;

        write!(
            f,
            "(xmin: {}, ymin: {}, zmin: {}, xmax: {}, ymax: {}, zmax: {})",
            xmin, ymin, zmin, xmax, ymax, zmax
        )
    }
}

#[cfg(test)]
mod test {
    use super::PhysicalBox;
    use crate::pedigree::Pedigree;

    fn assert_close(actual: [f64; 3], expected: [f64; 3]) {
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-12, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn test_origin_and_region() {
        let bbox = PhysicalBox::from_origin_and_region([1.0, -1.0, 0.0], [2.0, 4.0, 1.0]);
        assert_eq!(bbox.coordinates(), [1.0, -1.0, 0.0, 3.0, 3.0, 1.0]);
        assert_eq!(bbox.origin(), [1.0, -1.0, 0.0]);
        assert_eq!(bbox.region(), [2.0, 4.0, 1.0]);

        let point = [2.0, 0.0, 0.5];
        let reference = bbox.physical_to_reference(point);
        assert_close(bbox.reference_to_physical(reference), point);
    }

    #[test]
    fn test_leaf_box() {
        let bbox = PhysicalBox::from_origin_and_region([0.0, 0.0, 0.0], [2.0, 1.0, 1.0]);

        // Second root cell along x, refined once, upper corner child.
        let pedigree = Pedigree::new(1, 1, [1, 1, 1]).unwrap();
        let leaf = bbox.leaf_box([2, 1, 1], pedigree);

        assert_close(leaf.origin(), [1.5, 0.5, 0.5]);
        assert_close(leaf.region(), [0.5, 0.5, 0.5]);
    }
}
