//! Padded field arrays.
//!
//! A field on a local region of `local` cells is stored with `vc` ghost layers on every
//! side of every spatial axis. Each axis is then padded by zero or one cell so that
//! the stored extent becomes odd. Storage is in Fortran order, `i` fastest.
//!
//! Component-last shapes ([ArrayShape::Vector3D], [ArrayShape::Scalar4D]) store the
//! component as the slowest axis and do not pad it. The extended shapes
//! ([ArrayShape::Vector3DEx], [ArrayShape::Scalar4DEx]) store the component as the
//! fastest axis and pad it like a spatial axis without ghost layers.

use bytemuck::Pod;

use crate::error::DomainError;

/// Storage shape of a field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArrayShape {
    /// One value per cell.
    Scalar3D,
    /// Three components per cell, component slowest.
    Vector3D,
    /// `ncomp` components per cell, component slowest.
    Scalar4D {
        /// Number of components.
        ncomp: usize,
    },
    /// Three components per cell, component fastest.
    Vector3DEx,
    /// `ncomp` components per cell, component fastest.
    Scalar4DEx {
        /// Number of components.
        ncomp: usize,
    },
}

impl ArrayShape {
    /// Number of components per cell.
    pub fn components(self) -> usize {
        match self {
            ArrayShape::Scalar3D => 1,
            ArrayShape::Vector3D | ArrayShape::Vector3DEx => 3,
            ArrayShape::Scalar4D { ncomp } | ArrayShape::Scalar4DEx { ncomp } => ncomp,
        }
    }

    /// Is the component the fastest running index?
    pub fn is_component_major(self) -> bool {
        matches!(self, ArrayShape::Vector3DEx | ArrayShape::Scalar4DEx { .. })
    }
}

/// Padding of a 1d extent with `vc` ghost layers on both sides.
///
/// Returns 1 if `size + 2 * vc` is even and 0 otherwise.
pub fn padding_size_1d(size: usize, vc: usize) -> usize {
    usize::from((size + 2 * vc) % 2 == 0)
}

/// Padding per axis of a field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct ArrayPadding {
    /// Padding of the three spatial axes.
    pub spatial: [usize; 3],
    /// Padding of the component axis.
    pub component: usize,
}

/// Padding per axis for a field of the given shape on `local` cells.
pub fn padding_size(shape: ArrayShape, local: [usize; 3], vc: usize) -> ArrayPadding {
    ArrayPadding {
        spatial: local.map(|size| padding_size_1d(size, vc)),
        component: if shape.is_component_major() {
            padding_size_1d(shape.components(), 0)
        } else {
            0
        },
    }
}

/// A zero initialised field with ghost layers and padding.
#[derive(Clone, Debug)]
pub struct PaddedArray<T: Pod> {
    data: Vec<T>,
    shape: ArrayShape,
    local: [usize; 3],
    vc: usize,
    padding: ArrayPadding,
}

impl<T: Pod> PaddedArray<T> {
    /// Allocate a zeroed field.
    pub fn zeroed(shape: ArrayShape, local: [usize; 3], vc: usize) -> Result<Self, DomainError> {
        if local.iter().any(|&n| n == 0) {
            return Err(DomainError::InvalidArgument(format!(
                "local extents {local:?} must be positive"
            )));
        }
        if shape.components() == 0 {
            return Err(DomainError::InvalidArgument(
                "a field needs at least one component".to_string(),
            ));
        }

        let padding = padding_size(shape, local, vc);
        let extents = Self::extents_of(shape, local, vc, padding);
        let len = extents
            .iter()
            .try_fold(1_usize, |acc, &n| acc.checked_mul(n))
            .ok_or_else(|| {
                DomainError::Allocation(format!("field of extents {extents:?} is too large"))
            })?;

        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|err| {
            DomainError::Allocation(format!("cannot allocate {len} elements: {err}"))
        })?;
        data.resize(len, T::zeroed());

        Ok(Self {
            data,
            shape,
            local,
            vc,
            padding,
        })
    }

    fn extents_of(
        shape: ArrayShape,
        local: [usize; 3],
        vc: usize,
        padding: ArrayPadding,
    ) -> [usize; 4] {
        let spatial: [usize; 3] =
            std::array::from_fn(|axis| local[axis] + 2 * vc + padding.spatial[axis]);
        [
            spatial[0],
            spatial[1],
            spatial[2],
            shape.components() + padding.component,
        ]
    }

    /// Storage shape.
    pub fn shape(&self) -> ArrayShape {
        self.shape
    }

    /// Number of owned cells per axis.
    pub fn local(&self) -> [usize; 3] {
        self.local
    }

    /// Number of ghost layers.
    pub fn vc(&self) -> usize {
        self.vc
    }

    /// Padding per axis.
    pub fn padding(&self) -> ArrayPadding {
        self.padding
    }

    /// Stored extents `[x, y, z, component]` including ghost layers and padding.
    pub fn extents(&self) -> [usize; 4] {
        Self::extents_of(self.shape, self.local, self.vc, self.padding)
    }

    /// The flat storage.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// The flat storage.
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Flat index of a cell and component.
    ///
    /// Cell indices run from `-vc` to `local + vc - 1`; owned cells start at 0.
    pub fn index(&self, cell: [i64; 3], component: usize) -> usize {
        let [nx, ny, nz, nc] = self.extents();
        let vc = self.vc as i64;
        debug_assert!(component < self.shape.components());
        debug_assert!((0..3).all(|axis| {
            cell[axis] >= -vc && cell[axis] < self.local[axis] as i64 + vc
        }));

        let [i, j, k] = cell.map(|c| (c + vc) as usize);
        if self.shape.is_component_major() {
            component + nc * (i + nx * (j + ny * k))
        } else {
            i + nx * (j + ny * (k + nz * component))
        }
    }

    /// Value at a cell and component.
    pub fn get(&self, cell: [i64; 3], component: usize) -> T {
        self.data[self.index(cell, component)]
    }

    /// Set the value at a cell and component.
    pub fn set(&mut self, cell: [i64; 3], component: usize, value: T) {
        let index = self.index(cell, component);
        self.data[index] = value;
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use itertools::iproduct;

    use super::{padding_size, padding_size_1d, ArrayPadding, ArrayShape, PaddedArray};

    #[test]
    fn test_padding_size_1d() {
        assert_eq!(padding_size_1d(10, 1), 1);
        assert_eq!(padding_size_1d(9, 1), 0);
        assert_eq!(padding_size_1d(0, 0), 1);
        assert_eq!(padding_size_1d(3, 0), 0);
    }

    #[test]
    fn test_padding_per_shape() {
        let local = [10, 9, 4];
        assert_eq!(
            padding_size(ArrayShape::Scalar3D, local, 1),
            ArrayPadding {
                spatial: [1, 0, 1],
                component: 0
            }
        );
        assert_eq!(padding_size(ArrayShape::Scalar4D { ncomp: 4 }, local, 1).component, 0);
        assert_eq!(padding_size(ArrayShape::Vector3DEx, local, 1).component, 0);
        assert_eq!(padding_size(ArrayShape::Scalar4DEx { ncomp: 4 }, local, 1).component, 1);
    }

    #[test]
    fn test_allocation_size() {
        let array = PaddedArray::<f64>::zeroed(ArrayShape::Vector3D, [10, 9, 4], 2).unwrap();
        assert_eq!(array.extents(), [15, 13, 9, 3]);
        assert_eq!(array.data().len(), 15 * 13 * 9 * 3);
        assert!(array.data().iter().all(|&v| v == 0.0));

        let array =
            PaddedArray::<i32>::zeroed(ArrayShape::Scalar4DEx { ncomp: 2 }, [4, 4, 4], 1).unwrap();
        assert_eq!(array.extents(), [7, 7, 7, 3]);

        assert!(PaddedArray::<f32>::zeroed(ArrayShape::Scalar3D, [0, 4, 4], 1).is_err());
        assert!(
            PaddedArray::<i64>::zeroed(ArrayShape::Scalar3D, [usize::MAX / 2, 4, 4], 1).is_err()
        );
    }

    #[test]
    fn test_indices_are_unique() {
        for shape in [ArrayShape::Vector3D, ArrayShape::Vector3DEx] {
            let mut array = PaddedArray::<i64>::zeroed(shape, [3, 2, 2], 1).unwrap();
            let mut seen = HashSet::new();
            for (k, j, i, c) in iproduct!(-1..3_i64, -1..3_i64, -1..4_i64, 0..3) {
                let index = array.index([i, j, k], c);
                assert!(index < array.data().len());
                assert!(seen.insert(index));
                array.set([i, j, k], c, index as i64);
            }
            assert_eq!(array.get([0, 0, 0], 1), array.index([0, 0, 0], 1) as i64);
        }
    }
}
