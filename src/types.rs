//! Common types.

use crate::error::DomainError;

/// A coordinate axis.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug, PartialOrd, Ord)]
pub enum Axis {
    /// The x axis.
    X,
    /// The y axis.
    Y,
    /// The z axis.
    Z,
}

impl Axis {
    /// All axes in ascending order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Index of the axis (0, 1 or 2).
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// The two remaining axes in ascending order.
    ///
    /// These span the plane of a face normal to `self`.
    pub fn in_plane(self) -> (usize, usize) {
        match self {
            Axis::X => (1, 2),
            Axis::Y => (0, 2),
            Axis::Z => (0, 1),
        }
    }

    /// The two faces normal to this axis as `(minus, plus)`.
    pub fn faces(self) -> (Face, Face) {
        match self {
            Axis::X => (Face::XMinus, Face::XPlus),
            Axis::Y => (Face::YMinus, Face::YPlus),
            Axis::Z => (Face::ZMinus, Face::ZPlus),
        }
    }
}

/// One of the six axis aligned faces of a box.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug, PartialOrd, Ord)]
pub enum Face {
    /// The face at the lower x bound.
    XMinus,
    /// The face at the upper x bound.
    XPlus,
    /// The face at the lower y bound.
    YMinus,
    /// The face at the upper y bound.
    YPlus,
    /// The face at the lower z bound.
    ZMinus,
    /// The face at the upper z bound.
    ZPlus,
}

impl Face {
    /// All faces in table order.
    pub const ALL: [Face; 6] = [
        Face::XMinus,
        Face::XPlus,
        Face::YMinus,
        Face::YPlus,
        Face::ZMinus,
        Face::ZPlus,
    ];

    /// Position of the face in the six slot neighbour tables.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Inverse of [Face::index].
    pub fn from_index(index: usize) -> Option<Face> {
        Face::ALL.get(index).copied()
    }

    /// The axis normal to the face.
    pub fn axis(self) -> Axis {
        match self {
            Face::XMinus | Face::XPlus => Axis::X,
            Face::YMinus | Face::YPlus => Axis::Y,
            Face::ZMinus | Face::ZPlus => Axis::Z,
        }
    }

    /// True for the faces at the upper bound of an axis.
    pub fn is_plus(self) -> bool {
        matches!(self, Face::XPlus | Face::YPlus | Face::ZPlus)
    }

    /// Direction of the outward normal along [Face::axis] (-1 or +1).
    pub fn sign(self) -> i64 {
        if self.is_plus() {
            1
        } else {
            -1
        }
    }

    /// The face on the other side of the same axis.
    pub fn opposite(self) -> Face {
        match self {
            Face::XMinus => Face::XPlus,
            Face::XPlus => Face::XMinus,
            Face::YMinus => Face::YPlus,
            Face::YPlus => Face::YMinus,
            Face::ZMinus => Face::ZPlus,
            Face::ZPlus => Face::ZMinus,
        }
    }
}

impl std::fmt::Display for Face {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Face::XMinus => "X_MINUS",
            Face::XPlus => "X_PLUS",
            Face::YMinus => "Y_MINUS",
            Face::YPlus => "Y_PLUS",
            Face::ZMinus => "Z_MINUS",
            Face::ZPlus => "Z_PLUS",
        };
        write!(f, "{}", name)
    }
}

/// Classification of a face of a local region.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum BoundaryType {
    /// The face has at least one neighbour.
    Neighbour,
    /// No neighbour and the face lies on the edge of the whole decomposition.
    Outer,
    /// No neighbour although the face is inside the decomposition (a hole).
    Inner,
}

/// Which sides take part in a periodic exchange along one axis.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum PeriodicDirection {
    /// Data on the plus edge is sent to the ghost layers of the minus edge.
    PlusToMinus,
    /// Data on the minus edge is sent to the ghost layers of the plus edge.
    MinusToPlus,
    /// Both of the above.
    Both,
}

impl PeriodicDirection {
    /// True if `face` sends its owned layers in this direction.
    pub fn sends_through(self, face: Face) -> bool {
        match self {
            PeriodicDirection::PlusToMinus => face.is_plus(),
            PeriodicDirection::MinusToPlus => !face.is_plus(),
            PeriodicDirection::Both => true,
        }
    }

    /// True if `face` receives into its ghost layers in this direction.
    pub fn receives_through(self, face: Face) -> bool {
        self.sends_through(face.opposite())
    }
}

/// Reduction operators supported by the typed collectives.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum ReduceOp {
    /// Maximum.
    Max,
    /// Minimum.
    Min,
    /// Sum.
    Sum,
    /// Product.
    Prod,
    /// Logical and, non-zero is true.
    LogicalAnd,
    /// Logical or, non-zero is true.
    LogicalOr,
}

/// Stable integer encoding of reduction operators for foreign callers.
#[repr(i32)]
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum ReduceOpCode {
    /// Maximum.
    Max = 1,
    /// Minimum.
    Min = 2,
    /// Sum.
    Sum = 3,
    /// Product.
    Prod = 4,
    /// Logical and.
    LogicalAnd = 5,
    /// Logical or.
    LogicalOr = 6,
}

/// Translation between wire codes and reduction operators.
pub const REDUCE_OP_TABLE: [(ReduceOpCode, ReduceOp); 6] = [
    (ReduceOpCode::Max, ReduceOp::Max),
    (ReduceOpCode::Min, ReduceOp::Min),
    (ReduceOpCode::Sum, ReduceOp::Sum),
    (ReduceOpCode::Prod, ReduceOp::Prod),
    (ReduceOpCode::LogicalAnd, ReduceOp::LogicalAnd),
    (ReduceOpCode::LogicalOr, ReduceOp::LogicalOr),
];

impl TryFrom<i32> for ReduceOpCode {
    type Error = DomainError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        REDUCE_OP_TABLE
            .iter()
            .map(|&(code, _)| code)
            .find(|&code| code as i32 == value)
            .ok_or_else(|| DomainError::InvalidArgument(format!("unknown reduce op code {value}")))
    }
}

impl From<ReduceOpCode> for ReduceOp {
    fn from(code: ReduceOpCode) -> Self {
        // The table covers every code.
        REDUCE_OP_TABLE
            .iter()
            .find(|(c, _)| *c == code)
            .map(|&(_, op)| op)
            .unwrap_or(ReduceOp::Sum)
    }
}

impl From<ReduceOp> for ReduceOpCode {
    fn from(op: ReduceOp) -> Self {
        REDUCE_OP_TABLE
            .iter()
            .find(|(_, o)| *o == op)
            .map(|&(code, _)| code)
            .unwrap_or(ReduceOpCode::Sum)
    }
}

/// Stable integer encoding of element types for foreign callers.
#[repr(i32)]
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub enum DataTypeCode {
    /// Unsigned byte.
    U8 = 1,
    /// 32 bit signed integer.
    I32 = 2,
    /// 64 bit signed integer.
    I64 = 3,
    /// 32 bit float.
    F32 = 4,
    /// 64 bit float.
    F64 = 5,
    /// 64 bit unsigned integer.
    U64 = 6,
}

/// Translation between wire codes and element sizes in bytes.
pub const DATA_TYPE_TABLE: [(DataTypeCode, usize); 6] = [
    (DataTypeCode::U8, 1),
    (DataTypeCode::I32, 4),
    (DataTypeCode::I64, 8),
    (DataTypeCode::F32, 4),
    (DataTypeCode::F64, 8),
    (DataTypeCode::U64, 8),
];

impl DataTypeCode {
    /// Size of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        DATA_TYPE_TABLE
            .iter()
            .find(|(code, _)| *code == self)
            .map(|&(_, size)| size)
            .unwrap_or(0)
    }

    /// True for the integer types, the only ones logical reductions accept.
    pub fn is_integer(self) -> bool {
        !matches!(self, DataTypeCode::F32 | DataTypeCode::F64)
    }
}

impl TryFrom<i32> for DataTypeCode {
    type Error = DomainError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        DATA_TYPE_TABLE
            .iter()
            .map(|&(code, _)| code)
            .find(|&code| code as i32 == value)
            .ok_or_else(|| DomainError::InvalidArgument(format!("unknown data type code {value}")))
    }
}

/// Element types that know their wire code.
pub trait HasTypeCode {
    /// The wire code of the type.
    const CODE: DataTypeCode;
}

impl HasTypeCode for u8 {
    const CODE: DataTypeCode = DataTypeCode::U8;
}

impl HasTypeCode for i32 {
    const CODE: DataTypeCode = DataTypeCode::I32;
}

impl HasTypeCode for i64 {
    const CODE: DataTypeCode = DataTypeCode::I64;
}

impl HasTypeCode for u64 {
    const CODE: DataTypeCode = DataTypeCode::U64;
}

impl HasTypeCode for f32 {
    const CODE: DataTypeCode = DataTypeCode::F32;
}

impl HasTypeCode for f64 {
    const CODE: DataTypeCode = DataTypeCode::F64;
}

#[cfg(test)]
mod test {
    use super::{
        Axis, DataTypeCode, Face, HasTypeCode, PeriodicDirection, ReduceOp, ReduceOpCode,
        DATA_TYPE_TABLE, REDUCE_OP_TABLE,
    };

    #[test]
    fn test_face_opposite_and_axis() {
        for face in Face::ALL {
            assert_eq!(face.opposite().opposite(), face);
            assert_eq!(face.opposite().axis(), face.axis());
            assert_ne!(face.is_plus(), face.opposite().is_plus());
            assert_eq!(Face::from_index(face.index()), Some(face));
        }
        assert_eq!(Face::from_index(6), None);
        assert_eq!(Axis::Y.faces(), (Face::YMinus, Face::YPlus));
        assert_eq!(Axis::Y.in_plane(), (0, 2));
    }

    #[test]
    fn test_periodic_direction() {
        let dir = PeriodicDirection::PlusToMinus;
        assert!(dir.sends_through(Face::XPlus));
        assert!(!dir.sends_through(Face::XMinus));
        assert!(dir.receives_through(Face::XMinus));
        assert!(!dir.receives_through(Face::XPlus));

        let both = PeriodicDirection::Both;
        for face in Face::ALL {
            assert!(both.sends_through(face));
            assert!(both.receives_through(face));
        }
    }

    #[test]
    fn test_reduce_op_table_is_exhaustive() {
        for (code, op) in REDUCE_OP_TABLE {
            assert_eq!(ReduceOpCode::try_from(code as i32).unwrap(), code);
            assert_eq!(ReduceOp::from(code), op);
            assert_eq!(ReduceOpCode::from(op), code);
        }

        // Codes are unique.
        for (i, (a, _)) in REDUCE_OP_TABLE.iter().enumerate() {
            for (b, _) in REDUCE_OP_TABLE.iter().skip(i + 1) {
                assert_ne!(*a as i32, *b as i32);
            }
        }

        assert!(ReduceOpCode::try_from(0).is_err());
        assert!(ReduceOpCode::try_from(7).is_err());
    }

    #[test]
    fn test_data_type_table_is_exhaustive() {
        for (code, size) in DATA_TYPE_TABLE {
            assert_eq!(DataTypeCode::try_from(code as i32).unwrap(), code);
            assert_eq!(code.size_in_bytes(), size);
        }
        assert!(DataTypeCode::try_from(-1).is_err());
        assert!(DataTypeCode::try_from(7).is_err());

        assert_eq!(<f64 as HasTypeCode>::CODE.size_in_bytes(), 8);
        assert_eq!(<u64 as HasTypeCode>::CODE.size_in_bytes(), 8);
        assert!(<u64 as HasTypeCode>::CODE.is_integer());
        assert!(!<f32 as HasTypeCode>::CODE.is_integer());
        assert_eq!(<i32 as HasTypeCode>::CODE.size_in_bytes(), 4);
        assert_eq!(<u8 as HasTypeCode>::CODE.size_in_bytes(), 1);
    }
}
