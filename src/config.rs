//! Validated set-up parameters of the two decomposition models.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{domain::DomainInfo, error::DomainError, voxel::check_leaf_block};

/// Length unit of the coordinates of a tree file.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum LengthUnit {
    /// Metres.
    #[default]
    Meter,
    /// Centimetres.
    Centimeter,
    /// Millimetres.
    Millimeter,
    /// Coordinates without a physical unit.
    NonDimensional,
}

impl LengthUnit {
    /// Length of one unit in metres.
    ///
    /// Non-dimensional coordinates are taken as they are.
    pub fn to_meters(self) -> f64 {
        match self {
            LengthUnit::Meter | LengthUnit::NonDimensional => 1.0,
            LengthUnit::Centimeter => 1e-2,
            LengthUnit::Millimeter => 1e-3,
        }
    }

    /// The label of the unit.
    pub fn as_str(self) -> &'static str {
        match self {
            LengthUnit::Meter => "M",
            LengthUnit::Centimeter => "CM",
            LengthUnit::Millimeter => "MM",
            LengthUnit::NonDimensional => "NonDimensional",
        }
    }
}

impl FromStr for LengthUnit {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "m" | "meter" | "metre" => Ok(LengthUnit::Meter),
            "cm" | "centimeter" | "centimetre" => Ok(LengthUnit::Centimeter),
            "mm" | "millimeter" | "millimetre" => Ok(LengthUnit::Millimeter),
            "nondimensional" | "none" => Ok(LengthUnit::NonDimensional),
            _ => Err(DomainError::InvalidArgument(format!(
                "unknown length unit {s:?}"
            ))),
        }
    }
}

impl std::fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters of a Cartesian decomposition.
#[derive(Clone, Debug)]
pub struct CartesianConfig {
    domain: DomainInfo,
    divisions: Option<[usize; 3]>,
    active_subdomain_file: Option<PathBuf>,
}

impl CartesianConfig {
    /// A dense decomposition of `domain` with automatically chosen divisions.
    pub fn new(domain: DomainInfo) -> Self {
        Self {
            domain,
            divisions: None,
            active_subdomain_file: None,
        }
    }

    /// Fix the number of subdomains along each axis.
    pub fn with_divisions(mut self, divisions: [usize; 3]) -> Result<Self, DomainError> {
        if divisions.iter().any(|&d| d == 0) {
            return Err(DomainError::InvalidArgument(format!(
                "division count {divisions:?} must be positive"
            )));
        }
        self.divisions = Some(divisions);
        Ok(self)
    }

    /// Take the division counts and the active subdomains from a file.
    pub fn with_active_subdomain_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.active_subdomain_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// The whole domain.
    pub fn domain(&self) -> &DomainInfo {
        &self.domain
    }

    /// Requested division counts.
    pub fn divisions(&self) -> Option<[usize; 3]> {
        self.divisions
    }

    /// Path of the active subdomain file.
    pub fn active_subdomain_file(&self) -> Option<&Path> {
        self.active_subdomain_file.as_deref()
    }
}

/// Parameters of an adaptive decomposition.
#[derive(Clone, Debug)]
pub struct LmrConfig {
    tree_file: PathBuf,
    leaf_block: [usize; 3],
    unit: LengthUnit,
}

impl LmrConfig {
    /// Leaves of the tree in `tree_file`, each holding `leaf_block` cells.
    pub fn new<P: AsRef<Path>>(
        tree_file: P,
        leaf_block: [usize; 3],
        unit: LengthUnit,
    ) -> Result<Self, DomainError> {
        check_leaf_block(leaf_block)?;
        Ok(Self {
            tree_file: tree_file.as_ref().to_path_buf(),
            leaf_block,
            unit,
        })
    }

    /// Path of the tree description file.
    pub fn tree_file(&self) -> &Path {
        &self.tree_file
    }

    /// Number of cells per leaf and axis.
    pub fn leaf_block(&self) -> [usize; 3] {
        self.leaf_block
    }

    /// Length unit of the tree coordinates.
    pub fn unit(&self) -> LengthUnit {
        self.unit
    }
}
