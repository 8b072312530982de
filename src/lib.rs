//! Domain decomposition and halo exchange for Cartesian and octree-refined voxel grids.
#![cfg_attr(feature = "strict", deny(warnings), deny(unused_crate_dependencies))]
#![warn(missing_docs)]

pub mod array;
pub mod comm;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod geometry;
pub mod halo;
pub mod octree;
pub mod partition;
pub mod pedigree;
pub mod process_group;
pub mod tools;
pub mod types;
pub mod voxel;
pub mod vtk;

pub use error::DomainError;
pub use process_group::ProcessGroupManager;
