//! Geometric descriptions of the global and local domains.

use std::path::Path;

use itertools::iproduct;
use log::{debug, warn};

use crate::{
    constants::SUBDOMAIN_FILE_MAGIC,
    error::DomainError,
    geometry::PhysicalBox,
    tools::{ByteReader, ByteWriter, Endianness},
};

/// Relative tolerance when checking that pitch, region and voxel count agree.
const PITCH_TOLERANCE: f64 = 1.0e-10;

/// Origin, extent, pitch and cell counts of a rectangular region.
#[derive(Clone, Debug, PartialEq)]
pub struct DomainInfo {
    origin: [f64; 3],
    region: [f64; 3],
    pitch: [f64; 3],
    voxel: [usize; 3],
    node: Option<[usize; 3]>,
}

impl DomainInfo {
    /// Create a domain from its origin, extent and number of voxels.
    ///
    /// The pitch is computed as `region / voxel`.
    pub fn new(origin: [f64; 3], region: [f64; 3], voxel: [usize; 3]) -> Result<Self, DomainError> {
        let pitch = std::array::from_fn(|axis| region[axis] / voxel[axis] as f64);
        let domain = Self {
            origin,
            region,
            pitch,
            voxel,
            node: None,
        };
        domain.check()?;
        Ok(domain)
    }

    /// Create a domain from its origin, pitch and number of voxels.
    ///
    /// The extent is computed as `pitch * voxel`.
    pub fn from_pitch(
        origin: [f64; 3],
        pitch: [f64; 3],
        voxel: [usize; 3],
    ) -> Result<Self, DomainError> {
        let region = std::array::from_fn(|axis| pitch[axis] * voxel[axis] as f64);
        let domain = Self {
            origin,
            region,
            pitch,
            voxel,
            node: None,
        };
        domain.check()?;
        Ok(domain)
    }

    /// Attach a node count, e.g. for node centred data.
    pub fn with_node(mut self, node: [usize; 3]) -> Result<Self, DomainError> {
        if node.iter().any(|&n| n == 0) {
            return Err(DomainError::InvalidArgument(format!(
                "node count {node:?} must be positive"
            )));
        }
        self.node = Some(node);
        Ok(self)
    }

    /// Validate the invariants of the record.
    pub fn check(&self) -> Result<(), DomainError> {
        if self.voxel.iter().any(|&n| n == 0) {
            return Err(DomainError::InvalidArgument(format!(
                "voxel count {:?} must be positive",
                self.voxel
            )));
        }
        for axis in 0..3 {
            let region = self.region[axis];
            let pitch = self.pitch[axis];
            if !(region.is_finite() && region > 0.0 && pitch.is_finite() && pitch > 0.0) {
                return Err(DomainError::InvalidArgument(format!(
                    "region {:?} and pitch {:?} must be positive",
                    self.region, self.pitch
                )));
            }
            let expected = pitch * self.voxel[axis] as f64;
            if (expected - region).abs() > PITCH_TOLERANCE * region {
                return Err(DomainError::InvalidArgument(format!(
                    "pitch {:?} does not match region {:?} / voxel {:?}",
                    self.pitch, self.region, self.voxel
                )));
            }
        }
        if let Some(node) = self.node {
            if node.iter().any(|&n| n == 0) {
                return Err(DomainError::InvalidArgument(format!(
                    "node count {node:?} must be positive"
                )));
            }
        }
        Ok(())
    }

    /// Lower corner.
    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    /// Extent.
    pub fn region(&self) -> [f64; 3] {
        self.region
    }

    /// Cell width along each axis.
    pub fn pitch(&self) -> [f64; 3] {
        self.pitch
    }

    /// Number of voxels along each axis.
    pub fn voxel(&self) -> [usize; 3] {
        self.voxel
    }

    /// Number of nodes along each axis if set.
    pub fn node(&self) -> Option<[usize; 3]> {
        self.node
    }

    /// The physical box covered by the domain.
    pub fn bounding_box(&self) -> PhysicalBox {
        PhysicalBox::from_origin_and_region(self.origin, self.region)
    }
}

/// Position of an active subdomain in the division grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActiveSubdomainInfo {
    position: [usize; 3],
}

impl ActiveSubdomainInfo {
    /// Create a new entry.
    pub fn new(position: [usize; 3]) -> Self {
        Self { position }
    }

    /// Position in the division grid.
    pub fn position(&self) -> [usize; 3] {
        self.position
    }
}

/// The whole domain together with its division into subdomains.
#[derive(Clone, Debug)]
pub struct GlobalDomainInfo {
    domain: DomainInfo,
    divisions: [usize; 3],
    active: Vec<ActiveSubdomainInfo>,
}

impl GlobalDomainInfo {
    /// Create a dense decomposition.
    pub fn new(domain: DomainInfo, divisions: [usize; 3]) -> Result<Self, DomainError> {
        if divisions.iter().any(|&d| d == 0) {
            return Err(DomainError::InvalidArgument(format!(
                "division count {divisions:?} must be positive"
            )));
        }
        let voxel = domain.voxel();
        if divisions.iter().zip(voxel.iter()).any(|(d, v)| d > v) {
            return Err(DomainError::DecompositionMismatch(format!(
                "cannot divide {voxel:?} voxels into {divisions:?} subdomains"
            )));
        }
        Ok(Self {
            domain,
            divisions,
            active: Vec::new(),
        })
    }

    /// Create a decomposition whose divisions and active set come from an active subdomain file.
    pub fn from_subdomain_file<P: AsRef<Path>>(
        domain: DomainInfo,
        path: P,
    ) -> Result<Self, DomainError> {
        let (divisions, active) = read_active_subdomain_file(path)?;
        let mut global = Self::new(domain, divisions)?;
        for position in active {
            global.add_active(position)?;
        }
        Ok(global)
    }

    /// Mark a subdomain as active.
    ///
    /// Once one subdomain is added the decomposition is no longer dense.
    pub fn add_active(&mut self, position: [usize; 3]) -> Result<(), DomainError> {
        if position
            .iter()
            .zip(self.divisions.iter())
            .any(|(p, d)| p >= d)
        {
            return Err(DomainError::InvalidArgument(format!(
                "subdomain {position:?} lies outside the division grid {:?}",
                self.divisions
            )));
        }
        let entry = ActiveSubdomainInfo::new(position);
        if self.active.contains(&entry) {
            return Err(DomainError::InvalidArgument(format!(
                "subdomain {position:?} is already active"
            )));
        }
        self.active.push(entry);
        Ok(())
    }

    /// The geometric description of the whole domain.
    pub fn domain(&self) -> &DomainInfo {
        &self.domain
    }

    /// Number of subdomains along each axis.
    pub fn divisions(&self) -> [usize; 3] {
        self.divisions
    }

    /// True if every position of the division grid is active.
    pub fn is_dense(&self) -> bool {
        self.active.is_empty()
    }

    /// True if the position lies inside the division grid and is active.
    pub fn is_active(&self, position: [i64; 3]) -> bool {
        if !self.contains(position) {
            return false;
        }
        let position = position.map(|p| p as usize);
        self.is_dense() || self.active.contains(&ActiveSubdomainInfo::new(position))
    }

    /// True if the position lies inside the division grid.
    pub fn contains(&self, position: [i64; 3]) -> bool {
        position
            .iter()
            .zip(self.divisions.iter())
            .all(|(&p, &d)| p >= 0 && (p as usize) < d)
    }

    /// Number of active subdomains.
    pub fn active_count(&self) -> usize {
        if self.is_dense() {
            self.divisions.iter().product()
        } else {
            self.active.len()
        }
    }

    /// All active positions in x fastest order.
    ///
    /// For a dense decomposition the list is generated on demand.
    pub fn active_positions(&self) -> Vec<[usize; 3]> {
        let [dx, dy, dz] = self.divisions;
        iproduct!(0..dz, 0..dy, 0..dx)
            .map(|(k, j, i)| [i, j, k])
            .filter(|&p| self.is_dense() || self.active.contains(&ActiveSubdomainInfo::new(p)))
            .collect()
    }

    /// First voxel index and number of voxels of the subdomain at `position`.
    ///
    /// Voxels are split evenly; the first `voxel % divisions` subdomains along an axis
    /// receive one extra voxel.
    pub fn subdomain_extent(&self, position: [usize; 3]) -> ([usize; 3], [usize; 3]) {
        let voxel = self.domain.voxel();
        let mut head = [0; 3];
        let mut count = [0; 3];
        for axis in 0..3 {
            let base = voxel[axis] / self.divisions[axis];
            let extra = voxel[axis] % self.divisions[axis];
            let p = position[axis];
            head[axis] = p * base + p.min(extra);
            count[axis] = base + usize::from(p < extra);
        }
        (head, count)
    }

    /// Write the active set in the active subdomain file format.
    pub fn write_active_subdomain_file<P: AsRef<Path>>(
        &self,
        path: P,
        endianness: Endianness,
    ) -> Result<(), DomainError> {
        let positions = self.active_positions();
        write_active_subdomain_file(path, self.divisions, &positions, endianness)
    }
}

/// Choose division counts for `nrank` subdomains of a `voxel` sized grid.
///
/// Among all factorisations `dx * dy * dz = nrank` with no axis divided into more parts
/// than it has voxels, the one with the smallest total interface area is returned.
pub fn decide_divisions(voxel: [usize; 3], nrank: usize) -> Result<[usize; 3], DomainError> {
    if nrank == 0 {
        return Err(DomainError::InvalidArgument(
            "cannot divide a domain among zero ranks".to_string(),
        ));
    }

    let [nx, ny, nz] = voxel.map(|n| n as u128);
    let mut best: Option<([usize; 3], u128)> = None;

    for dx in (1..=nrank).filter(|d| nrank % d == 0) {
        let rest = nrank / dx;
        for dy in (1..=rest).filter(|d| rest % d == 0) {
            let dz = rest / dy;
            let divisions = [dx, dy, dz];
            if divisions.iter().zip(voxel.iter()).any(|(d, v)| d > v) {
                continue;
            }
            let [ux, uy, uz] = divisions.map(|d| d as u128 - 1);
            let surface = ux * ny * nz + uy * nx * nz + uz * nx * ny;
            if best.map_or(true, |(_, s)| surface < s) {
                best = Some((divisions, surface));
            }
        }
    }

    match best {
        Some((divisions, surface)) => {
            debug!("Divisions {divisions:?} for {nrank} ranks, interface area {surface}.");
            Ok(divisions)
        }
        None => Err(DomainError::DecompositionMismatch(format!(
            "{voxel:?} voxels cannot be divided among {nrank} ranks"
        ))),
    }
}

/// One rank's or one leaf's part of the global domain.
#[derive(Clone, Debug)]
pub struct LocalDomainInfo {
    domain: DomainInfo,
    subdomain: ActiveSubdomainInfo,
}

impl LocalDomainInfo {
    /// Create a new local domain.
    pub fn new(domain: DomainInfo, position: [usize; 3]) -> Self {
        Self {
            domain,
            subdomain: ActiveSubdomainInfo::new(position),
        }
    }

    /// The geometric description.
    pub fn domain(&self) -> &DomainInfo {
        &self.domain
    }

    /// Position in the division grid.
    pub fn position(&self) -> [usize; 3] {
        self.subdomain.position()
    }
}

/// Read an active subdomain file.
///
/// Returns the division counts and the active positions in x fastest order.
pub fn read_active_subdomain_file<P: AsRef<Path>>(
    path: P,
) -> Result<([usize; 3], Vec<[usize; 3]>), DomainError> {
    let bytes = std::fs::read(path.as_ref())?;
    parse_active_subdomains(&bytes)
}

/// Parse the contents of an active subdomain file.
pub fn parse_active_subdomains(bytes: &[u8]) -> Result<([usize; 3], Vec<[usize; 3]>), DomainError> {
    let malformed = |reason: &str| DomainError::MalformedSubdomainFile(reason.to_string());

    let mut reader = ByteReader::new(bytes);
    let magic = reader
        .read_u32()
        .ok_or_else(|| malformed("file too short for the identifier"))?;

    if magic != SUBDOMAIN_FILE_MAGIC {
        if magic.swap_bytes() == SUBDOMAIN_FILE_MAGIC {
            warn!("Active subdomain file was written with the opposite byte order.");
            reader.set_swap(true);
        } else {
            return Err(malformed("unknown identifier"));
        }
    }

    let mut divisions = [0; 3];
    for d in divisions.iter_mut() {
        let value = reader
            .read_i32()
            .ok_or_else(|| malformed("file too short for the division counts"))?;
        if value <= 0 {
            return Err(malformed("division counts must be positive"));
        }
        *d = value as usize;
    }

    let ncells = divisions
        .iter()
        .try_fold(1_usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| malformed("division grid too large"))?;
    let contents = reader
        .read_bytes(ncells)
        .ok_or_else(|| malformed("file too short for the contents"))?;

    let [dx, dy, _] = divisions;
    let active = contents
        .iter()
        .enumerate()
        .filter(|&(_, &flag)| flag != 0)
        .map(|(index, _)| [index % dx, (index / dx) % dy, index / (dx * dy)])
        .collect::<Vec<_>>();

    if active.is_empty() {
        return Err(malformed("no active subdomain"));
    }

    Ok((divisions, active))
}

/// Write an active subdomain file.
pub fn write_active_subdomain_file<P: AsRef<Path>>(
    path: P,
    divisions: [usize; 3],
    active: &[[usize; 3]],
    endianness: Endianness,
) -> Result<(), DomainError> {
    let [dx, dy, dz] = divisions;
    let mut contents = vec![0_u8; dx * dy * dz];
    for &[i, j, k] in active {
        if i >= dx || j >= dy || k >= dz {
            return Err(DomainError::InvalidArgument(format!(
                "subdomain {:?} lies outside the division grid {divisions:?}",
                [i, j, k]
            )));
        }
        contents[i + dx * (j + dy * k)] = 1;
    }

    let mut writer = ByteWriter::new(endianness);
    writer.write_u32(SUBDOMAIN_FILE_MAGIC);
    for d in divisions {
        writer.write_i32(d as i32);
    }
    writer.write_bytes(&contents);

    std::fs::write(path.as_ref(), writer.into_bytes())?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{decide_divisions, parse_active_subdomains, DomainInfo, GlobalDomainInfo};
    use crate::{
        error::DomainError,
        tools::{ByteWriter, Endianness},
    };

    fn unit_domain(voxel: [usize; 3]) -> DomainInfo {
        DomainInfo::new([0.0; 3], [1.0; 3], voxel).unwrap()
    }

    #[test]
    fn test_pitch_from_region() {
        let domain = DomainInfo::new([0.0; 3], [1.0, 2.0, 4.0], [10, 20, 80]).unwrap();
        assert_eq!(domain.pitch(), [0.1, 0.1, 0.05]);

        let domain = DomainInfo::from_pitch([1.0; 3], [0.5; 3], [4, 2, 1]).unwrap();
        assert_eq!(domain.region(), [2.0, 1.0, 0.5]);
    }

    #[test]
    fn test_reject_invalid_domain() {
        assert!(DomainInfo::new([0.0; 3], [1.0; 3], [0, 1, 1]).is_err());
        assert!(DomainInfo::new([0.0; 3], [-1.0, 1.0, 1.0], [1, 1, 1]).is_err());
        assert!(unit_domain([1, 1, 1]).with_node([2, 0, 2]).is_err());
        assert_eq!(
            unit_domain([1, 1, 1]).with_node([2, 2, 2]).unwrap().node(),
            Some([2, 2, 2])
        );
    }

    #[test]
    fn test_active_subdomains() {
        let mut global = GlobalDomainInfo::new(unit_domain([8, 8, 8]), [2, 2, 1]).unwrap();
        assert!(global.is_dense());
        assert_eq!(global.active_count(), 4);
        assert!(global.is_active([1, 1, 0]));
        assert!(!global.is_active([2, 0, 0]));
        assert!(!global.is_active([-1, 0, 0]));

        global.add_active([1, 0, 0]).unwrap();
        global.add_active([0, 1, 0]).unwrap();
        assert!(global.add_active([1, 0, 0]).is_err());
        assert!(global.add_active([0, 0, 1]).is_err());

        assert!(!global.is_dense());
        assert_eq!(global.active_count(), 2);
        assert!(!global.is_active([0, 0, 0]));
        assert_eq!(global.active_positions(), vec![[1, 0, 0], [0, 1, 0]]);
    }

    #[test]
    fn test_subdomain_extent() {
        let global = GlobalDomainInfo::new(unit_domain([10, 4, 4]), [3, 1, 1]).unwrap();
        assert_eq!(global.subdomain_extent([0, 0, 0]), ([0, 0, 0], [4, 4, 4]));
        assert_eq!(global.subdomain_extent([1, 0, 0]), ([4, 0, 0], [3, 4, 4]));
        assert_eq!(global.subdomain_extent([2, 0, 0]), ([7, 0, 0], [3, 4, 4]));
    }

    #[test]
    fn test_decide_divisions() {
        // A long domain in x should be cut along x.
        assert_eq!(decide_divisions([100, 10, 10], 4).unwrap(), [4, 1, 1]);
        // A cube is cut evenly.
        assert_eq!(decide_divisions([64, 64, 64], 8).unwrap(), [2, 2, 2]);
        assert_eq!(decide_divisions([8, 8, 8], 1).unwrap(), [1, 1, 1]);
        assert!(decide_divisions([1, 1, 1], 2).is_err());
        assert!(decide_divisions([4, 4, 4], 0).is_err());
    }

    #[test]
    fn test_parse_subdomain_file_both_byte_orders() {
        for endianness in [Endianness::Little, Endianness::Big] {
            let mut writer = ByteWriter::new(endianness);
            writer.write_u32(crate::constants::SUBDOMAIN_FILE_MAGIC);
            for d in [2, 2, 1] {
                writer.write_i32(d);
            }
            writer.write_bytes(&[1, 0, 0, 1]);

            let (divisions, active) = parse_active_subdomains(&writer.into_bytes()).unwrap();
            assert_eq!(divisions, [2, 2, 1]);
            assert_eq!(active, vec![[0, 0, 0], [1, 1, 0]]);
        }
    }

    #[test]
    fn test_parse_subdomain_file_rejects_garbage() {
        assert!(parse_active_subdomains(b"XXXX").is_err());
        assert!(parse_active_subdomains(b"SB").is_err());

        // Truncated contents.
        let mut writer = ByteWriter::new(Endianness::native());
        writer.write_u32(crate::constants::SUBDOMAIN_FILE_MAGIC);
        for d in [2, 2, 2] {
            writer.write_i32(d);
        }
        writer.write_bytes(&[1, 1]);
        assert!(parse_active_subdomains(&writer.into_bytes()).is_err());
    }

    #[test]
    fn test_parse_subdomain_file_rejects_huge_grid() {
        let mut writer = ByteWriter::new(Endianness::native());
        writer.write_u32(crate::constants::SUBDOMAIN_FILE_MAGIC);
        for _ in 0..3 {
            writer.write_i32(i32::MAX);
        }
        writer.write_bytes(&[1]);
        assert!(matches!(
            parse_active_subdomains(&writer.into_bytes()),
            Err(DomainError::MalformedSubdomainFile(_))
        ));
    }

    #[test]
    fn test_subdomain_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("active.sbdm");

        let mut global = GlobalDomainInfo::new(unit_domain([6, 6, 6]), [3, 2, 1]).unwrap();
        global.add_active([0, 0, 0]).unwrap();
        global.add_active([2, 1, 0]).unwrap();
        global
            .write_active_subdomain_file(&path, Endianness::Big)
            .unwrap();

        let loaded = GlobalDomainInfo::from_subdomain_file(unit_domain([6, 6, 6]), &path).unwrap();
        assert_eq!(loaded.divisions(), [3, 2, 1]);
        assert_eq!(loaded.active_positions(), vec![[0, 0, 0], [2, 1, 0]]);
    }
}
