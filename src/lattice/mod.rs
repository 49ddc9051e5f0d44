//! Regular lattice geometry and neighbor wiring for the voxel field.
//!
//! Voxels are numbered in canonical order, `x` varies fastest, then `y`, then `z`,
//! so the flat id of `(ix, iy, iz)` is `ix + iy * nx + iz * nx * ny`. Every voxel
//! has six neighbor links, a link that would leave the lattice points back at the
//! voxel itself which makes that face reflecting (zero net flux).

use serde::{Deserialize, Serialize};
use tracing::info;
use crate::error::{FieldError, LatticeError};
use crate::field::{DiffusionCoefficients, VoxelField, VoxelId};


/// Integer grid coordinate `(ix, iy, iz)`
pub type GridIndex = (usize, usize, usize);

/// Continuous coordinate `(x, y, z)` in the network's units (µm)
pub type Position = (f64, f64, f64);

// relative tolerance used when checking that a physical coordinate sits on a lattice node
const ALIGNMENT_TOLERANCE: f64 = 1e-6;

/// One of the six axis-aligned neighbor directions of a voxel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    XPos,
    XNeg,
    YPos,
    YNeg,
    ZPos,
    ZNeg,
}

impl Direction {
    /// All directions in the order used by neighbor tables
    pub const ALL: [Direction; 6] = [
        Direction::XPos, Direction::XNeg,
        Direction::YPos, Direction::YNeg,
        Direction::ZPos, Direction::ZNeg,
    ];

    /// Slot of the direction in a `[_; 6]` neighbor table
    pub fn slot(&self) -> usize {
        match self {
            Direction::XPos => 0,
            Direction::XNeg => 1,
            Direction::YPos => 2,
            Direction::YNeg => 3,
            Direction::ZPos => 4,
            Direction::ZNeg => 5,
        }
    }

    /// Grid offset of the neighbor in this direction
    pub fn offset(&self) -> (isize, isize, isize) {
        match self {
            Direction::XPos => (1, 0, 0),
            Direction::XNeg => (-1, 0, 0),
            Direction::YPos => (0, 1, 0),
            Direction::YNeg => (0, -1, 0),
            Direction::ZPos => (0, 0, 1),
            Direction::ZNeg => (0, 0, -1),
        }
    }

    /// Direction pointing the other way along the same axis
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::XPos => Direction::XNeg,
            Direction::XNeg => Direction::XPos,
            Direction::YPos => Direction::YNeg,
            Direction::YNeg => Direction::YPos,
            Direction::ZPos => Direction::ZNeg,
            Direction::ZNeg => Direction::ZPos,
        }
    }
}

/// Shape and placement of a regular lattice, nodes sit at
/// `origin + (ix, iy, iz) * spacing`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    /// Distance between neighboring nodes (µm)
    pub spacing: f64,
    /// Physical coordinate of node `(0, 0, 0)`
    pub origin: Position,
    /// Number of nodes along each axis
    pub dims: GridIndex,
}

impl GridGeometry {
    /// Builds a geometry with the given dimensions, spacing and origin
    pub fn new(dims: GridIndex, spacing: f64, origin: Position) -> Result<Self, LatticeError> {
        if !(spacing.is_finite() && spacing > 0.) {
            return Err(LatticeError::InvalidGeometry(format!("spacing must be positive, got {}", spacing)));
        }
        if dims.0 == 0 || dims.1 == 0 || dims.2 == 0 {
            return Err(LatticeError::InvalidGeometry(format!("dimensions must be non-zero, got {:?}", dims)));
        }
        if !(origin.0.is_finite() && origin.1.is_finite() && origin.2.is_finite()) {
            return Err(LatticeError::InvalidGeometry(format!("origin must be finite, got {:?}", origin)));
        }

        Ok(GridGeometry { spacing, origin, dims })
    }

    /// Covers a bounding box of the given size starting at `origin` with nodes placed
    /// every `spacing`, both faces of the box included (a 110 µm box at 11 µm spacing
    /// has 11 intervals and 11 + 1 nodes per axis)
    pub fn from_bounding_box(size: Position, spacing: f64, origin: Position) -> Result<Self, LatticeError> {
        let axis_nodes = |length: f64| -> Result<usize, LatticeError> {
            if !(length.is_finite() && length >= 0.) {
                return Err(LatticeError::InvalidGeometry(format!("box side must be non-negative, got {}", length)));
            }

            Ok((length / spacing + ALIGNMENT_TOLERANCE).floor() as usize + 1)
        };

        if !(spacing.is_finite() && spacing > 0.) {
            return Err(LatticeError::InvalidGeometry(format!("spacing must be positive, got {}", spacing)));
        }

        let dims = (axis_nodes(size.0)?, axis_nodes(size.1)?, axis_nodes(size.2)?);

        GridGeometry::new(dims, spacing, origin)
    }

    /// Total number of voxels
    pub fn len(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    /// Whether the lattice has no voxels (never true for a validated geometry)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the index lies inside the lattice
    pub fn contains(&self, index: GridIndex) -> bool {
        index.0 < self.dims.0 && index.1 < self.dims.1 && index.2 < self.dims.2
    }

    /// Canonical flat id of a grid index, `ix + iy * nx + iz * nx * ny`
    pub fn flat_index(&self, index: GridIndex) -> Result<VoxelId, LatticeError> {
        if !self.contains(index) {
            return Err(LatticeError::IndexNotInLattice(index));
        }

        let (nx, ny, _) = self.dims;

        Ok(index.0 + index.1 * nx + index.2 * nx * ny)
    }

    /// Grid index of a canonical flat id
    pub fn grid_index(&self, voxel: VoxelId) -> Option<GridIndex> {
        if voxel >= self.len() {
            return None;
        }

        let (nx, ny, _) = self.dims;

        Some((voxel % nx, (voxel / nx) % ny, voxel / (nx * ny)))
    }

    /// Physical coordinate of a lattice node
    pub fn position_of(&self, index: GridIndex) -> Position {
        (
            self.origin.0 + index.0 as f64 * self.spacing,
            self.origin.1 + index.1 as f64 * self.spacing,
            self.origin.2 + index.2 as f64 * self.spacing,
        )
    }

    /// Node coordinates along each axis
    pub fn axis_coordinates(&self) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let axis = |n: usize, start: f64| -> Vec<f64> {
            (0..n).map(|i| start + i as f64 * self.spacing).collect()
        };

        (axis(self.dims.0, self.origin.0), axis(self.dims.1, self.origin.1), axis(self.dims.2, self.origin.2))
    }

    /// Middle node of the lattice, `(nx / 2, ny / 2, nz / 2)`
    pub fn center_index(&self) -> GridIndex {
        (self.dims.0 / 2, self.dims.1 / 2, self.dims.2 / 2)
    }

    /// Grid index of a physical coordinate that must sit exactly on a lattice node,
    /// errors if the coordinate is off-grid or outside the lattice
    pub fn index_at(&self, position: Position) -> Result<GridIndex, LatticeError> {
        let not_found = LatticeError::CoordinateNotInLattice { x: position.0, y: position.1, z: position.2 };

        let axis = |value: f64, start: f64, n: usize| -> Option<usize> {
            let scaled = (value - start) / self.spacing;
            let nearest = scaled.round();
            if !scaled.is_finite() || (scaled - nearest).abs() > ALIGNMENT_TOLERANCE || nearest < 0. {
                return None;
            }
            let index = nearest as usize;

            (index < n).then_some(index)
        };

        match (
            axis(position.0, self.origin.0, self.dims.0),
            axis(position.1, self.origin.1, self.dims.1),
            axis(position.2, self.origin.2, self.dims.2),
        ) {
            (Some(ix), Some(iy), Some(iz)) => Ok((ix, iy, iz)),
            _ => Err(not_found),
        }
    }

    /// Neighbor of an index in a direction, `None` when it would leave the lattice
    pub fn neighbor_index(&self, index: GridIndex, direction: Direction) -> Option<GridIndex> {
        let (dx, dy, dz) = direction.offset();
        let shift = |value: usize, delta: isize, n: usize| -> Option<usize> {
            let shifted = value.checked_add_signed(delta)?;

            (shifted < n).then_some(shifted)
        };

        Some((
            shift(index.0, dx, self.dims.0)?,
            shift(index.1, dy, self.dims.1)?,
            shift(index.2, dz, self.dims.2)?,
        ))
    }
}

/// Uniform physical constants converted to per-voxel rates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformPhysics {
    /// Exchange rate with each neighbor, `D_phys / spacing^2` (1/ms)
    pub diffusion: f64,
    /// Decay constant, `ln(2) / half_life` (1/ms)
    pub decay: f64,
}

impl UniformPhysics {
    /// Converts a physical diffusion constant (µm²/ms), grid spacing (µm) and decay
    /// half-life (ms) into lattice rates
    ///
    /// The explicit integrator is only stable while `dt * (6 * D + λ) < 1`, halving
    /// the spacing quadruples `D` so the step size has to shrink accordingly
    pub fn from_physical(diffusion_phys: f64, spacing: f64, half_life: f64) -> Result<Self, FieldError> {
        if !(diffusion_phys.is_finite() && diffusion_phys >= 0.) {
            return Err(FieldError::InvalidParameter { name: "diffusion_phys", value: diffusion_phys });
        }
        if !(spacing.is_finite() && spacing > 0.) {
            return Err(FieldError::InvalidParameter { name: "spacing", value: spacing });
        }
        if !(half_life > 0.) {
            return Err(FieldError::InvalidParameter { name: "half_life", value: half_life });
        }

        Ok(UniformPhysics {
            diffusion: diffusion_phys / spacing.powi(2),
            decay: std::f64::consts::LN_2 / half_life,
        })
    }
}

/// Neighbor wiring of a regular lattice, the table is indexed by voxel id and holds
/// the id of each of the six neighbors (the voxel itself at a boundary)
#[derive(Debug, Clone)]
pub struct LatticeWiring {
    geometry: GridGeometry,
    neighbors: Vec<[VoxelId; 6]>,
}

impl LatticeWiring {
    /// Enumerates every voxel of the geometry and builds its neighbor links
    pub fn build(geometry: GridGeometry) -> Self {
        let neighbors = (0..geometry.len())
            .map(|voxel| {
                let (nx, ny, _) = geometry.dims;
                let index = (voxel % nx, (voxel / nx) % ny, voxel / (nx * ny));
                let mut links = [voxel; 6];

                for direction in Direction::ALL {
                    if let Some((jx, jy, jz)) = geometry.neighbor_index(index, direction) {
                        links[direction.slot()] = jx + jy * nx + jz * nx * ny;
                    }
                }

                links
            })
            .collect::<Vec<[VoxelId; 6]>>();

        info!(
            nx = geometry.dims.0, ny = geometry.dims.1, nz = geometry.dims.2,
            spacing = geometry.spacing, voxels = geometry.len(),
            "built lattice wiring"
        );

        LatticeWiring { geometry, neighbors }
    }

    /// Geometry the wiring was built from
    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    /// Neighbor table indexed by voxel id
    pub fn neighbors(&self) -> &[[VoxelId; 6]] {
        &self.neighbors
    }

    /// Neighbor of a voxel in a direction
    pub fn neighbor(&self, voxel: VoxelId, direction: Direction) -> Option<VoxelId> {
        self.neighbors.get(voxel).map(|links| links[direction.slot()])
    }

    /// Voxel handle of a grid coordinate
    pub fn voxel_at(&self, index: GridIndex) -> Result<VoxelId, LatticeError> {
        self.geometry.flat_index(index)
    }

    /// Voxel handle of a physical coordinate, errors loudly when the coordinate is
    /// not a lattice node (misaligned spacing or origin)
    pub fn voxel_at_position(&self, position: Position) -> Result<VoxelId, LatticeError> {
        let index = self.geometry.index_at(position)?;

        self.geometry.flat_index(index)
    }

    /// Voxel at the middle of the lattice
    pub fn center_voxel(&self) -> Result<VoxelId, LatticeError> {
        self.geometry.flat_index(self.geometry.center_index())
    }

    /// Creates a field over the lattice with every neighbor link wired
    pub fn build_field(&self, dt: f64) -> Result<VoxelField, FieldError> {
        let mut field = VoxelField::new(self.geometry.dims, dt)?;

        for (voxel, links) in self.neighbors.iter().enumerate() {
            for direction in Direction::ALL {
                field.link(voxel, direction, links[direction.slot()])?;
            }
        }

        Ok(field)
    }

    /// Applies the same diffusion rate in all six directions and the same decay
    /// constant to every voxel of the field
    pub fn assign_uniform_physics(
        &self,
        field: &mut VoxelField,
        diffusion_phys: f64,
        half_life: f64,
    ) -> Result<UniformPhysics, FieldError> {
        let physics = UniformPhysics::from_physical(diffusion_phys, self.geometry.spacing, half_life)?;

        for voxel in 0..field.len() {
            field.set_coefficients(voxel, DiffusionCoefficients::uniform(physics.diffusion), physics.decay)?;
        }

        info!(diffusion = physics.diffusion, decay = physics.decay, "assigned uniform physics");

        Ok(physics)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bounding_box_includes_both_faces() {
        let geometry = GridGeometry::from_bounding_box((110., 110., 110.), 11., (0., 0., 0.)).unwrap();
        assert_eq!(geometry.dims, (11, 11, 11));
        assert_eq!(geometry.center_index(), (5, 5, 5));
        assert_eq!(geometry.position_of(geometry.center_index()), (55., 55., 55.));
    }

    #[test]
    fn test_flat_index_order() {
        let geometry = GridGeometry::new((4, 3, 2), 1., (0., 0., 0.)).unwrap();
        assert_eq!(geometry.flat_index((1, 0, 0)).unwrap(), 1);
        assert_eq!(geometry.flat_index((0, 1, 0)).unwrap(), 4);
        assert_eq!(geometry.flat_index((0, 0, 1)).unwrap(), 12);
        assert_eq!(geometry.grid_index(23), Some((3, 2, 1)));
        assert!(geometry.flat_index((4, 0, 0)).is_err());
    }

    #[test]
    fn test_misaligned_coordinate_fails() {
        let geometry = GridGeometry::new((11, 11, 11), 11., (0., 0., 0.)).unwrap();
        let wiring = LatticeWiring::build(geometry);

        assert_eq!(wiring.voxel_at_position((55., 55., 55.)).unwrap(), wiring.center_voxel().unwrap());
        assert!(wiring.voxel_at_position((54., 55., 55.)).is_err());
        assert!(wiring.voxel_at_position((121., 0., 0.)).is_err());
        assert!(wiring.voxel_at_position((-11., 0., 0.)).is_err());
    }

    #[test]
    fn test_interior_voxel_has_distinct_neighbors() {
        let wiring = LatticeWiring::build(GridGeometry::new((3, 3, 3), 1., (0., 0., 0.)).unwrap());
        let center = wiring.voxel_at((1, 1, 1)).unwrap();
        let links = wiring.neighbors()[center];

        assert!(links.iter().all(|&n| n != center));
        assert_eq!(wiring.neighbor(center, Direction::XPos), Some(wiring.voxel_at((2, 1, 1)).unwrap()));
        assert_eq!(wiring.neighbor(center, Direction::ZNeg), Some(wiring.voxel_at((1, 1, 0)).unwrap()));
    }

    #[test]
    fn test_links_are_symmetric() {
        let wiring = LatticeWiring::build(GridGeometry::new((4, 3, 2), 1., (0., 0., 0.)).unwrap());

        for (voxel, links) in wiring.neighbors().iter().enumerate() {
            for direction in Direction::ALL {
                let neighbor = links[direction.slot()];
                if neighbor != voxel {
                    assert_eq!(wiring.neighbor(neighbor, direction.opposite()), Some(voxel));
                }
            }
        }

        let corner = wiring.voxel_at((0, 0, 0)).unwrap();
        assert_eq!(wiring.neighbor(corner, Direction::XNeg), Some(corner));
    }
}
