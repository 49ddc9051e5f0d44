//! Translation of continuous cell and synapse positions into voxels of the lattice.
//!
//! Positions outside the lattice are clamped to the nearest edge voxel instead of
//! being rejected. A mapper is built once from the same [`GridGeometry`] the field
//! was wired from and used for every binding in a run, so the same position always
//! resolves to the same voxels.

use serde::{Deserialize, Serialize};
use crate::error::SpatialError;
use crate::field::VoxelId;
use crate::lattice::{GridGeometry, GridIndex, Position};


/// How a position is sampled from the lattice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Interpolation {
    /// Value of the nearest node
    #[default]
    Nearest,
    /// Weighted value of the eight surrounding nodes
    Trilinear,
}

/// Voxels a position reads from and the weight of each, weights sum to `1`
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelBinding {
    corners: Vec<(VoxelId, f64)>,
    nearest: VoxelId,
}

impl VoxelBinding {
    /// Binding that reads a single voxel
    pub fn single(voxel: VoxelId) -> Self {
        VoxelBinding { corners: vec![(voxel, 1.)], nearest: voxel }
    }

    /// Voxels and weights of the binding
    pub fn corners(&self) -> &[(VoxelId, f64)] {
        &self.corners
    }

    /// Nearest node of the bound position, equal corner weights resolve the same way
    /// as [`SpatialIndexMapper::voxel_of`]
    pub fn primary_voxel(&self) -> VoxelId {
        self.nearest
    }

    /// Largest voxel id read by the binding
    pub fn max_voxel(&self) -> VoxelId {
        self.corners.iter().map(|(voxel, _)| *voxel).max().unwrap_or(0)
    }

    /// Samples a field given in canonical order, `None` if a corner lies outside it
    pub fn sample(&self, values: &[f64]) -> Option<f64> {
        self.corners.iter()
            .map(|(voxel, weight)| values.get(*voxel).map(|value| value * weight))
            .sum()
    }
}

/// Converts continuous coordinates into lattice voxels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialIndexMapper {
    geometry: GridGeometry,
    mode: Interpolation,
}

fn check_finite(position: Position) -> Result<(), SpatialError> {
    if position.0.is_finite() && position.1.is_finite() && position.2.is_finite() {
        Ok(())
    } else {
        Err(SpatialError::NonFiniteCoordinate { x: position.0, y: position.1, z: position.2 })
    }
}

impl SpatialIndexMapper {
    /// Creates a mapper over the geometry using the given sampling mode
    pub fn new(geometry: GridGeometry, mode: Interpolation) -> Self {
        SpatialIndexMapper { geometry, mode }
    }

    /// Geometry the mapper translates into
    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    /// Sampling mode used by [`SpatialIndexMapper::bind`]
    pub fn mode(&self) -> Interpolation {
        self.mode
    }

    // continuous grid coordinate along one axis, clamped into [0, n - 1]
    fn scaled(&self, value: f64, start: f64, n: usize) -> f64 {
        ((value - start) / self.geometry.spacing).clamp(0., (n - 1) as f64)
    }

    /// Nearest grid index of a position, rounding halves to the even index and clamping
    /// out of volume positions to the edge
    pub fn index_of(&self, position: Position) -> Result<GridIndex, SpatialError> {
        check_finite(position)?;

        let (nx, ny, nz) = self.geometry.dims;
        let (ox, oy, oz) = self.geometry.origin;

        Ok((
            self.scaled(position.0, ox, nx).round_ties_even() as usize,
            self.scaled(position.1, oy, ny).round_ties_even() as usize,
            self.scaled(position.2, oz, nz).round_ties_even() as usize,
        ))
    }

    /// Flat id of the nearest voxel
    pub fn voxel_of(&self, position: Position) -> Result<VoxelId, SpatialError> {
        let (ix, iy, iz) = self.index_of(position)?;
        let (nx, ny, _) = self.geometry.dims;

        Ok(ix + iy * nx + iz * nx * ny)
    }

    /// Eight surrounding nodes of a position with trilinear weights, corners are
    /// ordered with `x` varying fastest, weights sum to `1`, on the upper faces of
    /// the lattice the upper corners repeat the lower ones with zero weight
    pub fn trilinear(&self, position: Position) -> Result<[(GridIndex, f64); 8], SpatialError> {
        check_finite(position)?;

        let (nx, ny, nz) = self.geometry.dims;
        let (ox, oy, oz) = self.geometry.origin;

        let axis = |value: f64, start: f64, n: usize| -> (usize, usize, f64) {
            let scaled = self.scaled(value, start, n);
            let lower = scaled.floor() as usize;
            let upper = (lower + 1).min(n - 1);
            let fraction = if upper == lower { 0. } else { scaled - lower as f64 };

            (lower, upper, fraction)
        };

        let (x0, x1, fx) = axis(position.0, ox, nx);
        let (y0, y1, fy) = axis(position.1, oy, ny);
        let (z0, z1, fz) = axis(position.2, oz, nz);

        let mut corners = [((0, 0, 0), 0.); 8];
        for (k, corner) in corners.iter_mut().enumerate() {
            let (ix, wx) = if k & 1 == 0 { (x0, 1. - fx) } else { (x1, fx) };
            let (iy, wy) = if k & 2 == 0 { (y0, 1. - fy) } else { (y1, fy) };
            let (iz, wz) = if k & 4 == 0 { (z0, 1. - fz) } else { (z1, fz) };

            *corner = ((ix, iy, iz), wx * wy * wz);
        }

        Ok(corners)
    }

    /// Binding of a position according to the mapper's sampling mode
    pub fn bind(&self, position: Position) -> Result<VoxelBinding, SpatialError> {
        match self.mode {
            Interpolation::Nearest => Ok(VoxelBinding::single(self.voxel_of(position)?)),
            Interpolation::Trilinear => {
                let (nx, ny, _) = self.geometry.dims;
                let corners = self.trilinear(position)?
                    .iter()
                    .map(|((ix, iy, iz), weight)| (ix + iy * nx + iz * nx * ny, *weight))
                    .collect();

                Ok(VoxelBinding { corners, nearest: self.voxel_of(position)? })
            }
        }
    }
}
