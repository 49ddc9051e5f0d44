#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use no_diffusion::{
        config::RunConfig,
        error::{LatticeError, NoDiffusionError},
        lattice::{GridGeometry, LatticeWiring},
        spatial::{Interpolation, SpatialIndexMapper},
    };

    #[test]
    pub fn test_reference_lattice_geometry() -> Result<(), NoDiffusionError> {
        let wiring = LatticeWiring::build(RunConfig::default().geometry()?);
        let geometry = wiring.geometry();

        let (xs, ys, zs) = geometry.axis_coordinates();
        assert_eq!(xs.len(), 11);
        assert_eq!(ys.first(), Some(&0.));
        assert_eq!(zs.last(), Some(&110.));

        let center = wiring.center_voxel()?;
        assert_eq!(wiring.voxel_at_position((55., 55., 55.))?, center);
        assert_eq!(geometry.grid_index(center), Some((5, 5, 5)));

        assert!(matches!(
            wiring.voxel_at_position((50., 55., 55.)),
            Err(LatticeError::CoordinateNotInLattice { .. }),
        ));
        assert!(wiring.voxel_at((11, 0, 0)).is_err());

        Ok(())
    }

    #[test]
    pub fn test_mapping_is_stable_across_modes() -> Result<(), NoDiffusionError> {
        let geometry = GridGeometry::from_bounding_box((110., 110., 110.), 11., (0., 0., 0.))?;
        let nearest = SpatialIndexMapper::new(geometry, Interpolation::Nearest);
        let trilinear = SpatialIndexMapper::new(geometry, Interpolation::Trilinear);

        // values linear in x so trilinear sampling is exact inside the lattice
        let values = (0..geometry.len())
            .map(|voxel| geometry.grid_index(voxel).map_or(0., |(ix, _, _)| ix as f64 * 11.))
            .collect::<Vec<f64>>();

        for position in [(12.3, 40., 99.), (0., 0., 0.), (104.5, 7.7, 55.)] {
            let binding = trilinear.bind(position)?;
            let sampled = binding.sample(&values).unwrap_or(f64::NAN);

            assert_relative_eq!(sampled, position.0, epsilon = 1e-9);
            assert_eq!(trilinear.bind(position)?, binding);

            let voxel = nearest.voxel_of(position)?;
            assert!(binding.corners().iter().any(|(corner, weight)| *corner == voxel && *weight > 0.));
        }

        // out of volume positions clamp to the edge in both modes
        let outside = (-40., 200., 55.);
        assert_eq!(nearest.index_of(outside)?, (0, 10, 5));
        assert_eq!(trilinear.bind(outside)?.primary_voxel(), nearest.voxel_of(outside)?);

        Ok(())
    }

    #[test]
    pub fn test_half_way_rounds_to_even() -> Result<(), NoDiffusionError> {
        let geometry = GridGeometry::new((4, 4, 4), 2., (0., 0., 0.))?;
        let mapper = SpatialIndexMapper::new(geometry, Interpolation::Nearest);

        assert_eq!(mapper.index_of((1., 3., 5.))?, (0, 2, 2));
        assert_eq!(mapper.index_of((1.001, 3.001, 5.001))?, (1, 2, 3));
        assert_eq!(mapper.index_of((0.999, 2.999, 4.999))?, (0, 1, 2));

        let reference = SpatialIndexMapper::new(RunConfig::default().geometry()?, Interpolation::Nearest);
        assert_eq!(reference.index_of((5.5, 27.5, 0.))?, (0, 2, 0));
        assert_eq!(reference.index_of((104.5, 49.5, 115.5))?, (10, 4, 10));

        let trilinear = SpatialIndexMapper::new(geometry, Interpolation::Trilinear);
        assert_eq!(trilinear.bind((1., 3., 5.))?.primary_voxel(), mapper.voxel_of((1., 3., 5.))?);

        Ok(())
    }
}
