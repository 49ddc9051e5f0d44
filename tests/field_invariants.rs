#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use no_diffusion::{
        error::NoDiffusionError,
        field::{DiffusionCoefficients, ProductionSchedule, VoxelField},
        history::TotalAmountHistory,
        lattice::{Direction, GridGeometry, LatticeWiring},
    };

    #[test]
    pub fn test_pure_diffusion_conserves_total() -> Result<(), NoDiffusionError> {
        let wiring = LatticeWiring::build(GridGeometry::new((6, 5, 4), 11., (0., 0., 0.))?);
        let mut field = wiring.build_field(0.05)?;
        wiring.assign_uniform_physics(&mut field, 3.3, f64::INFINITY)?;

        field.set_initial_concentration(wiring.voxel_at((1, 1, 1))?, 240.)?;
        field.set_initial_concentration(wiring.voxel_at((5, 4, 3))?, 60.)?;

        let mut history = TotalAmountHistory::default();
        field.integrate_with_history(0., 500., &mut history)?;

        assert_eq!(history.history.len(), 10000);
        assert!(history.max_drift() < 1e-9 * 300.);
        assert_relative_eq!(field.total_amount(), 300., max_relative = 1e-12);

        Ok(())
    }

    #[test]
    pub fn test_decay_only_follows_exponential_law() -> Result<(), NoDiffusionError> {
        let mut field = VoxelField::new((1, 1, 1), 0.01)?;
        field.set_coefficients(0, DiffusionCoefficients::default(), 0.01)?;
        field.set_initial_concentration(0, 100.)?;

        field.integrate(0., 100.)?;

        let concentration = field.concentration(0).unwrap_or(f64::NAN);
        assert_relative_eq!(concentration, 100. * (1. - 0.01 * 0.01_f64).powi(10000), max_relative = 1e-8);
        assert_relative_eq!(concentration, 100. * (-1_f64).exp(), max_relative = 1e-3);

        Ok(())
    }

    #[test]
    pub fn test_constant_production_reaches_steady_state() -> Result<(), NoDiffusionError> {
        let mut field = VoxelField::new((1, 1, 1), 0.1)?;
        field.set_coefficients(0, DiffusionCoefficients::uniform(0.2), 0.1)?;
        field.set_production(0, ProductionSchedule::Constant(1.))?;

        field.integrate(0., 400.)?;

        assert_relative_eq!(field.concentration(0).unwrap_or(f64::NAN), 10., max_relative = 1e-6);

        Ok(())
    }

    #[test]
    pub fn test_single_voxel_boundary_reflects() -> Result<(), NoDiffusionError> {
        let wiring = LatticeWiring::build(GridGeometry::new((1, 1, 1), 1., (0., 0., 0.))?);
        let mut field = wiring.build_field(0.01)?;
        field.set_coefficients(0, DiffusionCoefficients::uniform(5.), 0.)?;
        field.set_initial_concentration(0, 3.)?;

        for direction in Direction::ALL {
            assert_eq!(field.neighbor(0, direction), Some(0));
        }

        field.integrate(0., 10.)?;

        assert_eq!(field.concentration(0), Some(3.));

        Ok(())
    }

    #[test]
    pub fn test_uniform_column_stays_uniform() -> Result<(), NoDiffusionError> {
        let wiring = LatticeWiring::build(GridGeometry::new((1, 1, 5), 2., (0., 0., 0.))?);
        let mut field = wiring.build_field(0.05)?;
        wiring.assign_uniform_physics(&mut field, 3.3, f64::INFINITY)?;

        for voxel in 0..field.len() {
            field.set_initial_concentration(voxel, 2.)?;
        }

        field.integrate(0., 50.)?;

        assert!(field.concentrations().iter().all(|i| *i == 2.));
        assert_eq!(field.neighbor(0, Direction::ZNeg), Some(0));
        assert_eq!(field.neighbor(4, Direction::ZPos), Some(4));

        Ok(())
    }

    #[test]
    pub fn test_reset_restores_initial_state() -> Result<(), NoDiffusionError> {
        let wiring = LatticeWiring::build(GridGeometry::new((3, 3, 3), 11., (0., 0., 0.))?);
        let mut field = wiring.build_field(0.05)?;
        wiring.assign_uniform_physics(&mut field, 3.3, 1000.)?;
        field.set_initial_concentration(wiring.center_voxel()?, 240.)?;

        let initial = field.concentrations().to_vec();
        field.integrate(0., 20.)?;
        let after = field.concentrations().to_vec();

        field.reset();
        assert_eq!(field.concentrations(), initial.as_slice());
        assert_eq!(field.time(), 0.);

        field.integrate(0., 20.)?;
        assert_eq!(field.concentrations(), after.as_slice());

        Ok(())
    }

    #[test]
    pub fn test_unstable_step_is_not_clamped() -> Result<(), NoDiffusionError> {
        let wiring = LatticeWiring::build(GridGeometry::new((3, 1, 1), 1., (0., 0., 0.))?);
        let mut field = wiring.build_field(1.)?;
        wiring.assign_uniform_physics(&mut field, 1., f64::INFINITY)?;
        field.set_initial_concentration(1, 1.)?;

        assert!(!field.is_stable());

        field.integrate(0., 1.)?;

        // one step with D * dt = 1 drains the middle voxel twice over
        assert_eq!(field.concentrations(), &[1., -1., 1.]);

        Ok(())
    }
}
