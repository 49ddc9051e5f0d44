#![feature(test)]
extern crate test;


mod tests {
    use test::Bencher;
    extern crate no_diffusion;
    use no_diffusion::{
        field::{ProductionSchedule, VoxelField},
        lattice::{GridGeometry, LatticeWiring},
        sync::FieldSnapshot,
    };

    fn cube(side: f64) -> VoxelField {
        let wiring = LatticeWiring::build(
            GridGeometry::from_bounding_box((side, side, side), 11., (0., 0., 0.)).unwrap()
        );
        let mut field = wiring.build_field(0.05).unwrap();
        wiring.assign_uniform_physics(&mut field, 3.3, 1000.).unwrap();

        let center = wiring.center_voxel().unwrap();
        field.set_initial_concentration(center, 240.).unwrap();
        field.set_production(center, ProductionSchedule::Constant(1.)).unwrap();

        field
    }

    #[bench]
    fn bench_window_11x11x11(b: &mut Bencher) {
        let mut field = cube(110.);

        b.iter(|| {
            let t = field.time();
            field.advance_to(t + 1.).expect("Could not integrate field");
        })
    }

    #[bench]
    fn bench_window_31x31x31(b: &mut Bencher) {
        let mut field = cube(330.);

        b.iter(|| {
            let t = field.time();
            field.advance_to(t + 1.).expect("Could not integrate field");
        })
    }

    #[bench]
    fn bench_snapshot_encoding_11x11x11(b: &mut Bencher) {
        let field = cube(110.);

        b.iter(|| {
            let bytes = FieldSnapshot::from_field(&field).to_bytes().expect("Could not encode snapshot");
            FieldSnapshot::from_bytes(&bytes).expect("Could not decode snapshot")
        })
    }
}
