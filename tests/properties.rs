use fluid_cursor::backend::Backend;
use fluid_cursor::capabilities::Capabilities;
use fluid_cursor::config::SimulationConfig;
use fluid_cursor::cpu::CpuBackend;
use fluid_cursor::input::{correct_delta_x, correct_delta_y};
use fluid_cursor::targets::{get_resolution, Fields};
use proptest::prelude::*;

proptest! {
    #[test]
    fn resolution_follows_orientation(
        resolution in 8u32..512,
        width in 1u32..4000,
        height in 1u32..4000,
    ) {
        let grid = get_resolution(resolution, width, height);
        prop_assert_eq!(grid.width.min(grid.height), resolution);
        if width > height {
            prop_assert!(grid.width >= grid.height);
        } else {
            prop_assert_eq!(grid.width, resolution);
        }
    }

    #[test]
    fn delta_correction_never_shrinks_both_axes(
        aspect_ratio in 0.05f32..20.0,
        delta in -1.0f32..1.0,
    ) {
        let x = correct_delta_x(delta, aspect_ratio);
        let y = correct_delta_y(delta, aspect_ratio);
        prop_assert!(x.abs() >= delta.abs() || y.abs() >= delta.abs());
        prop_assert_eq!(correct_delta_x(delta, 1.0), delta);
        prop_assert_eq!(correct_delta_y(delta, 1.0), delta);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn repeated_resize_allocates_nothing(width in 1u32..200, height in 1u32..200) {
        let config = SimulationConfig {
            sim_resolution: 8,
            dye_resolution: 12,
            ..Default::default()
        };
        let mut backend = CpuBackend::new(64, 64);
        let capabilities = Capabilities::negotiate(&backend).unwrap();
        let mut fields = Fields::new(&mut backend, &capabilities, &config).unwrap();

        backend.resize_surface(width, height);
        fields.resize(&mut backend, &config).unwrap();
        let allocations = backend.allocations();
        let sim = fields.sim_resolution();
        let dye = fields.dye_resolution();

        fields.resize(&mut backend, &config).unwrap();
        prop_assert_eq!(backend.allocations(), allocations);
        prop_assert_eq!(fields.sim_resolution(), sim);
        prop_assert_eq!(fields.dye_resolution(), dye);
        prop_assert_eq!(sim, get_resolution(8, width, height));
    }
}
