use fluid_cursor::cpu::{CpuBackend, CpuTexture};
use fluid_cursor::stepper;
use fluid_cursor::targets::{
    create_double_target, create_target, DoubleTarget, Filter, RenderTarget, Resolution,
};
use glam::{Vec2, Vec4};
use wgpu::TextureFormat;

const SIZE: u32 = 8;

fn grid() -> Resolution {
    Resolution {
        width: SIZE,
        height: SIZE,
    }
}

fn velocity_field(
    backend: &mut CpuBackend,
    velocity_at: impl Fn(u32, u32) -> Vec2,
) -> DoubleTarget<CpuTexture> {
    let velocity =
        create_double_target(backend, grid(), TextureFormat::Rg16Float, Filter::Nearest).unwrap();
    for y in 0..SIZE {
        for x in 0..SIZE {
            let v = velocity_at(x, y);
            velocity
                .read
                .texture
                .set_texel(x, y, Vec4::new(v.x, v.y, 0.0, 0.0));
        }
    }
    velocity
}

fn scalar_field(backend: &mut CpuBackend) -> RenderTarget<CpuTexture> {
    create_target(backend, grid(), TextureFormat::R16Float, Filter::Nearest).unwrap()
}

/// Solid-body rotation about the grid centre with angular speed `omega`.
fn rotation(omega: f32) -> impl Fn(u32, u32) -> Vec2 {
    let centre = (SIZE as f32 - 1.0) * 0.5;
    move |x, y| omega * Vec2::new(-(y as f32 - centre), x as f32 - centre)
}

#[test]
fn rigid_rotation_has_uniform_curl() {
    for omega in [1.5f32, -0.75] {
        let mut backend = CpuBackend::new(SIZE, SIZE);
        let velocity = velocity_field(&mut backend, rotation(omega));
        let curl = scalar_field(&mut backend);
        stepper::compute_curl(&mut backend, &velocity, &curl).unwrap();

        for y in 1..SIZE - 1 {
            for x in 1..SIZE - 1 {
                let value = curl.texture.texel(x, y).x;
                assert!(
                    (value - 2.0 * omega).abs() < 1e-4,
                    "curl at ({x}, {y}) = {value}, omega {omega}"
                );
            }
        }
    }
}

#[test]
fn divergence_mirrors_flow_at_the_walls() {
    let mut backend = CpuBackend::new(SIZE, SIZE);
    let velocity = velocity_field(&mut backend, |_, _| Vec2::new(1.0, 0.0));
    let divergence = scalar_field(&mut backend);
    stepper::compute_divergence(&mut backend, &velocity, &divergence).unwrap();

    for y in 0..SIZE {
        // flow leaves the left wall and runs into the right one
        assert!((divergence.texture.texel(0, y).x - 1.0).abs() < 1e-6);
        assert!((divergence.texture.texel(SIZE - 1, y).x + 1.0).abs() < 1e-6);
        for x in 1..SIZE - 1 {
            assert_eq!(divergence.texture.texel(x, y).x, 0.0, "interior ({x}, {y})");
        }
    }
}

#[test]
fn divergence_mirrors_the_vertical_walls_too() {
    let mut backend = CpuBackend::new(SIZE, SIZE);
    let velocity = velocity_field(&mut backend, |_, _| Vec2::new(0.0, 2.0));
    let divergence = scalar_field(&mut backend);
    stepper::compute_divergence(&mut backend, &velocity, &divergence).unwrap();

    for x in 0..SIZE {
        assert!((divergence.texture.texel(x, 0).x - 2.0).abs() < 1e-6);
        assert!((divergence.texture.texel(x, SIZE - 1).x + 2.0).abs() < 1e-6);
        assert_eq!(divergence.texture.texel(x, SIZE / 2).x, 0.0);
    }
}

#[test]
fn vorticity_confinement_saturates_at_the_velocity_limit() {
    for (strength, expected) in [(1.0e6f32, -1000.0f32), (-1.0e6, 1000.0)] {
        let mut backend = CpuBackend::new(SIZE, SIZE);
        let mut velocity = velocity_field(&mut backend, |_, _| Vec2::ZERO);
        let curl = scalar_field(&mut backend);
        // curl grows to the right, so the confinement force is vertical
        for y in 0..SIZE {
            for x in 0..SIZE {
                curl.texture.set_texel(x, y, Vec4::new(x as f32 + 1.0, 0.0, 0.0, 0.0));
            }
        }

        stepper::confine_vorticity(&mut backend, &mut velocity, &curl, strength, 1.0 / 60.0)
            .unwrap();

        assert_eq!(velocity.swap_count(), 1);
        for y in 0..SIZE {
            for x in 1..SIZE - 1 {
                let v = velocity.read.texture.texel(x, y);
                assert_eq!(v.x, 0.0);
                assert_eq!(v.y, expected, "({x}, {y}) with strength {strength}");
            }
        }
    }
}

#[test]
fn weak_confinement_stays_below_the_limit() {
    let mut backend = CpuBackend::new(SIZE, SIZE);
    let mut velocity = velocity_field(&mut backend, |_, _| Vec2::ZERO);
    let curl = scalar_field(&mut backend);
    for y in 0..SIZE {
        for x in 0..SIZE {
            curl.texture.set_texel(x, y, Vec4::new(x as f32 + 1.0, 0.0, 0.0, 0.0));
        }
    }
    stepper::confine_vorticity(&mut backend, &mut velocity, &curl, 3.0, 0.1).unwrap();

    // force = -curl_strength * c * dt along y, with c = x + 1
    let v = velocity.read.texture.texel(3, 4);
    assert!((v.y + 3.0 * 4.0 * 0.1).abs() < 1e-3, "{v}");
}
