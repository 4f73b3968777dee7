//! One simulation step as a fixed sequence of passes, plus splat injection.
//!
//! Every pass that writes a double-buffered field renders into `write` and
//! swaps straight away, so the next pass samples the fresh result.

use crate::backend::{Backend, Destination, Pass};
use crate::capabilities::Capabilities;
use crate::config::SimulationConfig;
use crate::error::Result;
use crate::input::Splat;
use crate::targets::{DoubleTarget, Fields, RenderTarget};

/// Per-step constants, snapshotted from the configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepParams {
    pub dt: f32,
    pub curl: f32,
    pub pressure: f32,
    pub pressure_iterations: u32,
    pub velocity_dissipation: f32,
    pub density_dissipation: f32,
    pub manual_filtering: bool,
}

impl StepParams {
    pub fn new(config: &SimulationConfig, capabilities: &Capabilities, dt: f32) -> Self {
        Self {
            dt,
            curl: config.curl,
            pressure: config.pressure,
            pressure_iterations: config.pressure_iterations,
            velocity_dissipation: config.velocity_dissipation,
            density_dissipation: config.density_dissipation,
            manual_filtering: !capabilities.linear_filtering,
        }
    }
}

pub fn compute_curl<B: Backend>(
    backend: &mut B,
    velocity: &DoubleTarget<B::Texture>,
    curl: &RenderTarget<B::Texture>,
) -> Result<()> {
    backend.blit(
        &Pass::Curl {
            velocity: &velocity.read,
        },
        Destination::Target(curl),
    )
}

pub fn confine_vorticity<B: Backend>(
    backend: &mut B,
    velocity: &mut DoubleTarget<B::Texture>,
    curl: &RenderTarget<B::Texture>,
    strength: f32,
    dt: f32,
) -> Result<()> {
    backend.blit(
        &Pass::Vorticity {
            velocity: &velocity.read,
            curl,
            strength,
            dt,
        },
        Destination::Target(&velocity.write),
    )?;
    velocity.swap();
    Ok(())
}

pub fn compute_divergence<B: Backend>(
    backend: &mut B,
    velocity: &DoubleTarget<B::Texture>,
    divergence: &RenderTarget<B::Texture>,
) -> Result<()> {
    backend.blit(
        &Pass::Divergence {
            velocity: &velocity.read,
        },
        Destination::Target(divergence),
    )
}

/// Decays last step's pressure by `decay` as a warm start, then runs exactly
/// `iterations` Jacobi iterations.
pub fn solve_pressure<B: Backend>(
    backend: &mut B,
    pressure: &mut DoubleTarget<B::Texture>,
    divergence: &RenderTarget<B::Texture>,
    decay: f32,
    iterations: u32,
) -> Result<()> {
    debug_assert!(
        (0.0..=1.0).contains(&decay),
        "pressure warm-start decay {decay} outside [0, 1]"
    );

    backend.blit(
        &Pass::Clear {
            source: &pressure.read,
            value: decay,
        },
        Destination::Target(&pressure.write),
    )?;
    pressure.swap();

    for _ in 0..iterations {
        backend.blit(
            &Pass::Pressure {
                pressure: &pressure.read,
                divergence,
            },
            Destination::Target(&pressure.write),
        )?;
        pressure.swap();
    }
    Ok(())
}

pub fn subtract_gradient<B: Backend>(
    backend: &mut B,
    pressure: &DoubleTarget<B::Texture>,
    velocity: &mut DoubleTarget<B::Texture>,
) -> Result<()> {
    backend.blit(
        &Pass::GradientSubtract {
            pressure: &pressure.read,
            velocity: &velocity.read,
        },
        Destination::Target(&velocity.write),
    )?;
    velocity.swap();
    Ok(())
}

pub fn advect_velocity<B: Backend>(
    backend: &mut B,
    velocity: &mut DoubleTarget<B::Texture>,
    dt: f32,
    dissipation: f32,
    manual_filtering: bool,
) -> Result<()> {
    backend.blit(
        &Pass::Advection {
            velocity: &velocity.read,
            source: &velocity.read,
            dt,
            dissipation,
            manual_filtering,
        },
        Destination::Target(&velocity.write),
    )?;
    velocity.swap();
    Ok(())
}

pub fn advect_dye<B: Backend>(
    backend: &mut B,
    velocity: &DoubleTarget<B::Texture>,
    dye: &mut DoubleTarget<B::Texture>,
    dt: f32,
    dissipation: f32,
    manual_filtering: bool,
) -> Result<()> {
    backend.blit(
        &Pass::Advection {
            velocity: &velocity.read,
            source: &dye.read,
            dt,
            dissipation,
            manual_filtering,
        },
        Destination::Target(&dye.write),
    )?;
    dye.swap();
    Ok(())
}

/// curl → vorticity → divergence → pressure → gradient subtraction →
/// velocity advection → dye advection.
pub fn step<B: Backend>(
    backend: &mut B,
    fields: &mut Fields<B::Texture>,
    params: &StepParams,
) -> Result<()> {
    let Fields {
        velocity,
        dye,
        pressure,
        divergence,
        curl,
    } = fields;

    compute_curl(backend, velocity, curl)?;
    confine_vorticity(backend, velocity, curl, params.curl, params.dt)?;
    compute_divergence(backend, velocity, divergence)?;
    solve_pressure(
        backend,
        pressure,
        divergence,
        params.pressure,
        params.pressure_iterations,
    )?;
    subtract_gradient(backend, pressure, velocity)?;
    advect_velocity(
        backend,
        velocity,
        params.dt,
        params.velocity_dissipation,
        params.manual_filtering,
    )?;
    advect_dye(
        backend,
        velocity,
        dye,
        params.dt,
        params.density_dissipation,
        params.manual_filtering,
    )
}

/// Splat radius in texture space for a configured radius and surface aspect
/// ratio.
pub fn correct_radius(radius: f32, aspect_ratio: f32) -> f32 {
    if aspect_ratio > 1.0 {
        radius * aspect_ratio
    } else {
        radius
    }
}

/// Adds the splat's force to velocity and its colour to dye.
pub fn splat<B: Backend>(
    backend: &mut B,
    fields: &mut Fields<B::Texture>,
    splat: &Splat,
    splat_radius: f32,
    aspect_ratio: f32,
) -> Result<()> {
    let radius = correct_radius(splat_radius / 100.0, aspect_ratio);
    let point = splat.point.to_array();

    backend.blit(
        &Pass::Splat {
            target: &fields.velocity.read,
            point,
            color: [splat.force.x, splat.force.y, 0.0],
            radius,
            aspect_ratio,
        },
        Destination::Target(&fields.velocity.write),
    )?;
    fields.velocity.swap();

    backend.blit(
        &Pass::Splat {
            target: &fields.dye.read,
            point,
            color: splat.color.to_array(),
            radius,
            aspect_ratio,
        },
        Destination::Target(&fields.dye.write),
    )?;
    fields.dye.swap();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radius_widens_only_on_landscape_surfaces() {
        assert_eq!(correct_radius(0.002, 2.0), 0.004);
        assert_eq!(correct_radius(0.002, 1.0), 0.002);
        assert_eq!(correct_radius(0.002, 0.5), 0.002);
    }

    #[test]
    fn params_select_manual_filtering_without_linear_filtering() {
        let config = SimulationConfig::default();
        let capabilities = Capabilities {
            rgba: wgpu::TextureFormat::Rgba16Float,
            rg: wgpu::TextureFormat::Rgba16Float,
            r: wgpu::TextureFormat::Rgba16Float,
            float_type: crate::capabilities::FloatType::Half,
            linear_filtering: false,
        };
        let params = StepParams::new(&config, &capabilities, 0.01);
        assert!(params.manual_filtering);
        assert_eq!(params.pressure_iterations, config.pressure_iterations);
        assert_eq!(params.dt, 0.01);
    }
}
