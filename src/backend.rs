//! The seam between the simulation and whatever executes its passes.

use crate::error::{FluidError, Result};
use crate::programs::{Keyword, Keywords, PassUniforms, Stage};
use crate::targets::{Binding, Filter, RenderTarget};
use wgpu::TextureFormat;

/// Where a pass renders to.
pub enum Destination<'a, T> {
    Target(&'a RenderTarget<T>),
    /// The visible surface; only valid between `begin_frame` and `end_frame`.
    Surface,
}

/// One full-screen draw of a fragment program, with its inputs and uniforms.
pub enum Pass<'a, T> {
    Copy {
        source: &'a RenderTarget<T>,
    },
    /// `value * source`
    Clear {
        source: &'a RenderTarget<T>,
        value: f32,
    },
    /// Gaussian injection of `color` at `point` on top of `target`.
    Splat {
        target: &'a RenderTarget<T>,
        point: [f32; 2],
        color: [f32; 3],
        radius: f32,
        aspect_ratio: f32,
    },
    Curl {
        velocity: &'a RenderTarget<T>,
    },
    Vorticity {
        velocity: &'a RenderTarget<T>,
        curl: &'a RenderTarget<T>,
        strength: f32,
        dt: f32,
    },
    Divergence {
        velocity: &'a RenderTarget<T>,
    },
    /// One Jacobi iteration.
    Pressure {
        pressure: &'a RenderTarget<T>,
        divergence: &'a RenderTarget<T>,
    },
    GradientSubtract {
        pressure: &'a RenderTarget<T>,
        velocity: &'a RenderTarget<T>,
    },
    /// Semi-Lagrangian transport of `source` through `velocity`.
    Advection {
        velocity: &'a RenderTarget<T>,
        source: &'a RenderTarget<T>,
        dt: f32,
        dissipation: f32,
        manual_filtering: bool,
    },
    Display {
        dye: &'a RenderTarget<T>,
        texel_size: [f32; 2],
        shading: bool,
    },
}

impl<'a, T> Pass<'a, T> {
    pub fn stage(&self) -> Stage {
        match self {
            Pass::Copy { .. } => Stage::Copy,
            Pass::Clear { .. } => Stage::Clear,
            Pass::Splat { .. } => Stage::Splat,
            Pass::Curl { .. } => Stage::Curl,
            Pass::Vorticity { .. } => Stage::Vorticity,
            Pass::Divergence { .. } => Stage::Divergence,
            Pass::Pressure { .. } => Stage::Pressure,
            Pass::GradientSubtract { .. } => Stage::GradientSubtract,
            Pass::Advection { .. } => Stage::Advection,
            Pass::Display { .. } => Stage::Display,
        }
    }

    pub fn keywords(&self) -> Keywords {
        match *self {
            Pass::Advection {
                manual_filtering, ..
            } => Keywords::NONE.set(Keyword::ManualFiltering, manual_filtering),
            Pass::Display { shading, .. } => Keywords::NONE.set(Keyword::Shading, shading),
            _ => Keywords::NONE,
        }
    }

    /// Sampled inputs in slot order.
    pub fn bindings(&self) -> Vec<Binding<'a, T>> {
        let inputs: Vec<&'a RenderTarget<T>> = match *self {
            Pass::Copy { source } | Pass::Clear { source, .. } => vec![source],
            Pass::Splat { target, .. } => vec![target],
            Pass::Curl { velocity } | Pass::Divergence { velocity } => vec![velocity],
            Pass::Vorticity { velocity, curl, .. } => vec![velocity, curl],
            Pass::Pressure {
                pressure,
                divergence,
            } => vec![pressure, divergence],
            Pass::GradientSubtract { pressure, velocity } => vec![pressure, velocity],
            Pass::Advection {
                velocity, source, ..
            } => vec![velocity, source],
            Pass::Display { dye, .. } => vec![dye],
        };
        inputs
            .into_iter()
            .zip(0..)
            .map(|(target, slot)| target.attach(slot))
            .collect()
    }

    /// Stencil spacing of the vertex stage.
    pub fn texel_size(&self) -> [f32; 2] {
        match *self {
            Pass::Copy { source } | Pass::Clear { source, .. } => source.texel_size(),
            Pass::Splat { target, .. } => target.texel_size(),
            Pass::Curl { velocity }
            | Pass::Divergence { velocity }
            | Pass::Vorticity { velocity, .. }
            | Pass::Advection { velocity, .. } => velocity.texel_size(),
            Pass::Pressure { pressure, .. } | Pass::GradientSubtract { pressure, .. } => {
                pressure.texel_size()
            }
            Pass::Display { texel_size, .. } => texel_size,
        }
    }

    pub fn uniforms(&self) -> PassUniforms {
        let texel_size = self.texel_size();
        let mut uniforms = PassUniforms {
            texel_size,
            source_texel_size: texel_size,
            ..Default::default()
        };
        match *self {
            Pass::Clear { value, .. } => uniforms.value = value,
            Pass::Splat {
                point,
                color,
                radius,
                aspect_ratio,
                ..
            } => {
                let [r, g, b] = color;
                uniforms.point = point;
                uniforms.color = [r, g, b, 1.0];
                uniforms.radius = radius;
                uniforms.aspect_ratio = aspect_ratio;
            }
            Pass::Vorticity { strength, dt, .. } => {
                uniforms.curl = strength;
                uniforms.dt = dt;
            }
            Pass::Advection {
                source,
                dt,
                dissipation,
                ..
            } => {
                uniforms.source_texel_size = source.texel_size();
                uniforms.dt = dt;
                uniforms.dissipation = dissipation;
            }
            _ => {}
        }
        uniforms
    }

    /// Whether `target` is one of this pass's inputs.
    pub fn reads(&self, target: &RenderTarget<T>) -> bool {
        self.bindings()
            .iter()
            .any(|binding| std::ptr::eq(binding.target, target))
    }
}

/// Rejects a pass that would sample the texture it renders into.
pub fn check_feedback<T>(pass: &Pass<'_, T>, destination: &Destination<'_, T>) -> Result<()> {
    match destination {
        Destination::Target(target) if pass.reads(target) => Err(FluidError::FeedbackLoop {
            stage: pass.stage(),
        }),
        _ => Ok(()),
    }
}

/// Executes passes against textures it owns.
pub trait Backend {
    type Texture;

    /// Drawable surface size in physical pixels.
    fn surface_size(&self) -> (u32, u32);

    fn resize_surface(&mut self, width: u32, height: u32);

    /// Largest width or height `create_texture` accepts.
    fn max_texture_dimension(&self) -> u32;

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        filter: Filter,
    ) -> Result<Self::Texture>;

    /// Compiles the variant of `stage` for `keywords` unless already cached,
    /// and makes it the stage's active variant.
    fn prepare(&mut self, stage: Stage, keywords: Keywords) -> Result<()>;

    fn active_keywords(&self, stage: Stage) -> Option<Keywords>;

    fn blit(
        &mut self,
        pass: &Pass<'_, Self::Texture>,
        destination: Destination<'_, Self::Texture>,
    ) -> Result<()>;

    /// Acquires the next surface frame and clears it. `Ok(false)` means the
    /// frame should be skipped.
    fn begin_frame(&mut self, clear_color: [f32; 4]) -> Result<bool>;

    /// Submits outstanding work and presents the frame.
    fn end_frame(&mut self);

    /// Submits outstanding work.
    fn flush(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::RenderTarget;

    fn target(width: u32, height: u32) -> RenderTarget<()> {
        RenderTarget {
            texture: (),
            width,
            height,
            texel_size_x: 1.0 / width as f32,
            texel_size_y: 1.0 / height as f32,
            format: TextureFormat::Rgba16Float,
            filter: Filter::Linear,
        }
    }

    #[test]
    fn advection_binds_velocity_then_source() {
        let velocity = target(16, 8);
        let dye = target(64, 32);
        let pass = Pass::Advection {
            velocity: &velocity,
            source: &dye,
            dt: 0.016,
            dissipation: 1.0,
            manual_filtering: true,
        };
        let bindings = pass.bindings();
        assert_eq!(bindings.len() as u32, pass.stage().input_count());
        assert_eq!(bindings[0].slot, 0);
        assert!(std::ptr::eq(bindings[0].target, &velocity));
        assert!(std::ptr::eq(bindings[1].target, &dye));

        let uniforms = pass.uniforms();
        assert_eq!(uniforms.texel_size, [1.0 / 16.0, 1.0 / 8.0]);
        assert_eq!(uniforms.source_texel_size, [1.0 / 64.0, 1.0 / 32.0]);
        assert!(pass.keywords().manual_filtering);
    }

    #[test]
    fn every_pass_binds_as_many_inputs_as_its_stage_declares() {
        let a = target(4, 4);
        let b = target(4, 4);
        let passes = [
            Pass::Copy { source: &a },
            Pass::Clear {
                source: &a,
                value: 0.5,
            },
            Pass::Splat {
                target: &a,
                point: [0.5, 0.5],
                color: [1.0, 0.0, 0.0],
                radius: 0.01,
                aspect_ratio: 1.0,
            },
            Pass::Curl { velocity: &a },
            Pass::Vorticity {
                velocity: &a,
                curl: &b,
                strength: 3.0,
                dt: 0.016,
            },
            Pass::Divergence { velocity: &a },
            Pass::Pressure {
                pressure: &a,
                divergence: &b,
            },
            Pass::GradientSubtract {
                pressure: &a,
                velocity: &b,
            },
            Pass::Advection {
                velocity: &a,
                source: &b,
                dt: 0.016,
                dissipation: 0.2,
                manual_filtering: false,
            },
            Pass::Display {
                dye: &a,
                texel_size: [0.01, 0.01],
                shading: true,
            },
        ];
        for pass in &passes {
            assert_eq!(pass.bindings().len() as u32, pass.stage().input_count());
        }
    }

    #[test]
    fn rendering_into_an_input_is_a_feedback_loop() {
        let velocity = target(8, 8);
        let curl = target(8, 8);
        let pass = Pass::Curl {
            velocity: &velocity,
        };
        assert!(check_feedback(&pass, &Destination::Target(&curl)).is_ok());
        assert!(matches!(
            check_feedback(&pass, &Destination::Target(&velocity)),
            Err(FluidError::FeedbackLoop {
                stage: Stage::Curl
            })
        ));
    }
}
