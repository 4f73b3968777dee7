//! Off-screen render targets, ping-pong pairs and the five simulation fields.

use crate::backend::{Backend, Destination, Pass};
use crate::capabilities::{Capabilities, FormatCategory};
use crate::config::SimulationConfig;
use crate::error::Result;
use wgpu::TextureFormat;

/// Sampler filter a target is read with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Grid size for `resolution` cells along the short axis of a surface; the
/// long axis is scaled by the aspect ratio and follows the surface orientation.
pub fn get_resolution(resolution: u32, surface_width: u32, surface_height: u32) -> Resolution {
    let width = surface_width.max(1) as f32;
    let height = surface_height.max(1) as f32;
    let mut aspect_ratio = width / height;
    if aspect_ratio < 1.0 {
        aspect_ratio = 1.0 / aspect_ratio;
    }

    let min = resolution;
    let max = (resolution as f32 * aspect_ratio).round() as u32;

    if width > height {
        Resolution {
            width: max,
            height: min,
        }
    } else {
        Resolution {
            width: min,
            height: max,
        }
    }
}

/// Scales `resolution` down, keeping its aspect ratio, until neither axis
/// exceeds `max_dimension`.
pub fn fit_resolution(resolution: Resolution, max_dimension: u32) -> Resolution {
    let max_dimension = max_dimension.max(1);
    let long = resolution.width.max(resolution.height);
    if long <= max_dimension {
        return resolution;
    }
    let scale = max_dimension as f32 / long as f32;
    let fit = |axis: u32| ((axis as f32 * scale).round() as u32).clamp(1, max_dimension);
    let fitted = Resolution {
        width: fit(resolution.width),
        height: fit(resolution.height),
    };
    log::warn!("{resolution:?} exceeds the {max_dimension} texel limit, using {fitted:?}");
    fitted
}

/// Simulation and dye grid sizes for the backend's current surface.
fn grid_resolutions<B: Backend>(
    backend: &B,
    config: &SimulationConfig,
) -> (Resolution, Resolution) {
    let (surface_width, surface_height) = backend.surface_size();
    let max_dimension = backend.max_texture_dimension();
    let grid = |resolution| {
        fit_resolution(
            get_resolution(resolution, surface_width, surface_height),
            max_dimension,
        )
    };
    (grid(config.sim_resolution), grid(config.dye_resolution))
}

/// One texture the simulation renders into and samples from.
#[derive(Debug)]
pub struct RenderTarget<T> {
    pub texture: T,
    pub width: u32,
    pub height: u32,
    pub texel_size_x: f32,
    pub texel_size_y: f32,
    pub format: TextureFormat,
    pub filter: Filter,
}

/// A target bound to an input slot of a pass.
#[derive(Debug)]
pub struct Binding<'a, T> {
    pub slot: u32,
    pub target: &'a RenderTarget<T>,
}

impl<T> RenderTarget<T> {
    pub fn attach(&self, slot: u32) -> Binding<'_, T> {
        Binding { slot, target: self }
    }

    pub fn texel_size(&self) -> [f32; 2] {
        [self.texel_size_x, self.texel_size_y]
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }
}

/// Read/write pair. Passes sample `read`, render into `write`, then `swap`.
#[derive(Debug)]
pub struct DoubleTarget<T> {
    pub read: RenderTarget<T>,
    pub write: RenderTarget<T>,
    swaps: u64,
}

impl<T> DoubleTarget<T> {
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.read, &mut self.write);
        self.swaps += 1;
    }

    /// Swaps since allocation, carried across resizes.
    pub fn swap_count(&self) -> u64 {
        self.swaps
    }

    pub fn width(&self) -> u32 {
        self.read.width
    }

    pub fn height(&self) -> u32 {
        self.read.height
    }

    pub fn resolution(&self) -> Resolution {
        self.read.resolution()
    }
}

pub fn create_target<B: Backend>(
    backend: &mut B,
    resolution: Resolution,
    format: TextureFormat,
    filter: Filter,
) -> Result<RenderTarget<B::Texture>> {
    let Resolution { width, height } = resolution;
    let texture = backend.create_texture(width, height, format, filter)?;
    Ok(RenderTarget {
        texture,
        width,
        height,
        texel_size_x: 1.0 / width as f32,
        texel_size_y: 1.0 / height as f32,
        format,
        filter,
    })
}

/// New target at `resolution` holding a resampled copy of `source`.
pub fn resize_target<B: Backend>(
    backend: &mut B,
    source: &RenderTarget<B::Texture>,
    resolution: Resolution,
) -> Result<RenderTarget<B::Texture>> {
    let target = create_target(backend, resolution, source.format, source.filter)?;
    backend.blit(&Pass::Copy { source }, Destination::Target(&target))?;
    Ok(target)
}

pub fn create_double_target<B: Backend>(
    backend: &mut B,
    resolution: Resolution,
    format: TextureFormat,
    filter: Filter,
) -> Result<DoubleTarget<B::Texture>> {
    Ok(DoubleTarget {
        read: create_target(backend, resolution, format, filter)?,
        write: create_target(backend, resolution, format, filter)?,
        swaps: 0,
    })
}

/// Resamples `read` into the new size and replaces `write` with a blank
/// target. Does nothing when the size already matches.
pub fn resize_double_target<B: Backend>(
    backend: &mut B,
    target: &mut DoubleTarget<B::Texture>,
    resolution: Resolution,
) -> Result<()> {
    if target.resolution() == resolution {
        return Ok(());
    }
    target.read = resize_target(backend, &target.read, resolution)?;
    target.write = create_target(backend, resolution, target.write.format, target.write.filter)?;
    Ok(())
}

/// All simulation state. Velocity, pressure, divergence and curl live on the
/// simulation grid; dye lives on its own, usually finer, grid.
#[derive(Debug)]
pub struct Fields<T> {
    pub velocity: DoubleTarget<T>,
    pub dye: DoubleTarget<T>,
    pub pressure: DoubleTarget<T>,
    pub divergence: RenderTarget<T>,
    pub curl: RenderTarget<T>,
}

impl<T> Fields<T> {
    pub fn new<B: Backend<Texture = T>>(
        backend: &mut B,
        capabilities: &Capabilities,
        config: &SimulationConfig,
    ) -> Result<Self> {
        let (sim, dye) = grid_resolutions(backend, config);
        let filter = field_filter(capabilities);
        log::debug!("allocating fields: simulation {sim:?}, dye {dye:?}, filter {filter:?}");

        let rgba = capabilities.format(FormatCategory::Rgba);
        let rg = capabilities.format(FormatCategory::Rg);
        let r = capabilities.format(FormatCategory::R);

        Ok(Self {
            dye: create_double_target(backend, dye, rgba, filter)?,
            velocity: create_double_target(backend, sim, rg, filter)?,
            divergence: create_target(backend, sim, r, Filter::Nearest)?,
            curl: create_target(backend, sim, r, Filter::Nearest)?,
            pressure: create_double_target(backend, sim, r, Filter::Nearest)?,
        })
    }

    /// Re-derives both grids from the current surface size. Velocity and dye
    /// keep their contents through a resampling copy; derived fields are
    /// reallocated blank, and only when their size changed.
    pub fn resize<B: Backend<Texture = T>>(
        &mut self,
        backend: &mut B,
        config: &SimulationConfig,
    ) -> Result<()> {
        let (sim, dye) = grid_resolutions(backend, config);
        if sim == self.sim_resolution() && dye == self.dye_resolution() {
            return Ok(());
        }
        log::debug!("resizing fields: simulation {sim:?}, dye {dye:?}");

        resize_double_target(backend, &mut self.dye, dye)?;
        resize_double_target(backend, &mut self.velocity, sim)?;

        if self.divergence.resolution() != sim {
            self.divergence =
                create_target(backend, sim, self.divergence.format, self.divergence.filter)?;
        }
        if self.curl.resolution() != sim {
            self.curl = create_target(backend, sim, self.curl.format, self.curl.filter)?;
        }
        if self.pressure.resolution() != sim {
            let (format, filter) = (self.pressure.read.format, self.pressure.read.filter);
            let swaps = self.pressure.swaps;
            self.pressure = create_double_target(backend, sim, format, filter)?;
            self.pressure.swaps = swaps;
        }
        Ok(())
    }

    pub fn sim_resolution(&self) -> Resolution {
        self.velocity.resolution()
    }

    pub fn dye_resolution(&self) -> Resolution {
        self.dye.resolution()
    }
}

fn field_filter(capabilities: &Capabilities) -> Filter {
    if capabilities.linear_filtering {
        Filter::Linear
    } else {
        Filter::Nearest
    }
}
