//! Reference backend running every fragment program on the CPU over `f32`
//! grids. Sampling follows the GPU rules: texel-centre coordinates,
//! clamp-to-edge addressing, nearest or bilinear filtering per target.

use crate::backend::{Backend, Destination, Pass};
use crate::capabilities::{FloatType, FormatProbe};
use crate::error::{FluidError, Result};
use crate::programs::{Keywords, PassUniforms, ProgramLibrary, Stage};
use crate::targets::{Fields, Filter, RenderTarget};
use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};
use std::cell::{Ref, RefCell};
use wgpu::TextureFormat;

pub struct CpuTexture {
    id: u64,
    width: u32,
    height: u32,
    channels: usize,
    texels: RefCell<Vec<Vec4>>,
}

impl std::fmt::Debug for CpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuTexture")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .finish()
    }
}

impl CpuTexture {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn texel(&self, x: u32, y: u32) -> Vec4 {
        self.texels.borrow()[(y * self.width + x) as usize]
    }

    /// Overwrites every texel, dropping channels the format does not store.
    pub fn fill(&self, value: Vec4) {
        let value = mask(value, self.channels);
        self.texels.borrow_mut().fill(value);
    }

    pub fn set_texel(&self, x: u32, y: u32, value: Vec4) {
        let index = (y * self.width + x) as usize;
        self.texels.borrow_mut()[index] = mask(value, self.channels);
    }

    pub fn max_length_xy(&self) -> f32 {
        self.texels
            .borrow()
            .iter()
            .map(|texel| texel.xy().length())
            .fold(0.0, f32::max)
    }

    pub fn sum_rgb(&self) -> f32 {
        self.texels
            .borrow()
            .iter()
            .map(|texel| texel.x + texel.y + texel.z)
            .sum()
    }

    pub fn mean_abs_x(&self) -> f32 {
        let texels = self.texels.borrow();
        let total: f32 = texels.iter().map(|texel| texel.x.abs()).sum();
        total / texels.len().max(1) as f32
    }
}

fn channel_count(format: TextureFormat) -> usize {
    match format {
        TextureFormat::R16Float | TextureFormat::R32Float => 1,
        TextureFormat::Rg16Float | TextureFormat::Rg32Float => 2,
        _ => 4,
    }
}

fn mask(value: Vec4, channels: usize) -> Vec4 {
    match channels {
        1 => Vec4::new(value.x, 0.0, 0.0, 0.0),
        2 => Vec4::new(value.x, value.y, 0.0, 0.0),
        _ => value,
    }
}

/// A bound input: borrowed texels plus the target's filter.
struct Sampler<'a> {
    texels: Ref<'a, Vec<Vec4>>,
    width: u32,
    height: u32,
    filter: Filter,
}

impl<'a> Sampler<'a> {
    fn bind(target: &'a RenderTarget<CpuTexture>, stage: Stage) -> Result<Self> {
        let texels = target
            .texture
            .texels
            .try_borrow()
            .map_err(|_| FluidError::FeedbackLoop { stage })?;
        Ok(Self {
            texels,
            width: target.width,
            height: target.height,
            filter: target.filter,
        })
    }

    fn fetch(&self, x: i64, y: i64) -> Vec4 {
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        self.texels[(y * self.width + x) as usize]
    }

    fn sample(&self, uv: Vec2) -> Vec4 {
        let size = Vec2::new(self.width as f32, self.height as f32);
        match self.filter {
            Filter::Nearest => {
                let st = (uv * size).floor();
                self.fetch(st.x as i64, st.y as i64)
            }
            Filter::Linear => {
                let st = uv * size - 0.5;
                let base = st.floor();
                let f = st - base;
                let (x, y) = (base.x as i64, base.y as i64);
                let top = self.fetch(x, y).lerp(self.fetch(x + 1, y), f.x);
                let bottom = self.fetch(x, y + 1).lerp(self.fetch(x + 1, y + 1), f.x);
                top.lerp(bottom, f.y)
            }
        }
    }

    /// Bilinear interpolation out of four point samples, for targets that
    /// cannot be filtered.
    fn bilerp(&self, uv: Vec2, texel_size: Vec2) -> Vec4 {
        let st = uv / texel_size - 0.5;
        let iuv = st.floor();
        let fuv = st - iuv;
        let a = self.sample((iuv + Vec2::new(0.5, 0.5)) * texel_size);
        let b = self.sample((iuv + Vec2::new(1.5, 0.5)) * texel_size);
        let c = self.sample((iuv + Vec2::new(0.5, 1.5)) * texel_size);
        let d = self.sample((iuv + Vec2::new(1.5, 1.5)) * texel_size);
        a.lerp(b, fuv.x).lerp(c.lerp(d, fuv.x), fuv.y)
    }
}

/// Interpolated outputs of the shared vertex stage.
struct Stencil {
    uv: Vec2,
    l: Vec2,
    r: Vec2,
    t: Vec2,
    b: Vec2,
}

impl Stencil {
    fn new(uv: Vec2, texel_size: Vec2) -> Self {
        Self {
            uv,
            l: uv - Vec2::new(texel_size.x, 0.0),
            r: uv + Vec2::new(texel_size.x, 0.0),
            t: uv + Vec2::new(0.0, texel_size.y),
            b: uv - Vec2::new(0.0, texel_size.y),
        }
    }
}

fn shade(
    stage: Stage,
    keywords: Keywords,
    u: &PassUniforms,
    inputs: &[Sampler<'_>],
    frag: &Stencil,
) -> Vec4 {
    let texel_size = Vec2::from(u.texel_size);
    match stage {
        Stage::Copy => inputs[0].sample(frag.uv),
        Stage::Clear => u.value * inputs[0].sample(frag.uv),
        Stage::Splat => {
            let mut p = frag.uv - Vec2::from(u.point);
            p.x *= u.aspect_ratio;
            let splat = (-p.dot(p) / u.radius).exp() * Vec4::from(u.color).xyz();
            let base = inputs[0].sample(frag.uv).xyz();
            (base + splat).extend(1.0)
        }
        Stage::Curl => {
            let velocity = &inputs[0];
            let l = velocity.sample(frag.l).y;
            let r = velocity.sample(frag.r).y;
            let t = velocity.sample(frag.t).x;
            let b = velocity.sample(frag.b).x;
            let vorticity = r - l - t + b;
            Vec4::new(0.5 * vorticity, 0.0, 0.0, 1.0)
        }
        Stage::Vorticity => {
            let (velocity, curl) = (&inputs[0], &inputs[1]);
            let l = curl.sample(frag.l).x;
            let r = curl.sample(frag.r).x;
            let t = curl.sample(frag.t).x;
            let b = curl.sample(frag.b).x;
            let c = curl.sample(frag.uv).x;

            let mut force = 0.5 * Vec2::new(t.abs() - b.abs(), r.abs() - l.abs());
            force /= force.length() + 0.0001;
            force *= u.curl * c;
            force.y = -force.y;

            let v = velocity.sample(frag.uv).xy() + force * u.dt;
            let v = v.clamp(Vec2::splat(-1000.0), Vec2::splat(1000.0));
            Vec4::new(v.x, v.y, 0.0, 1.0)
        }
        Stage::Divergence => {
            let velocity = &inputs[0];
            let mut l = velocity.sample(frag.l).x;
            let mut r = velocity.sample(frag.r).x;
            let mut t = velocity.sample(frag.t).y;
            let mut b = velocity.sample(frag.b).y;

            let c = velocity.sample(frag.uv).xy();
            if frag.l.x < 0.0 {
                l = -c.x;
            }
            if frag.r.x > 1.0 {
                r = -c.x;
            }
            if frag.t.y > 1.0 {
                t = -c.y;
            }
            if frag.b.y < 0.0 {
                b = -c.y;
            }

            let div = 0.5 * (r - l + t - b);
            Vec4::new(div, 0.0, 0.0, 1.0)
        }
        Stage::Pressure => {
            let (pressure, divergence) = (&inputs[0], &inputs[1]);
            let l = pressure.sample(frag.l).x;
            let r = pressure.sample(frag.r).x;
            let t = pressure.sample(frag.t).x;
            let b = pressure.sample(frag.b).x;
            let div = divergence.sample(frag.uv).x;
            let p = (l + r + b + t - div) * 0.25;
            Vec4::new(p, 0.0, 0.0, 1.0)
        }
        Stage::GradientSubtract => {
            let (pressure, velocity) = (&inputs[0], &inputs[1]);
            let l = pressure.sample(frag.l).x;
            let r = pressure.sample(frag.r).x;
            let t = pressure.sample(frag.t).x;
            let b = pressure.sample(frag.b).x;
            let v = velocity.sample(frag.uv).xy() - 0.5 * Vec2::new(r - l, t - b);
            Vec4::new(v.x, v.y, 0.0, 1.0)
        }
        Stage::Advection => {
            let (velocity, source) = (&inputs[0], &inputs[1]);
            let result = if keywords.manual_filtering {
                let v = velocity.bilerp(frag.uv, texel_size).xy();
                let coord = frag.uv - u.dt * v * texel_size;
                source.bilerp(coord, Vec2::from(u.source_texel_size))
            } else {
                let coord = frag.uv - u.dt * velocity.sample(frag.uv).xy() * texel_size;
                source.sample(coord)
            };
            let decay = 1.0 + u.dissipation * u.dt;
            result / decay
        }
        Stage::Display => {
            let dye = &inputs[0];
            let mut c = dye.sample(frag.uv).xyz();
            if keywords.shading {
                let lc = dye.sample(frag.l).xyz();
                let rc = dye.sample(frag.r).xyz();
                let tc = dye.sample(frag.t).xyz();
                let bc = dye.sample(frag.b).xyz();

                let dx = rc.length() - lc.length();
                let dy = tc.length() - bc.length();
                let n = Vec3::new(dx, dy, texel_size.length()).normalize();
                let diffuse = (n.dot(Vec3::Z) + 0.7).clamp(0.7, 1.0);
                c *= diffuse;
            }
            let a = c.max_element();
            c.extend(a)
        }
    }
}

struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<Vec4>,
}

/// Matches `wgpu::Limits::default().max_texture_dimension_2d`.
const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 8192;

/// Headless [`Backend`]. Counts allocations and blits, and reports a
/// feedback loop when a pass renders into one of its own inputs.
pub struct CpuBackend {
    surface: Surface,
    library: ProgramLibrary<Keywords>,
    linear_filtering: bool,
    max_texture_dimension: u32,
    in_frame: bool,
    next_id: u64,
    allocations: usize,
    blits: usize,
}

impl CpuBackend {
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        Self {
            surface: Surface {
                width,
                height,
                pixels: vec![Vec4::ZERO; (width * height) as usize],
            },
            library: ProgramLibrary::new(),
            linear_filtering: true,
            max_texture_dimension: DEFAULT_MAX_TEXTURE_DIMENSION,
            in_frame: false,
            next_id: 0,
            allocations: 0,
            blits: 0,
        }
    }

    /// Reports half-float formats as unfilterable when probed.
    pub fn without_linear_filtering(mut self) -> Self {
        self.linear_filtering = false;
        self
    }

    /// Caps texture width and height, as a device limit would.
    pub fn with_max_texture_dimension(mut self, max: u32) -> Self {
        self.max_texture_dimension = max;
        self
    }

    pub fn allocations(&self) -> usize {
        self.allocations
    }

    pub fn blits(&self) -> usize {
        self.blits
    }

    pub fn compile_count(&self) -> usize {
        self.library.compile_count()
    }

    /// Last presented (or in-progress) surface image, row-major from the top.
    pub fn surface_pixels(&self) -> &[Vec4] {
        &self.surface.pixels
    }
}

impl FormatProbe for CpuBackend {
    fn half_float_type(&self) -> Option<FloatType> {
        Some(FloatType::Half)
    }

    fn renders_to(&self, _format: TextureFormat) -> bool {
        true
    }

    fn filters(&self, _format: TextureFormat) -> bool {
        self.linear_filtering
    }
}

impl Backend for CpuBackend {
    type Texture = CpuTexture;

    fn surface_size(&self) -> (u32, u32) {
        (self.surface.width, self.surface.height)
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        self.surface = Surface {
            width,
            height,
            pixels: vec![Vec4::ZERO; (width * height) as usize],
        };
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        _filter: Filter,
    ) -> Result<CpuTexture> {
        let max = self.max_texture_dimension;
        if width > max || height > max {
            return Err(FluidError::TextureTooLarge { width, height, max });
        }
        self.next_id += 1;
        self.allocations += 1;
        Ok(CpuTexture {
            id: self.next_id,
            width,
            height,
            channels: channel_count(format),
            texels: RefCell::new(vec![Vec4::ZERO; (width * height) as usize]),
        })
    }

    fn prepare(&mut self, stage: Stage, keywords: Keywords) -> Result<()> {
        self.library.program(stage, keywords, |_, keywords| Ok(keywords))?;
        Ok(())
    }

    fn active_keywords(&self, stage: Stage) -> Option<Keywords> {
        self.library.active_keywords(stage)
    }

    fn blit(
        &mut self,
        pass: &Pass<'_, CpuTexture>,
        destination: Destination<'_, CpuTexture>,
    ) -> Result<()> {
        let stage = pass.stage();
        let keywords = *self
            .library
            .program(stage, pass.keywords(), |_, keywords| Ok(keywords))?;
        let uniforms = pass.uniforms();
        let texel_size = Vec2::from(uniforms.texel_size);
        let inputs = pass
            .bindings()
            .into_iter()
            .map(|binding| Sampler::bind(binding.target, stage))
            .collect::<Result<Vec<_>>>()?;

        match destination {
            Destination::Target(target) => {
                let mut texels = target
                    .texture
                    .texels
                    .try_borrow_mut()
                    .map_err(|_| FluidError::FeedbackLoop { stage })?;
                let (width, height) = (target.width, target.height);
                for y in 0..height {
                    for x in 0..width {
                        let uv = texel_centre(x, y, width, height);
                        let frag = Stencil::new(uv, texel_size);
                        let value = shade(stage, keywords, &uniforms, &inputs, &frag);
                        texels[(y * width + x) as usize] = mask(value, target.texture.channels);
                    }
                }
            }
            Destination::Surface => {
                if !self.in_frame {
                    return Err(FluidError::NoFrame);
                }
                let Surface {
                    width,
                    height,
                    pixels,
                } = &mut self.surface;
                for y in 0..*height {
                    for x in 0..*width {
                        let uv = texel_centre(x, y, *width, *height);
                        let frag = Stencil::new(uv, texel_size);
                        let src = shade(stage, keywords, &uniforms, &inputs, &frag);
                        let dst = &mut pixels[(y * *width + x) as usize];
                        // premultiplied alpha: ONE, ONE_MINUS_SRC_ALPHA
                        *dst = src + *dst * (1.0 - src.w);
                    }
                }
            }
        }
        self.blits += 1;
        Ok(())
    }

    fn begin_frame(&mut self, clear_color: [f32; 4]) -> Result<bool> {
        self.surface.pixels.fill(Vec4::from(clear_color));
        self.in_frame = true;
        Ok(true)
    }

    fn end_frame(&mut self) {
        self.in_frame = false;
    }

    fn flush(&mut self) {}
}

fn texel_centre(x: u32, y: u32, width: u32, height: u32) -> Vec2 {
    Vec2::new(
        (x as f32 + 0.5) / width as f32,
        (y as f32 + 0.5) / height as f32,
    )
}

/// Summary of the current simulation state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldStats {
    pub max_velocity: f32,
    pub total_dye: f32,
    /// Mean |divergence| as last computed by the divergence pass.
    pub mean_abs_divergence: f32,
}

impl FieldStats {
    pub fn measure(fields: &Fields<CpuTexture>) -> Self {
        Self {
            max_velocity: fields.velocity.read.texture.max_length_xy(),
            total_dye: fields.dye.read.texture.sum_rgb(),
            mean_abs_divergence: fields.divergence.texture.mean_abs_x(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::{create_target, Resolution};

    fn target(
        backend: &mut CpuBackend,
        width: u32,
        height: u32,
        format: TextureFormat,
        filter: Filter,
    ) -> RenderTarget<CpuTexture> {
        create_target(backend, Resolution { width, height }, format, filter).unwrap()
    }

    #[test]
    fn self_read_is_rejected() {
        let mut backend = CpuBackend::new(4, 4);
        let a = target(&mut backend, 4, 4, TextureFormat::Rgba16Float, Filter::Linear);
        let err = backend
            .blit(&Pass::Copy { source: &a }, Destination::Target(&a))
            .unwrap_err();
        assert!(matches!(err, FluidError::FeedbackLoop { stage: Stage::Copy }));
        assert_eq!(backend.blits(), 0);
    }

    #[test]
    fn single_channel_targets_drop_extra_channels() {
        let mut backend = CpuBackend::new(4, 4);
        let source = target(&mut backend, 2, 2, TextureFormat::Rgba16Float, Filter::Nearest);
        let dest = target(&mut backend, 2, 2, TextureFormat::R16Float, Filter::Nearest);
        source.texture.fill(Vec4::new(1.0, 2.0, 3.0, 4.0));
        backend
            .blit(&Pass::Copy { source: &source }, Destination::Target(&dest))
            .unwrap();
        assert_eq!(dest.texture.texel(1, 1), Vec4::new(1.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn linear_sampling_interpolates_between_centres() {
        let mut backend = CpuBackend::new(4, 4);
        let source = target(&mut backend, 2, 1, TextureFormat::R16Float, Filter::Linear);
        source.texture.set_texel(0, 0, Vec4::new(0.0, 0.0, 0.0, 0.0));
        source.texture.set_texel(1, 0, Vec4::new(1.0, 0.0, 0.0, 0.0));
        let dest = target(&mut backend, 4, 1, TextureFormat::R16Float, Filter::Linear);
        backend
            .blit(&Pass::Copy { source: &source }, Destination::Target(&dest))
            .unwrap();
        let row: Vec<f32> = (0..4).map(|x| dest.texture.texel(x, 0).x).collect();
        assert_eq!(row, vec![0.0, 0.25, 0.75, 1.0]);
    }

    #[test]
    fn clear_scales_the_source() {
        let mut backend = CpuBackend::new(4, 4);
        let source = target(&mut backend, 2, 2, TextureFormat::R16Float, Filter::Nearest);
        let dest = target(&mut backend, 2, 2, TextureFormat::R16Float, Filter::Nearest);
        source.texture.fill(Vec4::splat(0.8));
        backend
            .blit(
                &Pass::Clear {
                    source: &source,
                    value: 0.5,
                },
                Destination::Target(&dest),
            )
            .unwrap();
        assert!((dest.texture.texel(0, 1).x - 0.4).abs() < 1e-6);
    }

    #[test]
    fn display_blends_premultiplied_over_background() {
        let mut backend = CpuBackend::new(2, 2);
        let dye = target(&mut backend, 2, 2, TextureFormat::Rgba16Float, Filter::Linear);
        dye.texture.fill(Vec4::new(0.5, 0.25, 0.0, 1.0));

        assert!(backend.begin_frame([0.0, 0.0, 1.0, 1.0]).unwrap());
        backend
            .blit(
                &Pass::Display {
                    dye: &dye,
                    texel_size: [0.5, 0.5],
                    shading: false,
                },
                Destination::Surface,
            )
            .unwrap();
        backend.end_frame();

        // alpha = max(r, g, b) = 0.5, so half the blue background survives
        let pixel = backend.surface_pixels()[0];
        assert!((pixel - Vec4::new(0.5, 0.25, 0.5, 1.0)).abs().max_element() < 1e-6);
    }

    #[test]
    fn surface_pass_outside_a_frame_fails() {
        let mut backend = CpuBackend::new(2, 2);
        let dye = target(&mut backend, 2, 2, TextureFormat::Rgba16Float, Filter::Linear);
        let result = backend.blit(
            &Pass::Display {
                dye: &dye,
                texel_size: [0.5, 0.5],
                shading: false,
            },
            Destination::Surface,
        );
        assert!(matches!(result, Err(FluidError::NoFrame)));
    }
}
