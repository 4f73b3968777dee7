//! Format negotiation: which half-float formats the adapter can render into
//! and sample from, and whether it can filter them linearly.

use crate::config::{SimulationConfig, FALLBACK_DYE_RESOLUTION};
use crate::error::{FluidError, Result};
use wgpu::TextureFormat;

/// Field categories by channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatCategory {
    Rgba,
    Rg,
    R,
}

/// Texel type of every render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatType {
    Half,
}

impl FloatType {
    /// Candidate formats for a category, most compact first.
    pub fn fallback_chain(self, category: FormatCategory) -> &'static [TextureFormat] {
        match (self, category) {
            (FloatType::Half, FormatCategory::Rgba) => &[TextureFormat::Rgba16Float],
            (FloatType::Half, FormatCategory::Rg) => {
                &[TextureFormat::Rg16Float, TextureFormat::Rgba16Float]
            }
            (FloatType::Half, FormatCategory::R) => &[
                TextureFormat::R16Float,
                TextureFormat::Rg16Float,
                TextureFormat::Rgba16Float,
            ],
        }
    }
}

/// What the negotiator asks of a context.
pub trait FormatProbe {
    fn half_float_type(&self) -> Option<FloatType>;
    /// The format can be both a render attachment and a sampled texture.
    fn renders_to(&self, format: TextureFormat) -> bool;
    fn filters(&self, format: TextureFormat) -> bool;
}

impl FormatProbe for wgpu::Adapter {
    fn half_float_type(&self) -> Option<FloatType> {
        let features = self.get_texture_format_features(TextureFormat::Rgba16Float);
        features
            .allowed_usages
            .contains(wgpu::TextureUsages::TEXTURE_BINDING)
            .then_some(FloatType::Half)
    }

    fn renders_to(&self, format: TextureFormat) -> bool {
        self.get_texture_format_features(format).allowed_usages.contains(
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        )
    }

    fn filters(&self, format: TextureFormat) -> bool {
        self.get_texture_format_features(format)
            .flags
            .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE)
    }
}

/// Immutable record derived once at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub rgba: TextureFormat,
    pub rg: TextureFormat,
    pub r: TextureFormat,
    pub float_type: FloatType,
    pub linear_filtering: bool,
}

impl Capabilities {
    pub fn negotiate(probe: &impl FormatProbe) -> Result<Self> {
        let float_type = probe.half_float_type().ok_or(FluidError::NoHalfFloat)?;

        let rgba = supported_format(probe, float_type, FormatCategory::Rgba)?;
        let rg = supported_format(probe, float_type, FormatCategory::Rg)?;
        let r = supported_format(probe, float_type, FormatCategory::R)?;
        let linear_filtering = [rgba, rg, r].into_iter().all(|format| probe.filters(format));

        let capabilities = Self {
            rgba,
            rg,
            r,
            float_type,
            linear_filtering,
        };
        log::info!("negotiated render target formats: {capabilities:?}");
        Ok(capabilities)
    }

    pub fn format(&self, category: FormatCategory) -> TextureFormat {
        match category {
            FormatCategory::Rgba => self.rgba,
            FormatCategory::Rg => self.rg,
            FormatCategory::R => self.r,
        }
    }

    /// Trade visual quality for correctness when float textures cannot be
    /// filtered: smaller dye grid, no shading.
    pub fn degrade(&self, config: &mut SimulationConfig) {
        if self.linear_filtering {
            return;
        }
        log::info!(
            "linear filtering of float textures unsupported: dye resolution {} -> {}, shading off",
            config.dye_resolution,
            FALLBACK_DYE_RESOLUTION
        );
        config.dye_resolution = FALLBACK_DYE_RESOLUTION;
        config.shading = false;
    }
}

fn supported_format(
    probe: &impl FormatProbe,
    float_type: FloatType,
    category: FormatCategory,
) -> Result<TextureFormat> {
    float_type
        .fallback_chain(category)
        .iter()
        .copied()
        .find(|&format| probe.renders_to(format))
        .ok_or(FluidError::UnsupportedFormat(category))
}
