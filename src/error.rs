use crate::capabilities::FormatCategory;
use crate::programs::Stage;

/// Everything that can stop the effect from starting or a frame from rendering.
///
/// Start-up failures (`NoContext`, `NoHalfFloat`, `UnsupportedFormat`,
/// `ShaderCompile`) are fatal: the effect simply does not run. Missing linear
/// filtering is not an error at all, it degrades the configuration instead.
#[derive(Debug, thiserror::Error)]
pub enum FluidError {
    #[error("no GPU context could be obtained for the surface")]
    NoContext,

    #[error("failed to create a rendering surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("failed to open a GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("half-float render target type is unavailable")]
    NoHalfFloat,

    #[error("no renderable {0:?} format is supported")]
    UnsupportedFormat(FormatCategory),

    #[error("{stage:?} program failed to compile: {message}")]
    ShaderCompile { stage: Stage, message: String },

    #[error("{stage:?} pass reads from the target it writes to")]
    FeedbackLoop { stage: Stage },

    #[error("surface frame unavailable: {0}")]
    Frame(#[from] wgpu::SurfaceError),

    #[error("display pass issued outside of a frame")]
    NoFrame,

    #[error("{width}x{height} texture exceeds the {max} texel limit")]
    TextureTooLarge { width: u32, height: u32, max: u32 },
}

pub type Result<T> = std::result::Result<T, FluidError>;
