//! Final pass: dye onto the visible surface.

use crate::backend::{Backend, Destination, Pass};
use crate::error::Result;
use crate::programs::{Keyword, Keywords};
use crate::targets::DoubleTarget;

pub fn display_keywords(shading: bool) -> Keywords {
    Keywords::NONE.set(Keyword::Shading, shading)
}

/// Draws the dye field over the cleared surface. Shading differentiates the
/// dye at surface-pixel spacing.
pub fn render<B: Backend>(
    backend: &mut B,
    dye: &DoubleTarget<B::Texture>,
    shading: bool,
) -> Result<()> {
    let (width, height) = backend.surface_size();
    let texel_size = [1.0 / width.max(1) as f32, 1.0 / height.max(1) as f32];
    backend.blit(
        &Pass::Display {
            dye: &dye.read,
            texel_size,
            shading,
        },
        Destination::Surface,
    )
}
