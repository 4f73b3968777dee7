//! The fixed set of fragment programs, their keyword variants, and the
//! per-stage variant cache.

use crate::error::Result;
use bytemuck::{Pod, Zeroable};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Shared vertex stage and uniform block, prepended to every fragment stage.
pub const COMMON_SOURCE: &str = include_str!("../shaders/common.wgsl");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Copy,
    Clear,
    Splat,
    Curl,
    Vorticity,
    Divergence,
    Pressure,
    GradientSubtract,
    Advection,
    Display,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Copy,
        Stage::Clear,
        Stage::Splat,
        Stage::Curl,
        Stage::Vorticity,
        Stage::Divergence,
        Stage::Pressure,
        Stage::GradientSubtract,
        Stage::Advection,
        Stage::Display,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stage::Copy => "copy",
            Stage::Clear => "clear",
            Stage::Splat => "splat",
            Stage::Curl => "curl",
            Stage::Vorticity => "vorticity",
            Stage::Divergence => "divergence",
            Stage::Pressure => "pressure",
            Stage::GradientSubtract => "gradient_subtract",
            Stage::Advection => "advection",
            Stage::Display => "display",
        }
    }

    fn fragment_source(self) -> &'static str {
        match self {
            Stage::Copy => include_str!("../shaders/copy.wgsl"),
            Stage::Clear => include_str!("../shaders/clear.wgsl"),
            Stage::Splat => include_str!("../shaders/splat.wgsl"),
            Stage::Curl => include_str!("../shaders/curl.wgsl"),
            Stage::Vorticity => include_str!("../shaders/vorticity.wgsl"),
            Stage::Divergence => include_str!("../shaders/divergence.wgsl"),
            Stage::Pressure => include_str!("../shaders/pressure.wgsl"),
            Stage::GradientSubtract => include_str!("../shaders/gradient_subtract.wgsl"),
            Stage::Advection => include_str!("../shaders/advection.wgsl"),
            Stage::Display => include_str!("../shaders/display.wgsl"),
        }
    }

    /// Number of sampled textures; input `i` occupies bindings `1 + 2i`
    /// (texture) and `2 + 2i` (sampler).
    pub fn input_count(self) -> u32 {
        match self {
            Stage::Copy
            | Stage::Clear
            | Stage::Splat
            | Stage::Curl
            | Stage::Divergence
            | Stage::Display => 1,
            Stage::Vorticity | Stage::Pressure | Stage::GradientSubtract | Stage::Advection => 2,
        }
    }

    /// Keywords this stage branches on. Anything else is dropped from a
    /// requested set so equivalent variants share one program.
    pub fn recognized_keywords(self) -> Keywords {
        match self {
            Stage::Display => Keywords::NONE.with(Keyword::Shading),
            Stage::Advection => Keywords::NONE.with(Keyword::ManualFiltering),
            _ => Keywords::NONE,
        }
    }

    /// Complete WGSL module for one variant.
    pub fn source(self, keywords: Keywords) -> String {
        format!(
            "{}\n{}\n{}",
            keywords.preamble(),
            COMMON_SOURCE,
            self.fragment_source()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Shading,
    ManualFiltering,
}

/// Typed keyword set selecting a program variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Keywords {
    pub shading: bool,
    pub manual_filtering: bool,
}

impl Keywords {
    pub const NONE: Keywords = Keywords {
        shading: false,
        manual_filtering: false,
    };

    pub const fn with(self, keyword: Keyword) -> Self {
        self.set(keyword, true)
    }

    pub const fn set(mut self, keyword: Keyword, enabled: bool) -> Self {
        match keyword {
            Keyword::Shading => self.shading = enabled,
            Keyword::ManualFiltering => self.manual_filtering = enabled,
        }
        self
    }

    pub fn contains(self, keyword: Keyword) -> bool {
        match keyword {
            Keyword::Shading => self.shading,
            Keyword::ManualFiltering => self.manual_filtering,
        }
    }

    pub fn intersection(self, other: Keywords) -> Self {
        Keywords {
            shading: self.shading && other.shading,
            manual_filtering: self.manual_filtering && other.manual_filtering,
        }
    }

    fn preamble(self) -> String {
        format!(
            "const SHADING: bool = {};\nconst MANUAL_FILTERING: bool = {};\n",
            self.shading, self.manual_filtering
        )
    }
}

/// Uniform block shared by every stage; mirrors `PassUniforms` in
/// `shaders/common.wgsl`. Stages ignore the fields they do not use.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PassUniforms {
    pub texel_size: [f32; 2],
    pub source_texel_size: [f32; 2],
    pub color: [f32; 4],
    pub point: [f32; 2],
    pub aspect_ratio: f32,
    pub radius: f32,
    pub dt: f32,
    pub dissipation: f32,
    pub value: f32,
    pub curl: f32,
}

const _: [(); 64] = [(); std::mem::size_of::<PassUniforms>()];

/// One stage's compiled variants, keyed by keyword set.
pub struct Material<P> {
    stage: Stage,
    variants: HashMap<Keywords, P>,
    active: Option<Keywords>,
    compiles: usize,
}

impl<P> Material<P> {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            variants: HashMap::new(),
            active: None,
            compiles: 0,
        }
    }

    /// Activates the variant for `keywords`, compiling it on first use.
    pub fn set_keywords<F>(&mut self, keywords: Keywords, compile: F) -> Result<&mut P>
    where
        F: FnOnce(Stage, Keywords) -> Result<P>,
    {
        let stage = self.stage;
        let keywords = keywords.intersection(stage.recognized_keywords());
        let program = match self.variants.entry(keywords) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                log::debug!("compiling {} program {:?}", stage.label(), keywords);
                let program = compile(stage, keywords)?;
                self.compiles += 1;
                entry.insert(program)
            }
        };
        self.active = Some(keywords);
        Ok(program)
    }

    pub fn active_keywords(&self) -> Option<Keywords> {
        self.active
    }

    pub fn variant(&self, keywords: Keywords) -> Option<&P> {
        self.variants.get(&keywords)
    }

    pub fn compile_count(&self) -> usize {
        self.compiles
    }
}

/// Materials for every stage.
pub struct ProgramLibrary<P> {
    materials: HashMap<Stage, Material<P>>,
}

impl<P> Default for ProgramLibrary<P> {
    fn default() -> Self {
        Self {
            materials: HashMap::new(),
        }
    }
}

impl<P> ProgramLibrary<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn program<F>(&mut self, stage: Stage, keywords: Keywords, compile: F) -> Result<&mut P>
    where
        F: FnOnce(Stage, Keywords) -> Result<P>,
    {
        self.materials
            .entry(stage)
            .or_insert_with(|| Material::new(stage))
            .set_keywords(keywords, compile)
    }

    pub fn active_keywords(&self, stage: Stage) -> Option<Keywords> {
        self.materials.get(&stage)?.active_keywords()
    }

    pub fn material(&self, stage: Stage) -> Option<&Material<P>> {
        self.materials.get(&stage)
    }

    pub fn compile_count(&self) -> usize {
        self.materials.values().map(Material::compile_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FluidError;

    #[test]
    fn repeated_keywords_compile_once() {
        let mut material = Material::new(Stage::Display);
        let shaded = Keywords::NONE.with(Keyword::Shading);
        for _ in 0..3 {
            material.set_keywords(shaded, |_, k| Ok(k)).unwrap();
        }
        material.set_keywords(Keywords::NONE, |_, k| Ok(k)).unwrap();
        material.set_keywords(shaded, |_, k| Ok(k)).unwrap();
        assert_eq!(material.compile_count(), 2);
        assert_eq!(material.active_keywords(), Some(shaded));
    }

    #[test]
    fn unrecognized_keywords_are_dropped() {
        let mut library = ProgramLibrary::new();
        let both = Keywords::NONE
            .with(Keyword::Shading)
            .with(Keyword::ManualFiltering);

        let compiled = *library.program(Stage::Advection, both, |_, k| Ok(k)).unwrap();
        assert_eq!(compiled, Keywords::NONE.with(Keyword::ManualFiltering));

        library.program(Stage::Copy, both, |_, k| Ok(k)).unwrap();
        library.program(Stage::Copy, Keywords::NONE, |_, k| Ok(k)).unwrap();
        assert_eq!(library.active_keywords(Stage::Copy), Some(Keywords::NONE));
        assert_eq!(library.compile_count(), 2);
    }

    #[test]
    fn failed_compile_leaves_material_inactive() {
        let mut material: Material<()> = Material::new(Stage::Curl);
        let err = material
            .set_keywords(Keywords::NONE, |stage, _| {
                Err(FluidError::ShaderCompile {
                    stage,
                    message: "broken".into(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, FluidError::ShaderCompile { stage: Stage::Curl, .. }));
        assert_eq!(material.active_keywords(), None);
        assert_eq!(material.compile_count(), 0);
    }

    #[test]
    fn source_starts_with_keyword_constants() {
        let source = Stage::Display.source(Keywords::NONE.with(Keyword::Shading));
        assert!(source.starts_with("const SHADING: bool = true;\nconst MANUAL_FILTERING: bool = false;"));
        assert!(source.contains("fn vs_main"));
        assert!(source.contains("fn fs_main"));
    }

    #[test]
    fn every_stage_has_a_fragment_entry_point() {
        for stage in Stage::ALL {
            assert!(stage.fragment_source().contains("fn fs_main"), "{stage:?}");
        }
    }
}
