//! The running effect: one instance per surface, owning everything it draws
//! with.

use crate::backend::Backend;
use crate::capabilities::Capabilities;
use crate::config::SimulationConfig;
use crate::error::Result;
use crate::input::{wrap, InputRouter};
use crate::programs::{Keyword, Keywords, Stage};
use crate::render;
use crate::stepper::{self, StepParams};
use crate::targets::Fields;

pub struct Engine<B: Backend> {
    backend: B,
    config: SimulationConfig,
    capabilities: Capabilities,
    fields: Fields<B::Texture>,
    input: InputRouter,
    color_timer: f32,
    paused: bool,
    surface: (u32, u32),
}

impl<B: Backend> Engine<B> {
    pub fn new(backend: B, capabilities: Capabilities, config: SimulationConfig) -> Result<Self> {
        Self::with_input(backend, capabilities, config, InputRouter::new())
    }

    /// Degrades and sanitizes `config`, compiles every program variant the
    /// effect will use, and allocates the fields for the current surface.
    pub fn with_input(
        mut backend: B,
        capabilities: Capabilities,
        mut config: SimulationConfig,
        input: InputRouter,
    ) -> Result<Self> {
        capabilities.degrade(&mut config);
        config.sanitize();

        for stage in Stage::ALL {
            backend.prepare(stage, variant_for(stage, &config, &capabilities))?;
        }

        let fields = Fields::new(&mut backend, &capabilities, &config)?;
        backend.flush();
        let surface = backend.surface_size();
        log::info!(
            "fluid engine ready: simulation {:?}, dye {:?}",
            fields.sim_resolution(),
            fields.dye_resolution()
        );

        Ok(Self {
            backend,
            config,
            capabilities,
            fields,
            input,
            color_timer: 0.0,
            paused: false,
            surface,
        })
    }

    /// Reallocates the fields for a new surface size. Zero-sized surfaces
    /// (minimised windows) are ignored. Returns whether anything changed.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool> {
        if width == 0 || height == 0 || (width, height) == self.surface {
            return Ok(false);
        }
        if self.backend.surface_size() != (width, height) {
            self.backend.resize_surface(width, height);
        }
        self.fields.resize(&mut self.backend, &self.config)?;
        self.surface = (width, height);
        Ok(true)
    }

    /// Runs one frame. Returns `false` when the backend skipped it.
    pub fn frame(&mut self, dt: f32) -> Result<bool> {
        if !self.backend.begin_frame(self.config.background())? {
            return Ok(false);
        }
        self.update_colors(dt);
        self.apply_inputs()?;
        if !self.paused {
            let params = StepParams::new(&self.config, &self.capabilities, dt);
            stepper::step(&mut self.backend, &mut self.fields, &params)?;
        }
        render::render(&mut self.backend, &self.fields.dye, self.config.shading)?;
        self.backend.end_frame();
        Ok(true)
    }

    fn update_colors(&mut self, dt: f32) {
        self.color_timer += dt * self.config.color_update_speed;
        if self.color_timer >= 1.0 {
            self.color_timer = wrap(self.color_timer, 0.0, 1.0);
            self.input.regenerate_colors();
        }
    }

    fn apply_inputs(&mut self) -> Result<()> {
        let aspect_ratio = self.aspect_ratio();
        for splat in self.input.drain_splats(self.config.splat_force) {
            stepper::splat(
                &mut self.backend,
                &mut self.fields,
                &splat,
                self.config.splat_radius,
                aspect_ratio,
            )?;
        }
        Ok(())
    }

    pub fn aspect_ratio(&self) -> f32 {
        let (width, height) = self.backend.surface_size();
        width.max(1) as f32 / height.max(1) as f32
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
        log::info!("simulation {}", if self.paused { "paused" } else { "resumed" });
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn fields(&self) -> &Fields<B::Texture> {
        &self.fields
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Effective configuration after degradation and sanitizing.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn input(&self) -> &InputRouter {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputRouter {
        &mut self.input
    }
}

fn variant_for(stage: Stage, config: &SimulationConfig, capabilities: &Capabilities) -> Keywords {
    match stage {
        Stage::Display => render::display_keywords(config.shading),
        Stage::Advection => {
            Keywords::NONE.set(Keyword::ManualFiltering, !capabilities.linear_filtering)
        }
        _ => Keywords::NONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;
    use crate::input::PointerId;

    fn small_config() -> SimulationConfig {
        SimulationConfig {
            sim_resolution: 16,
            dye_resolution: 32,
            pressure_iterations: 4,
            ..Default::default()
        }
    }

    fn engine(backend: CpuBackend) -> Engine<CpuBackend> {
        let capabilities = Capabilities::negotiate(&backend).unwrap();
        Engine::with_input(backend, capabilities, small_config(), InputRouter::with_seed(1))
            .unwrap()
    }

    #[test]
    fn init_compiles_one_variant_per_stage() {
        let engine = engine(CpuBackend::new(64, 32));
        assert_eq!(engine.backend().compile_count(), Stage::ALL.len());
        assert_eq!(
            engine.backend().active_keywords(Stage::Display),
            Some(Keywords::NONE.with(Keyword::Shading))
        );
        assert_eq!(
            engine.backend().active_keywords(Stage::Advection),
            Some(Keywords::NONE)
        );
    }

    #[test]
    fn frames_reuse_compiled_programs() {
        let mut engine = engine(CpuBackend::new(64, 32));
        let compiled = engine.backend().compile_count();
        for _ in 0..3 {
            assert!(engine.frame(1.0 / 60.0).unwrap());
        }
        assert_eq!(engine.backend().compile_count(), compiled);
    }

    #[test]
    fn zero_sized_resize_is_ignored() {
        let mut engine = engine(CpuBackend::new(64, 32));
        let allocations = engine.backend().allocations();
        assert!(!engine.resize(0, 100).unwrap());
        assert!(!engine.resize(64, 32).unwrap());
        assert_eq!(engine.backend().allocations(), allocations);
        assert_eq!(engine.backend().surface_size(), (64, 32));
    }

    #[test]
    fn paused_engine_still_applies_splats_and_renders() {
        let mut engine = engine(CpuBackend::new(32, 32));
        engine.toggle_pause();
        assert!(engine.is_paused());
        let swaps = engine.fields().pressure.swap_count();

        engine.input_mut().pointer_down(PointerId::Mouse, 16.0, 16.0, 32, 32);
        engine.frame(1.0 / 60.0).unwrap();

        assert_eq!(engine.fields().pressure.swap_count(), swaps);
        assert_eq!(engine.fields().dye.swap_count(), 1);
        assert!(engine.fields().dye.read.texture.sum_rgb() > 0.0);
        assert!(engine.backend().surface_pixels().iter().any(|p| p.w > 0.0));
    }

    #[test]
    fn color_cycle_regenerates_pointer_colors() {
        let mut engine = engine(CpuBackend::new(16, 16));
        let before = engine.input().pointer(PointerId::Mouse).unwrap().color;
        // 10 cycles per second: 0.11 s wraps the timer once
        engine.frame(0.11).unwrap();
        let after = engine.input().pointer(PointerId::Mouse).unwrap().color;
        assert_ne!(before, after);
    }
}
