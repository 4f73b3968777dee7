//! Tunables of the effect and their JSON file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "fluid_config.json";

/// Dye grid resolution used when the adapter cannot linearly filter
/// half-float textures.
pub const FALLBACK_DYE_RESOLUTION: u32 = 512;

/// Tunables of the effect. Read-only while running; resolution changes only
/// take effect through a field reallocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    pub sim_resolution: u32,     // cells along the short axis of the physics grids
    pub dye_resolution: u32,     // cells along the short axis of the visible dye grid
    pub capture_resolution: u32, // reserved
    pub density_dissipation: f32,
    pub velocity_dissipation: f32,
    pub pressure: f32, // warm-start decay of the previous pressure field, in [0, 1]
    pub pressure_iterations: u32,
    pub curl: f32,
    pub splat_radius: f32,
    pub splat_force: f32,
    pub shading: bool,
    pub color_update_speed: f32, // colour cycles per second
    pub back_color: [f32; 3],
    pub transparent: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sim_resolution: 128,
            dye_resolution: 1440,
            capture_resolution: 512,
            density_dissipation: 3.5,
            velocity_dissipation: 2.0,
            pressure: 0.1,
            pressure_iterations: 20,
            curl: 3.0,
            splat_radius: 0.2,
            splat_force: 6000.0,
            shading: true,
            color_update_speed: 10.0,
            back_color: [0.5, 0.0, 0.0],
            transparent: true,
        }
    }
}

impl SimulationConfig {
    pub fn default_path() -> PathBuf {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(CONFIG_FILE_NAME)
    }

    pub fn load_from_disk(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&data)?;
        config.sanitize();
        Ok(config)
    }

    pub fn save_to_disk(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn sanitize(&mut self) {
        if !(0.0..=1.0).contains(&self.pressure) {
            log::warn!(
                "pressure warm-start decay {} is outside [0, 1], clamping",
                self.pressure
            );
            self.pressure = if self.pressure.is_nan() {
                0.0
            } else {
                self.pressure.clamp(0.0, 1.0)
            };
        }
        self.sim_resolution = self.sim_resolution.clamp(8, 1024);
        self.dye_resolution = self.dye_resolution.clamp(8, 4096);
        self.capture_resolution = self.capture_resolution.clamp(8, 4096);
        self.density_dissipation = self.density_dissipation.max(0.0);
        self.velocity_dissipation = self.velocity_dissipation.max(0.0);
        self.pressure_iterations = self.pressure_iterations.clamp(1, 200);
        self.curl = self.curl.clamp(0.0, 100.0);
        self.splat_radius = self.splat_radius.clamp(0.001, 10.0);
        self.splat_force = self.splat_force.clamp(0.0, 100_000.0);
        self.color_update_speed = self.color_update_speed.clamp(0.0, 100.0);
        for channel in &mut self.back_color {
            *channel = channel.clamp(0.0, 1.0);
        }
    }

    /// Clear colour of the visible surface before the dye is blended on top.
    pub fn background(&self) -> [f32; 4] {
        if self.transparent {
            [0.0, 0.0, 0.0, 0.0]
        } else {
            let [r, g, b] = self.back_color;
            [r, g, b, 1.0]
        }
    }
}
