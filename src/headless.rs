//! Scripted run of the effect on the CPU backend, logging field statistics.
//!
//! Usage: `fluid_headless [frames]`

use anyhow::Context;
use fluid_cursor::capabilities::Capabilities;
use fluid_cursor::cpu::{CpuBackend, FieldStats};
use fluid_cursor::driver::FrameDriver;
use fluid_cursor::input::{InputRouter, PointerId};
use fluid_cursor::{Engine, SimulationConfig};
use std::time::{Duration, Instant};

const WIDTH: u32 = 160;
const HEIGHT: u32 = 90;
const REPORT_EVERY: u64 = 10;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let frames: u64 = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse()
            .with_context(|| format!("invalid frame count {arg:?}"))?,
        None => 120,
    };

    let config = SimulationConfig {
        sim_resolution: 32,
        dye_resolution: 64,
        ..Default::default()
    };
    let backend = CpuBackend::new(WIDTH, HEIGHT);
    let capabilities = Capabilities::negotiate(&backend)?;
    let mut engine = Engine::with_input(backend, capabilities, config, InputRouter::with_seed(7))?;
    let mut driver = FrameDriver::new();

    let start = Instant::now();
    let frame_time = Duration::from_micros(16_667);
    let (cx, cy) = (WIDTH as f32 * 0.5, HEIGHT as f32 * 0.5);
    let radius = HEIGHT as f32 * 0.3;

    engine
        .input_mut()
        .pointer_down(PointerId::Mouse, cx + radius, cy, WIDTH, HEIGHT);
    for frame in 0..frames {
        // the cursor circles the centre once every two seconds
        let angle = frame as f32 / 120.0 * std::f32::consts::TAU;
        let (x, y) = (cx + radius * angle.cos(), cy + radius * angle.sin());
        engine
            .input_mut()
            .pointer_move(PointerId::Mouse, x, y, WIDTH, HEIGHT);

        let now = start + frame_time * (frame as u32 + 1);
        if !driver.tick(&mut engine, (WIDTH, HEIGHT), now)? {
            break;
        }

        if (frame + 1) % REPORT_EVERY == 0 {
            let stats = FieldStats::measure(engine.fields());
            log::info!(
                "frame {:>4}: max |v| {:>9.3}  dye {:>9.3}  mean |div| {:.5}",
                frame + 1,
                stats.max_velocity,
                stats.total_dye,
                stats.mean_abs_divergence
            );
        }
    }

    log::info!(
        "{} frames, {} blits, {} textures, {} programs",
        driver.frames(),
        engine.backend().blits(),
        engine.backend().allocations(),
        engine.backend().compile_count()
    );
    Ok(())
}
