//! Per-frame orchestration and the stop path.

use crate::backend::Backend;
use crate::engine::Engine;
use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Longest step the integrator is allowed to take, whatever the wall clock says.
pub const MAX_DELTA_TIME: f32 = 1.0 / 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    Running,
    Stopped,
}

/// Cloneable cancellation token for a running driver.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct FrameDriver {
    state: DriverState,
    last_frame: Option<Instant>,
    stop: StopHandle,
    frames: u64,
}

impl Default for FrameDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDriver {
    pub fn new() -> Self {
        Self {
            state: DriverState::Uninitialized,
            last_frame: None,
            stop: StopHandle::default(),
            frames: 0,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Seconds since the previous call, capped at [`MAX_DELTA_TIME`]. The
    /// first call returns the cap.
    pub fn delta_time(&mut self, now: Instant) -> f32 {
        let elapsed = self
            .last_frame
            .map_or(MAX_DELTA_TIME, |last| {
                now.saturating_duration_since(last).as_secs_f32()
            });
        self.last_frame = Some(now);
        elapsed.min(MAX_DELTA_TIME)
    }

    /// Resize check plus one engine frame. Returns whether the loop should
    /// keep going.
    pub fn tick<B: Backend>(
        &mut self,
        engine: &mut Engine<B>,
        surface_size: (u32, u32),
        now: Instant,
    ) -> Result<bool> {
        if self.stop.is_stopped() {
            if self.state != DriverState::Stopped {
                log::info!("frame driver stopped after {} frames", self.frames);
            }
            self.state = DriverState::Stopped;
        }
        if self.state == DriverState::Stopped {
            return Ok(false);
        }
        self.state = DriverState::Running;

        let dt = self.delta_time(now);
        let (width, height) = surface_size;
        if engine.resize(width, height)? {
            log::debug!("surface resized to {width}x{height}");
        }
        if engine.frame(dt)? {
            self.frames += 1;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::config::SimulationConfig;
    use crate::cpu::CpuBackend;
    use std::time::Duration;

    fn engine() -> Engine<CpuBackend> {
        let backend = CpuBackend::new(16, 16);
        let capabilities = Capabilities::negotiate(&backend).unwrap();
        let config = SimulationConfig {
            sim_resolution: 8,
            dye_resolution: 8,
            pressure_iterations: 2,
            ..Default::default()
        };
        Engine::new(backend, capabilities, config).unwrap()
    }

    #[test]
    fn delta_time_is_capped() {
        let mut driver = FrameDriver::new();
        let start = Instant::now();
        assert_eq!(driver.delta_time(start), MAX_DELTA_TIME);
        let dt = driver.delta_time(start + Duration::from_millis(5));
        assert!((dt - 0.005).abs() < 1e-6);
        assert_eq!(driver.delta_time(start + Duration::from_secs(2)), MAX_DELTA_TIME);
    }

    #[test]
    fn clock_going_backwards_gives_zero() {
        let mut driver = FrameDriver::new();
        let start = Instant::now() + Duration::from_secs(1);
        driver.delta_time(start);
        assert_eq!(driver.delta_time(start - Duration::from_millis(10)), 0.0);
    }

    #[test]
    fn runs_until_stopped() {
        let mut engine = engine();
        let mut driver = FrameDriver::new();
        assert_eq!(driver.state(), DriverState::Uninitialized);

        let start = Instant::now();
        assert!(driver.tick(&mut engine, (16, 16), start).unwrap());
        assert_eq!(driver.state(), DriverState::Running);

        let handle = driver.stop_handle();
        handle.stop();
        assert!(!driver.tick(&mut engine, (16, 16), start).unwrap());
        assert_eq!(driver.state(), DriverState::Stopped);
        assert_eq!(driver.frames(), 1);
    }

    #[test]
    fn tick_applies_resizes() {
        let mut engine = engine();
        let mut driver = FrameDriver::new();
        driver.tick(&mut engine, (32, 16), Instant::now()).unwrap();
        assert_eq!(engine.fields().sim_resolution().width, 16);
        assert_eq!(engine.fields().sim_resolution().height, 8);
    }
}
