//! Attaches the effect to a winit window and routes its events.

use crate::capabilities::Capabilities;
use crate::config::SimulationConfig;
use crate::driver::FrameDriver;
use crate::engine::Engine;
use crate::gpu::{GpuBackend, GpuContext};
use crate::input::PointerId;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, MouseButton, TouchPhase, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

/// Splats queued by the burst key.
const BURST_SPLATS: usize = 5;

struct FluidApp {
    config: SimulationConfig,
    window: Option<Arc<Window>>,
    engine: Option<Engine<GpuBackend>>,
    driver: FrameDriver,
    cursor: (f32, f32),
}

impl FluidApp {
    fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            window: None,
            engine: None,
            driver: FrameDriver::new(),
            cursor: (0.0, 0.0),
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        use anyhow::Context;

        let attributes = Window::default_attributes()
            .with_title("Fluid Cursor")
            .with_transparent(self.config.transparent);
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .context("failed to create window")?,
        );

        let context = pollster::block_on(GpuContext::new(window.clone(), self.config.transparent))
            .context("failed to acquire a GPU context")?;
        let capabilities = Capabilities::negotiate(&context.adapter)?;
        let backend = GpuBackend::new(context, capabilities);
        let engine = Engine::new(backend, capabilities, self.config.clone())?;

        window.request_redraw();
        self.window = Some(window);
        self.engine = Some(engine);
        Ok(())
    }

    fn surface_size(&self) -> (u32, u32) {
        self.window
            .as_ref()
            .map(|window| {
                let size = window.inner_size();
                (size.width, size.height)
            })
            .unwrap_or_default()
    }
}

impl ApplicationHandler for FluidApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.start(event_loop) {
            log::error!("fluid effect not started: {err:#}");
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let (width, height) = self.surface_size();
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => self.driver.stop_handle().stop(),
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = (position.x as f32, position.y as f32);
                let (x, y) = self.cursor;
                engine
                    .input_mut()
                    .pointer_move(PointerId::Mouse, x, y, width, height);
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => {
                let (x, y) = self.cursor;
                match state {
                    ElementState::Pressed => {
                        engine
                            .input_mut()
                            .pointer_down(PointerId::Mouse, x, y, width, height)
                    }
                    ElementState::Released => engine.input_mut().pointer_up(PointerId::Mouse),
                }
            }
            WindowEvent::Touch(touch) => {
                let id = PointerId::Touch(touch.id);
                let (x, y) = (touch.location.x as f32, touch.location.y as f32);
                let input = engine.input_mut();
                match touch.phase {
                    TouchPhase::Started => input.pointer_down(id, x, y, width, height),
                    TouchPhase::Moved => input.pointer_move(id, x, y, width, height),
                    TouchPhase::Ended | TouchPhase::Cancelled => input.pointer_up(id),
                }
            }
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape) => self.driver.stop_handle().stop(),
                    PhysicalKey::Code(KeyCode::KeyP) => engine.toggle_pause(),
                    PhysicalKey::Code(KeyCode::Space) => {
                        engine.input_mut().queue_random_splats(BURST_SPLATS)
                    }
                    _ => {}
                }
            }
            WindowEvent::RedrawRequested => {
                match self.driver.tick(engine, (width, height), Instant::now()) {
                    Ok(true) => {}
                    Ok(false) => event_loop.exit(),
                    Err(err) => {
                        log::error!("frame failed: {err}");
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.driver.stop_handle().is_stopped() {
            event_loop.exit();
            return;
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

/// Opens a window and runs the effect until it is closed or stopped.
pub fn run(config: SimulationConfig) -> anyhow::Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = FluidApp::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}
