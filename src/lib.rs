//! Real-time stable-fluids cursor trail.
//!
//! Pointer and touch motion injects force and colour into a GPU fluid
//! solver whose dye field is drawn over the window every frame.

pub mod app;
pub mod backend;
pub mod capabilities;
pub mod config;
pub mod cpu;
pub mod driver;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod input;
pub mod programs;
pub mod render;
pub mod stepper;
pub mod targets;

pub use backend::{Backend, Destination, Pass};
pub use capabilities::Capabilities;
pub use config::SimulationConfig;
pub use engine::Engine;
pub use error::{FluidError, Result};
