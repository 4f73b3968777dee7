use anyhow::Context;
use fluid_cursor::SimulationConfig;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => SimulationConfig::load_from_disk(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => {
            let path = SimulationConfig::default_path();
            if path.exists() {
                match SimulationConfig::load_from_disk(&path) {
                    Ok(config) => config,
                    Err(err) => {
                        log::warn!("ignoring {}: {err:#}", path.display());
                        SimulationConfig::default()
                    }
                }
            } else {
                SimulationConfig::default()
            }
        }
    };

    fluid_cursor::app::run(config)
}
