//! Compiles every program variant on a real adapter. Skipped when the
//! machine has none.

use fluid_cursor::capabilities::Capabilities;
use fluid_cursor::gpu::GpuProgram;
use fluid_cursor::programs::{Keyword, Keywords, Stage};

fn adapter() -> Option<wgpu::Adapter> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
}

#[test]
fn every_variant_compiles() {
    let Some(adapter) = adapter() else {
        eprintln!("no adapter available, skipping");
        return;
    };
    let capabilities = match Capabilities::negotiate(&adapter) {
        Ok(capabilities) => capabilities,
        Err(err) => {
            eprintln!("adapter cannot run the effect ({err}), skipping");
            return;
        }
    };
    let (device, _queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("Shader Test Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                .using_resolution(adapter.limits()),
            memory_hints: Default::default(),
        },
        None,
    ))
    .unwrap();

    let outputs = [
        (capabilities.rgba, false),
        (capabilities.rg, false),
        (capabilities.r, false),
        (wgpu::TextureFormat::Bgra8Unorm, true),
    ];
    let variants = [
        Keywords::NONE,
        Keywords::NONE.with(Keyword::Shading),
        Keywords::NONE.with(Keyword::ManualFiltering),
    ];
    for stage in Stage::ALL {
        for keywords in variants {
            if let Err(err) = GpuProgram::compile(&device, &capabilities, &outputs, stage, keywords)
            {
                panic!("{stage:?} {keywords:?}: {err}");
            }
        }
    }
}
