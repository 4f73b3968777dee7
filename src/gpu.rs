//! wgpu context acquisition and the production [`Backend`].

use crate::backend::{check_feedback, Backend, Destination, Pass};
use crate::capabilities::Capabilities;
use crate::error::{FluidError, Result};
use crate::programs::{Keywords, ProgramLibrary, Stage};
use crate::targets::Filter;
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;
use winit::window::Window;

/// Device, queue and a surface configured on a window.
pub struct GpuContext {
    pub surface: wgpu::Surface<'static>,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
}

impl GpuContext {
    /// Native backends first, then GL.
    pub async fn new(window: Arc<Window>, transparent: bool) -> Result<Self> {
        for backends in [wgpu::Backends::PRIMARY, wgpu::Backends::GL] {
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends,
                ..Default::default()
            });
            let surface = match instance.create_surface(window.clone()) {
                Ok(surface) => surface,
                Err(err) => {
                    log::warn!("{backends:?}: cannot create surface: {err}");
                    continue;
                }
            };
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: Some(&surface),
                    force_fallback_adapter: false,
                })
                .await;
            let Some(adapter) = adapter else {
                log::info!("{backends:?}: no compatible adapter");
                continue;
            };
            log::info!("using adapter {:?}", adapter.get_info());
            return Self::from_adapter(window, surface, adapter, transparent).await;
        }
        Err(FluidError::NoContext)
    }

    async fn from_adapter(
        window: Arc<Window>,
        surface: wgpu::Surface<'static>,
        adapter: wgpu::Adapter,
        transparent: bool,
    ) -> Result<Self> {
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Fluid Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                        .using_resolution(adapter.limits()),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        // The display pass writes linear colour.
        let format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or(FluidError::NoContext)?;
        let alpha_mode = if transparent
            && surface_caps
                .alpha_modes
                .contains(&wgpu::CompositeAlphaMode::PreMultiplied)
        {
            wgpu::CompositeAlphaMode::PreMultiplied
        } else {
            surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto)
        };

        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        Ok(Self {
            surface,
            adapter,
            device,
            queue,
            config,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        self.surface.configure(&self.device, &self.config);
    }

    fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }
}

/// Texture plus the view passes bind and render into.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

/// One compiled variant: module, layouts, and a pipeline per output format.
pub struct GpuProgram {
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<(wgpu::TextureFormat, bool), wgpu::RenderPipeline>,
    label: String,
}

impl GpuProgram {
    /// Compiles `stage` for `keywords` and builds its pipelines for every
    /// format in `outputs` (`true` = premultiplied blending onto the
    /// surface). Validation errors become [`FluidError::ShaderCompile`].
    pub fn compile(
        device: &wgpu::Device,
        capabilities: &Capabilities,
        outputs: &[(wgpu::TextureFormat, bool)],
        stage: Stage,
        keywords: Keywords,
    ) -> Result<Self> {
        let label = format!("{} {:?}", stage.label(), keywords);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label.as_str()),
            source: wgpu::ShaderSource::Wgsl(stage.source(keywords).into()),
        });
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label.as_str()),
            entries: &layout_entries(stage, capabilities.linear_filtering),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label.as_str()),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let mut program = Self {
            module,
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
            label,
        };
        for &(format, blend) in outputs {
            program.pipeline(device, format, blend);
        }

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            let message = err.to_string();
            log::error!("{} program failed to compile:\n{message}", program.label);
            return Err(FluidError::ShaderCompile { stage, message });
        }
        Ok(program)
    }

    fn pipeline(
        &mut self,
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        blend: bool,
    ) -> &wgpu::RenderPipeline {
        let Self {
            ref module,
            ref pipeline_layout,
            ref mut pipelines,
            ref label,
            ..
        } = *self;
        pipelines.entry((format, blend)).or_insert_with(|| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label.as_str()),
                layout: Some(pipeline_layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: "vs_main",
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(if blend {
                            wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING
                        } else {
                            wgpu::BlendState::REPLACE
                        }),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
                cache: None,
            })
        })
    }
}

/// Uniform block at binding 0, then a texture/sampler pair per input.
fn layout_entries(stage: Stage, filterable: bool) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = vec![wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }];
    for slot in 0..stage.input_count() {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 1 + 2 * slot,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 2 + 2 * slot,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(if filterable {
                wgpu::SamplerBindingType::Filtering
            } else {
                wgpu::SamplerBindingType::NonFiltering
            }),
            count: None,
        });
    }
    entries
}

struct Samplers {
    linear: wgpu::Sampler,
    nearest: wgpu::Sampler,
}

impl Samplers {
    fn new(device: &wgpu::Device) -> Self {
        let sampler = |label, filter| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            })
        };
        Self {
            linear: sampler("Linear Sampler", wgpu::FilterMode::Linear),
            nearest: sampler("Nearest Sampler", wgpu::FilterMode::Nearest),
        }
    }

    fn get(&self, filter: Filter) -> &wgpu::Sampler {
        match filter {
            Filter::Linear => &self.linear,
            Filter::Nearest => &self.nearest,
        }
    }
}

struct Frame {
    output: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    /// Clear colour for the first surface pass of the frame.
    clear: Option<wgpu::Color>,
}

pub struct GpuBackend {
    context: GpuContext,
    capabilities: Capabilities,
    library: ProgramLibrary<GpuProgram>,
    samplers: Samplers,
    encoder: Option<wgpu::CommandEncoder>,
    frame: Option<Frame>,
}

impl GpuBackend {
    pub fn new(context: GpuContext, capabilities: Capabilities) -> Self {
        let samplers = Samplers::new(&context.device);
        Self {
            context,
            capabilities,
            library: ProgramLibrary::new(),
            samplers,
            encoder: None,
            frame: None,
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// Output formats every program is built for up front.
    fn outputs(&self) -> Vec<(wgpu::TextureFormat, bool)> {
        let caps = &self.capabilities;
        let mut outputs = vec![(caps.rgba, false)];
        for format in [caps.rg, caps.r] {
            if !outputs.contains(&(format, false)) {
                outputs.push((format, false));
            }
        }
        outputs.push((self.context.config.format, true));
        outputs
    }
}

impl Backend for GpuBackend {
    type Texture = GpuTexture;

    fn surface_size(&self) -> (u32, u32) {
        (self.context.config.width, self.context.config.height)
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.flush();
        self.context.resize(width, height);
    }

    fn max_texture_dimension(&self) -> u32 {
        self.context.device.limits().max_texture_dimension_2d
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        _filter: Filter,
    ) -> Result<GpuTexture> {
        let max = self.max_texture_dimension();
        if width > max || height > max {
            return Err(FluidError::TextureTooLarge { width, height, max });
        }
        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Fluid Field"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        log::trace!("allocated {width}x{height} {format:?} texture");
        Ok(GpuTexture { texture, view })
    }

    fn prepare(&mut self, stage: Stage, keywords: Keywords) -> Result<()> {
        let outputs = self.outputs();
        let Self {
            context,
            capabilities,
            library,
            ..
        } = self;
        library.program(stage, keywords, |stage, keywords| {
            GpuProgram::compile(&context.device, capabilities, &outputs, stage, keywords)
        })?;
        Ok(())
    }

    fn active_keywords(&self, stage: Stage) -> Option<Keywords> {
        self.library.active_keywords(stage)
    }

    fn blit(
        &mut self,
        pass: &Pass<'_, GpuTexture>,
        destination: Destination<'_, GpuTexture>,
    ) -> Result<()> {
        check_feedback(pass, &destination)?;
        let outputs = self.outputs();
        let Self {
            context,
            capabilities,
            library,
            samplers,
            encoder,
            frame,
        } = self;
        let device = &context.device;

        let (view, format, blend, load) = match destination {
            Destination::Target(target) => (
                &target.texture.view,
                target.format,
                false,
                wgpu::LoadOp::Load,
            ),
            Destination::Surface => {
                let frame = frame.as_mut().ok_or(FluidError::NoFrame)?;
                let load = match frame.clear.take() {
                    Some(color) => wgpu::LoadOp::Clear(color),
                    None => wgpu::LoadOp::Load,
                };
                (&frame.view, context.config.format, true, load)
            }
        };

        let stage = pass.stage();
        let program = library.program(stage, pass.keywords(), |stage, keywords| {
            GpuProgram::compile(device, capabilities, &outputs, stage, keywords)
        })?;

        let uniforms = pass.uniforms();
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Pass Uniforms"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bindings = pass.bindings();
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buffer.as_entire_binding(),
        }];
        for binding in &bindings {
            entries.push(wgpu::BindGroupEntry {
                binding: 1 + 2 * binding.slot,
                resource: wgpu::BindingResource::TextureView(&binding.target.texture.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: 2 + 2 * binding.slot,
                resource: wgpu::BindingResource::Sampler(samplers.get(binding.target.filter)),
            });
        }
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(stage.label()),
            layout: &program.bind_group_layout,
            entries: &entries,
        });

        let pipeline = program.pipeline(device, format, blend);
        let encoder = encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Fluid Encoder"),
            })
        });
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(stage.label()),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        render_pass.draw(0..3, 0..1);
        Ok(())
    }

    fn begin_frame(&mut self, clear_color: [f32; 4]) -> Result<bool> {
        let output = match self.context.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::debug!("surface lost or outdated, reconfiguring");
                self.context.reconfigure();
                return Ok(false);
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("timed out acquiring a surface frame");
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let [r, g, b, a] = clear_color.map(f64::from);
        self.frame = Some(Frame {
            output,
            view,
            clear: Some(wgpu::Color { r, g, b, a }),
        });
        Ok(true)
    }

    fn end_frame(&mut self) {
        self.flush();
        if let Some(frame) = self.frame.take() {
            frame.output.present();
        }
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.context.queue.submit(std::iter::once(encoder.finish()));
        }
    }
}
