use crate::camera3d::Camera3D;
use crate::config::{AppConfig, GrassConfig};
use crate::draw::{draw_cell, patch_draw_args, shadow_gate, VISIBLE_COUNTER_BYTES};
use crate::frustum::Frustum;
use crate::grid::Grid;
use crate::instancer::CellGpu;
use crate::mesh::GrassMeshSet;
use crate::population::PopulationPipeline;
use crate::terrain::{Terrain, TerrainGpu};
use crate::visibility::{FrameCullParams, VisibilityPipeline};
use anyhow::{Context, Result};
use std::sync::Arc;
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::window::Window;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Frame-level uniform shared by the terrain and grass render passes.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameDrawParams {
    view_proj: [[f32; 4]; 4],
    camera_position: [f32; 3],
    time: f32,
    tint: [f32; 4],
    ao_color: [f32; 4],
    wind: [f32; 4],
    fade_start: f32,
    fade_end: f32,
    max_view_distance: f32,
    deform_low: f32,
    deform_top: f32,
    _padding: [f32; 3],
}

pub struct Renderer {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    _depth_texture: wgpu::Texture,
    depth_view: wgpu::TextureView,
    depth_ready: bool,

    frame_params_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    grass_cell_layout: wgpu::BindGroupLayout,
    grass_pipeline: wgpu::RenderPipeline,
    terrain_pipeline: wgpu::RenderPipeline,
    terrain_vertex_buffer: wgpu::Buffer,
    terrain_index_buffer: wgpu::Buffer,
    terrain_index_count: u32,
    meshes: GrassMeshSet,

    pub terrain_gpu: TerrainGpu,
    pub population: PopulationPipeline,
    pub visibility: VisibilityPipeline,
}

impl Renderer {
    pub fn new(window: Arc<Window>, config: &AppConfig, terrain: &Terrain) -> Result<Self> {
        pollster::block_on(Self::init(window, config, terrain))
    }

    fn choose_surface_format(formats: &[wgpu::TextureFormat]) -> wgpu::TextureFormat {
        formats.iter().copied().find(|f| f.is_srgb()).unwrap_or(formats[0])
    }

    async fn init(window: Arc<Window>, config: &AppConfig, terrain: &Terrain) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let surface =
            instance.create_surface(window.clone()).context("Failed to create surface")?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("No suitable GPU adapter")?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("meadow device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::default(),
            })
            .await
            .context("Failed to create device")?;

        let caps = surface.get_capabilities(&adapter);
        let format = Self::choose_surface_format(&caps.formats);
        let size = window.inner_size();
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: if config.window.vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let (depth_texture, depth_view) =
            Self::create_depth(&device, surface_config.width, surface_config.height);

        let frame_params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame draw params"),
            size: std::mem::size_of::<FrameDrawParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame bind group"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_params_buffer.as_entire_binding(),
            }],
        });

        let readonly_storage = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let grass_cell_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("grass cell layout"),
            entries: &[
                readonly_storage(0),
                readonly_storage(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let grass_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("grass shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../assets/shaders/grass.wgsl").into()),
        });
        let grass_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("grass pipeline layout"),
                bind_group_layouts: &[&frame_layout, &grass_cell_layout],
                push_constant_ranges: &[],
            });
        let grass_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("grass pipeline"),
            layout: Some(&grass_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &grass_shader,
                entry_point: Some("vs_grass"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[GrassMeshSet::vertex_layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &grass_shader,
                entry_point: Some("fs_grass"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let terrain_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("terrain shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../assets/shaders/terrain.wgsl").into()),
        });
        let terrain_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("terrain pipeline layout"),
                bind_group_layouts: &[&frame_layout],
                push_constant_ranges: &[],
            });
        let terrain_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("terrain pipeline"),
            layout: Some(&terrain_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &terrain_shader,
                entry_point: Some("vs_terrain"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[Self::terrain_vertex_layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &terrain_shader,
                entry_point: Some("fs_terrain"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let (vertices, indices) = terrain.build_render_mesh(257);
        let terrain_vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("terrain VB"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let terrain_index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("terrain IB"),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let terrain_gpu = TerrainGpu::new(&device, &queue, terrain);
        let population = PopulationPipeline::new(&device, &terrain_gpu.bind_group_layout);
        let visibility = VisibilityPipeline::new(&device, &depth_view);
        let meshes = GrassMeshSet::build(&device);

        eprintln!(
            "[renderer] initialized {}x{} ({:?})",
            surface_config.width, surface_config.height, format
        );

        Ok(Self {
            surface,
            device,
            queue,
            config: surface_config,
            _depth_texture: depth_texture,
            depth_view,
            depth_ready: false,
            frame_params_buffer,
            frame_bind_group,
            grass_cell_layout,
            grass_pipeline,
            terrain_pipeline,
            terrain_vertex_buffer,
            terrain_index_buffer,
            terrain_index_count: indices.len() as u32,
            meshes,
            terrain_gpu,
            population,
            visibility,
        })
    }

    fn terrain_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
        const ATTRIBUTES: [wgpu::VertexAttribute; 2] = [
            wgpu::VertexAttribute {
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
                offset: 0,
            },
            wgpu::VertexAttribute {
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x3,
                offset: 12,
            },
        ];
        wgpu::VertexBufferLayout {
            array_stride: 24,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        }
    }

    fn create_depth(
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        PhysicalSize::new(self.config.width, self.config.height)
    }

    pub fn resize(&mut self, size: PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            return;
        }
        self.config.width = size.width;
        self.config.height = size.height;
        self.surface.configure(&self.device, &self.config);
        let (texture, view) = Self::create_depth(&self.device, size.width, size.height);
        self._depth_texture = texture;
        self.depth_view = view;
        self.visibility.set_depth_view(&self.device, &self.depth_view);
        // The fresh depth texture holds garbage until the next present.
        self.depth_ready = false;
    }

    /// Runs any population queued by the last camera transition.
    pub fn populate_cells(&self, grid: &mut Grid, grass: &GrassConfig) {
        grid.populate_pending(
            &self.device,
            &self.queue,
            &self.population,
            &self.visibility,
            &self.grass_cell_layout,
            &self.terrain_gpu,
            grass,
        );
    }

    /// One frame: cull every renderable cell on the GPU, copy the visible
    /// counters toward the host, then draw terrain and grass. Draw args were
    /// patched from the freshest completed readback, so instance counts run
    /// one frame behind the indices they draw.
    pub fn render(
        &mut self,
        grid: &mut Grid,
        camera: &Camera3D,
        grass: &GrassConfig,
        elapsed: f32,
    ) -> Result<()> {
        let output = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.config);
                return Ok(());
            }
            Err(err) => return Err(err).context("Failed to acquire frame"),
        };
        let target = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let viewport = self.size();
        let view_proj = camera.view_projection(viewport);
        let frustum = Frustum::from_view_projection(&view_proj);
        grid.update_host_visibility(&frustum);
        let ids = grid.renderable_cells();

        let draw_params = FrameDrawParams {
            view_proj: view_proj.to_cols_array_2d(),
            camera_position: camera.position.to_array(),
            time: elapsed,
            tint: grass.tint,
            ao_color: grass.ao_color,
            wind: [
                grass.wind_noise_scale,
                grass.wind_strength,
                grass.wind_speed[0],
                grass.wind_speed[1],
            ],
            fade_start: grass.fade_start,
            fade_end: grass.fade_end,
            max_view_distance: grass.max_view_distance,
            deform_low: grass.mesh_deformation_limit_low,
            deform_top: grass.mesh_deformation_limit_top,
            _padding: [0.0; 3],
        };
        self.queue.write_buffer(&self.frame_params_buffer, 0, bytemuck::bytes_of(&draw_params));
        self.visibility.write_frame_params(
            &self.queue,
            &FrameCullParams::new(
                view_proj,
                &frustum,
                camera.position,
                grass,
                (self.config.width, self.config.height),
                self.depth_ready,
            ),
        );

        let index_counts = self.meshes.index_counts();
        for &id in &ids {
            let cell = grid.cell(id);
            let shadowed = shadow_gate(grass.cast_shadows, cell.is_camera_cell, cell.visible);
            if let Some(gpu) = cell.gpu() {
                let counts = gpu.readback.latest().unwrap_or([0; 3]);
                patch_draw_args(&self.queue, gpu, index_counts, counts);
                gpu.write_draw_params(&self.queue, shadowed);
            }
        }

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame encoder"),
        });
        {
            let gpus: Vec<&CellGpu> = ids.iter().filter_map(|&id| grid.cell(id).gpu()).collect();
            self.visibility.record(&mut encoder, &gpus);
        }
        for &id in &ids {
            if let Some(gpu) = grid.cell_mut(id).gpu_mut() {
                let staging = gpu.readback.acquire(&self.device)?;
                encoder.copy_buffer_to_buffer(
                    &gpu.visible_counters,
                    0,
                    staging,
                    0,
                    VISIBLE_COUNTER_BYTES,
                );
            }
        }

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("scene pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.35,
                            g: 0.52,
                            b: 0.72,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            pass.set_pipeline(&self.terrain_pipeline);
            pass.set_bind_group(0, &self.frame_bind_group, &[]);
            pass.set_vertex_buffer(0, self.terrain_vertex_buffer.slice(..));
            pass.set_index_buffer(self.terrain_index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..self.terrain_index_count, 0, 0..1);

            pass.set_pipeline(&self.grass_pipeline);
            for &id in &ids {
                if let Some(gpu) = grid.cell(id).gpu() {
                    draw_cell(&mut pass, gpu, &self.meshes);
                }
            }
        }

        self.queue.submit(Some(encoder.finish()));
        for &id in &ids {
            if let Some(gpu) = grid.cell_mut(id).gpu_mut() {
                gpu.readback.request_map();
            }
        }
        let _ = self.device.poll(wgpu::PollType::Poll);
        output.present();
        self.depth_ready = true;
        Ok(())
    }
}
