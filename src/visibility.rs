use crate::config::GrassConfig;
use crate::frustum::Frustum;
use crate::instancer::CellGpu;
use crate::mesh::BLADE_HEIGHT;
use crate::population::WORKGROUP_SIZE;
use glam::{Mat4, Vec3};

/// Frame-level culling uniform, written once per frame and shared by every
/// cell dispatch. Field order matches the WGSL struct.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameCullParams {
    pub view_proj: [[f32; 4]; 4],
    pub planes: [[f32; 4]; 6],
    pub camera_position: [f32; 3],
    pub max_view_distance: f32,
    pub lod_threshold_1: f32,
    pub lod_threshold_2: f32,
    pub depth_bias: f32,
    pub box_half_y: f32,
    pub depth_size: [f32; 2],
    pub box_half_xz: f32,
    pub depth_ready: u32,
}

impl FrameCullParams {
    pub fn new(
        view_proj: Mat4,
        frustum: &Frustum,
        camera_position: Vec3,
        grass: &GrassConfig,
        depth_size: (u32, u32),
        depth_ready: bool,
    ) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            planes: frustum.to_shader_planes(),
            camera_position: camera_position.to_array(),
            max_view_distance: grass.max_view_distance,
            lod_threshold_1: grass.lod_threshold_1,
            lod_threshold_2: grass.lod_threshold_2,
            depth_bias: grass.depth_bias,
            // Sub-cell boxes span the tallest blade plus terrain variation
            // inside the footprint.
            box_half_y: BLADE_HEIGHT * grass.scale_max[1] + grass.sub_cell_size * 0.5,
            depth_size: [depth_size.0 as f32, depth_size.1 as f32],
            box_half_xz: grass.sub_cell_size * 0.5,
            depth_ready: depth_ready as u32,
        }
    }
}

/// Per-cell culling uniform, written once at population time.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CellCullParams {
    pub num_sub_cells: u32,
    pub _padding: [u32; 3],
}

impl CellCullParams {
    pub fn new(num_sub_cells: u32) -> Self {
        Self { num_sub_cells, _padding: [0; 3] }
    }
}

/// LOD band for a sub-cell at `distance`. Band edges belong to the coarser
/// side, so a ratio exactly at a threshold drops down a level.
pub fn select_lod(distance: f32, max_view_distance: f32, t1: f32, t2: f32) -> usize {
    let ratio = if max_view_distance > 0.0 { distance / max_view_distance } else { 1.0 };
    if ratio < t1 {
        0
    } else if ratio < t2 {
        1
    } else {
        2
    }
}

/// Depth test mirrored by the occlusion kernel: the candidate survives while
/// its device depth is within `bias` of the stored front surface.
pub fn depth_occludes(candidate: f32, stored: f32, bias: f32) -> bool {
    candidate > stored + bias
}

/// One compute dispatch per cell classifies its sub-cells into three LOD
/// visible sets behind distance, frustum and occlusion gates. The counters
/// feeding the indirect draws are cleared up front and copied out by the
/// caller after the pass.
pub struct VisibilityPipeline {
    pipeline: wgpu::ComputePipeline,
    frame_layout: wgpu::BindGroupLayout,
    cell_layout: wgpu::BindGroupLayout,
    frame_params_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
}

impl VisibilityPipeline {
    pub fn new(device: &wgpu::Device, depth_view: &wgpu::TextureView) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("culling shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../assets/shaders/culling.wgsl").into()),
        });

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("culling frame layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let cell_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("culling cell layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage(1, true),
                storage(2, false),
                storage(3, false),
                storage(4, false),
                storage(5, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("culling pipeline layout"),
            bind_group_layouts: &[&frame_layout, &cell_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("culling pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("cull_sub_cells"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        let frame_params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("culling frame params"),
            size: std::mem::size_of::<FrameCullParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_bind_group =
            Self::build_frame_bind_group(device, &frame_layout, &frame_params_buffer, depth_view);

        Self { pipeline, frame_layout, cell_layout, frame_params_buffer, frame_bind_group }
    }

    fn build_frame_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        params: &wgpu::Buffer,
        depth_view: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("culling frame bind group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(depth_view),
                },
            ],
        })
    }

    /// The depth texture is recreated on resize; the frame bind group must
    /// follow it.
    pub fn set_depth_view(&mut self, device: &wgpu::Device, depth_view: &wgpu::TextureView) {
        self.frame_bind_group = Self::build_frame_bind_group(
            device,
            &self.frame_layout,
            &self.frame_params_buffer,
            depth_view,
        );
    }

    pub fn write_frame_params(&self, queue: &wgpu::Queue, params: &FrameCullParams) {
        queue.write_buffer(&self.frame_params_buffer, 0, bytemuck::bytes_of(params));
    }

    pub fn cell_layout(&self) -> &wgpu::BindGroupLayout {
        &self.cell_layout
    }

    pub fn create_cell_bind_group(
        &self,
        device: &wgpu::Device,
        cull_params: &wgpu::Buffer,
        sub_cells: &wgpu::Buffer,
        visible: &[wgpu::Buffer; 3],
        counters: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("culling cell bind group"),
            layout: &self.cell_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: cull_params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: sub_cells.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: visible[0].as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: visible[1].as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: visible[2].as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: counters.as_entire_binding() },
            ],
        })
    }

    /// Clears every cell's counters, then dispatches one workgroup batch per
    /// cell inside a single compute pass.
    pub fn record(&self, encoder: &mut wgpu::CommandEncoder, cells: &[&CellGpu]) {
        if cells.is_empty() {
            return;
        }
        for gpu in cells {
            encoder.clear_buffer(&gpu.visible_counters, 0, None);
        }
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("grass culling pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.frame_bind_group, &[]);
        for gpu in cells {
            pass.set_bind_group(1, &gpu.cull_bind_group, &[]);
            pass.dispatch_workgroups(gpu.num_sub_cells.div_ceil(WORKGROUP_SIZE), 1, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lod_band_edges_fall_to_the_coarser_level() {
        let max = 256.0;
        assert_eq!(select_lod(0.0, max, 0.25, 0.5), 0);
        assert_eq!(select_lod(63.9, max, 0.25, 0.5), 0);
        assert_eq!(select_lod(64.0, max, 0.25, 0.5), 1, "ratio == t1 is LOD 1");
        assert_eq!(select_lod(127.9, max, 0.25, 0.5), 1);
        assert_eq!(select_lod(128.0, max, 0.25, 0.5), 2, "ratio == t2 is LOD 2");
        assert_eq!(select_lod(1000.0, max, 0.25, 0.5), 2);
    }

    #[test]
    fn degenerate_view_distance_coarsens_everything() {
        assert_eq!(select_lod(1.0, 0.0, 0.25, 0.5), 2);
    }

    #[test]
    fn occlusion_keeps_candidates_within_bias_of_the_surface() {
        assert!(!depth_occludes(0.5, 0.5, 0.0001));
        assert!(!depth_occludes(0.50005, 0.5, 0.0001));
        assert!(depth_occludes(0.502, 0.5, 0.0001));
        assert!(!depth_occludes(0.4, 0.5, 0.0001), "nearer than the surface");
    }

    #[test]
    fn uniform_layouts_match_the_shader_structs() {
        assert_eq!(std::mem::size_of::<FrameCullParams>(), 208);
        assert_eq!(std::mem::size_of::<CellCullParams>(), 16);
        assert_eq!(std::mem::offset_of!(FrameCullParams, planes), 64);
        assert_eq!(std::mem::offset_of!(FrameCullParams, camera_position), 160);
        assert_eq!(std::mem::offset_of!(FrameCullParams, depth_size), 192);
    }
}
