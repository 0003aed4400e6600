use crate::cell::CellState;
use crate::draw::{CellDrawParams, ReadbackRing, DRAW_ARGS_BYTES, VISIBLE_COUNTER_BYTES};
use crate::population::PopulatedBuffers;
use crate::visibility::{CellCullParams, VisibilityPipeline};
use glam::Vec3;
use wgpu::util::DeviceExt;

/// GPU resources owned by one populated cell. Everything here is exclusive
/// to the owning instancer; dropping the struct releases the buffers once
/// any in-flight GPU work is done with them.
pub struct CellGpu {
    pub sub_cell_buffer: wgpu::Buffer,
    pub transform_buffer: wgpu::Buffer,
    pub visible_buffers: [wgpu::Buffer; 3],
    pub visible_counters: wgpu::Buffer,
    pub args_buffer: wgpu::Buffer,
    pub cull_params_buffer: wgpu::Buffer,
    pub cull_bind_group: wgpu::BindGroup,
    pub draw_params_buffer: wgpu::Buffer,
    pub draw_bind_groups: [wgpu::BindGroup; 3],
    pub readback: ReadbackRing,
    pub num_sub_cells: u32,
}

impl CellGpu {
    /// Wraps freshly populated buffers with everything the per-frame passes
    /// need. Visible sets are sized for the worst case of every placed
    /// instance landing in one LOD band.
    pub fn assemble(
        device: &wgpu::Device,
        visibility: &VisibilityPipeline,
        draw_layout: &wgpu::BindGroupLayout,
        parts: PopulatedBuffers,
        label: &str,
    ) -> Self {
        let visible_buffers: [wgpu::Buffer; 3] = std::array::from_fn(|lod| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{label} visible lod{lod}")),
                size: parts.true_instance_count as u64 * 4,
                usage: wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            })
        });
        let visible_counters = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{label} visible counters")),
            size: VISIBLE_COUNTER_BYTES,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let args_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{label} draw args")),
            size: DRAW_ARGS_BYTES,
            usage: wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let cull_params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} cull params")),
            contents: bytemuck::bytes_of(&CellCullParams::new(parts.num_sub_cells)),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let draw_params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} draw params")),
            contents: bytemuck::bytes_of(&CellDrawParams::new(false)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let cull_bind_group = visibility.create_cell_bind_group(
            device,
            &cull_params_buffer,
            &parts.sub_cell_buffer,
            &visible_buffers,
            &visible_counters,
        );
        let draw_bind_groups: [wgpu::BindGroup; 3] = std::array::from_fn(|lod| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{label} draw bind group lod{lod}")),
                layout: draw_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: parts.transform_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: visible_buffers[lod].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: draw_params_buffer.as_entire_binding(),
                    },
                ],
            })
        });
        let readback = ReadbackRing::new(device, label);

        Self {
            sub_cell_buffer: parts.sub_cell_buffer,
            transform_buffer: parts.transform_buffer,
            visible_buffers,
            visible_counters,
            args_buffer,
            cull_params_buffer,
            cull_bind_group,
            draw_params_buffer,
            draw_bind_groups,
            readback,
            num_sub_cells: parts.num_sub_cells,
        }
    }

    pub fn write_draw_params(&self, queue: &wgpu::Queue, shadowed: bool) {
        queue.write_buffer(
            &self.draw_params_buffer,
            0,
            bytemuck::bytes_of(&CellDrawParams::new(shadowed)),
        );
    }
}

/// One grid cell: anchor, lifecycle state, and the GPU resources it owns
/// while populated. Created once at grid build time and reused for the
/// grid's whole lifetime.
pub struct Instancer {
    id: usize,
    position: Vec3,
    corners: [Vec3; 10],
    state: CellState,
    initialized: bool,
    pub is_camera_cell: bool,
    pub visible: bool,
    true_instance_count: u32,
    gpu: Option<CellGpu>,
}

impl Instancer {
    pub fn new(id: usize, position: Vec3, corners: [Vec3; 10]) -> Self {
        Self {
            id,
            position,
            corners,
            state: CellState::Idle,
            initialized: false,
            is_camera_cell: false,
            visible: true,
            true_instance_count: 0,
            gpu: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn corners(&self) -> &[Vec3; 10] {
        &self.corners
    }

    pub fn state(&self) -> CellState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn true_instance_count(&self) -> u32 {
        self.true_instance_count
    }

    /// Applies a target state and reports whether this transition must run
    /// population. Population triggers exactly once per activation: the
    /// `initialized` guard stays up across PREWARM/RENDER re-entries and
    /// falls only when resources are released. `Empty` is terminal.
    pub fn apply_target(&mut self, target: CellState) -> bool {
        if self.state == CellState::Empty && target != CellState::Idle {
            // Permanently skipped; release requests still land in the
            // idempotent no-op below.
            if matches!(target, CellState::Release | CellState::Empty) {
                self.release_resources();
            }
            return false;
        }
        match target {
            CellState::Release => {
                self.release_resources();
                self.state = CellState::Idle;
                false
            }
            CellState::Empty => {
                self.release_resources();
                self.state = CellState::Empty;
                false
            }
            CellState::Idle => {
                self.release_resources();
                self.state = CellState::Idle;
                false
            }
            CellState::Prewarm | CellState::Render => {
                self.state = target;
                if self.initialized {
                    false
                } else {
                    self.initialized = true;
                    true
                }
            }
        }
    }

    /// Idempotent: releasing a cell that never allocated, or that released
    /// already, is a no-op. Dropping the handles schedules destruction after
    /// any in-flight GPU work completes.
    pub fn release_resources(&mut self) {
        self.initialized = false;
        self.true_instance_count = 0;
        self.gpu = None;
    }

    /// Population discovered zero valid placements; the cell is done for good.
    pub fn mark_empty(&mut self) {
        self.release_resources();
        self.state = CellState::Empty;
    }

    /// Population failed (readback error class); back to idle so a later
    /// proximity event can retry.
    pub fn abort_population(&mut self) {
        self.release_resources();
        self.state = CellState::Idle;
    }

    pub fn complete_population(&mut self, true_instance_count: u32) {
        self.true_instance_count = true_instance_count;
    }

    pub fn install_gpu(&mut self, gpu: CellGpu) {
        self.gpu = Some(gpu);
    }

    pub fn gpu(&self) -> Option<&CellGpu> {
        self.gpu.as_ref()
    }

    pub fn gpu_mut(&mut self) -> Option<&mut CellGpu> {
        self.gpu.as_mut()
    }

    /// Whether the per-frame pipelines may touch this cell. A RENDER cell
    /// whose buffers are absent (mid-teardown or not yet populated) is
    /// treated as empty for the frame instead of faulting.
    pub fn can_render(&self) -> bool {
        self.state == CellState::Render && self.initialized && self.visible && self.gpu.is_some()
    }
}
