use crate::cell::{build_sub_cells, SubCell};
use crate::config::GrassConfig;
use crate::terrain::TerrainSampler;
use anyhow::{Context, Result};
use glam::{Mat4, Quat, Vec2, Vec3};
use wgpu::util::DeviceExt;

pub const WORKGROUP_SIZE: u32 = 64;
/// One `mat4x4<f32>` per placed instance.
pub const TRANSFORM_STRIDE: u64 = 64;

/// Uniform consumed by both population entry points. Field order matches the
/// WGSL struct; vec3 fields pack a trailing scalar into their padding.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PopulationParams {
    pub cell_position: [f32; 3],
    pub cell_seed: u32,
    pub num_sub_cells: u32,
    pub candidates_per_sub_cell: u32,
    pub sub_cell_size: f32,
    pub grass_threshold: f32,
    pub min_grass_height: f32,
    pub slope_threshold: f32,
    pub max_y_rotation: f32,
    pub scale_noise_scale: f32,
    pub scale_min: [f32; 3],
    pub rotate_to_ground_normal: u32,
    pub scale_max: [f32; 3],
    pub random_y_rotation: u32,
}

impl PopulationParams {
    pub fn new(
        cell_position: Vec3,
        cell_seed: u32,
        num_sub_cells: u32,
        candidates_per_sub_cell: u32,
        grass: &GrassConfig,
    ) -> Self {
        Self {
            cell_position: cell_position.to_array(),
            cell_seed,
            num_sub_cells,
            candidates_per_sub_cell,
            sub_cell_size: grass.sub_cell_size,
            grass_threshold: grass.grass_threshold,
            min_grass_height: grass.min_grass_height,
            slope_threshold: grass.slope_threshold,
            max_y_rotation: grass.max_y_rotation_radians(),
            scale_noise_scale: grass.scale_noise_scale,
            scale_min: grass.scale_min,
            rotate_to_ground_normal: grass.rotate_to_ground_normal as u32,
            scale_max: grass.scale_max,
            random_y_rotation: grass.random_y_rotation as u32,
        }
    }
}

/// Buffers produced by a successful population run. Ownership moves into the
/// cell's `CellGpu` once the per-frame bind groups are assembled.
pub struct PopulatedBuffers {
    pub sub_cell_buffer: wgpu::Buffer,
    pub transform_buffer: wgpu::Buffer,
    pub num_sub_cells: u32,
    pub true_instance_count: u32,
}

pub enum PopulationOutcome {
    Placed(PopulatedBuffers),
    /// The count phase accepted nothing; the cell is permanently empty.
    Empty,
}

/// Two-phase placement: a count dispatch reserves a contiguous range per
/// sub-cell through a global atomic, the exact total is read back, and a
/// second dispatch replays the same candidate stream into a transform
/// buffer of exactly that size.
pub struct PopulationPipeline {
    count_pipeline: wgpu::ComputePipeline,
    place_pipeline: wgpu::ComputePipeline,
    cell_count_layout: wgpu::BindGroupLayout,
    cell_place_layout: wgpu::BindGroupLayout,
    params_buffer: wgpu::Buffer,
    count_staging: wgpu::Buffer,
}

impl PopulationPipeline {
    pub fn new(device: &wgpu::Device, terrain_layout: &wgpu::BindGroupLayout) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("population shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../assets/shaders/population.wgsl").into()),
        });

        let storage_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let params_entry = wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        // The count phase runs before the transform buffer can exist, so the
        // two entry points get separate layouts over the shared module.
        let cell_count_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("population count cell layout"),
            entries: &[params_entry, storage_entry(1), storage_entry(2)],
        });
        let cell_place_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("population place cell layout"),
            entries: &[params_entry, storage_entry(1), storage_entry(3)],
        });

        let count_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("population count pipeline layout"),
                bind_group_layouts: &[terrain_layout, &cell_count_layout],
                push_constant_ranges: &[],
            });
        let place_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("population place pipeline layout"),
                bind_group_layouts: &[terrain_layout, &cell_place_layout],
                push_constant_ranges: &[],
            });

        let count_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("population count pipeline"),
            layout: Some(&count_pipeline_layout),
            module: &module,
            entry_point: Some("count_instances"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        let place_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("population place pipeline"),
            layout: Some(&place_pipeline_layout),
            module: &module,
            entry_point: Some("place_instances"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("population params"),
            size: std::mem::size_of::<PopulationParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let count_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("population count staging"),
            size: 4,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            count_pipeline,
            place_pipeline,
            cell_count_layout,
            cell_place_layout,
            params_buffer,
            count_staging,
        }
    }

    /// Populates one cell, blocking on the count readback between the two
    /// phases. Cells run one at a time, so the shared params uniform and
    /// count staging buffer are reused safely across calls.
    pub fn populate(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        terrain_bind_group: &wgpu::BindGroup,
        cell_position: Vec3,
        cell_seed: u32,
        grass: &GrassConfig,
    ) -> Result<PopulationOutcome> {
        let (sub_cells, _cols) = build_sub_cells(cell_position, grass.cell_size, grass.sub_cell_size);
        let num_sub_cells = sub_cells.len() as u32;
        let candidates = grass.candidates_per_sub_cell(num_sub_cells);
        if num_sub_cells == 0 || candidates == 0 {
            return Ok(PopulationOutcome::Empty);
        }

        let params =
            PopulationParams::new(cell_position, cell_seed, num_sub_cells, candidates, grass);
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        let sub_cell_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("cell sub-cells"),
            contents: bytemuck::cast_slice(&sub_cells),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let counter_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("population counter"),
            contents: bytemuck::bytes_of(&0u32),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });
        let count_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("population count bind group"),
            layout: &self.cell_count_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: self.params_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: sub_cell_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: counter_buffer.as_entire_binding() },
            ],
        });

        let workgroups = num_sub_cells.div_ceil(WORKGROUP_SIZE);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("population count encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("population count pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.count_pipeline);
            pass.set_bind_group(0, terrain_bind_group, &[]);
            pass.set_bind_group(1, &count_bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        encoder.copy_buffer_to_buffer(&counter_buffer, 0, &self.count_staging, 0, 4);
        queue.submit(Some(encoder.finish()));

        let total = self.read_count_blocking(device)?;
        if total == 0 {
            return Ok(PopulationOutcome::Empty);
        }

        let transform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cell transforms"),
            size: total as u64 * TRANSFORM_STRIDE,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let place_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("population place bind group"),
            layout: &self.cell_place_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: self.params_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: sub_cell_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: transform_buffer.as_entire_binding() },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("population place encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("population place pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.place_pipeline);
            pass.set_bind_group(0, terrain_bind_group, &[]);
            pass.set_bind_group(1, &place_bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        queue.submit(Some(encoder.finish()));

        Ok(PopulationOutcome::Placed(PopulatedBuffers {
            sub_cell_buffer,
            transform_buffer,
            num_sub_cells,
            true_instance_count: total,
        }))
    }

    fn read_count_blocking(&self, device: &wgpu::Device) -> Result<u32> {
        let slice = self.count_staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait { submission_index: None, timeout: None })
            .context("waiting for population count readback")?;
        rx.recv()
            .context("population count channel closed before a result arrived")?
            .context("mapping population count staging buffer")?;
        let total = {
            let view = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, u32>(&view)[0]
        };
        self.count_staging.unmap();
        Ok(total)
    }
}

/// Seed for one cell's candidate stream, stable across populate/release
/// cycles so a revisited cell reproduces the same field.
pub fn cell_seed(world_seed: u32, cell_id: u32) -> u32 {
    pcg(world_seed ^ pcg(cell_id))
}

/// PCG integer hash. The GPU kernels run the same function, so the CPU
/// reference below reproduces their candidate stream exactly.
pub fn pcg(v: u32) -> u32 {
    let state = v.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28).wrapping_add(4))) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Top 24 hash bits as a float in [0, 1); exact in f32 on CPU and GPU.
pub fn unorm(h: u32) -> f32 {
    (h >> 8) as f32 / 16_777_216.0
}

fn candidate_seed(cell_seed: u32, sub_cell: u32, candidate: u32) -> u32 {
    pcg(cell_seed ^ pcg(sub_cell ^ pcg(candidate)))
}

fn lattice_hash(ix: i32, iz: i32) -> f32 {
    unorm(pcg((ix as u32) ^ pcg(iz as u32)))
}

/// Value noise on an integer lattice with smoothstep interpolation. Drives
/// the blade-height modulation.
fn value_noise_01(p: Vec2) -> f32 {
    let cell = p.floor();
    let f = p - cell;
    let f = f * f * (Vec2::splat(3.0) - 2.0 * f);
    let (ix, iz) = (cell.x as i32, cell.y as i32);
    let h00 = lattice_hash(ix, iz);
    let h10 = lattice_hash(ix + 1, iz);
    let h01 = lattice_hash(ix, iz + 1);
    let h11 = lattice_hash(ix + 1, iz + 1);
    let top = h00 + (h10 - h00) * f.x;
    let bottom = h01 + (h11 - h01) * f.x;
    top + (bottom - top) * f.y
}

/// One candidate's accept/place decision. `None` is a rejection; the slot
/// simply does not exist, leaving no hole in the transform range.
pub fn candidate_transform(
    grass: &GrassConfig,
    sampler: &impl TerrainSampler,
    sub_cell_center: Vec3,
    cell_seed: u32,
    sub_cell_index: u32,
    candidate: u32,
) -> Option<Mat4> {
    let seed = candidate_seed(cell_seed, sub_cell_index, candidate);
    let r0 = seed;
    let r1 = pcg(r0);
    let r2 = pcg(r1);
    let r3 = pcg(r2);
    let r4 = pcg(r3);

    let half = grass.sub_cell_size * 0.5;
    let x = sub_cell_center.x - half + unorm(r0) * grass.sub_cell_size;
    let z = sub_cell_center.z - half + unorm(r1) * grass.sub_cell_size;

    let ground = sampler.ground_height(x, z)?;
    if sampler.grass_weight(x, z) <= grass.grass_threshold {
        return None;
    }
    let height_noise = if grass.scale_noise_scale > 0.0 {
        value_noise_01(Vec2::new(x, z) / grass.scale_noise_scale)
    } else {
        1.0
    };
    if height_noise < grass.min_grass_height {
        return None;
    }
    let normal = sampler.ground_normal(x, z);
    if grass.slope_threshold > 0.0 && normal.dot(Vec3::NEG_Y).abs() < grass.slope_threshold {
        return None;
    }

    let scale = Vec3::new(
        grass.scale_min[0] + (grass.scale_max[0] - grass.scale_min[0]) * unorm(r2),
        grass.scale_min[1] + (grass.scale_max[1] - grass.scale_min[1]) * height_noise,
        grass.scale_min[2] + (grass.scale_max[2] - grass.scale_min[2]) * unorm(r3),
    );

    let mut rotation = Quat::IDENTITY;
    if grass.random_y_rotation {
        let yaw = (unorm(r4) * 2.0 - 1.0) * grass.max_y_rotation_radians();
        rotation = Quat::from_rotation_y(yaw);
    }
    if grass.rotate_to_ground_normal {
        rotation = Quat::from_rotation_arc(Vec3::Y, normal) * rotation;
    }

    let position = Vec3::new(x, ground + scale.y * 0.5, z);
    Some(Mat4::from_scale_rotation_translation(scale, rotation, position))
}

pub struct ReferencePopulation {
    pub sub_cells: Vec<SubCell>,
    pub transforms: Vec<Mat4>,
}

/// CPU mirror of the two GPU phases with the atomic replaced by a running
/// total. Sub-cell ranges and transform order are exactly what one valid
/// GPU schedule produces; the tests drive this path.
pub fn reference_populate(
    cell_position: Vec3,
    seed: u32,
    grass: &GrassConfig,
    sampler: &impl TerrainSampler,
) -> ReferencePopulation {
    let (mut sub_cells, _cols) = build_sub_cells(cell_position, grass.cell_size, grass.sub_cell_size);
    let candidates = grass.candidates_per_sub_cell(sub_cells.len() as u32);
    let mut transforms = Vec::new();
    let mut next_start = 0u32;
    for (index, sub_cell) in sub_cells.iter_mut().enumerate() {
        let center = sub_cell.position();
        let before = transforms.len();
        for candidate in 0..candidates {
            if let Some(trs) =
                candidate_transform(grass, sampler, center, seed, index as u32, candidate)
            {
                transforms.push(trs);
            }
        }
        let count = (transforms.len() - before) as u32;
        sub_cell.instance_start = next_start;
        sub_cell.instance_count = count;
        next_start += count;
    }
    ReferencePopulation { sub_cells, transforms }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    struct FlatField {
        height: f32,
        weight: f32,
        normal: Vec3,
    }

    impl TerrainSampler for FlatField {
        fn ground_height(&self, _x: f32, _z: f32) -> Option<f32> {
            Some(self.height)
        }

        fn ground_normal(&self, _x: f32, _z: f32) -> Vec3 {
            self.normal
        }

        fn grass_weight(&self, _x: f32, _z: f32) -> f32 {
            self.weight
        }
    }

    fn lawn() -> FlatField {
        FlatField { height: 5.0, weight: 1.0, normal: Vec3::Y }
    }

    fn small_config() -> GrassConfig {
        GrassConfig {
            instances_per_cell: 256,
            cell_size: 64.0,
            sub_cell_size: 32.0,
            min_grass_height: 0.0,
            ..GrassConfig::default()
        }
    }

    #[test]
    fn ranges_partition_the_transform_buffer() {
        let result = reference_populate(Vec3::ZERO, 11, &small_config(), &lawn());
        assert_eq!(result.sub_cells.len(), 4);
        let mut expected_start = 0u32;
        for sub_cell in &result.sub_cells {
            assert_eq!(sub_cell.instance_start, expected_start);
            expected_start += sub_cell.instance_count;
        }
        assert_eq!(expected_start as usize, result.transforms.len());
        assert!(!result.transforms.is_empty());
    }

    #[test]
    fn population_is_deterministic_per_seed() {
        let cfg = small_config();
        let a = reference_populate(Vec3::new(96.0, 0.0, -32.0), 77, &cfg, &lawn());
        let b = reference_populate(Vec3::new(96.0, 0.0, -32.0), 77, &cfg, &lawn());
        assert_eq!(a.transforms, b.transforms);
        let c = reference_populate(Vec3::new(96.0, 0.0, -32.0), 78, &cfg, &lawn());
        assert_ne!(a.transforms, c.transforms, "seed changes the field");
    }

    #[test]
    fn bare_ground_accepts_nothing() {
        let bare = FlatField { height: 5.0, weight: 0.0, normal: Vec3::Y };
        let result = reference_populate(Vec3::ZERO, 3, &small_config(), &bare);
        assert!(result.transforms.is_empty());
        assert!(result.sub_cells.iter().all(|s| s.instance_count == 0));
    }

    #[test]
    fn splat_weight_at_threshold_is_rejected() {
        let edge = FlatField { height: 0.0, weight: 0.5, normal: Vec3::Y };
        let mut cfg = small_config();
        cfg.grass_threshold = 0.5;
        let result = reference_populate(Vec3::ZERO, 3, &cfg, &edge);
        assert!(result.transforms.is_empty(), "acceptance is strictly greater-than");
    }

    #[test]
    fn min_grass_height_above_noise_range_rejects_everything() {
        let mut cfg = small_config();
        cfg.min_grass_height = 1.1;
        let result = reference_populate(Vec3::ZERO, 3, &cfg, &lawn());
        assert!(result.transforms.is_empty());
    }

    #[test]
    fn slope_gate_only_applies_when_enabled() {
        let wall = FlatField { height: 0.0, weight: 1.0, normal: Vec3::X };
        let mut cfg = small_config();
        cfg.slope_threshold = 0.5;
        let rejected = reference_populate(Vec3::ZERO, 9, &cfg, &wall);
        assert!(rejected.transforms.is_empty());
        cfg.slope_threshold = 0.0;
        let accepted = reference_populate(Vec3::ZERO, 9, &cfg, &wall);
        assert!(!accepted.transforms.is_empty(), "zero threshold disables the gate");
    }

    #[test]
    fn placed_transforms_sit_half_a_scale_above_ground() {
        let mut cfg = small_config();
        cfg.scale_min = [0.8, 0.6, 0.8];
        cfg.scale_max = [1.4, 2.0, 1.4];
        let field = FlatField { height: 12.5, weight: 1.0, normal: Vec3::Y };
        let result = reference_populate(Vec3::ZERO, 21, &cfg, &field);
        assert!(!result.transforms.is_empty());
        for trs in &result.transforms {
            let (scale, _rotation, translation) = trs.to_scale_rotation_translation();
            assert!((translation.y - (12.5 + scale.y * 0.5)).abs() < 1e-4);
            assert!(scale.x >= 0.8 - 1e-4 && scale.x <= 1.4 + 1e-4);
            assert!(scale.y >= 0.6 - 1e-4 && scale.y <= 2.0 + 1e-4);
            assert!(scale.x >= 0.0 && scale.z >= 0.0);
            assert!(translation.x.abs() <= 32.0 && translation.z.abs() <= 32.0);
        }
    }

    #[test]
    fn hash_floats_stay_in_unit_interval() {
        let mut h = 0xdead_beef_u32;
        for _ in 0..1000 {
            h = pcg(h);
            let u = unorm(h);
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn cell_seed_varies_per_cell() {
        let a = cell_seed(7, 0);
        let b = cell_seed(7, 1);
        assert_ne!(a, b);
        assert_eq!(a, cell_seed(7, 0));
    }

    #[test]
    fn value_noise_is_continuous_at_lattice_points() {
        let at = value_noise_01(Vec2::new(3.0, 4.0));
        let near = value_noise_01(Vec2::new(3.0 + 1e-4, 4.0));
        assert!((at - near).abs() < 1e-2);
        for i in 0..50 {
            let p = Vec2::new(i as f32 * 0.37, i as f32 * -0.73);
            let v = value_noise_01(p);
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn params_layout_matches_shader_struct() {
        assert_eq!(std::mem::size_of::<PopulationParams>(), 80);
        assert_eq!(std::mem::offset_of!(PopulationParams, scale_min), 48);
        assert_eq!(std::mem::offset_of!(PopulationParams, scale_max), 64);
    }
}
