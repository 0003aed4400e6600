use crate::config::TerrainConfig;
use anyhow::{bail, Context, Result};
use glam::{Vec2, Vec3};
use rand::{Rng, SeedableRng};
use std::path::Path;

/// Terrain data the placement pipeline samples: a square heightfield plus a
/// splat weight channel marking where grass may grow. World space maps the
/// field over `[-size/2, +size/2]` around the origin on x/z; heights are
/// stored normalized and scaled by `size.y`.
pub struct Terrain {
    origin: Vec3,
    size: Vec3,
    resolution: u32,
    heights: Vec<f32>,
    splat: Vec<f32>,
}

/// Sampling boundary consumed by the population reference path and tests.
pub trait TerrainSampler {
    /// Ground height at (x, z); `None` means the query missed the field.
    fn ground_height(&self, x: f32, z: f32) -> Option<f32>;
    fn ground_normal(&self, x: f32, z: f32) -> Vec3;
    /// Splat weight in [0, 1]; grass grows where it exceeds the threshold.
    fn grass_weight(&self, x: f32, z: f32) -> f32;
}

impl Terrain {
    pub fn generate(cfg: &TerrainConfig) -> Self {
        let resolution = cfg.resolution.max(2);
        let size = Vec3::from_array(cfg.size);
        let mut rng = rand::rngs::StdRng::seed_from_u64(cfg.seed as u64);
        let offset_x: f32 = rng.gen_range(-512.0..512.0);
        let offset_z: f32 = rng.gen_range(-512.0..512.0);

        let mut heights = vec![0.0; (resolution * resolution) as usize];
        for row in 0..resolution {
            for col in 0..resolution {
                let u = col as f32 / (resolution - 1) as f32;
                let v = row as f32 / (resolution - 1) as f32;
                let p = Vec2::new(u * 8.0 + offset_x, v * 8.0 + offset_z);
                heights[(row * resolution + col) as usize] = fbm(cfg.seed, p, 5);
            }
        }

        let mut terrain =
            Self { origin: Vec3::ZERO, size, resolution, heights, splat: Vec::new() };
        terrain.splat = terrain.derive_splat(cfg.seed);
        terrain
    }

    /// Loads a square grayscale PNG as the heightfield, resampling to the
    /// configured resolution.
    pub fn from_heightmap_png(path: impl AsRef<Path>, cfg: &TerrainConfig) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path)
            .with_context(|| format!("Failed to load heightmap {}", path.display()))?
            .to_luma16();
        if img.width() < 2 || img.height() < 2 {
            bail!("Heightmap {} is too small ({}x{})", path.display(), img.width(), img.height());
        }
        let resolution = cfg.resolution.max(2);
        let mut heights = vec![0.0; (resolution * resolution) as usize];
        for row in 0..resolution {
            for col in 0..resolution {
                let sx = (col as f32 / (resolution - 1) as f32 * (img.width() - 1) as f32).round() as u32;
                let sy = (row as f32 / (resolution - 1) as f32 * (img.height() - 1) as f32).round() as u32;
                heights[(row * resolution + col) as usize] = img.get_pixel(sx, sy).0[0] as f32 / u16::MAX as f32;
            }
        }
        let mut terrain = Self {
            origin: Vec3::ZERO,
            size: Vec3::from_array(cfg.size),
            resolution,
            heights,
            splat: Vec::new(),
        };
        terrain.splat = terrain.derive_splat(cfg.seed);
        Ok(terrain)
    }

    /// Grass weight from slope and a noise break-up: flat ground grows, steep
    /// faces stay bare.
    fn derive_splat(&self, seed: u32) -> Vec<f32> {
        let mut splat = vec![0.0; self.heights.len()];
        let step = self.size.x / (self.resolution - 1) as f32;
        for row in 0..self.resolution {
            for col in 0..self.resolution {
                let x = self.origin.x - self.size.x * 0.5 + col as f32 * step;
                let z = self.origin.z - self.size.z * 0.5 + row as f32 * step;
                let normal = self.ground_normal(x, z);
                let flatness = normal.y.clamp(0.0, 1.0).powi(4);
                let breakup = fbm(seed ^ 0x9e37, Vec2::new(x, z) * 0.01, 3);
                splat[(row * self.resolution + col) as usize] =
                    (flatness * (0.55 + 0.45 * breakup)).clamp(0.0, 1.0);
            }
        }
        splat
    }

    pub fn size(&self) -> Vec3 {
        self.size
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// World (x, z) to continuous texel coordinate, or `None` outside the field.
    fn texel_coord(&self, x: f32, z: f32) -> Option<(f32, f32)> {
        let u = (x - (self.origin.x - self.size.x * 0.5)) / self.size.x;
        let v = (z - (self.origin.z - self.size.z * 0.5)) / self.size.z;
        if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
            return None;
        }
        let max_texel = (self.resolution - 1) as f32;
        Some((u * max_texel, v * max_texel))
    }

    fn texel(&self, data: &[f32], col: u32, row: u32) -> f32 {
        let col = col.min(self.resolution - 1);
        let row = row.min(self.resolution - 1);
        data[(row * self.resolution + col) as usize]
    }

    fn sample_bilinear(&self, data: &[f32], x: f32, z: f32) -> Option<f32> {
        let (tx, tz) = self.texel_coord(x, z)?;
        let col = tx.floor();
        let row = tz.floor();
        let fx = tx - col;
        let fz = tz - row;
        let (col, row) = (col as u32, row as u32);
        let h00 = self.texel(data, col, row);
        let h10 = self.texel(data, col + 1, row);
        let h01 = self.texel(data, col, row + 1);
        let h11 = self.texel(data, col + 1, row + 1);
        let top = h00 + (h10 - h00) * fx;
        let bottom = h01 + (h11 - h01) * fx;
        Some(top + (bottom - top) * fz)
    }

    pub fn height_at(&self, x: f32, z: f32) -> Option<f32> {
        self.sample_bilinear(&self.heights, x, z).map(|h| self.origin.y + h * self.size.y)
    }

    pub fn normal_at(&self, x: f32, z: f32) -> Vec3 {
        let step = self.size.x / (self.resolution - 1) as f32;
        let center = match self.height_at(x, z) {
            Some(h) => h,
            None => return Vec3::Y,
        };
        let right = self.height_at(x + step, z).unwrap_or(center);
        let left = self.height_at(x - step, z).unwrap_or(center);
        let forward = self.height_at(x, z + step).unwrap_or(center);
        let back = self.height_at(x, z - step).unwrap_or(center);
        Vec3::new(left - right, 2.0 * step, back - forward).normalize_or_zero()
    }

    pub fn splat_at(&self, x: f32, z: f32) -> f32 {
        self.sample_bilinear(&self.splat, x, z).unwrap_or(0.0)
    }

    /// Triangle mesh for the demo terrain pass, `vertices_per_side`² samples.
    pub fn build_render_mesh(&self, vertices_per_side: u32) -> (Vec<TerrainVertex>, Vec<u32>) {
        let n = vertices_per_side.max(2);
        let mut vertices = Vec::with_capacity((n * n) as usize);
        for row in 0..n {
            for col in 0..n {
                let x = self.origin.x - self.size.x * 0.5 + self.size.x * col as f32 / (n - 1) as f32;
                let z = self.origin.z - self.size.z * 0.5 + self.size.z * row as f32 / (n - 1) as f32;
                let y = self.height_at(x, z).unwrap_or(self.origin.y);
                vertices.push(TerrainVertex {
                    position: [x, y, z],
                    normal: self.normal_at(x, z).to_array(),
                });
            }
        }
        let mut indices = Vec::with_capacity(((n - 1) * (n - 1) * 6) as usize);
        for row in 0..n - 1 {
            for col in 0..n - 1 {
                let i = row * n + col;
                indices.extend_from_slice(&[i, i + n, i + 1, i + 1, i + n, i + n + 1]);
            }
        }
        (vertices, indices)
    }
}

impl TerrainSampler for Terrain {
    fn ground_height(&self, x: f32, z: f32) -> Option<f32> {
        self.height_at(x, z)
    }

    fn ground_normal(&self, x: f32, z: f32) -> Vec3 {
        self.normal_at(x, z)
    }

    fn grass_weight(&self, x: f32, z: f32) -> f32 {
        self.splat_at(x, z)
    }
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TerrainVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

/// Uniform mirror of `TerrainParams` in the population shader.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TerrainParams {
    pub origin: [f32; 3],
    pub resolution: f32,
    pub inv_size: [f32; 2],
    pub height_scale: f32,
    pub _padding: f32,
}

/// GPU-resident terrain inputs for the population kernels: the params
/// uniform plus height/splat textures, bound as group 0.
pub struct TerrainGpu {
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub bind_group: wgpu::BindGroup,
    _params_buffer: wgpu::Buffer,
    _height_texture: wgpu::Texture,
    _splat_texture: wgpu::Texture,
}

impl TerrainGpu {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, terrain: &Terrain) -> Self {
        let resolution = terrain.resolution;
        let extent = wgpu::Extent3d { width: resolution, height: resolution, depth_or_array_layers: 1 };

        let height_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Terrain Heightmap"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &height_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&terrain.heights),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(resolution * 4),
                rows_per_image: Some(resolution),
            },
            extent,
        );

        let splat_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Terrain Splatmap"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let splat_pixels: Vec<[u8; 4]> = terrain
            .splat
            .iter()
            .map(|w| [(w.clamp(0.0, 1.0) * 255.0) as u8, 0, 0, 255])
            .collect();
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &splat_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&splat_pixels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(resolution * 4),
                rows_per_image: Some(resolution),
            },
            extent,
        );

        let params = TerrainParams {
            origin: terrain.origin.to_array(),
            resolution: resolution as f32,
            inv_size: [1.0 / terrain.size.x, 1.0 / terrain.size.z],
            height_scale: terrain.size.y,
            _padding: 0.0,
        };
        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Terrain Params"),
            size: std::mem::size_of::<TerrainParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(&params_buffer, 0, bytemuck::bytes_of(&params));

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Terrain BGL"),
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
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                },
            ],
        });
        let height_view = height_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let splat_view = splat_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Terrain BG"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&height_view) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&splat_view) },
            ],
        });

        Self {
            bind_group_layout,
            bind_group,
            _params_buffer: params_buffer,
            _height_texture: height_texture,
            _splat_texture: splat_texture,
        }
    }
}

fn hash_lattice(seed: u32, x: i32, z: i32) -> f32 {
    let mut h = seed ^ 0x51ed_270b;
    h = h.wrapping_mul(0x9e37_79b9) ^ (x as u32).wrapping_mul(0x85eb_ca6b);
    h = h.wrapping_mul(0x9e37_79b9) ^ (z as u32).wrapping_mul(0xc2b2_ae35);
    h ^= h >> 15;
    h = h.wrapping_mul(0x2c1b_3c6d);
    h ^= h >> 12;
    (h >> 8) as f32 / 16_777_216.0
}

fn value_noise(seed: u32, p: Vec2) -> f32 {
    let base = p.floor();
    let frac = p - base;
    let (x, z) = (base.x as i32, base.y as i32);
    let smooth = frac * frac * (Vec2::splat(3.0) - 2.0 * frac);
    let n00 = hash_lattice(seed, x, z);
    let n10 = hash_lattice(seed, x + 1, z);
    let n01 = hash_lattice(seed, x, z + 1);
    let n11 = hash_lattice(seed, x + 1, z + 1);
    let top = n00 + (n10 - n00) * smooth.x;
    let bottom = n01 + (n11 - n01) * smooth.x;
    top + (bottom - top) * smooth.y
}

fn fbm(seed: u32, p: Vec2, octaves: u32) -> f32 {
    let mut amplitude = 0.5;
    let mut frequency = 1.0;
    let mut total = 0.0;
    let mut norm = 0.0;
    for octave in 0..octaves {
        total += amplitude * value_noise(seed.wrapping_add(octave), p * frequency);
        norm += amplitude;
        amplitude *= 0.5;
        frequency *= 2.0;
    }
    total / norm
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_terrain(height: f32) -> Terrain {
        let resolution = 5;
        Terrain {
            origin: Vec3::ZERO,
            size: Vec3::new(100.0, 1.0, 100.0),
            resolution,
            heights: vec![height; (resolution * resolution) as usize],
            splat: vec![1.0; (resolution * resolution) as usize],
        }
    }

    #[test]
    fn height_query_misses_outside_bounds() {
        let terrain = flat_terrain(0.5);
        assert!(terrain.height_at(0.0, 0.0).is_some());
        assert!(terrain.height_at(51.0, 0.0).is_none());
        assert!(terrain.height_at(0.0, -50.001).is_none());
    }

    #[test]
    fn bilinear_sampling_interpolates_between_texels() {
        let mut terrain = flat_terrain(0.0);
        // One raised texel at the center of a 5x5 grid (col 2, row 2).
        terrain.heights[(2 * 5 + 2) as usize] = 1.0;
        let peak = terrain.height_at(0.0, 0.0).unwrap();
        assert!((peak - 1.0).abs() < 1e-6);
        // Halfway toward the next texel (texel step is 25 world units).
        let halfway = terrain.height_at(12.5, 0.0).unwrap();
        assert!((halfway - 0.5).abs() < 1e-6);
    }

    #[test]
    fn flat_ground_normal_points_up() {
        let terrain = flat_terrain(0.25);
        let normal = terrain.normal_at(10.0, -10.0);
        assert!((normal - Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn generation_is_deterministic_per_seed() {
        let cfg = TerrainConfig { size: [256.0, 32.0, 256.0], resolution: 33, seed: 11, heightmap: None };
        let a = Terrain::generate(&cfg);
        let b = Terrain::generate(&cfg);
        assert_eq!(a.heights, b.heights);
        assert_eq!(a.splat, b.splat);
        let other = Terrain::generate(&TerrainConfig { seed: 12, ..cfg });
        assert_ne!(a.heights, other.heights);
    }

    #[test]
    fn splat_weights_stay_normalized() {
        let cfg = TerrainConfig { size: [256.0, 64.0, 256.0], resolution: 33, seed: 3, heightmap: None };
        let terrain = Terrain::generate(&cfg);
        assert!(terrain.splat.iter().all(|w| (0.0..=1.0).contains(w)));
    }

    #[test]
    fn render_mesh_covers_the_field() {
        let terrain = flat_terrain(0.5);
        let (vertices, indices) = terrain.build_render_mesh(9);
        assert_eq!(vertices.len(), 81);
        assert_eq!(indices.len(), 8 * 8 * 6);
        assert_eq!(vertices[0].position[0], -50.0);
        assert_eq!(vertices[80].position[2], 50.0);
    }
}
