use wgpu::util::DeviceExt;

/// Grass blade vertex. `uv.x` runs across the blade, `uv.y` is the height
/// fraction (0 at the root, 1 at the tip) driving wind sway and tinting.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GrassVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

pub const BLADE_HEIGHT: f32 = 1.0;
pub const BLADE_HALF_WIDTH: f32 = 0.05;

/// Tapered blade strip: `segments` quads narrowing toward the top plus an
/// apex triangle. Model space is one meter tall and centered on the origin;
/// placement raises each instance by half its vertical scale so the root
/// lands on the ground.
pub fn build_blade(segments: u32) -> (Vec<GrassVertex>, Vec<u16>) {
    let segments = segments.max(1);
    let mut vertices = Vec::with_capacity((segments as usize + 1) * 2 + 1);
    for ring in 0..=segments {
        let t = ring as f32 / (segments + 1) as f32;
        let y = (t - 0.5) * BLADE_HEIGHT;
        let half_width = BLADE_HALF_WIDTH * (1.0 - t);
        vertices.push(GrassVertex { position: [-half_width, y, 0.0], uv: [0.0, t] });
        vertices.push(GrassVertex { position: [half_width, y, 0.0], uv: [1.0, t] });
    }
    let apex = vertices.len() as u16;
    vertices.push(GrassVertex { position: [0.0, BLADE_HEIGHT * 0.5, 0.0], uv: [0.5, 1.0] });

    let mut indices = Vec::with_capacity(segments as usize * 6 + 3);
    for ring in 0..segments as u16 {
        let base = ring * 2;
        indices.extend_from_slice(&[base, base + 2, base + 1, base + 1, base + 2, base + 3]);
    }
    let top = segments as u16 * 2;
    indices.extend_from_slice(&[top, apex, top + 1]);
    (vertices, indices)
}

/// One LOD level's GPU mesh. Buffers are created once and never written
/// again; every instancer draws from the same set.
pub struct GrassMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
}

impl GrassMesh {
    fn build(device: &wgpu::Device, label: &str, segments: u32) -> Self {
        let (vertices, indices) = build_blade(segments);
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} VB")),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} IB")),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self { vertex_buffer, index_buffer, index_count: indices.len() as u32 }
    }
}

pub const LOD_COUNT: usize = 3;
const LOD_SEGMENTS: [u32; LOD_COUNT] = [4, 2, 1];

/// The fixed LOD set: high/medium/low segment counts selected per sub-cell
/// by the culling pass.
pub struct GrassMeshSet {
    pub lods: [GrassMesh; LOD_COUNT],
}

impl GrassMeshSet {
    pub fn build(device: &wgpu::Device) -> Self {
        Self {
            lods: [
                GrassMesh::build(device, "Grass LOD0", LOD_SEGMENTS[0]),
                GrassMesh::build(device, "Grass LOD1", LOD_SEGMENTS[1]),
                GrassMesh::build(device, "Grass LOD2", LOD_SEGMENTS[2]),
            ],
        }
    }

    pub fn index_counts(&self) -> [u32; LOD_COUNT] {
        [self.lods[0].index_count, self.lods[1].index_count, self.lods[2].index_count]
    }

    pub fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
        const ATTRIBUTES: [wgpu::VertexAttribute; 2] = [
            wgpu::VertexAttribute { shader_location: 0, format: wgpu::VertexFormat::Float32x3, offset: 0 },
            wgpu::VertexAttribute { shader_location: 1, format: wgpu::VertexFormat::Float32x2, offset: 12 },
        ];
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<GrassVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blade_topology_matches_segment_count() {
        for segments in 1..=6u32 {
            let (vertices, indices) = build_blade(segments);
            assert_eq!(vertices.len(), (segments as usize + 1) * 2 + 1);
            assert_eq!(indices.len(), segments as usize * 6 + 3);
            let max_index = *indices.iter().max().unwrap() as usize;
            assert_eq!(max_index, vertices.len() - 1, "apex is referenced");
        }
    }

    #[test]
    fn blade_tapers_and_spans_centered_unit_height() {
        let (vertices, _) = build_blade(4);
        let apex = vertices.last().unwrap();
        assert_eq!(apex.position[1], BLADE_HEIGHT * 0.5);
        assert_eq!(apex.uv[1], 1.0);
        let root_y = vertices[0].position[1];
        assert_eq!(root_y, -BLADE_HEIGHT * 0.5);
        // Ring widths shrink monotonically toward the tip.
        let widths: Vec<f32> = vertices[..vertices.len() - 1]
            .chunks(2)
            .map(|pair| pair[1].position[0] - pair[0].position[0])
            .collect();
        assert!(widths.windows(2).all(|w| w[1] < w[0]));
        assert!(widths[0] > 0.0);
    }

    #[test]
    fn height_fraction_is_monotonic_per_ring() {
        let (vertices, _) = build_blade(3);
        let fracs: Vec<f32> = vertices.chunks(2).map(|pair| pair[0].uv[1]).collect();
        assert!(fracs.windows(2).all(|f| f[1] > f[0]));
    }
}
