use glam::Vec3;
use std::fmt;

/// Lifecycle of a grass cell. `Release` is transient: applying it tears down
/// GPU resources and settles the cell back in `Idle`. `Empty` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Idle,
    Prewarm,
    Render,
    Empty,
    Release,
}

impl fmt::Display for CellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CellState::Idle => "idle",
            CellState::Prewarm => "prewarm",
            CellState::Render => "render",
            CellState::Empty => "empty",
            CellState::Release => "release",
        };
        write!(f, "{name}")
    }
}

/// GPU mirror of one sub-cell descriptor. Layout matches the WGSL struct in
/// `population.wgsl`/`culling.wgsl`: vec3 position, range into the owning
/// cell's transform buffer, padding up to 32 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SubCell {
    pub position: [f32; 3],
    pub instance_start: u32,
    pub instance_count: u32,
    pub _padding: [u32; 3],
}

impl SubCell {
    pub fn new(position: Vec3) -> Self {
        Self { position: position.to_array(), instance_start: 0, instance_count: 0, _padding: [0; 3] }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn range(&self) -> std::ops::Range<u32> {
        self.instance_start..self.instance_start + self.instance_count
    }
}

/// Columns and rows of a lattice covering `extent_x` by `extent_z` with the
/// given step. Ceiling division; a non-positive step is clamped to one meter
/// and non-positive extents produce an empty lattice.
pub fn lattice_dims(extent_x: f32, extent_z: f32, step: f32) -> (u32, u32) {
    let step = sanitize_step(step);
    let cols = (extent_x.max(0.0) / step).ceil() as u32;
    let rows = (extent_z.max(0.0) / step).ceil() as u32;
    (cols, rows)
}

/// Center of lattice slot `index` with `col = index % cols`,
/// `row = index / cols`. The first slot sits half a step in from the minimum
/// corner; when the extent does not divide evenly the last row/column
/// overhangs, matching ceiling division.
pub fn lattice_position(center: Vec3, extent_x: f32, extent_z: f32, step: f32, cols: u32, index: u32) -> Vec3 {
    let step = sanitize_step(step);
    let col = index % cols.max(1);
    let row = index / cols.max(1);
    Vec3::new(
        center.x - extent_x * 0.5 + step * (col as f32 + 0.5),
        center.y,
        center.z - extent_z * 0.5 + step * (row as f32 + 0.5),
    )
}

fn sanitize_step(step: f32) -> f32 {
    if step > 0.0 {
        step
    } else {
        1.0
    }
}

/// Builds the sub-cell lattice for one cell. Returns the descriptors plus the
/// column count the kernels need to decompose indices the same way.
pub fn build_sub_cells(cell_position: Vec3, cell_size: f32, sub_cell_size: f32) -> (Vec<SubCell>, u32) {
    let (cols, rows) = lattice_dims(cell_size, cell_size, sub_cell_size);
    let count = cols * rows;
    let mut sub_cells = Vec::with_capacity(count as usize);
    for index in 0..count {
        let position = lattice_position(cell_position, cell_size, cell_size, sub_cell_size, cols, index);
        sub_cells.push(SubCell::new(position));
    }
    (sub_cells, cols)
}

/// Representative points used for host-side frustum tests: center,
/// bottom-center, four top corners, four bottom corners. The bottom corners
/// are dropped onto the terrain when the height query hits.
pub fn cell_corners(position: Vec3, cell_size: f32, height_at: impl Fn(f32, f32) -> Option<f32>) -> [Vec3; 10] {
    let half = cell_size * 0.5;
    let mut corners = [
        position,
        position + Vec3::new(0.0, -half, 0.0),
        position + Vec3::new(half, half, half),
        position + Vec3::new(-half, half, half),
        position + Vec3::new(half, half, -half),
        position + Vec3::new(-half, half, -half),
        position + Vec3::new(half, -half, half),
        position + Vec3::new(-half, -half, half),
        position + Vec3::new(half, -half, -half),
        position + Vec3::new(-half, -half, -half),
    ];
    for corner in corners.iter_mut().skip(6) {
        if let Some(height) = height_at(corner.x, corner.z) {
            corner.y = height;
        }
    }
    corners
}
