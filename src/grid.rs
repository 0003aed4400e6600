use crate::cell::{cell_corners, lattice_dims, lattice_position, CellState};
use crate::config::GrassConfig;
use crate::events::{CellEvent, CellEventBus};
use crate::frustum::Frustum;
use crate::instancer::{CellGpu, Instancer};
use crate::population::{cell_seed, PopulationOutcome, PopulationPipeline};
use crate::terrain::{Terrain, TerrainGpu};
use crate::visibility::VisibilityPipeline;
use glam::{Vec2, Vec3};
use smallvec::SmallVec;

/// Distance bands around the camera cell, in units of `cell_size`. Inside
/// the first band cells render; inside the second they prewarm; beyond it
/// they release.
pub const RENDER_BAND: f32 = 1.5;
pub const PREWARM_BAND: f32 = 2.5;

/// The cell lattice over the terrain. Owns every instancer, the proximity
/// event bus and the camera tracker that feeds it.
pub struct Grid {
    cells: Vec<Instancer>,
    bus: CellEventBus,
    cols: u32,
    rows: u32,
    cell_size: f32,
    origin: Vec3,
    extent_x: f32,
    extent_z: f32,
    world_seed: u32,
    camera_cell: Option<usize>,
    pending_population: Vec<usize>,
}

impl Grid {
    /// Lays the lattice over the terrain footprint and anchors each cell to
    /// the ground under its center. Cells whose center misses the terrain
    /// stay at origin height and are logged once.
    pub fn build(terrain: &Terrain, grass: &GrassConfig, world_seed: u32) -> Self {
        let size = terrain.size();
        let origin = terrain.origin();
        let cell_size = if grass.cell_size > 0.0 { grass.cell_size } else { 1.0 };
        let (cols, rows) = lattice_dims(size.x, size.z, cell_size);

        let mut cells = Vec::with_capacity((cols * rows) as usize);
        for index in 0..cols * rows {
            let flat = lattice_position(origin, size.x, size.z, cell_size, cols, index);
            let anchored = match terrain.height_at(flat.x, flat.z) {
                Some(h) => Vec3::new(flat.x, h, flat.z),
                None => {
                    eprintln!(
                        "[grid] cell {index} center ({:.1}, {:.1}) is off the terrain; anchoring at origin height",
                        flat.x, flat.z
                    );
                    Vec3::new(flat.x, origin.y, flat.z)
                }
            };
            let corners = cell_corners(anchored, cell_size, |x, z| terrain.height_at(x, z));
            cells.push(Instancer::new(index as usize, anchored, corners));
        }

        Self {
            cells,
            bus: CellEventBus::default(),
            cols,
            rows,
            cell_size,
            origin,
            extent_x: size.x,
            extent_z: size.z,
            world_seed,
            camera_cell: None,
            pending_population: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn dims(&self) -> (u32, u32) {
        (self.cols, self.rows)
    }

    pub fn camera_cell(&self) -> Option<usize> {
        self.camera_cell
    }

    pub fn cell(&self, id: usize) -> &Instancer {
        &self.cells[id]
    }

    pub fn cell_mut(&mut self, id: usize) -> &mut Instancer {
        &mut self.cells[id]
    }

    pub fn cells(&self) -> &[Instancer] {
        &self.cells
    }

    /// Cell under a world (x, z), or `None` off the lattice. The lattice may
    /// overhang the terrain on the far edge when the extent does not divide
    /// evenly; those positions still map to the last cell.
    pub fn cell_index_at(&self, x: f32, z: f32) -> Option<usize> {
        let min_x = self.origin.x - self.extent_x * 0.5;
        let min_z = self.origin.z - self.extent_z * 0.5;
        let col = ((x - min_x) / self.cell_size).floor();
        let row = ((z - min_z) / self.cell_size).floor();
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (col, row) = (col as u32, row as u32);
        if col >= self.cols || row >= self.rows {
            return None;
        }
        Some((row * self.cols + col) as usize)
    }

    /// Tracks which cell the camera stands in. A change publishes exit and
    /// enter events and pumps them synchronously, so all state transitions
    /// land before the frame continues.
    pub fn update_camera(&mut self, camera_position: Vec3) {
        let next = self.cell_index_at(camera_position.x, camera_position.z);
        if next == self.camera_cell {
            return;
        }
        if let Some(old) = self.camera_cell {
            self.bus.publish(CellEvent::CameraExited { cell: old });
        }
        if let Some(new) = next {
            self.bus.publish(CellEvent::CameraEntered { cell: new });
        }
        self.camera_cell = next;
        self.pump_events();
        if next.is_none() {
            for cell in &mut self.cells {
                cell.apply_target(CellState::Release);
            }
            self.pending_population.clear();
        }
    }

    fn pump_events(&mut self) {
        let events = self.bus.drain();
        for event in events {
            eprintln!("[grid] {event}");
            match event {
                CellEvent::CameraExited { cell } => {
                    if let Some(cell) = self.cells.get_mut(cell) {
                        cell.is_camera_cell = false;
                    }
                }
                CellEvent::CameraEntered { cell } => {
                    let pending = self.apply_camera_cell(cell);
                    self.pending_population.extend(pending);
                }
            }
        }
    }

    /// Re-bands every cell around the new camera cell and returns the ids
    /// whose activation needs a population run, nearest first.
    pub fn apply_camera_cell(&mut self, camera_cell: usize) -> Vec<usize> {
        let Some(center) = self.cells.get(camera_cell).map(|c| c.position()) else {
            return Vec::new();
        };
        let render_radius = RENDER_BAND * self.cell_size;
        let prewarm_radius = PREWARM_BAND * self.cell_size;

        let mut pending = Vec::new();
        for index in 0..self.cells.len() {
            let cell = &mut self.cells[index];
            cell.is_camera_cell = index == camera_cell;
            let position = cell.position();
            let distance =
                Vec2::new(position.x - center.x, position.z - center.z).length();
            let target = if index == camera_cell || distance <= render_radius {
                CellState::Render
            } else if distance <= prewarm_radius {
                CellState::Prewarm
            } else {
                CellState::Release
            };
            if cell.apply_target(target) {
                pending.push(index);
            }
        }

        pending.sort_by(|&a, &b| {
            let da = {
                let p = self.cells[a].position();
                Vec2::new(p.x - center.x, p.z - center.z).length_squared()
            };
            let db = {
                let p = self.cells[b].position();
                Vec2::new(p.x - center.x, p.z - center.z).length_squared()
            };
            da.total_cmp(&db)
        });
        pending
    }

    pub fn has_pending_population(&self) -> bool {
        !self.pending_population.is_empty()
    }

    /// Cells queued for population, nearest first.
    pub fn pending_cells(&self) -> &[usize] {
        &self.pending_population
    }

    /// Runs the two-phase placement for every cell queued by the last camera
    /// transition. Empty outcomes park the cell permanently; failures drop
    /// it back to idle so the next proximity event retries.
    #[allow(clippy::too_many_arguments)]
    pub fn populate_pending(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        population: &PopulationPipeline,
        visibility: &VisibilityPipeline,
        draw_layout: &wgpu::BindGroupLayout,
        terrain_gpu: &TerrainGpu,
        grass: &GrassConfig,
    ) {
        if self.pending_population.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_population);
        for id in pending {
            let (position, state, has_gpu) = {
                let cell = &self.cells[id];
                (cell.position(), cell.state(), cell.gpu().is_some())
            };
            // A release may have slipped in between queueing and this call.
            if has_gpu || !matches!(state, CellState::Prewarm | CellState::Render) {
                continue;
            }
            let seed = cell_seed(self.world_seed, id as u32);
            match population.populate(device, queue, &terrain_gpu.bind_group, position, seed, grass)
            {
                Ok(PopulationOutcome::Empty) => {
                    eprintln!("[population] cell {id} is empty");
                    self.cells[id].mark_empty();
                }
                Ok(PopulationOutcome::Placed(parts)) => {
                    let count = parts.true_instance_count;
                    let label = format!("cell {id}");
                    let gpu = CellGpu::assemble(device, visibility, draw_layout, parts, &label);
                    let cell = &mut self.cells[id];
                    cell.complete_population(count);
                    cell.install_gpu(gpu);
                    eprintln!("[population] cell {id} placed {count} instances");
                }
                Err(err) => {
                    eprintln!("[population] cell {id} failed: {err:?}");
                    self.cells[id].abort_population();
                }
            }
        }
    }

    /// Host-side frustum gate over whole cells. The camera cell is exempt so
    /// the ground under the viewer never drops out at steep pitch angles.
    pub fn update_host_visibility(&mut self, frustum: &Frustum) {
        for cell in &mut self.cells {
            cell.visible = cell.is_camera_cell || frustum.contains_any_corner(cell.corners());
        }
    }

    /// Cells the render pass may draw this frame.
    pub fn renderable_cells(&self) -> SmallVec<[usize; 16]> {
        self.cells.iter().filter(|c| c.can_render()).map(|c| c.id()).collect()
    }
}
