use crate::instancer::CellGpu;
use crate::mesh::{GrassMeshSet, LOD_COUNT};
use anyhow::{anyhow, Context, Result};
use std::sync::mpsc::{Receiver, TryRecvError};

/// Layout of the per-cell visible counter buffer: one `u32` per LOD plus a
/// spare slot keeping the buffer 16 bytes.
pub const VISIBLE_COUNTER_SLOTS: usize = 4;
pub const VISIBLE_COUNTER_BYTES: u64 = (VISIBLE_COUNTER_SLOTS * 4) as u64;

/// Indirect draw records are packed back to back, one per LOD.
pub const DRAW_ARGS_STRIDE: u64 = 20;
pub const DRAW_ARGS_BYTES: u64 = DRAW_ARGS_STRIDE * LOD_COUNT as u64;

/// Per-cell uniform consumed by the grass fragment shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CellDrawParams {
    pub shadow_factor: f32,
    pub _padding: [f32; 3],
}

impl CellDrawParams {
    pub fn new(shadowed: bool) -> Self {
        Self {
            shadow_factor: if shadowed { 1.0 } else { 0.0 },
            _padding: [0.0; 3],
        }
    }
}

/// Shadow casting is restricted to the camera's own cell while it is
/// host-visible; everywhere else the darkening term stays off.
pub fn shadow_gate(cast_shadows: bool, is_camera_cell: bool, visible: bool) -> bool {
    cast_shadows && is_camera_cell && visible
}

/// Builds the three 20-byte indirect records for one cell. Only the index
/// count and instance count vary; first index, base vertex and first
/// instance stay zero because each LOD binds its own mesh and visible set.
pub fn build_draw_args(
    index_counts: [u32; LOD_COUNT],
    visible_counts: [u32; LOD_COUNT],
) -> [u32; 15] {
    let mut words = [0u32; 15];
    for lod in 0..LOD_COUNT {
        let base = lod * 5;
        words[base] = index_counts[lod];
        words[base + 1] = visible_counts[lod];
    }
    words
}

pub fn patch_draw_args(
    queue: &wgpu::Queue,
    gpu: &CellGpu,
    index_counts: [u32; LOD_COUNT],
    visible_counts: [u32; LOD_COUNT],
) {
    let words = build_draw_args(index_counts, visible_counts);
    queue.write_buffer(&gpu.args_buffer, 0, bytemuck::cast_slice(&words));
}

/// Records the (up to) three indirect draws for one populated cell. The
/// frame bind group at slot 0 is already set by the caller.
pub fn draw_cell(pass: &mut wgpu::RenderPass, gpu: &CellGpu, meshes: &GrassMeshSet) {
    for lod in 0..LOD_COUNT {
        let mesh = &meshes.lods[lod];
        pass.set_bind_group(1, &gpu.draw_bind_groups[lod], &[]);
        pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed_indirect(&gpu.args_buffer, lod as u64 * DRAW_ARGS_STRIDE);
    }
}

struct ReadbackSlot {
    staging: wgpu::Buffer,
    receiver: Option<Receiver<std::result::Result<(), wgpu::BufferAsyncError>>>,
}

/// Double-buffered readback of the per-LOD visible counters. A copy encoded
/// on frame N is mapped after submit and consumed no earlier than frame N+1,
/// so draws run one frame behind the cull counts. The counts only shrink or
/// grow by what the camera moved in one frame; indices in the visible sets
/// stay valid, so the stale record is benign.
pub struct ReadbackRing {
    slots: [ReadbackSlot; 2],
    cursor: usize,
    latest: Option<[u32; LOD_COUNT]>,
}

impl ReadbackRing {
    pub fn new(device: &wgpu::Device, label: &str) -> Self {
        let slots = std::array::from_fn(|i| ReadbackSlot {
            staging: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{label} readback {i}")),
                size: VISIBLE_COUNTER_BYTES,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            receiver: None,
        });
        Self {
            slots,
            cursor: 0,
            latest: None,
        }
    }

    /// Freshest completed counter readback, if any arrived yet.
    pub fn latest(&self) -> Option<[u32; LOD_COUNT]> {
        self.latest
    }

    /// Returns the staging buffer to encode this frame's counter copy into.
    /// If the slot's previous map has not resolved yet the device is polled
    /// blocking; with two slots that only happens when the GPU is more than
    /// two frames behind.
    pub fn acquire(&mut self, device: &wgpu::Device) -> Result<&wgpu::Buffer> {
        if !self.try_harvest(self.cursor) {
            device
                .poll(wgpu::PollType::Wait {
                    submission_index: None,
                    timeout: None,
                })
                .context("waiting for a visible-count readback slot")?;
            if !self.try_harvest(self.cursor) {
                return Err(anyhow!(
                    "visible-count readback did not resolve after a blocking wait"
                ));
            }
        }
        // The other slot was mapped a frame later; take its fresher counts
        // when they already landed.
        let newer = 1 - self.cursor;
        self.try_harvest(newer);
        Ok(&self.slots[self.cursor].staging)
    }

    /// Starts the async map on the slot just encoded. Call after the copy
    /// has been submitted.
    pub fn request_map(&mut self) {
        let slot = &mut self.slots[self.cursor];
        let (tx, rx) = std::sync::mpsc::channel();
        slot.staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        slot.receiver = Some(rx);
        self.cursor = 1 - self.cursor;
    }

    /// Consumes the slot's map result if it arrived. Returns whether the
    /// slot is free for reuse afterwards.
    fn try_harvest(&mut self, index: usize) -> bool {
        let slot = &mut self.slots[index];
        let Some(receiver) = &slot.receiver else {
            return true;
        };
        match receiver.try_recv() {
            Ok(Ok(())) => {
                let view = slot.staging.slice(..).get_mapped_range();
                let counters: &[u32] = bytemuck::cast_slice(&view);
                self.latest = Some([counters[0], counters[1], counters[2]]);
                drop(view);
                slot.staging.unmap();
                slot.receiver = None;
                true
            }
            Ok(Err(err)) => {
                eprintln!("[readback] visible-count map failed: {err:?}");
                slot.receiver = None;
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                eprintln!("[readback] visible-count channel closed before a result arrived");
                slot.receiver = None;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_args_records_sit_twenty_bytes_apart() {
        let words = build_draw_args([66, 30, 12], [100, 200, 300]);
        assert_eq!(words.len() * 4, DRAW_ARGS_BYTES as usize);
        // Record 0 at byte 0, record 1 at byte 20, record 2 at byte 40.
        assert_eq!(&words[0..5], &[66, 100, 0, 0, 0]);
        assert_eq!(&words[5..10], &[30, 200, 0, 0, 0]);
        assert_eq!(&words[10..15], &[12, 300, 0, 0, 0]);
    }

    #[test]
    fn draw_args_stride_matches_wgpu_indirect_layout() {
        assert_eq!(
            std::mem::size_of::<wgpu::util::DrawIndexedIndirectArgs>() as u64,
            DRAW_ARGS_STRIDE
        );
    }

    #[test]
    fn shadow_gate_requires_camera_cell_and_visibility() {
        assert!(shadow_gate(true, true, true));
        assert!(!shadow_gate(false, true, true));
        assert!(!shadow_gate(true, false, true));
        assert!(!shadow_gate(true, true, false));
    }

    #[test]
    fn cell_draw_params_fit_one_uniform_row() {
        assert_eq!(std::mem::size_of::<CellDrawParams>(), 16);
        assert_eq!(CellDrawParams::new(true).shadow_factor, 1.0);
        assert_eq!(CellDrawParams::new(false).shadow_factor, 0.0);
    }
}
