//! Per-frame uniform arena.
//!
//! Program uniform blocks are copied into fixed-size slots of one uniform
//! buffer and addressed with a dynamic offset. The cursor rewinds at present;
//! a full arena is replaced by one twice as large.

use crate::renderer::device::MAX_UNIFORM_BLOCK_SIZE;

pub(super) struct UniformArena {
    buffer: wgpu::Buffer,
    slot_size: u64,
    slots: u32,
    cursor: u32,
    generation: u64,
}

impl UniformArena {
    pub(super) fn new(device: &wgpu::Device, min_alignment: u32, slots: u32) -> Self {
        let slot_size = (MAX_UNIFORM_BLOCK_SIZE as u64).max(u64::from(min_alignment));
        Self {
            buffer: Self::allocate(device, slot_size, slots),
            slot_size,
            slots,
            cursor: 0,
            generation: 0,
        }
    }

    fn allocate(device: &wgpu::Device, slot_size: u64, slots: u32) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Uniform Arena"),
            size: slot_size * u64::from(slots),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Copies `data` into the next slot and returns its dynamic offset.
    pub(super) fn push(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, data: &[u8]) -> u32 {
        if self.cursor == self.slots {
            self.slots *= 2;
            self.buffer = Self::allocate(device, self.slot_size, self.slots);
            self.cursor = 0;
            self.generation += 1;
            log::debug!("Uniform arena grown to {} slots", self.slots);
        }
        let offset = u64::from(self.cursor) * self.slot_size;
        self.cursor += 1;

        let mut block = [0u8; MAX_UNIFORM_BLOCK_SIZE];
        block[..data.len()].copy_from_slice(data);
        queue.write_buffer(&self.buffer, offset, &block);
        offset as u32
    }

    pub(super) fn reset(&mut self) {
        self.cursor = 0;
    }

    pub(super) fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Bumped whenever the backing buffer is replaced.
    pub(super) fn generation(&self) -> u64 {
        self.generation
    }
}
