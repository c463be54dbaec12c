//! Bindless texture table.
//!
//! Group 1 holds one texture binding array and one sampler binding array of
//! equal length. A bindless handle is an index into both. Slot 0 and every
//! unused slot point at a 1x1 white texture.

use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;

use super::TextureEntry;
use super::convert::{address_mode, filter_mode};
use crate::renderer::device::{FilterMode, RawTexture, WrapMode};

type ExcludedSet = SmallVec<[RawTexture; 4]>;

pub(super) struct BindlessTable {
    layout: wgpu::BindGroupLayout,
    capacity: u32,
    slots: Vec<Option<RawTexture>>,
    white: wgpu::TextureView,
    samplers: FxHashMap<(FilterMode, WrapMode), wgpu::Sampler>,
    generation: u64,
    cache: FxHashMap<ExcludedSet, (u64, wgpu::BindGroup)>,
}

impl BindlessTable {
    pub(super) fn new(device: &wgpu::Device, queue: &wgpu::Queue, capacity: u32) -> Self {
        let count = std::num::NonZeroU32::new(capacity);
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bindless Textures"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count,
                },
            ],
        });

        let white = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Bindless White"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &white,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255; 4],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        let white = white.create_view(&wgpu::TextureViewDescriptor::default());

        let mut samplers = FxHashMap::default();
        for filter in [FilterMode::Nearest, FilterMode::Linear] {
            for wrap in [WrapMode::Repeat, WrapMode::MirroredRepeat, WrapMode::ClampToEdge] {
                let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
                    label: Some("Bindless Sampler"),
                    address_mode_u: address_mode(wrap),
                    address_mode_v: address_mode(wrap),
                    address_mode_w: address_mode(wrap),
                    mag_filter: filter_mode(filter),
                    min_filter: filter_mode(filter),
                    mipmap_filter: match filter {
                        FilterMode::Nearest => wgpu::MipmapFilterMode::Nearest,
                        FilterMode::Linear => wgpu::MipmapFilterMode::Linear,
                    },
                    ..Default::default()
                });
                samplers.insert((filter, wrap), sampler);
            }
        }

        Self {
            layout,
            capacity,
            slots: vec![None],
            white,
            samplers,
            generation: 0,
            cache: FxHashMap::default(),
        }
    }

    pub(super) fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub(super) fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Claims the lowest free slot above 0.
    pub(super) fn allocate(&mut self, texture: RawTexture) -> Option<u64> {
        let free = self.slots.iter().skip(1).position(Option::is_none);
        let index = match free {
            Some(index) => index + 1,
            None if self.slots.len() < self.capacity as usize => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return None,
        };
        self.slots[index] = Some(texture);
        self.generation += 1;
        Some(index as u64)
    }

    pub(super) fn release(&mut self, handle: u64) {
        if let Some(slot) = self.slots.get_mut(handle as usize) {
            *slot = None;
            self.generation += 1;
        }
    }

    /// The group for a pass writing to `excluded`; those textures read as
    /// white for the duration of the pass.
    pub(super) fn bind_group(
        &mut self,
        device: &wgpu::Device,
        textures: &SlotMap<RawTexture, TextureEntry>,
        excluded: &[RawTexture],
    ) -> wgpu::BindGroup {
        let key: ExcludedSet = excluded.iter().copied().collect();
        if let Some((generation, group)) = self.cache.get(&key)
            && *generation == self.generation
        {
            return group.clone();
        }

        let default_sampler = &self.samplers[&(FilterMode::Linear, WrapMode::Repeat)];
        let mut views: Vec<&wgpu::TextureView> = Vec::with_capacity(self.capacity as usize);
        let mut samplers: Vec<&wgpu::Sampler> = Vec::with_capacity(self.capacity as usize);
        for index in 0..self.capacity as usize {
            let entry = self
                .slots
                .get(index)
                .copied()
                .flatten()
                .filter(|raw| !excluded.contains(raw))
                .and_then(|raw| textures.get(raw));
            match entry {
                Some(entry) => {
                    views.push(&entry.view);
                    samplers.push(&self.samplers[&(entry.desc.filter, entry.desc.wrap)]);
                }
                None => {
                    views.push(&self.white);
                    samplers.push(default_sampler);
                }
            }
        }

        let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bindless Textures"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureViewArray(&views),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::SamplerArray(&samplers),
                },
            ],
        });
        self.cache.insert(key, (self.generation, group.clone()));
        group
    }
}
