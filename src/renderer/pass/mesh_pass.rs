//! Mesh Pass
//!
//! Groups render objects by `(mesh, material)` so each group is one indirect
//! draw, and groups consecutive draws sharing a program into one multi-draw.
//!
//! # Batch ids
//!
//! A batch id is the discovery index of a `(mesh, material)` pair: the first
//! pair ever seen is `0`, the next new pair `1`, and so on. Ids never change
//! once assigned, which lets geometry be laid out in id order ahead of the
//! refresh.
//!
//! # Refresh
//!
//! 1. Drain `unbatched` into the append-only `pass_objects`.
//! 2. Rebuild `flat_batches` over every pass object.
//! 3. Stable-sort by batch id.
//! 4. Coalesce equal ids into [`IndirectBatch`]es.
//! 5. Coalesce consecutive indirect batches sharing a program into
//!    [`MultiBatch`]es.
//!
//! Objects are never removed from a pass.

use rustc_hash::FxHashMap;

use crate::renderer::core::handle::Handle;
use crate::renderer::core::program::ShaderProgram;
use crate::renderer::pass::RenderObjectId;
use crate::scene::{Material, MeshId, RenderPass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey {
    pub mesh: MeshId,
    pub material: Handle<Material>,
}

/// A render object admitted to this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassObject {
    pub object: RenderObjectId,
    pub key: BatchKey,
    pub program: Handle<ShaderProgram>,
}

/// One pass object tagged with its batch id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatBatch {
    /// Index into [`MeshPass::pass_objects`].
    pub object_index: u32,
    pub batch_id: u32,
}

/// A run of flat batches with the same key: one indirect draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectBatch {
    pub key: BatchKey,
    pub batch_id: u32,
    pub program: Handle<ShaderProgram>,
    /// First index into the sorted [`MeshPass::flat_batches`].
    pub first: u32,
    /// Number of instances.
    pub count: u32,
}

/// A run of indirect batches with the same program: one multi-draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiBatch {
    pub program: Handle<ShaderProgram>,
    /// First index into [`MeshPass::indirect_batches`].
    pub first: u32,
    pub count: u32,
}

#[derive(Debug)]
pub struct MeshPass {
    pass: RenderPass,
    unbatched: Vec<(RenderObjectId, BatchKey, Handle<ShaderProgram>)>,
    pass_objects: Vec<PassObject>,

    batch_ids: FxHashMap<BatchKey, u32>,
    batch_keys: Vec<BatchKey>,

    flat_batches: Vec<FlatBatch>,
    indirect_batches: Vec<IndirectBatch>,
    multi_batches: Vec<MultiBatch>,
}

fn intern(ids: &mut FxHashMap<BatchKey, u32>, keys: &mut Vec<BatchKey>, key: BatchKey) -> u32 {
    *ids.entry(key).or_insert_with(|| {
        keys.push(key);
        (keys.len() - 1) as u32
    })
}

impl MeshPass {
    #[must_use]
    pub fn new(pass: RenderPass) -> Self {
        Self {
            pass,
            unbatched: Vec::new(),
            pass_objects: Vec::new(),
            batch_ids: FxHashMap::default(),
            batch_keys: Vec::new(),
            flat_batches: Vec::new(),
            indirect_batches: Vec::new(),
            multi_batches: Vec::new(),
        }
    }

    #[must_use]
    pub fn pass(&self) -> RenderPass {
        self.pass
    }

    /// Queues a render object for the next refresh.
    pub fn push(&mut self, object: RenderObjectId, key: BatchKey, program: Handle<ShaderProgram>) {
        self.unbatched.push((object, key, program));
    }

    #[must_use]
    pub fn has_unbatched(&self) -> bool {
        !self.unbatched.is_empty()
    }

    /// Keys of objects queued since the last refresh, in queue order.
    pub fn unbatched_keys(&self) -> impl Iterator<Item = BatchKey> + '_ {
        self.unbatched.iter().map(|(_, key, _)| *key)
    }

    /// Returns the batch id of `(mesh, material)`, assigning the next id if
    /// the pair is new.
    pub fn get_batch_id(&mut self, mesh: MeshId, material: Handle<Material>) -> u32 {
        intern(
            &mut self.batch_ids,
            &mut self.batch_keys,
            BatchKey { mesh, material },
        )
    }

    /// Looks up an id without assigning one.
    #[must_use]
    pub fn find_batch_id(&self, key: BatchKey) -> Option<u32> {
        self.batch_ids.get(&key).copied()
    }

    #[must_use]
    pub fn batch_key(&self, batch_id: u32) -> Option<BatchKey> {
        self.batch_keys.get(batch_id as usize).copied()
    }

    /// Number of distinct `(mesh, material)` pairs seen so far.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batch_keys.len()
    }

    /// Rebuilds all derived batches if objects were queued.
    ///
    /// Returns whether anything was rebuilt.
    pub fn refresh(&mut self) -> bool {
        if self.unbatched.is_empty() {
            return false;
        }

        // 1. Drain
        for (object, key, program) in self.unbatched.drain(..) {
            self.pass_objects.push(PassObject {
                object,
                key,
                program,
            });
        }

        // 2. Flat batches over every pass object
        self.flat_batches.clear();
        for (index, object) in self.pass_objects.iter().enumerate() {
            let batch_id = intern(&mut self.batch_ids, &mut self.batch_keys, object.key);
            self.flat_batches.push(FlatBatch {
                object_index: index as u32,
                batch_id,
            });
        }

        // 3. Stable sort
        self.flat_batches.sort_by_key(|flat| flat.batch_id);

        // 4. Indirect batches
        self.indirect_batches.clear();
        for (position, flat) in self.flat_batches.iter().enumerate() {
            match self.indirect_batches.last_mut() {
                Some(batch) if batch.batch_id == flat.batch_id => batch.count += 1,
                _ => {
                    let object = &self.pass_objects[flat.object_index as usize];
                    self.indirect_batches.push(IndirectBatch {
                        key: object.key,
                        batch_id: flat.batch_id,
                        program: object.program,
                        first: position as u32,
                        count: 1,
                    });
                }
            }
        }

        // 5. Multi batches, split on program change
        self.multi_batches.clear();
        for (position, batch) in self.indirect_batches.iter().enumerate() {
            match self.multi_batches.last_mut() {
                Some(multi) if multi.program == batch.program => multi.count += 1,
                _ => self.multi_batches.push(MultiBatch {
                    program: batch.program,
                    first: position as u32,
                    count: 1,
                }),
            }
        }

        log::debug!(
            "{:?} pass refreshed: {} objects, {} indirect batches, {} multi batches",
            self.pass,
            self.pass_objects.len(),
            self.indirect_batches.len(),
            self.multi_batches.len()
        );
        true
    }

    #[must_use]
    pub fn pass_objects(&self) -> &[PassObject] {
        &self.pass_objects
    }

    #[must_use]
    pub fn flat_batches(&self) -> &[FlatBatch] {
        &self.flat_batches
    }

    #[must_use]
    pub fn indirect_batches(&self) -> &[IndirectBatch] {
        &self.indirect_batches
    }

    #[must_use]
    pub fn multi_batches(&self) -> &[MultiBatch] {
        &self.multi_batches
    }

    /// Indirect batches covered by one multi batch.
    #[must_use]
    pub fn batches_of(&self, multi: &MultiBatch) -> &[IndirectBatch] {
        let start = multi.first as usize;
        &self.indirect_batches[start..start + multi.count as usize]
    }
}
