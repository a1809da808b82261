use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::buffer::{BufferManager, BufferTracker, BufferUsage};
use crate::composer::fallback::FallbackComposer;
use crate::composer::{Composer, Cost};
use crate::composition::entry::{ComposerSlot, Composition, TargetSpec};
use crate::config::CompositorOpts;
use crate::foundation::core::{BufferHandle, Compression, CostKind, PixelFormat};
use crate::foundation::error::{LayercompError, LayercompResult};
use crate::foundation::fence::Fence;
use crate::foundation::math::hash_bytes;
use crate::layer::model::{CompositionId, CompositionRef, Layer};
use crate::layer::stack::LayerStack;

/// Buffer frees reported by the buffer manager, possibly from other threads.
///
/// The list is only drained by the frame thread at the end of a frame.
#[derive(Debug, Default)]
pub struct StaleBuffers {
    freed: Mutex<Vec<BufferHandle>>,
    allocated: AtomicU64,
}

impl StaleBuffers {
    fn drain(&self) -> Vec<BufferHandle> {
        let mut freed = self
            .freed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *freed)
    }

    /// Allocations observed so far.
    pub fn allocations(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }
}

impl BufferTracker for StaleBuffers {
    fn notify_buffer_alloc(&self, handle: BufferHandle) {
        self.allocated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(handle = handle.0, "buffer allocated");
    }

    fn notify_buffer_free(&self, handle: BufferHandle) {
        self.freed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }
}

/// Counters of the composition cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    /// Requests answered from the cache.
    pub hits: u64,
    /// Requests that went through evaluation.
    pub misses: u64,
    /// `on_evaluate` calls made.
    pub evaluations: u64,
    /// Entries invalidated by buffer frees.
    pub invalidations: u64,
    /// Entries dropped from the cache.
    pub evictions: u64,
}

fn slot_mut<'a>(
    composers: &'a mut [Box<dyn Composer>],
    host: &'a mut FallbackComposer,
    slot: ComposerSlot,
) -> &'a mut dyn Composer {
    match slot {
        ComposerSlot::Registered(i) => composers[i].as_mut(),
        ComposerSlot::Host => host,
    }
}

/// Registry of composers and owner of the composition cache.
///
/// Requests are answered from the cache while the source geometry and target spec are
/// unchanged; only buffers flow into a cached entry. Buffer frees invalidate entries at the
/// end of the frame, locked or not. Locks only protect against eviction.
///
/// An entry already locked or used this frame is not handed to a request with other
/// buffers, so displays sharing a layout get one entry each. Sources that still carry a
/// buffer freed at the end of the previous frame get a one-off entry that is never cached.
pub struct CompositionManager {
    composers: Vec<Box<dyn Composer>>,
    host: FallbackComposer,
    cache: Vec<Composition>,
    next_id: u64,
    stale: Arc<StaleBuffers>,
    recently_freed: HashSet<BufferHandle>,
    buffers: Arc<dyn BufferManager>,
    idle_eviction_frames: u64,
    default_fps: f32,
    fence_timeout: Duration,
    cost: CostKind,
    frame: u64,
    stats: CacheStats,
}

impl CompositionManager {
    /// Manager with only the host compositor registered.
    pub fn new(buffers: Arc<dyn BufferManager>, opts: &CompositorOpts) -> Self {
        Self {
            composers: Vec::new(),
            host: FallbackComposer::new(Arc::clone(&buffers), opts.max_layers),
            cache: Vec::new(),
            next_id: 1,
            stale: Arc::new(StaleBuffers::default()),
            recently_freed: HashSet::new(),
            buffers,
            idle_eviction_frames: opts.idle_eviction_frames,
            default_fps: opts.default_fps,
            fence_timeout: opts.fence_timeout(),
            cost: opts.cost,
            frame: 0,
            stats: CacheStats::default(),
        }
    }

    /// Register a composer. Earlier registrations win cost ties.
    pub fn add(&mut self, composer: Box<dyn Composer>) {
        tracing::debug!(composer = composer.name(), "composer registered");
        self.composers.push(composer);
    }

    /// Number of registered composers, host excluded.
    pub fn len(&self) -> usize {
        self.composers.len()
    }

    /// Return `true` when only the host is available.
    pub fn is_empty(&self) -> bool {
        self.composers.is_empty()
    }

    /// Tracker to register with the buffer manager.
    pub fn tracker(&self) -> Arc<StaleBuffers> {
        Arc::clone(&self.stale)
    }

    /// Record a buffer allocation.
    pub fn notify_buffer_alloc(&self, handle: BufferHandle) {
        self.stale.notify_buffer_alloc(handle);
    }

    /// Queue a buffer free. Processed by [`CompositionManager::on_end_of_frame`].
    pub fn notify_buffer_free(&self, handle: BufferHandle) {
        self.stale.notify_buffer_free(handle);
    }

    /// Metric used to compare composers.
    pub fn cost_kind(&self) -> CostKind {
        self.cost
    }

    /// Frames completed so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Cache counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Number of cached compositions, invalid ones included.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// The host compositor.
    pub fn host(&self) -> &FallbackComposer {
        &self.host
    }

    /// The host compositor, mutably.
    pub fn host_mut(&mut self) -> &mut FallbackComposer {
        &mut self.host
    }

    /// Cached composition `id`.
    pub fn composition(&self, id: CompositionId) -> Option<&Composition> {
        self.cache.iter().find(|c| c.id == id)
    }

    fn entry_mut(&mut self, id: CompositionId) -> Option<&mut Composition> {
        self.cache.iter_mut().find(|c| c.id == id)
    }

    fn choose_best(
        &mut self,
        source: &LayerStack,
        target: &Layer,
        kind: CostKind,
        with_host: bool,
    ) -> Option<(ComposerSlot, Cost)> {
        let mut best: Option<(ComposerSlot, Cost)> = None;
        let host = with_host.then_some((ComposerSlot::Host, &self.host as &dyn Composer));
        let registered = self
            .composers
            .iter()
            .enumerate()
            .map(|(i, c)| (ComposerSlot::Registered(i), &**c as &dyn Composer));
        for (slot, composer) in registered.chain(host) {
            self.stats.evaluations = self.stats.evaluations.saturating_add(1);
            let Some(cost) = composer.on_evaluate(source, target, kind).cost() else {
                tracing::trace!(composer = composer.name(), "not supported");
                continue;
            };
            tracing::trace!(composer = composer.name(), cost = cost.0, "evaluated");
            if best.is_none_or(|(_, b)| cost.0 < b.0) {
                best = Some((slot, cost));
            }
        }
        best
    }

    /// Find or create a composition of `source` into a `width` x `height` target.
    ///
    /// Returns `None` when no composer supports the request; callers retry with less
    /// compression or fall back to the host.
    #[tracing::instrument(skip(self, source), fields(layers = source.len()))]
    pub fn request_composition(
        &mut self,
        source: &LayerStack,
        width: u32,
        height: u32,
        format: PixelFormat,
        compression: Compression,
        kind: CostKind,
    ) -> Option<CompositionId> {
        source.assert_settled();
        let spec = TargetSpec {
            width,
            height,
            format,
            compression,
        };
        let geometry = source.geometry_fingerprint();
        let frame = self.frame;
        let cacheable = !source
            .iter()
            .any(|l| l.handle.is_some_and(|h| self.recently_freed.contains(&h)));

        if cacheable
            && let Some(entry) = self
                .cache
                .iter_mut()
                .find(|c| c.matches(source, geometry, spec) && !c.claimed_by_other(source, frame))
        {
            entry.source.update_frame_state(source);
            entry.last_used_frame = frame;
            self.stats.hits = self.stats.hits.saturating_add(1);
            tracing::debug!(id = entry.id.0, composer = %entry.composer_name, "cache hit");
            return Some(entry.id);
        }
        self.stats.misses = self.stats.misses.saturating_add(1);
        if !cacheable {
            tracing::debug!("source holds a freed buffer; composition will not be cached");
        }

        let fps = source
            .iter()
            .map(|l| l.fps)
            .fold(None, |acc: Option<f32>, f| Some(acc.map_or(f, |a| a.max(f))))
            .unwrap_or(self.default_fps);
        let mut target = Layer::target(width, height, format, compression).with_fps(fps);

        let Some((slot, cost)) = self.choose_best(source, &target, kind, true) else {
            tracing::debug!(?spec, "no composer supports the request");
            return None;
        };

        let id = CompositionId(self.next_id);
        self.next_id += 1;
        target.composition = Some(CompositionRef::Managed(id));
        let composer_name = slot_mut(&mut self.composers, &mut self.host, slot)
            .name()
            .to_string();
        tracing::debug!(id = id.0, composer = %composer_name, cost = cost.0, "composition created");
        self.cache.push(Composition {
            id,
            slot,
            composer_name,
            source: source.clone(),
            geometry,
            spec,
            cost,
            target,
            owns_target: false,
            valid: true,
            cacheable,
            lock_count: 0,
            last_used_frame: frame,
            resource: None,
            composed: None,
            consumer_wait: None,
        });
        Some(id)
    }

    /// Try `compressions` in order, most compressed first, and keep the first that works.
    pub fn request_with_compressions(
        &mut self,
        source: &LayerStack,
        width: u32,
        height: u32,
        format: PixelFormat,
        compressions: &[Compression],
        kind: CostKind,
    ) -> Option<CompositionId> {
        compressions.iter().find_map(|&compression| {
            let id = self.request_composition(source, width, height, format, compression, kind);
            if id.is_none() {
                tracing::trace!(?compression, "retrying with less compression");
            }
            id
        })
    }

    /// Increment the lock count of `id`, returning the new count.
    pub fn lock(&mut self, id: CompositionId) -> u32 {
        match self.entry_mut(id) {
            Some(e) => {
                e.lock_count = e.lock_count.saturating_add(1);
                e.lock_count
            }
            None => 0,
        }
    }

    /// Decrement the lock count of `id`, returning the new count.
    pub fn unlock(&mut self, id: CompositionId) -> u32 {
        match self.entry_mut(id) {
            Some(e) => {
                if e.lock_count == 0 {
                    tracing::warn!(id = id.0, "unlock of an unlocked composition");
                }
                e.lock_count = e.lock_count.saturating_sub(1);
                e.lock_count
            }
            None => 0,
        }
    }

    /// Reserve the composer resources and the target buffer of `id`.
    ///
    /// Returns `false` on failure with nothing left reserved.
    pub fn acquire(&mut self, id: CompositionId) -> bool {
        let Some(idx) = self.cache.iter().position(|c| c.id == id) else {
            return false;
        };
        let entry = &mut self.cache[idx];
        if !entry.valid {
            tracing::debug!(id = id.0, "acquire of an invalidated composition");
            return false;
        }
        if entry.resource.is_some() {
            return true;
        }

        let composer = slot_mut(&mut self.composers, &mut self.host, entry.slot);
        let Some(res) = composer.on_acquire(&entry.source, &entry.target) else {
            tracing::debug!(id = id.0, composer = composer.name(), "composer acquire failed");
            return false;
        };

        if let Some(own) = composer.target(res) {
            let mut target = own.clone();
            target.composition = Some(CompositionRef::Managed(id));
            entry.target = target;
        } else if entry.target.handle.is_none() {
            let spec = entry.spec;
            match self.buffers.create_buffer(
                &format!("composition-{}", id.0),
                spec.width,
                spec.height,
                spec.format,
                BufferUsage::RenderTarget,
            ) {
                Ok(handle) => {
                    entry.target.handle = Some(handle);
                    entry.owns_target = true;
                }
                Err(e) => {
                    tracing::warn!(id = id.0, error = %e, "render target allocation failed");
                    composer.on_release(res);
                    return false;
                }
            }
        }
        entry.resource = Some(res);
        true
    }

    /// Compose `id`. Skipped when neither buffers nor geometry changed since the last
    /// compose. Returns the consumer-wait fence, if any.
    pub fn compose(&mut self, id: CompositionId) -> LayercompResult<Option<Fence>> {
        let Some(idx) = self.cache.iter().position(|c| c.id == id) else {
            return Err(LayercompError::render(format!("unknown composition {}", id.0)));
        };
        let entry = &mut self.cache[idx];
        if !entry.valid {
            return Err(LayercompError::render(format!(
                "composition {} was invalidated",
                id.0
            )));
        }
        let Some(res) = entry.resource else {
            return Err(LayercompError::render(format!(
                "composition {} composed before acquire",
                id.0
            )));
        };

        let mut key = entry.source.fingerprint().to_le_bytes().to_vec();
        key.extend_from_slice(&entry.target.handle.map_or(u64::MAX, |h| h.0).to_le_bytes());
        let key = hash_bytes(&key);
        if entry.composed == Some(key) {
            tracing::trace!(id = id.0, "unchanged, compose skipped");
            return Ok(entry.consumer_wait.clone());
        }

        let composer = slot_mut(&mut self.composers, &mut self.host, entry.slot);
        let outcome = composer.on_compose(&entry.source, &entry.target, res)?;
        entry.composed = Some(key);
        entry.consumer_wait = outcome.consumer_wait;
        Ok(entry.consumer_wait.clone())
    }

    /// Release the composer resources of `id`. The target buffer stays cached.
    pub fn release(&mut self, id: CompositionId) {
        let Some(idx) = self.cache.iter().position(|c| c.id == id) else {
            return;
        };
        let entry = &mut self.cache[idx];
        if let Some(res) = entry.resource.take() {
            slot_mut(&mut self.composers, &mut self.host, entry.slot).on_release(res);
        }
    }

    /// Result layer of `id`.
    pub fn target(&self, id: CompositionId) -> Option<&Layer> {
        self.composition(id).map(|c| &c.target)
    }

    /// Compose `source` into `target` once, without caching anything.
    ///
    /// Returns `Ok(false)` when no composer can do it.
    pub fn perform_composition(&mut self, source: &LayerStack, target: &Layer) -> LayercompResult<bool> {
        source.assert_settled();
        let kind = self.cost;
        let Some((slot, cost)) = self.choose_best(source, target, kind, false) else {
            tracing::debug!("one-shot composition not supported");
            return Ok(false);
        };
        let composer = slot_mut(&mut self.composers, &mut self.host, slot);
        let Some(res) = composer.on_acquire(source, target) else {
            tracing::debug!(composer = composer.name(), "one-shot acquire failed");
            return Ok(false);
        };
        tracing::debug!(composer = composer.name(), cost = cost.0, "one-shot composition");
        let outcome = composer.on_compose(source, target, res);
        composer.on_release(res);
        let outcome = outcome?;
        if let Some(fence) = outcome.consumer_wait {
            fence.wait(self.fence_timeout, "one-shot consumer wait")?;
        }
        Ok(true)
    }

    /// Hand every layer of display `d` to the host compositor. Cannot fail.
    pub fn fallback_to_host(&mut self, d: usize) -> CompositionRef {
        tracing::debug!(display = d, "falling back to the host compositor");
        self.host.handle_all_layers(d)
    }

    /// Apply queued buffer frees and evict idle or invalid unlocked entries.
    #[tracing::instrument(skip(self), fields(frame = self.frame))]
    pub fn on_end_of_frame(&mut self) {
        let freed = self.stale.drain();
        for &handle in &freed {
            for entry in &mut self.cache {
                let mut hit = false;
                if entry.target.handle == Some(handle) {
                    entry.target.handle = None;
                    entry.owns_target = false;
                    hit = true;
                }
                if entry.source.iter().any(|l| l.handle == Some(handle)) {
                    hit = true;
                }
                if hit && entry.valid {
                    entry.valid = false;
                    self.stats.invalidations = self.stats.invalidations.saturating_add(1);
                    tracing::debug!(id = entry.id.0, handle = handle.0, "composition invalidated");
                }
            }
        }

        let frame = self.frame;
        let idle = self.idle_eviction_frames;
        let (keep, evict): (Vec<_>, Vec<_>) = std::mem::take(&mut self.cache)
            .into_iter()
            .partition(|e| {
                e.lock_count > 0
                    || (e.valid && e.cacheable && frame - e.last_used_frame < idle)
            });
        self.cache = keep;
        for mut entry in evict {
            if let Some(res) = entry.resource.take() {
                slot_mut(&mut self.composers, &mut self.host, entry.slot).on_release(res);
            }
            if entry.owns_target
                && let Some(handle) = entry.target.handle
            {
                self.buffers.destroy_buffer(handle);
            }
            self.stats.evictions = self.stats.evictions.saturating_add(1);
            tracing::debug!(id = entry.id.0, valid = entry.valid, "composition evicted");
        }
        self.recently_freed = freed.into_iter().collect();
        self.frame += 1;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/composition/manager.rs"]
mod tests;
