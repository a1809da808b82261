//! Buffer-manager collaborator interface and an in-memory implementation.
//!
//! The composition core never allocates pixel storage itself. It asks a [`BufferManager`]
//! for render targets and blank buffers, and learns about buffer lifetimes through
//! [`BufferTracker`] notifications, which may arrive from any thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::foundation::core::{BufferHandle, PixelFormat};
use crate::foundation::error::{LayercompError, LayercompResult};

/// Intended use of a buffer, forwarded to the allocator as a hint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferUsage {
    /// Producer-filled source content.
    #[default]
    Source,
    /// Written by a composer.
    RenderTarget,
    /// Minimal-backing blank content.
    Blank,
}

/// What the buffer manager knows about one buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDetails {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: PixelFormat,
    /// Bytes per row.
    pub stride: u32,
    /// Allocation hint the buffer was created with.
    pub usage: BufferUsage,
    /// Whether the backing store is currently released.
    pub purged: bool,
}

/// Allocator collaborator consumed by composers and filters.
pub trait BufferManager: Send + Sync {
    /// Allocate a buffer with backing storage.
    fn create_buffer(
        &self,
        tag: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: BufferUsage,
    ) -> LayercompResult<BufferHandle>;

    /// Replace `handle` with a buffer of a new shape. The old handle is freed.
    fn reallocate_buffer(
        &self,
        handle: BufferHandle,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: BufferUsage,
    ) -> LayercompResult<BufferHandle>;

    /// Allocate a buffer whose backing store starts purged.
    fn create_purged_buffer(
        &self,
        tag: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> LayercompResult<BufferHandle>;

    /// Details of a live buffer, `None` for unknown handles.
    fn query_details(&self, handle: BufferHandle) -> Option<BufferDetails>;

    /// Hint that the backing store is not needed for now.
    fn purge(&self, handle: BufferHandle);

    /// Hint that the backing store is needed again.
    fn realize(&self, handle: BufferHandle);

    /// Attach a debug label.
    fn set_tag(&self, handle: BufferHandle, tag: &str);

    /// Debug label of a live buffer.
    fn get_tag(&self, handle: BufferHandle) -> Option<String>;

    /// Free a buffer. Unknown handles are ignored.
    fn destroy_buffer(&self, handle: BufferHandle);

    /// Copy out the pixels of a CPU-accessible buffer.
    fn read_pixels(&self, handle: BufferHandle) -> LayercompResult<Vec<u8>>;

    /// Overwrite the pixels of a CPU-accessible buffer.
    fn write_pixels(&self, handle: BufferHandle, bytes: &[u8]) -> LayercompResult<()>;

    /// Register a receiver of lifetime notifications for every buffer of this manager.
    fn register_tracker(&self, tracker: Arc<dyn BufferTracker>);
}

/// Receiver of buffer lifetime notifications.
///
/// Notifications arrive independently of frame cadence and possibly from another thread.
pub trait BufferTracker: Send + Sync {
    /// A buffer was allocated.
    fn notify_buffer_alloc(&self, handle: BufferHandle);
    /// A buffer was freed.
    fn notify_buffer_free(&self, handle: BufferHandle);
}

/// Allocation counters of a [`MemoryBufferManager`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryBufferStats {
    /// Live buffers.
    pub live_buffers: usize,
    /// Bytes of realized backing storage.
    pub live_bytes: usize,
    /// Successful allocations so far.
    pub allocations: u64,
    /// Allocations refused by the budget.
    pub refused: u64,
}

struct Slot {
    details: BufferDetails,
    tag: String,
    pixels: Vec<u8>,
}

#[derive(Default)]
struct Store {
    next_handle: u64,
    slots: HashMap<BufferHandle, Slot>,
    stats: MemoryBufferStats,
}

/// Thread-safe [`BufferManager`] keeping pixels in host memory.
///
/// Registered trackers are notified after the internal lock is released, so a tracker may
/// call back into the manager.
pub struct MemoryBufferManager {
    store: Mutex<Store>,
    trackers: Mutex<Vec<Arc<dyn BufferTracker>>>,
    budget_bytes: Option<usize>,
}

impl Default for MemoryBufferManager {
    fn default() -> Self {
        Self::new()
    }
}

fn byte_len(width: u32, height: u32, format: PixelFormat) -> usize {
    let bits = (width as usize)
        .saturating_mul(height as usize)
        .saturating_mul(format.bits_per_pixel() as usize);
    bits.div_ceil(8)
}

fn stride_of(width: u32, format: PixelFormat) -> u32 {
    if format.bits_per_pixel() >= 16 {
        width * (format.bits_per_pixel() / 8)
    } else {
        // Planar formats report the luma stride.
        width
    }
}

impl MemoryBufferManager {
    /// Manager without an allocation budget.
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store {
                next_handle: 1,
                ..Store::default()
            }),
            trackers: Mutex::new(Vec::new()),
            budget_bytes: None,
        }
    }

    /// Manager refusing allocations once realized storage would exceed `bytes`.
    pub fn with_budget(bytes: usize) -> Self {
        Self {
            budget_bytes: Some(bytes),
            ..Self::new()
        }
    }

    /// Current counters.
    pub fn stats(&self) -> MemoryBufferStats {
        lock(&self.store).stats.clone()
    }

    /// Allocate a source buffer filled with `bytes`.
    pub fn create_filled(
        &self,
        tag: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
        bytes: &[u8],
    ) -> LayercompResult<BufferHandle> {
        let handle = self.create_buffer(tag, width, height, format, BufferUsage::Source)?;
        self.write_pixels(handle, bytes)?;
        Ok(handle)
    }

    fn allocate(
        &self,
        tag: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: BufferUsage,
        purged: bool,
    ) -> LayercompResult<BufferHandle> {
        if width == 0 || height == 0 {
            return Err(LayercompError::allocation(format!(
                "cannot allocate empty buffer '{tag}' ({width}x{height})"
            )));
        }
        let len = if purged {
            0
        } else {
            byte_len(width, height, format)
        };
        let handle = {
            let mut store = lock(&self.store);
            if let Some(budget) = self.budget_bytes
                && store.stats.live_bytes.saturating_add(len) > budget
            {
                store.stats.refused = store.stats.refused.saturating_add(1);
                return Err(LayercompError::allocation(format!(
                    "buffer '{tag}' ({width}x{height} {format:?}) exceeds budget of {budget} bytes"
                )));
            }
            let handle = BufferHandle(store.next_handle);
            store.next_handle += 1;
            store.slots.insert(
                handle,
                Slot {
                    details: BufferDetails {
                        width,
                        height,
                        format,
                        stride: stride_of(width, format),
                        usage,
                        purged,
                    },
                    tag: tag.to_string(),
                    pixels: vec![0; len],
                },
            );
            store.stats.live_buffers += 1;
            store.stats.live_bytes = store.stats.live_bytes.saturating_add(len);
            store.stats.allocations = store.stats.allocations.saturating_add(1);
            handle
        };
        tracing::trace!(handle = handle.0, tag, width, height, ?format, "buffer allocated");
        for t in self.trackers_snapshot() {
            t.notify_buffer_alloc(handle);
        }
        Ok(handle)
    }

    fn trackers_snapshot(&self) -> Vec<Arc<dyn BufferTracker>> {
        lock(&self.trackers).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BufferManager for MemoryBufferManager {
    fn create_buffer(
        &self,
        tag: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: BufferUsage,
    ) -> LayercompResult<BufferHandle> {
        self.allocate(tag, width, height, format, usage, false)
    }

    fn reallocate_buffer(
        &self,
        handle: BufferHandle,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: BufferUsage,
    ) -> LayercompResult<BufferHandle> {
        let tag = self.get_tag(handle).unwrap_or_default();
        self.destroy_buffer(handle);
        self.allocate(&tag, width, height, format, usage, false)
    }

    fn create_purged_buffer(
        &self,
        tag: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> LayercompResult<BufferHandle> {
        self.allocate(tag, width, height, format, BufferUsage::Blank, true)
    }

    fn query_details(&self, handle: BufferHandle) -> Option<BufferDetails> {
        lock(&self.store)
            .slots
            .get(&handle)
            .map(|s| s.details.clone())
    }

    fn purge(&self, handle: BufferHandle) {
        let mut store = lock(&self.store);
        let Some(slot) = store.slots.get_mut(&handle) else {
            return;
        };
        if slot.details.purged {
            return;
        }
        let freed = slot.pixels.len();
        slot.pixels = Vec::new();
        slot.details.purged = true;
        store.stats.live_bytes = store.stats.live_bytes.saturating_sub(freed);
    }

    fn realize(&self, handle: BufferHandle) {
        let mut store = lock(&self.store);
        let Some(slot) = store.slots.get_mut(&handle) else {
            return;
        };
        if !slot.details.purged {
            return;
        }
        let len = byte_len(slot.details.width, slot.details.height, slot.details.format);
        slot.pixels = vec![0; len];
        slot.details.purged = false;
        store.stats.live_bytes = store.stats.live_bytes.saturating_add(len);
    }

    fn set_tag(&self, handle: BufferHandle, tag: &str) {
        if let Some(slot) = lock(&self.store).slots.get_mut(&handle) {
            slot.tag = tag.to_string();
        }
    }

    fn get_tag(&self, handle: BufferHandle) -> Option<String> {
        lock(&self.store).slots.get(&handle).map(|s| s.tag.clone())
    }

    fn destroy_buffer(&self, handle: BufferHandle) {
        let removed = {
            let mut store = lock(&self.store);
            match store.slots.remove(&handle) {
                Some(slot) => {
                    store.stats.live_buffers = store.stats.live_buffers.saturating_sub(1);
                    store.stats.live_bytes =
                        store.stats.live_bytes.saturating_sub(slot.pixels.len());
                    true
                }
                None => false,
            }
        };
        if removed {
            tracing::trace!(handle = handle.0, "buffer freed");
            for t in self.trackers_snapshot() {
                t.notify_buffer_free(handle);
            }
        }
    }

    fn read_pixels(&self, handle: BufferHandle) -> LayercompResult<Vec<u8>> {
        let store = lock(&self.store);
        let slot = store
            .slots
            .get(&handle)
            .ok_or_else(|| LayercompError::render(format!("unknown buffer {}", handle.0)))?;
        if slot.details.purged {
            return Err(LayercompError::render(format!(
                "buffer {} ('{}') is purged",
                handle.0, slot.tag
            )));
        }
        Ok(slot.pixels.clone())
    }

    fn write_pixels(&self, handle: BufferHandle, bytes: &[u8]) -> LayercompResult<()> {
        let mut store = lock(&self.store);
        let slot = store
            .slots
            .get_mut(&handle)
            .ok_or_else(|| LayercompError::render(format!("unknown buffer {}", handle.0)))?;
        if slot.details.purged {
            return Err(LayercompError::render(format!(
                "buffer {} ('{}') is purged",
                handle.0, slot.tag
            )));
        }
        if bytes.len() != slot.pixels.len() {
            return Err(LayercompError::validation(format!(
                "buffer {} expects {} bytes, got {}",
                handle.0,
                slot.pixels.len(),
                bytes.len()
            )));
        }
        slot.pixels.copy_from_slice(bytes);
        Ok(())
    }

    fn register_tracker(&self, tracker: Arc<dyn BufferTracker>) {
        lock(&self.trackers).push(tracker);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/buffer/mod.rs"]
mod tests;
