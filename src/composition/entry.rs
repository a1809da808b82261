use crate::composer::{Cost, ResourceHandle};
use crate::foundation::core::{Compression, PixelFormat};
use crate::foundation::fence::Fence;
use crate::layer::model::{CompositionId, Layer};
use crate::layer::stack::LayerStack;

/// Which composer owns a cached composition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComposerSlot {
    /// Index into the manager's registration order.
    Registered(usize),
    /// The host compositor passthrough.
    Host,
}

/// Render-target half of a cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct TargetSpec {
    /// Target width in pixels.
    pub width: u32,
    /// Target height in pixels.
    pub height: u32,
    /// Target pixel format.
    pub format: PixelFormat,
    /// Target compression.
    pub compression: Compression,
}

/// A cached composition: one composer bound to one source geometry and target spec.
#[derive(Debug)]
pub struct Composition {
    pub(crate) id: CompositionId,
    pub(crate) slot: ComposerSlot,
    pub(crate) composer_name: String,
    pub(crate) source: LayerStack,
    pub(crate) geometry: u64,
    pub(crate) spec: TargetSpec,
    pub(crate) cost: Cost,
    pub(crate) target: Layer,
    pub(crate) owns_target: bool,
    pub(crate) valid: bool,
    pub(crate) cacheable: bool,
    pub(crate) lock_count: u32,
    pub(crate) last_used_frame: u64,
    pub(crate) resource: Option<ResourceHandle>,
    pub(crate) composed: Option<u64>,
    pub(crate) consumer_wait: Option<Fence>,
}

impl Composition {
    pub(crate) fn matches(&self, source: &LayerStack, geometry: u64, spec: TargetSpec) -> bool {
        self.valid
            && self.cacheable
            && self.geometry == geometry
            && self.spec == spec
            && self.source.same_geometry(source)
    }

    /// Return `true` when another request this frame already owns the entry's buffers.
    ///
    /// A claimed entry only answers requests for the very same buffers.
    pub(crate) fn claimed_by_other(&self, source: &LayerStack, frame: u64) -> bool {
        (self.lock_count > 0 || self.last_used_frame == frame)
            && self.source.fingerprint() != source.fingerprint()
    }

    /// Cache identifier.
    pub fn id(&self) -> CompositionId {
        self.id
    }

    /// Owning composer.
    pub fn slot(&self) -> ComposerSlot {
        self.slot
    }

    /// Name of the owning composer.
    pub fn composer_name(&self) -> &str {
        &self.composer_name
    }

    /// Source layers as of the latest request.
    pub fn source(&self) -> &LayerStack {
        &self.source
    }

    /// Target spec of the cache key.
    pub fn spec(&self) -> TargetSpec {
        self.spec
    }

    /// Cost the owning composer reported when selected.
    pub fn cost(&self) -> Cost {
        self.cost
    }

    /// Result layer.
    pub fn target(&self) -> &Layer {
        &self.target
    }

    /// `false` once a buffer this composition reads or writes was freed.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// `false` for one-off entries that requests never match.
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// Current lock count.
    pub fn lock_count(&self) -> u32 {
        self.lock_count
    }

    /// Return `true` between a successful acquire and the matching release.
    pub fn is_acquired(&self) -> bool {
        self.resource.is_some()
    }
}
