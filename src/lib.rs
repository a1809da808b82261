//! Layercomp decides, once per frame, how the layer stacks of a set of displays reach the
//! screen.
//!
//! Each display exposes a few hardware planes. Layers a plane can show directly are
//! passed through; the rest are rendered into composition targets by pluggable
//! [`Composer`]s, chosen by cost. Results are cached across frames while their inputs keep
//! the same geometry.
//!
//! - Describe a frame as [`Content`]
//! - Create a [`Compositor`] over a [`BufferManager`]
//! - Run [`Compositor::prepare`], [`Compositor::compose`] and [`Compositor::end_frame`]
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

pub(crate) mod buffer;
pub(crate) mod caps;
pub(crate) mod composer;
pub(crate) mod composition;
pub(crate) mod config;
pub(crate) mod filter;
pub(crate) mod layer;
pub(crate) mod pipeline;
pub(crate) mod plane;

pub use crate::foundation::core::{
    BlendMode, BufferHandle, Compression, CostKind, DEFAULT_OUTPUT_FORMAT, PixelFormat, Rect,
    Transform, bandwidth_kb,
};
pub use crate::foundation::error::{LayercompError, LayercompResult};
pub use crate::foundation::fence::{ComposeOutcome, Fence, SourceRelease};
pub use crate::foundation::geometry::{IRect, clip_to_dest_rect, clip_to_display, map_dst_to_src};

pub use crate::buffer::{
    BufferDetails, BufferManager, BufferTracker, BufferUsage, MemoryBufferManager,
    MemoryBufferStats,
};
pub use crate::caps::{DisplayCaps, PlaneCaps};
pub use crate::composer::cpu::CpuCellRenderer;
pub use crate::composer::fallback::{FallbackComposer, HostMatch, LayerRange};
pub use crate::composer::partition::{Partition, partition};
pub use crate::composer::partitioned::{CellRenderer, PartitionedComposer};
pub use crate::composer::{Composer, Cost, Evaluation, ResourceHandle};
pub use crate::composition::entry::{ComposerSlot, Composition, TargetSpec};
pub use crate::composition::manager::{CacheStats, CompositionManager, StaleBuffers};
pub use crate::config::{CompositorOpts, TransparencyOpts};
pub use crate::filter::empty::EmptyFilter;
pub use crate::filter::transparency::TransparencyFilter;
pub use crate::filter::{Filter, FilterManager, FilterPosition};
pub use crate::layer::content::{Content, Display};
pub use crate::layer::model::{CompositionId, CompositionRef, Layer, LayerFlags};
pub use crate::layer::stack::{LayerStack, StackFlags};
pub use crate::pipeline::{Compositor, PlanePolicy, StackPolicy};
pub use crate::plane::{PlaneComposition, PlaneRole};
