use std::time::Duration;

use crate::composer::partition::partition;
use crate::composer::{Composer, Cost, Evaluation, ResourceHandle};
use crate::foundation::core::{CostKind, bandwidth_kb};
use crate::foundation::error::LayercompResult;
use crate::foundation::fence::{ComposeOutcome, SourceRelease};
use crate::foundation::geometry::IRect;
use crate::layer::model::Layer;
use crate::layer::stack::LayerStack;

/// Renderer that draws one rectangular cell at a time.
///
/// A frame is `begin_frame`, one `draw_layer_set` per partition, then `end_frame`.
pub trait CellRenderer: Send {
    /// Return `true` when `layer` can be read as an input.
    fn is_layer_supported_as_input(&self, layer: &Layer) -> bool;

    /// Return `true` when `layer` can be rendered into.
    fn is_layer_supported_as_output(&self, layer: &Layer) -> bool;

    /// Return `true` when unsupported inputs can be replaced by blank content.
    fn can_blank_unsupported_inputs(&self) -> bool {
        false
    }

    /// Start composing `source` into `target`.
    fn begin_frame(&mut self, source: &LayerStack, target: &Layer) -> LayercompResult<()>;

    /// Draw `region` from the stack indices in `layers`, topmost first.
    fn draw_layer_set(&mut self, layers: &[usize], region: IRect) -> LayercompResult<()>;

    /// Finish the frame and publish the target.
    fn end_frame(&mut self) -> LayercompResult<()>;
}

/// Composer that splits the target into disjoint cells and renders each cell from only the
/// layers visible in it.
pub struct PartitionedComposer {
    renderer: Box<dyn CellRenderer>,
    partition_video: bool,
    fence_timeout: Duration,
}

impl PartitionedComposer {
    /// Composer drawing through `renderer`.
    pub fn new(renderer: Box<dyn CellRenderer>) -> Self {
        Self {
            renderer,
            partition_video: true,
            fence_timeout: Duration::from_millis(1000),
        }
    }

    /// Allow or refuse composing video sources into a video target.
    pub fn with_partition_video(mut self, enabled: bool) -> Self {
        self.partition_video = enabled;
        self
    }

    /// Bound on each acquire-fence wait.
    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self
    }
}

impl Composer for PartitionedComposer {
    fn name(&self) -> &str {
        "partitioned"
    }

    fn on_evaluate(&self, source: &LayerStack, target: &Layer, kind: CostKind) -> Evaluation {
        if !self.renderer.is_layer_supported_as_output(target) {
            tracing::debug!(format = ?target.format, "partitioned: unsupported output");
            return Evaluation::NotSupported;
        }

        let unsupported_input = source.iter().enumerate().any(|(ly, l)| {
            let ok = self.renderer.is_layer_supported_as_input(l);
            if !ok {
                tracing::debug!(ly, format = ?l.format, "partitioned: unsupported input");
            }
            !ok
        });

        if !self.partition_video && source.is_video() && target.format.is_video() {
            tracing::debug!("partitioned: video to video composition disabled");
            return Evaluation::NotSupported;
        }

        if unsupported_input {
            if !self.renderer.can_blank_unsupported_inputs() {
                return Evaluation::NotSupported;
            }
            tracing::debug!(?kind, "partitioned: evaluated with blanked inputs");
            return Evaluation::Cost(Cost::MAX);
        }

        let cost = match kind {
            CostKind::Bandwidth | CostKind::Power | CostKind::Performance | CostKind::Quality => {
                // One write of the target plus one read of every source.
                let mut kb = bandwidth_kb(target.dst.width(), target.dst.height(), target.format);
                for l in source {
                    kb += bandwidth_kb(l.src_width(), l.src_height(), l.format);
                }
                kb * f64::from(target.fps)
            }
            // Double-buffered render target.
            CostKind::Memory => f64::from(target.dst.width()) * f64::from(target.dst.height()) * 2.0,
        };
        tracing::debug!(?kind, cost, "partitioned: evaluated");
        Evaluation::Cost(Cost(cost))
    }

    fn on_acquire(&mut self, _source: &LayerStack, _target: &Layer) -> Option<ResourceHandle> {
        Some(ResourceHandle(0))
    }

    #[tracing::instrument(skip_all, fields(layers = source.len()))]
    fn on_compose(
        &mut self,
        source: &LayerStack,
        target: &Layer,
        _resource: ResourceHandle,
    ) -> LayercompResult<ComposeOutcome> {
        if let Some(f) = &target.acquire_fence {
            f.wait(self.fence_timeout, "partitioned target")?;
        }
        for l in source {
            if let Some(f) = &l.acquire_fence {
                f.wait(self.fence_timeout, "partitioned source")?;
            }
        }

        let parts = partition(source, target.dst);
        self.renderer.begin_frame(source, target)?;
        for p in &parts {
            tracing::trace!(region = ?p.region, layers = ?p.layers, "draw cell");
            self.renderer.draw_layer_set(&p.layers, p.region)?;
        }
        self.renderer.end_frame()?;

        // Sources were read synchronously.
        Ok(ComposeOutcome {
            sources: SourceRelease::Immediate,
            consumer_wait: None,
        })
    }

    fn on_release(&mut self, _resource: ResourceHandle) {}
}

#[cfg(test)]
#[path = "../../tests/unit/composer/partitioned.rs"]
mod tests;
