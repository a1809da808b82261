use std::sync::Arc;

use crate::buffer::BufferManager;
use crate::caps::DisplayCaps;
use crate::composer::Composer;
use crate::composer::cpu::CpuCellRenderer;
use crate::composer::partitioned::PartitionedComposer;
use crate::composition::manager::CompositionManager;
use crate::config::CompositorOpts;
use crate::filter::empty::EmptyFilter;
use crate::filter::transparency::TransparencyFilter;
use crate::filter::{Filter, FilterManager};
use crate::foundation::core::{DEFAULT_OUTPUT_FORMAT, PixelFormat};
use crate::foundation::error::{LayercompError, LayercompResult};
use crate::foundation::fence::Fence;
use crate::layer::content::Content;
use crate::layer::model::Layer;
use crate::layer::stack::LayerStack;
use crate::plane::PlaneComposition;

/// Display policy: decides which role each plane of a display plays this frame.
pub trait PlanePolicy {
    /// Populate `planes` from its input stack.
    ///
    /// Return `false` when no workable assignment exists; the display then falls back to
    /// the host compositor.
    fn assign(
        &mut self,
        manager: &mut CompositionManager,
        caps: &DisplayCaps,
        planes: &mut PlaneComposition,
    ) -> bool;
}

/// Default policy: top layers the planes support are shown directly; the remainder is
/// composed into one full-screen target.
///
/// A layer whose only problem is its transform is preprocessed into a plane of its own.
#[derive(Clone, Copy, Debug)]
pub struct StackPolicy {
    /// Format of composed targets.
    pub format: PixelFormat,
}

impl Default for StackPolicy {
    fn default() -> Self {
        Self {
            format: DEFAULT_OUTPUT_FORMAT,
        }
    }
}

impl PlanePolicy for StackPolicy {
    fn assign(
        &mut self,
        manager: &mut CompositionManager,
        caps: &DisplayCaps,
        planes: &mut PlaneComposition,
    ) -> bool {
        let n = planes.input().len();
        let max = planes.max_planes().min(caps.max_planes());
        if n == 0 {
            return true;
        }
        if max == 0 {
            return false;
        }

        for ly in 0..n {
            let plane = ly;
            let rest = n - ly;
            if plane == max - 1 && rest > 1 {
                return planes.add_full_screen_composition(manager, caps, plane, ly, rest, self.format);
            }
            let layer = planes.input().layer(ly);
            let pc = caps.plane_caps(plane);
            if pc.is_layer_supported(layer) {
                planes.add_dedicated_layer(plane, ly);
                continue;
            }
            let transform_only = layer.is_enabled()
                && pc.supports_format(layer.format)
                && !pc.supports_transform(layer.transform);
            if transform_only && planes.add_source_preprocess(manager, caps, plane, ly, self.format) {
                continue;
            }
            return planes.add_full_screen_composition(manager, caps, plane, ly, rest, self.format);
        }
        true
    }
}

/// Per-frame composition pipeline for every display of a device.
///
/// Owns the [`CompositionManager`], the filter chain and one [`PlaneComposition`] per
/// display. A frame runs in three steps:
/// 1. [`Compositor::prepare`] filters the content and assigns and acquires planes
/// 2. [`Compositor::compose`] renders every composition
/// 3. [`Compositor::end_frame`] releases planes and processes buffer frees
pub struct Compositor {
    opts: CompositorOpts,
    caps: Vec<DisplayCaps>,
    buffers: Arc<dyn BufferManager>,
    manager: CompositionManager,
    filters: FilterManager,
    planes: Vec<PlaneComposition>,
    virtual_outputs: Vec<(usize, Layer)>,
    frame: u64,
}

impl Compositor {
    /// Pipeline with the partitioned CPU composer and the empty and transparency filters.
    ///
    /// `caps` holds one entry per display; displays beyond it reuse the last entry.
    pub fn new(
        opts: CompositorOpts,
        caps: Vec<DisplayCaps>,
        buffers: Arc<dyn BufferManager>,
    ) -> LayercompResult<Self> {
        opts.validate()?;
        if let Some(d) = caps.iter().position(|c| c.max_planes() == 0) {
            return Err(LayercompError::config(format!("display {d} has no planes")));
        }

        let mut manager = CompositionManager::new(Arc::clone(&buffers), &opts);
        buffers.register_tracker(manager.tracker());
        manager.add(Box::new(
            PartitionedComposer::new(Box::new(CpuCellRenderer::new(Arc::clone(&buffers))))
                .with_partition_video(opts.partition_video)
                .with_fence_timeout(opts.fence_timeout()),
        ));

        let mut filters = FilterManager::new();
        filters.add(Box::new(EmptyFilter::new(
            Arc::clone(&buffers),
            opts.blank_buffer_max_age,
        )));
        filters.add(Box::new(TransparencyFilter::new(
            Arc::clone(&buffers),
            opts.transparency,
        )));

        tracing::debug!(displays = caps.len(), "compositor created");
        Ok(Self {
            opts,
            caps,
            buffers,
            manager,
            filters,
            planes: Vec::new(),
            virtual_outputs: Vec::new(),
            frame: 0,
        })
    }

    /// Register another composer. The built-in one keeps winning cost ties.
    pub fn add_composer(&mut self, composer: Box<dyn Composer>) {
        self.manager.add(composer);
    }

    /// Add a filter to the chain.
    pub fn add_filter(&mut self, filter: Box<dyn Filter>) {
        self.filters.add(filter);
    }

    /// Options in effect.
    pub fn opts(&self) -> &CompositorOpts {
        &self.opts
    }

    /// Buffer manager shared with every component.
    pub fn buffers(&self) -> &Arc<dyn BufferManager> {
        &self.buffers
    }

    /// The composition manager.
    pub fn manager(&self) -> &CompositionManager {
        &self.manager
    }

    /// The composition manager, mutably.
    pub fn manager_mut(&mut self) -> &mut CompositionManager {
        &mut self.manager
    }

    /// Plane state of display `d` as of the last prepare.
    pub fn planes(&self, d: usize) -> Option<&PlaneComposition> {
        self.planes.get(d)
    }

    /// Frames completed.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Capabilities of display `d`.
    pub fn caps(&self, d: usize) -> DisplayCaps {
        self.caps.get(d).or(self.caps.last()).cloned().unwrap_or_default()
    }

    /// Filter `content`, assign planes for every display and acquire them.
    ///
    /// Returns one output stack per display, one layer per plane. A display whose
    /// assignment cannot be acquired is handed to the host compositor.
    #[tracing::instrument(skip_all, fields(frame = self.frame, displays = content.len()))]
    pub fn prepare(
        &mut self,
        content: &Content,
        policy: &mut dyn PlanePolicy,
    ) -> LayercompResult<Vec<LayerStack>> {
        self.virtual_outputs.clear();
        self.manager.host_mut().on_frame_begin(content);

        let filtered = {
            let host: &mut dyn Filter = self.manager.host_mut();
            self.filters.apply(content, &mut [host]).into_owned()
        };

        for d in self.planes.len()..filtered.len() {
            let max = self.caps(d).max_planes();
            self.planes.push(PlaneComposition::new(d, max));
        }

        let mut outputs = Vec::with_capacity(filtered.len());
        for (d, display) in filtered.displays().enumerate() {
            let caps = self.caps(d);
            let planes = &mut self.planes[d];
            planes.reset(&mut self.manager, display);
            if !display.enabled {
                outputs.push(LayerStack::new());
                continue;
            }

            let assigned = policy.assign(&mut self.manager, &caps, planes);
            if !assigned || !planes.on_acquire(&mut self.manager) {
                tracing::warn!(display = d, assigned, "plane assignment failed");
                planes.fallback_to_host(&mut self.manager);
                let out = planes.output();
                if !display.layer_stack().is_empty() && out.iter().all(|l| l.handle.is_none()) {
                    return Err(LayercompError::display(format!(
                        "display {d} has no host render target to fall back to"
                    )));
                }
            }

            if let Some(target) = &display.output_layer {
                self.virtual_outputs.push((d, target.clone()));
            }
            outputs.push(planes.output().clone());
        }

        self.manager.host_mut().on_prepare_end();
        Ok(outputs)
    }

    /// Compose every display prepared this frame.
    ///
    /// Returns, per display, the fences a consumer must wait on before scanning out.
    pub fn compose(&mut self) -> LayercompResult<Vec<Vec<Fence>>> {
        let mut waits = Vec::with_capacity(self.planes.len());
        for planes in &mut self.planes {
            waits.push(planes.on_compose(&mut self.manager)?);
        }
        for (d, target) in std::mem::take(&mut self.virtual_outputs) {
            let source = self.planes[d].output().clone();
            if !self.manager.perform_composition(&source, &target)? {
                tracing::warn!(display = d, "virtual display output could not be composed");
            }
        }
        Ok(waits)
    }

    /// Release every plane and process buffer frees reported during the frame.
    pub fn end_frame(&mut self) {
        for planes in &mut self.planes {
            planes.on_release(&mut self.manager);
        }
        self.manager.on_end_of_frame();
        self.frame += 1;
    }
}

#[cfg(test)]
#[path = "../tests/unit/pipeline.rs"]
mod tests;
