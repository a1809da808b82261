use std::borrow::Cow;
use std::sync::Arc;

use crate::buffer::BufferManager;
use crate::composer::{Composer, Cost, Evaluation, ResourceHandle};
use crate::filter::{Filter, FilterPosition};
use crate::foundation::core::{
    BlendMode, BufferHandle, Compression, CostKind, DEFAULT_OUTPUT_FORMAT, PixelFormat, bandwidth_kb,
};
use crate::foundation::error::LayercompResult;
use crate::foundation::fence::ComposeOutcome;
use crate::foundation::geometry::IRect;
use crate::layer::content::Content;
use crate::layer::model::{CompositionRef, Layer};
use crate::layer::stack::LayerStack;

/// Inclusive range of input stack indices, `(first, last)`.
pub type LayerRange = (usize, usize);

#[derive(Clone, Debug, Default)]
struct HostDisplay {
    width: u32,
    height: u32,
    input: LayerStack,
    unsupported: Option<LayerRange>,
    compose: Option<LayerRange>,
    last_composed: Option<LayerRange>,
    host_layers: Vec<bool>,
    render_target: Layer,
    owned_target: Option<BufferHandle>,
    force_geometry_change: bool,
}

impl HostDisplay {
    /// Everything the host must compose: acquired range plus unsupported range.
    fn compose_range(&self) -> Option<LayerRange> {
        match (self.compose, self.unsupported) {
            (Some((a0, a1)), Some((b0, b1))) => Some((a0.min(b0), a1.max(b1))),
            (a, b) => a.or(b),
        }
    }

    fn refresh_target_blend(&mut self) {
        let bottom = self.input.len().saturating_sub(1);
        self.render_target.blend = match self.compose_range() {
            Some((_, last)) if last >= bottom => BlendMode::None,
            _ => BlendMode::Premultiplied,
        };
    }
}

fn host_supports(layer: &Layer) -> bool {
    if layer.flags.skip {
        return false;
    }
    matches!(
        layer.format,
        PixelFormat::Abgr8888
            | PixelFormat::Xbgr8888
            | PixelFormat::Bgr888
            | PixelFormat::Rgb565
            | PixelFormat::Argb8888
            | PixelFormat::Yv12
            | PixelFormat::Yuyv
            | PixelFormat::Nv12
            | PixelFormat::Nv12YTiled
            | PixelFormat::P010
    )
}

/// Match of a composition request against one display's input layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostMatch {
    /// Display index.
    pub display: usize,
    /// Input index range the request covers.
    pub range: LayerRange,
}

/// Composition already performed by the external host compositor.
///
/// The host can compose one contiguous run of input layers per display into its own render
/// target. This composer tracks that run: layers no other composer can consume, layers
/// beyond the supported count, and whatever a plane assignment hands to it.
pub struct FallbackComposer {
    buffers: Arc<dyn BufferManager>,
    max_layers: usize,
    displays: Vec<HostDisplay>,
}

impl FallbackComposer {
    /// Composer tracking at most `max_layers` layers per display.
    pub fn new(buffers: Arc<dyn BufferManager>, max_layers: usize) -> Self {
        Self {
            buffers,
            max_layers: max_layers.max(1),
            displays: Vec::new(),
        }
    }

    fn display_mut(&mut self, d: usize) -> &mut HostDisplay {
        if self.displays.len() <= d {
            self.displays.resize_with(d + 1, HostDisplay::default);
        }
        &mut self.displays[d]
    }

    /// Refresh each display's render target from the content the host handed over.
    pub fn on_frame_begin(&mut self, content: &Content) {
        for (d, display) in content.displays().enumerate() {
            let geometry_changed = display.is_geometry_changed();
            let resized = {
                let st = self.display_mut(d);
                let resized = (st.width, st.height) != (display.width, display.height);
                st.width = display.width;
                st.height = display.height;
                resized
            };

            match &display.host_target {
                Some(host) => {
                    let st = &mut self.displays[d];
                    if geometry_changed || resized || st.render_target.handle.is_none() {
                        st.render_target = host.clone();
                    } else {
                        st.render_target.update_frame_state(host);
                    }
                }
                None => self.ensure_owned_target(d),
            }

            let st = &mut self.displays[d];
            st.render_target.dst = IRect::from_size(st.width, st.height);
            st.render_target.src = st.render_target.dst.to_rect();
            st.render_target.composition = Some(CompositionRef::Host { display: d });
            st.render_target.flags.skip = false;
            st.refresh_target_blend();
        }
    }

    fn ensure_owned_target(&mut self, d: usize) {
        let (w, h) = (self.displays[d].width, self.displays[d].height);
        if let Some(handle) = self.displays[d].owned_target {
            match self.buffers.query_details(handle) {
                Some(det) if (det.width, det.height) == (w, h) => {
                    self.displays[d].render_target.handle = Some(handle);
                    return;
                }
                _ => self.buffers.destroy_buffer(handle),
            }
        }
        let st = &mut self.displays[d];
        st.owned_target = None;
        st.render_target = Layer::target(w, h, DEFAULT_OUTPUT_FORMAT, Compression::None);
        if w == 0 || h == 0 {
            return;
        }
        match self
            .buffers
            .create_purged_buffer(&format!("host-target-{d}"), w, h, DEFAULT_OUTPUT_FORMAT)
        {
            Ok(handle) => {
                st.owned_target = Some(handle);
                st.render_target.handle = Some(handle);
            }
            Err(e) => tracing::warn!(display = d, error = %e, "host render target allocation failed"),
        }
    }

    /// Compute the range of `stack` the host must handle because nothing else can.
    ///
    /// The range covers every layer with a format this pipeline cannot consume and, when the
    /// stack exceeds the layer limit, everything from the last slot onwards so that slot can
    /// hold the host render target.
    pub fn find_unsupported_layer_range(&mut self, d: usize, stack: &LayerStack) -> Option<LayerRange> {
        let mut range: Option<LayerRange> = None;
        for (ly, layer) in stack.iter().enumerate() {
            if !host_supports(layer) {
                range = Some(match range {
                    None => (ly, ly),
                    Some((first, _)) => (first, ly),
                });
            }
        }
        if stack.len() > self.max_layers {
            let first = range.map_or(self.max_layers - 1, |(f, _)| f.min(self.max_layers - 1));
            range = Some((first, stack.len() - 1));
        }
        tracing::debug!(display = d, ?range, "host: unsupported layer range");
        self.display_mut(d).unsupported = range;
        range
    }

    /// Match `source` against the input layers of some display.
    ///
    /// The first layer either is a display's render target, standing for its unsupported
    /// range, or equals one of its input layers; every following layer must continue the
    /// run. A display with an unsupported range only matches when the request includes it.
    pub fn find_match(&self, source: &LayerStack) -> Option<HostMatch> {
        let first = source.get(0)?;
        for (d, st) in self.displays.iter().enumerate() {
            if st.compose.is_some() {
                continue;
            }
            let me = Some(CompositionRef::Host { display: d });
            let mut matched_unsupported = false;

            let (min, mut max) = if first.composition == me {
                let Some(range) = st.unsupported else {
                    continue;
                };
                matched_unsupported = true;
                range
            } else {
                let Some(ly) = st.input.iter().position(|l| l == first) else {
                    continue;
                };
                (ly, ly)
            };

            let mut ok = true;
            for layer in source.iter().skip(1) {
                if layer.composition == me {
                    let Some((_, last)) = st.unsupported.filter(|(f, _)| *f == max + 1) else {
                        ok = false;
                        break;
                    };
                    max = last;
                    matched_unsupported = true;
                } else if st.input.get(max + 1) == Some(layer) {
                    max += 1;
                } else {
                    ok = false;
                    break;
                }
            }
            if !ok {
                continue;
            }
            if st.unsupported.is_some() && !matched_unsupported {
                continue;
            }
            return Some(HostMatch {
                display: d,
                range: (min, max),
            });
        }
        None
    }

    /// Claim every layer of display `d` for the host.
    ///
    /// This is the last resort of a failed plane assignment and cannot fail.
    pub fn handle_all_layers(&mut self, d: usize) -> CompositionRef {
        let st = self.display_mut(d);
        st.unsupported = Some((0, st.input.len().saturating_sub(1)));
        st.force_geometry_change = true;
        st.refresh_target_blend();
        tracing::debug!(display = d, range = ?st.unsupported, "host: handling all layers");
        CompositionRef::Host { display: d }
    }

    /// Mark display `d`'s render target as in use by a plane.
    pub fn acquire_display(&mut self, d: usize) {
        let st = self.display_mut(d);
        if st.compose.is_none() {
            st.compose = st.unsupported;
        }
        st.refresh_target_blend();
    }

    /// Undo [`FallbackComposer::acquire_display`].
    pub fn release_display(&mut self, d: usize) {
        if let Some(st) = self.displays.get_mut(d) {
            st.compose = None;
            st.refresh_target_blend();
        }
    }

    /// Publish which input layers the host composes this frame and hint the render target
    /// backing store accordingly.
    pub fn on_prepare_end(&mut self) {
        for (d, st) in self.displays.iter_mut().enumerate() {
            let range = st.compose_range();
            if st.input.is_geometry_changed()
                || range != st.last_composed
                || st.host_layers.len() != st.input.len()
            {
                st.host_layers = (0..st.input.len())
                    .map(|ly| range.is_some_and(|(a, b)| ly >= a && ly <= b))
                    .collect();
                st.last_composed = range;
                tracing::debug!(display = d, ?range, "host: composed range updated");
            }
            if let Some(handle) = st.render_target.handle {
                if range.is_some() {
                    self.buffers.realize(handle);
                } else {
                    self.buffers.purge(handle);
                }
            }
        }
    }

    /// Host render target of display `d`.
    pub fn render_target(&self, d: usize) -> Option<&Layer> {
        self.displays.get(d).map(|st| &st.render_target)
    }

    /// Layers display `d` leaves to the host, by input index.
    pub fn host_layers(&self, d: usize) -> &[bool] {
        self.displays.get(d).map_or(&[][..], |st| st.host_layers.as_slice())
    }

    /// Unsupported range of display `d`.
    pub fn unsupported_range(&self, d: usize) -> Option<LayerRange> {
        self.displays.get(d).and_then(|st| st.unsupported)
    }

    /// Range the host composes on display `d`.
    pub fn compose_range(&self, d: usize) -> Option<LayerRange> {
        self.displays.get(d).and_then(HostDisplay::compose_range)
    }
}

impl Composer for FallbackComposer {
    fn name(&self) -> &str {
        "host"
    }

    fn on_evaluate(&self, source: &LayerStack, target: &Layer, kind: CostKind) -> Evaluation {
        if source.is_empty() {
            return Evaluation::NotSupported;
        }
        if target.format != DEFAULT_OUTPUT_FORMAT || target.compression != Compression::None {
            tracing::debug!(format = ?target.format, compression = ?target.compression, "host: unsupported output");
            return Evaluation::NotSupported;
        }
        if let Some(ly) = source.iter().position(Layer::is_encrypted) {
            tracing::debug!(ly, "host: encrypted input");
            return Evaluation::NotSupported;
        }
        if self.find_match(source).is_none() {
            return Evaluation::NotSupported;
        }

        let cost = match kind {
            CostKind::Bandwidth | CostKind::Power | CostKind::Performance | CostKind::Quality => {
                let dst = bandwidth_kb(target.dst.width(), target.dst.height(), target.format);
                // Clear, then per layer one source read plus a read and write of the target.
                let mut kb = dst;
                for l in source {
                    kb += bandwidth_kb(l.src_width(), l.src_height(), l.format) + 2.0 * dst;
                }
                kb * f64::from(target.fps)
            }
            // Uses memory the host already committed.
            CostKind::Memory => Cost::MIN.0,
        };
        tracing::debug!(?kind, cost, "host: evaluated");
        Evaluation::Cost(Cost(cost))
    }

    fn on_acquire(&mut self, source: &LayerStack, _target: &Layer) -> Option<ResourceHandle> {
        let m = self.find_match(source)?;
        let st = &mut self.displays[m.display];
        let mut range = m.range;
        if let Some((a, b)) = st.unsupported {
            range = (range.0.min(a), range.1.max(b));
        }
        st.compose = Some(range);
        st.refresh_target_blend();
        Some(ResourceHandle(m.display as u64))
    }

    fn on_compose(
        &mut self,
        source: &LayerStack,
        _target: &Layer,
        resource: ResourceHandle,
    ) -> LayercompResult<ComposeOutcome> {
        tracing::trace!(display = resource.0, layers = source.len(), "host: already composed");
        Ok(ComposeOutcome::default())
    }

    fn on_release(&mut self, resource: ResourceHandle) {
        self.release_display(resource.0 as usize);
    }

    fn target(&self, resource: ResourceHandle) -> Option<&Layer> {
        self.render_target(resource.0 as usize)
    }
}

impl Filter for FallbackComposer {
    fn name(&self) -> &str {
        "host-compositor"
    }

    fn position(&self) -> FilterPosition {
        FilterPosition::HostCompositor
    }

    fn on_apply<'a>(&mut self, content: &'a Content) -> Cow<'a, Content> {
        let mut any = false;
        for (d, display) in content.displays().enumerate() {
            let previous = self.display_mut(d).unsupported;
            self.displays[d].input = display.layer_stack().clone();
            self.displays[d].compose = None;
            if !display.enabled {
                self.displays[d].unsupported = None;
                continue;
            }
            let range = self.find_unsupported_layer_range(d, display.layer_stack());
            if range != previous {
                self.displays[d].force_geometry_change = true;
            }
            any |= range.is_some() || self.displays[d].force_geometry_change;
        }
        if !any {
            return Cow::Borrowed(content);
        }

        tracing::debug!("host: unsupported layers present, substituting render targets");
        let mut out = content.clone();
        for d in 0..out.len() {
            if !out.display(d).enabled {
                continue;
            }
            let st = &mut self.displays[d];
            if st.force_geometry_change {
                out.edit_display(d).set_geometry_changed(true);
                st.force_geometry_change = false;
            }
            let Some((first, last)) = st.unsupported else {
                continue;
            };
            st.refresh_target_blend();
            let target = st.render_target.clone();

            let stack = out.edit_display(d).edit_layer_stack();
            let geometry = stack.is_geometry_changed();
            let last = last.min(stack.len().saturating_sub(1));
            if first < stack.len() {
                for _ in first + 1..=last {
                    stack.remove(first + 1);
                }
                stack.set_layer(first, target);
            } else {
                stack.push(target);
            }
            stack.update_layer_flags();
            stack.set_geometry_changed(geometry);
        }
        Cow::Owned(out)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/composer/fallback.rs"]
mod tests;
