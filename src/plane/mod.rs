//! Per-display assignment of hardware planes.
//!
//! Every frame a display policy resets the [`PlaneComposition`] and gives each plane one
//! role. Acquisition is all-or-nothing; a display that cannot acquire falls back to the
//! host compositor, which cannot fail.

use kurbo::Rect;

use crate::caps::DisplayCaps;
use crate::composition::manager::CompositionManager;
use crate::foundation::core::{PixelFormat, Transform};
use crate::foundation::error::LayercompResult;
use crate::foundation::fence::Fence;
use crate::layer::content::Display;
use crate::layer::model::{CompositionId, Layer};
use crate::layer::stack::LayerStack;

/// What a plane shows this frame.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "role")]
pub enum PlaneRole {
    /// Nothing assigned.
    Uninitialized,
    /// One input layer passed through untouched.
    Dedicated {
        /// Input index.
        src: usize,
    },
    /// `count` consecutive input layers composed into one full-screen target.
    Composed {
        /// First input index.
        src: usize,
        /// Number of input layers.
        count: usize,
        /// Cached composition producing the plane's layer.
        composition: CompositionId,
    },
    /// One input layer rendered at the origin, then shown at its original destination.
    Preprocessed {
        /// Input index.
        src: usize,
        /// Cached composition producing the plane's layer.
        composition: CompositionId,
        /// Layer shown on the plane; buffer state follows the composition result.
        destination: Layer,
    },
    /// The host compositor's render target for a display.
    Host {
        /// Display index.
        display: usize,
    },
}

impl PlaneRole {
    fn composition(&self) -> Option<CompositionId> {
        match self {
            Self::Composed { composition, .. } | Self::Preprocessed { composition, .. } => {
                Some(*composition)
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
struct PlaneState {
    role: PlaneRole,
    acquired: bool,
}

impl Default for PlaneState {
    fn default() -> Self {
        Self {
            role: PlaneRole::Uninitialized,
            acquired: false,
        }
    }
}

/// Plane assignment state of one display.
pub struct PlaneComposition {
    display: usize,
    planes: Vec<PlaneState>,
    input: LayerStack,
    width: u32,
    height: u32,
    frame_index: u64,
    output: LayerStack,
}

impl PlaneComposition {
    /// State for display `display` with `max_planes` planes.
    pub fn new(display: usize, max_planes: usize) -> Self {
        Self {
            display,
            planes: vec![PlaneState::default(); max_planes],
            input: LayerStack::new(),
            width: 0,
            height: 0,
            frame_index: 0,
            output: LayerStack::new(),
        }
    }

    /// Number of planes.
    pub fn max_planes(&self) -> usize {
        self.planes.len()
    }

    /// Input layers of the current round.
    pub fn input(&self) -> &LayerStack {
        &self.input
    }

    /// Role of `plane`.
    pub fn role(&self, plane: usize) -> &PlaneRole {
        &self.planes[plane].role
    }

    /// Output stack built by the last successful acquire, one layer per plane.
    pub fn output(&self) -> &LayerStack {
        &self.output
    }

    /// Frame index of the display the output was built from.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Planes currently holding acquired resources.
    pub fn acquired_planes(&self) -> usize {
        self.planes.iter().filter(|p| p.acquired).count()
    }

    /// Start a new round for `display`, dropping every assignment and lock.
    pub fn reset(&mut self, manager: &mut CompositionManager, display: &Display) {
        self.clear(manager);
        self.input = display.layer_stack().clone();
        self.input.assert_settled();
        self.width = display.width;
        self.height = display.height;
        self.frame_index = display.frame_index;
    }

    fn clear(&mut self, manager: &mut CompositionManager) {
        debug_assert_eq!(self.acquired_planes(), 0, "planes cleared while acquired");
        for state in &mut self.planes {
            if let Some(id) = state.role.composition() {
                manager.unlock(id);
            }
            *state = PlaneState::default();
        }
    }

    fn assert_uninitialized(&self, plane: usize) {
        assert!(
            plane < self.planes.len(),
            "plane {plane} out of range (display has {})",
            self.planes.len()
        );
        assert!(
            self.planes[plane].role == PlaneRole::Uninitialized,
            "plane {plane} initialized twice"
        );
    }

    /// Pass input layer `src` straight through to `plane`.
    pub fn add_dedicated_layer(&mut self, plane: usize, src: usize) -> bool {
        self.assert_uninitialized(plane);
        tracing::trace!(display = self.display, plane, src, "dedicated layer");
        self.planes[plane].role = PlaneRole::Dedicated { src };
        true
    }

    /// Compose `count` input layers from `src` into a full-screen target of `format` shown
    /// on `plane`.
    ///
    /// Returns `false`, leaving the plane unassigned, when no composer supports any of the
    /// plane's compressions.
    pub fn add_full_screen_composition(
        &mut self,
        manager: &mut CompositionManager,
        caps: &DisplayCaps,
        plane: usize,
        src: usize,
        count: usize,
        format: PixelFormat,
    ) -> bool {
        self.assert_uninitialized(plane);
        let layers = LayerStack::from_layers(self.input.as_slice()[src..src + count].to_vec());
        let compressions = caps.plane_caps(plane).compressions_for(format);
        let kind = manager.cost_kind();
        let Some(id) = manager.request_with_compressions(
            &layers,
            self.width,
            self.height,
            format,
            &compressions,
            kind,
        ) else {
            tracing::debug!(display = self.display, plane, src, count, "full-screen composition unsupported");
            return false;
        };
        manager.lock(id);
        tracing::trace!(display = self.display, plane, src, count, id = id.0, "full-screen composition");
        self.planes[plane].role = PlaneRole::Composed {
            src,
            count,
            composition: id,
        };
        true
    }

    /// Render input layer `src` at the origin into a target of `format`, then show the
    /// result on `plane` at the layer's original destination with no transform.
    pub fn add_source_preprocess(
        &mut self,
        manager: &mut CompositionManager,
        caps: &DisplayCaps,
        plane: usize,
        src: usize,
        format: PixelFormat,
    ) -> bool {
        self.assert_uninitialized(plane);
        let original = self.input.layer(src).clone();
        let (w, h) = (original.dst.width(), original.dst.height());

        let mut normalized = original.clone();
        normalized.dst = normalized.dst.at_origin();
        let layers = LayerStack::from_layers(vec![normalized]);

        let compressions = caps.plane_caps(plane).compressions_for(format);
        let kind = manager.cost_kind();
        let Some(id) = manager.request_with_compressions(&layers, w, h, format, &compressions, kind)
        else {
            tracing::debug!(display = self.display, plane, src, "preprocess unsupported");
            return false;
        };
        manager.lock(id);

        let mut destination = original;
        destination.src = Rect::new(0.0, 0.0, f64::from(w), f64::from(h));
        destination.transform = Transform::None;
        destination.format = format;
        tracing::trace!(display = self.display, plane, src, id = id.0, "source preprocess");
        self.planes[plane].role = PlaneRole::Preprocessed {
            src,
            composition: id,
            destination,
        };
        true
    }

    fn release_acquired(&mut self, manager: &mut CompositionManager) {
        for state in &mut self.planes {
            if !state.acquired {
                continue;
            }
            match &state.role {
                PlaneRole::Composed { composition, .. }
                | PlaneRole::Preprocessed { composition, .. } => manager.release(*composition),
                PlaneRole::Host { display } => manager.host_mut().release_display(*display),
                PlaneRole::Uninitialized | PlaneRole::Dedicated { .. } => {}
            }
            state.acquired = false;
        }
    }

    /// Acquire every plane's resources in plane order and build the output stack.
    ///
    /// On the first failure every plane acquired so far is released and `false` is
    /// returned.
    pub fn on_acquire(&mut self, manager: &mut CompositionManager) -> bool {
        for plane in 0..self.planes.len() {
            let ok = match &self.planes[plane].role {
                PlaneRole::Composed { composition, .. }
                | PlaneRole::Preprocessed { composition, .. } => manager.acquire(*composition),
                PlaneRole::Host { display } => {
                    manager.host_mut().acquire_display(*display);
                    true
                }
                PlaneRole::Uninitialized | PlaneRole::Dedicated { .. } => true,
            };
            if !ok {
                tracing::debug!(display = self.display, plane, "plane acquire failed, releasing");
                self.release_acquired(manager);
                return false;
            }
            let state = &mut self.planes[plane];
            state.acquired = true;
            // The result buffer exists from here on; show it rather than the input.
            if let PlaneRole::Preprocessed {
                composition,
                destination,
                ..
            } = &mut state.role
                && let Some(target) = manager.target(*composition)
            {
                destination.update_frame_state(target);
            }
        }

        let used = self
            .planes
            .iter()
            .rposition(|p| p.role != PlaneRole::Uninitialized)
            .map_or(0, |i| i + 1);
        let mut layers = Vec::with_capacity(used);
        for state in &self.planes[..used] {
            let layer = match &state.role {
                PlaneRole::Uninitialized => Layer::empty(),
                PlaneRole::Dedicated { src } => self.input.layer(*src).clone(),
                PlaneRole::Composed { composition, .. } => manager
                    .target(*composition)
                    .cloned()
                    .unwrap_or_else(Layer::empty),
                PlaneRole::Preprocessed { destination, .. } => destination.clone(),
                PlaneRole::Host { display } => manager
                    .host()
                    .render_target(*display)
                    .cloned()
                    .unwrap_or_else(Layer::empty),
            };
            layers.push(layer);
        }

        let mut output = LayerStack::from_layers(layers);
        output.update_layer_flags_from(&self.output);
        self.output = output;
        tracing::debug!(
            display = self.display,
            planes = used,
            geometry_changed = self.output.is_geometry_changed(),
            "planes acquired"
        );
        true
    }

    /// Compose every bound composition in plane order.
    ///
    /// Returns the fences a consumer of the output must wait on.
    pub fn on_compose(&mut self, manager: &mut CompositionManager) -> LayercompResult<Vec<Fence>> {
        let mut waits = Vec::new();
        let mut updates = Vec::new();
        for (plane, state) in self.planes.iter_mut().enumerate() {
            let Some(id) = state.role.composition() else {
                continue;
            };
            let wait = manager.compose(id)?;
            let Some(target) = manager.target(id) else {
                continue;
            };
            let mut shown = target.clone();
            if let PlaneRole::Preprocessed { destination, .. } = &mut state.role {
                destination.update_frame_state(target);
                shown = destination.clone();
            }
            if let Some(fence) = wait {
                shown.acquire_fence = Some(fence.clone());
                waits.push(fence);
            }
            updates.push((plane, shown));
        }
        for (plane, shown) in updates {
            if plane < self.output.len() {
                self.output.update_layer_frame_state(plane, &shown);
            }
        }
        Ok(waits)
    }

    /// Release every plane and unlock its composition.
    pub fn on_release(&mut self, manager: &mut CompositionManager) {
        self.release_acquired(manager);
        self.clear(manager);
    }

    /// Hand the whole display to the host compositor and acquire it. Cannot fail.
    pub fn fallback_to_host(&mut self, manager: &mut CompositionManager) {
        tracing::debug!(display = self.display, "plane assignment falls back to the host");
        self.release_acquired(manager);
        self.clear(manager);
        manager.fallback_to_host(self.display);
        self.planes[0].role = PlaneRole::Host {
            display: self.display,
        };
        let acquired = self.on_acquire(manager);
        debug_assert!(acquired, "host fallback cannot fail");
    }
}

#[cfg(test)]
#[path = "../../tests/unit/plane/mod.rs"]
mod tests;
