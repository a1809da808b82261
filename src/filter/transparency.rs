use std::borrow::Cow;
use std::sync::{Arc, OnceLock};

use crate::buffer::BufferManager;
use crate::config::TransparencyOpts;
use crate::filter::{Filter, FilterPosition};
use crate::foundation::core::BufferHandle;
use crate::layer::content::Content;
use crate::layer::model::Layer;
use crate::layer::stack::LayerStack;

/// In-flight check of one buffer. The worker is the only writer of `result`.
#[derive(Debug)]
struct Detection {
    handle: BufferHandle,
    result: Arc<OnceLock<bool>>,
}

#[derive(Debug, Default)]
struct Tracked {
    handle: Option<BufferHandle>,
    repeats: u32,
    next_check: u32,
    transparent: bool,
    detection: Option<Detection>,
}

#[derive(Debug, Default)]
struct DisplayState {
    layers: Vec<Tracked>,
    dropped: Vec<usize>,
}

/// Drops UI layers over video whose buffers are fully transparent.
///
/// A layer becomes a candidate once its buffer has repeated for a number of frames. Its
/// pixels are copied on the frame thread and scanned on a rayon worker; the frame thread
/// polls the result on later frames and never blocks on it. A result that arrives after the
/// layer changed buffer is discarded.
pub struct TransparencyFilter {
    buffers: Arc<dyn BufferManager>,
    opts: TransparencyOpts,
    displays: Vec<DisplayState>,
}

fn is_candidate(layer: &Layer) -> bool {
    layer.is_enabled() && layer.format.has_alpha() && !layer.is_video() && !layer.is_encrypted()
}

/// Stack indices checked on `stack`: alpha layers above the topmost video layer.
fn candidates(stack: &LayerStack, max: usize) -> Vec<usize> {
    let Some(video) = stack.iter().position(|l| l.is_video()) else {
        return Vec::new();
    };
    (0..video)
        .filter(|&ly| is_candidate(stack.layer(ly)))
        .take(max)
        .collect()
}

impl TransparencyFilter {
    /// Filter reading pixels through `buffers`.
    pub fn new(buffers: Arc<dyn BufferManager>, opts: TransparencyOpts) -> Self {
        Self {
            buffers,
            opts,
            displays: Vec::new(),
        }
    }

    fn spawn_detection(&self, handle: BufferHandle) -> Option<Detection> {
        let pixels = match self.buffers.read_pixels(handle) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(handle = handle.0, error = %e, "transparency: cannot read buffer");
                return None;
            }
        };
        let result = Arc::new(OnceLock::new());
        let cell = Arc::clone(&result);
        rayon::spawn(move || {
            // Alpha is the fourth byte in every 32-bit layout with alpha.
            let transparent = pixels.chunks_exact(4).all(|px| px[3] == 0);
            let _ = cell.set(transparent);
        });
        tracing::trace!(handle = handle.0, "transparency: detection started");
        Some(Detection { handle, result })
    }

    /// Update tracking for one display and return the indices to drop.
    fn track(&mut self, d: usize, stack: &LayerStack) -> Vec<usize> {
        let delta = self.opts.frames_before_check_delta.max(1);
        let first = self.opts.frames_before_check;
        let want = candidates(stack, self.opts.max_detect_layers);

        if stack.is_geometry_changed() || self.displays[d].layers.len() != stack.len() {
            // Anything in flight is abandoned.
            self.displays[d].layers = (0..stack.len())
                .map(|_| Tracked {
                    next_check: first,
                    ..Tracked::default()
                })
                .collect();
        }

        let mut drop = Vec::new();
        for ly in want {
            let handle = stack.layer(ly).handle;
            let t = &mut self.displays[d].layers[ly];
            if t.handle == handle {
                t.repeats = t.repeats.saturating_add(1);
            } else {
                *t = Tracked {
                    handle,
                    next_check: first,
                    ..Tracked::default()
                };
            }

            if let Some(det) = &t.detection
                && let Some(&transparent) = det.result.get()
            {
                if Some(det.handle) == t.handle {
                    t.transparent = transparent;
                    if !transparent {
                        t.next_check = t.repeats.saturating_add(delta);
                    }
                    tracing::debug!(display = d, layer = ly, transparent, "transparency: result");
                }
                t.detection = None;
            }

            let start = t.detection.is_none() && !t.transparent && t.repeats >= t.next_check;
            if t.transparent {
                drop.push(ly);
            }
            if start && let Some(h) = handle {
                let det = self.spawn_detection(h);
                let t = &mut self.displays[d].layers[ly];
                match det {
                    Some(det) => t.detection = Some(det),
                    None => t.next_check = t.repeats.saturating_add(delta),
                }
            }
        }
        drop
    }
}

impl Filter for TransparencyFilter {
    fn name(&self) -> &str {
        "transparency"
    }

    fn position(&self) -> FilterPosition {
        FilterPosition::Transparency
    }

    fn on_apply<'a>(&mut self, content: &'a Content) -> Cow<'a, Content> {
        if !self.opts.enabled {
            return Cow::Borrowed(content);
        }
        if self.displays.len() < content.len() {
            self.displays.resize_with(content.len(), DisplayState::default);
        }

        let mut drops = Vec::with_capacity(content.len());
        for (d, display) in content.displays().enumerate() {
            let drop = if display.enabled {
                self.track(d, display.layer_stack())
            } else {
                Vec::new()
            };
            drops.push(drop);
        }

        let changed: Vec<bool> = drops
            .iter()
            .zip(&self.displays)
            .map(|(now, s)| *now != s.dropped)
            .collect();
        if drops.iter().all(|d| d.is_empty()) && !changed.iter().any(|c| *c) {
            return Cow::Borrowed(content);
        }

        let mut out = content.clone();
        for (d, drop) in drops.into_iter().enumerate() {
            if !drop.is_empty() {
                let stack = out.edit_display(d).edit_layer_stack();
                let geometry = stack.is_geometry_changed();
                for &ly in drop.iter().rev() {
                    stack.remove(ly);
                }
                stack.update_layer_flags();
                stack.set_geometry_changed(geometry);
            }
            if changed[d] {
                out.edit_display(d).set_geometry_changed(true);
            }
            self.displays[d].dropped = drop;
        }
        Cow::Owned(out)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/filter/transparency.rs"]
mod tests;
