use std::borrow::Cow;
use std::sync::Arc;

use crate::buffer::BufferManager;
use crate::filter::{Filter, FilterPosition};
use crate::foundation::core::{BufferHandle, DEFAULT_OUTPUT_FORMAT};
use crate::foundation::geometry::IRect;
use crate::layer::content::Content;
use crate::layer::model::Layer;

#[derive(Clone, Debug, Default)]
struct BlankState {
    blanking: bool,
    buffer: Option<(BufferHandle, u32, u32)>,
    last_used: u64,
}

/// Gives every enabled display without layers a single full-screen blank layer.
///
/// Blank layers are backed by purged buffers, so they cost no memory until something
/// realizes them.
pub struct EmptyFilter {
    buffers: Arc<dyn BufferManager>,
    displays: Vec<BlankState>,
    max_age: u64,
    frame: u64,
}

impl EmptyFilter {
    /// Filter allocating blank buffers from `buffers`; unused ones are destroyed after
    /// `max_age` frames.
    pub fn new(buffers: Arc<dyn BufferManager>, max_age: u64) -> Self {
        Self {
            buffers,
            displays: Vec::new(),
            max_age,
            frame: 0,
        }
    }

    fn blank_buffer(&mut self, d: usize, width: u32, height: u32) -> Option<BufferHandle> {
        let state = &mut self.displays[d];
        state.last_used = self.frame;
        if let Some((h, w, ht)) = state.buffer {
            if (w, ht) == (width, height) {
                return Some(h);
            }
            self.buffers.destroy_buffer(h);
            state.buffer = None;
        }
        match self
            .buffers
            .create_purged_buffer(&format!("blank-{d}"), width, height, DEFAULT_OUTPUT_FORMAT)
        {
            Ok(h) => {
                state.buffer = Some((h, width, height));
                Some(h)
            }
            Err(e) => {
                tracing::warn!(display = d, error = %e, "blank buffer allocation failed");
                None
            }
        }
    }

    fn expire(&mut self) {
        for (d, state) in self.displays.iter_mut().enumerate() {
            if state.blanking {
                continue;
            }
            if let Some((h, _, _)) = state.buffer
                && self.frame.saturating_sub(state.last_used) >= self.max_age
            {
                tracing::debug!(display = d, handle = h.0, "destroying idle blank buffer");
                self.buffers.destroy_buffer(h);
                state.buffer = None;
            }
        }
    }
}

impl Filter for EmptyFilter {
    fn name(&self) -> &str {
        "empty"
    }

    fn position(&self) -> FilterPosition {
        FilterPosition::Empty
    }

    fn on_apply<'a>(&mut self, content: &'a Content) -> Cow<'a, Content> {
        self.frame += 1;
        if self.displays.len() < content.len() {
            self.displays.resize_with(content.len(), BlankState::default);
        }

        let wants: Vec<bool> = content
            .displays()
            .map(|d| d.enabled && d.layer_stack().is_empty() && d.width > 0 && d.height > 0)
            .collect();
        let flipped: Vec<bool> = wants
            .iter()
            .zip(&self.displays)
            .map(|(w, s)| *w != s.blanking)
            .collect();

        let out = if wants.iter().any(|w| *w) || flipped.iter().any(|f| *f) {
            let mut out = content.clone();
            for d in 0..out.len() {
                if wants[d] {
                    let (w, h) = (out.display(d).width, out.display(d).height);
                    if let Some(handle) = self.blank_buffer(d, w, h) {
                        let stack = out.edit_display(d).edit_layer_stack();
                        let changed = stack.is_geometry_changed();
                        stack.push(
                            Layer::new(handle, IRect::from_size(w, h), DEFAULT_OUTPUT_FORMAT)
                                .with_opaque(true),
                        );
                        stack.update_layer_flags();
                        stack.set_geometry_changed(changed);
                    }
                }
                if flipped[d] {
                    tracing::debug!(display = d, blanking = wants[d], "blanking state changed");
                    out.edit_display(d).set_geometry_changed(true);
                }
                self.displays[d].blanking = wants[d];
            }
            Cow::Owned(out)
        } else {
            Cow::Borrowed(content)
        };

        self.expire();
        out
    }
}

#[cfg(test)]
#[path = "../../tests/unit/filter/empty.rs"]
mod tests;
