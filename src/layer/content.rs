use std::path::Path;

use crate::foundation::error::{LayercompError, LayercompResult};
use crate::layer::model::Layer;
use crate::layer::stack::LayerStack;

/// One output (physical or virtual display) in a frame.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Display {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Disabled displays are skipped by every filter and by plane assignment.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Monotonic frame counter from the display input.
    #[serde(default)]
    pub frame_index: u64,
    /// Layers to show, topmost first.
    pub layers: LayerStack,
    /// Render-to-texture target for virtual outputs.
    #[serde(default)]
    pub output_layer: Option<Layer>,
    /// The host compositor's reserved render-target layer.
    #[serde(default)]
    pub host_target: Option<Layer>,
}

fn default_enabled() -> bool {
    true
}

impl Display {
    /// Enabled display showing `layers`.
    pub fn new(width: u32, height: u32, layers: LayerStack) -> Self {
        Self {
            width,
            height,
            enabled: true,
            frame_index: 0,
            layers,
            output_layer: None,
            host_target: None,
        }
    }

    /// Layers to show.
    pub fn layer_stack(&self) -> &LayerStack {
        &self.layers
    }

    /// Mutable layers; callers must settle the stack afterwards.
    pub fn edit_layer_stack(&mut self) -> &mut LayerStack {
        &mut self.layers
    }

    /// Whether downstream consumers must re-evaluate this display.
    pub fn is_geometry_changed(&self) -> bool {
        self.layers.is_geometry_changed()
    }

    /// Force or clear the geometry-changed flag.
    pub fn set_geometry_changed(&mut self, changed: bool) {
        self.layers.set_geometry_changed(changed);
    }

    /// Number of layers that show anything.
    pub fn num_enabled_layers(&self) -> usize {
        self.layers.iter().filter(|l| l.is_enabled()).count()
    }
}

/// Everything to show in one frame, one entry per output.
///
/// Filters that need a modified view clone the content only when they actually change
/// something.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Content {
    displays: Vec<Display>,
}

impl Content {
    /// Content for the given displays.
    pub fn new(displays: Vec<Display>) -> Self {
        Self { displays }
    }

    /// Load content from JSON, settling every layer stack.
    pub fn from_json_str(json: &str) -> LayercompResult<Self> {
        let mut c: Self = serde_json::from_str(json)
            .map_err(|e| LayercompError::validation(format!("invalid content json: {e}")))?;
        for d in &mut c.displays {
            d.layers.update_layer_flags();
        }
        Ok(c)
    }

    /// Load content from a JSON file.
    pub fn from_path(path: &Path) -> LayercompResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LayercompError::validation(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Number of displays.
    pub fn len(&self) -> usize {
        self.displays.len()
    }

    /// Return `true` when there are no displays.
    pub fn is_empty(&self) -> bool {
        self.displays.is_empty()
    }

    /// Display at `index`. Panics when out of range.
    pub fn display(&self, index: usize) -> &Display {
        &self.displays[index]
    }

    /// Mutable display at `index`. Panics when out of range.
    pub fn edit_display(&mut self, index: usize) -> &mut Display {
        &mut self.displays[index]
    }

    /// Iterate displays in index order.
    pub fn displays(&self) -> std::slice::Iter<'_, Display> {
        self.displays.iter()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/layer/content.rs"]
mod tests;
