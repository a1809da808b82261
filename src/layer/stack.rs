use crate::foundation::math::hash_bytes;
use crate::layer::model::Layer;

/// Ordered layers for one display. Index 0 is the topmost layer.
///
/// Every insertion, removal or replacement leaves the stack *unsettled* until
/// [`LayerStack::update_layer_flags`] recomputes the derived flags. Consumers assert the stack
/// is settled before reading it.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LayerStack {
    layers: Vec<Layer>,
    #[serde(default)]
    geometry_changed: bool,
    #[serde(skip)]
    derived: StackFlags,
    #[serde(skip, default = "deserialized_unsettled")]
    unsettled: bool,
}

fn deserialized_unsettled() -> bool {
    true
}

/// Flags derived from the layers of a stack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StackFlags {
    /// At least one layer is video.
    pub video: bool,
    /// At least one layer is protected.
    pub encrypted: bool,
    /// At least one layer may be front-buffer rendered.
    pub front_buffer_rendered: bool,
    /// Every layer is opaque.
    pub all_opaque: bool,
}

impl PartialEq for LayerStack {
    fn eq(&self, other: &Self) -> bool {
        self.layers == other.layers
    }
}

impl LayerStack {
    /// Empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack from layers in top-to-bottom order, flags already settled.
    pub fn from_layers(layers: Vec<Layer>) -> Self {
        let mut s = Self {
            layers,
            geometry_changed: true,
            derived: StackFlags::default(),
            unsettled: true,
        };
        s.update_layer_flags();
        s
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Return `true` when the stack has no layers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer at `index`. Panics when out of range.
    pub fn layer(&self, index: usize) -> &Layer {
        &self.layers[index]
    }

    /// Layer at `index`, `None` when out of range.
    pub fn get(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    /// Iterate layers from the top.
    pub fn iter(&self) -> std::slice::Iter<'_, Layer> {
        self.layers.iter()
    }

    /// Layers from the top as a slice.
    pub fn as_slice(&self) -> &[Layer] {
        &self.layers
    }

    /// Replace the layer at `index`.
    pub fn set_layer(&mut self, index: usize, layer: Layer) {
        self.layers[index] = layer;
        self.unsettled = true;
    }

    /// Mutable access to the layer at `index` for in-place preprocessing.
    pub fn edit_layer(&mut self, index: usize) -> &mut Layer {
        self.unsettled = true;
        &mut self.layers[index]
    }

    /// Insert a layer so it ends up at `index`.
    pub fn insert(&mut self, index: usize, layer: Layer) {
        self.layers.insert(index, layer);
        self.unsettled = true;
    }

    /// Append a layer at the bottom.
    pub fn push(&mut self, layer: Layer) {
        self.layers.push(layer);
        self.unsettled = true;
    }

    /// Remove and return the layer at `index`.
    pub fn remove(&mut self, index: usize) -> Layer {
        self.unsettled = true;
        self.layers.remove(index)
    }

    /// Resize, filling new slots with [`Layer::empty`].
    pub fn resize(&mut self, len: usize) {
        self.layers.resize_with(len, Layer::empty);
        self.unsettled = true;
    }

    /// Whether the composed appearance may differ from the previous frame.
    pub fn is_geometry_changed(&self) -> bool {
        self.geometry_changed
    }

    /// Force or clear the geometry-changed flag.
    pub fn set_geometry_changed(&mut self, changed: bool) {
        self.geometry_changed = changed;
    }

    /// Derived flags. Panics in debug builds when read from an unsettled stack.
    pub fn flags(&self) -> StackFlags {
        self.assert_settled();
        self.derived
    }

    /// Return `true` when any layer is video.
    pub fn is_video(&self) -> bool {
        self.flags().video
    }

    /// Return `true` when any layer is protected.
    pub fn is_encrypted(&self) -> bool {
        self.flags().encrypted
    }

    /// Return `true` when flags reflect the current layers.
    pub fn is_settled(&self) -> bool {
        !self.unsettled
    }

    /// Debug check that the stack was settled after its last mutation.
    pub fn assert_settled(&self) {
        debug_assert!(
            !self.unsettled,
            "layer stack consumed before update_layer_flags"
        );
    }

    /// Recompute derived flags after a mutation.
    ///
    /// A mutated stack always reports a geometry change; an untouched one keeps its flag.
    pub fn update_layer_flags(&mut self) {
        let mut flags = StackFlags {
            all_opaque: !self.layers.is_empty(),
            ..StackFlags::default()
        };
        for l in &self.layers {
            flags.video |= l.is_video();
            flags.encrypted |= l.is_encrypted();
            flags.front_buffer_rendered |= l.flags.front_buffer_rendered;
            flags.all_opaque &= l.is_opaque();
        }
        self.derived = flags;
        if self.unsettled {
            self.geometry_changed = true;
        }
        self.unsettled = false;
    }

    /// Recompute derived flags, setting the geometry-changed flag only when the layer
    /// geometry differs from `previous`.
    pub fn update_layer_flags_from(&mut self, previous: &LayerStack) {
        let changed = !self.same_geometry(previous);
        self.unsettled = false;
        self.update_layer_flags();
        self.geometry_changed = changed;
    }

    /// Take buffers and fences from a stack with the same geometry. Flags stay settled.
    pub fn update_frame_state(&mut self, from: &LayerStack) {
        debug_assert!(self.same_geometry(from));
        for (l, f) in self.layers.iter_mut().zip(&from.layers) {
            l.update_frame_state(f);
        }
    }

    /// Take the buffer and fence of the layer at `index` from `from`. Flags stay settled.
    pub fn update_layer_frame_state(&mut self, index: usize, from: &Layer) {
        self.layers[index].update_frame_state(from);
    }

    /// Identity hash over every field that affects composition, including buffer handles.
    pub fn fingerprint(&self) -> u64 {
        self.hash_layers(true)
    }

    /// Hash over the layer geometry only; stable while producers swap buffers.
    pub fn geometry_fingerprint(&self) -> u64 {
        self.hash_layers(false)
    }

    /// Return `true` when both stacks compose identically apart from their buffers.
    pub fn same_geometry(&self, other: &LayerStack) -> bool {
        self.layers.len() == other.layers.len()
            && self
                .layers
                .iter()
                .zip(&other.layers)
                .all(|(a, b)| a.same_geometry(b))
    }

    fn hash_layers(&self, with_handles: bool) -> u64 {
        let mut bytes = Vec::with_capacity(self.layers.len() * 64);
        for l in &self.layers {
            if with_handles {
                bytes.extend_from_slice(&l.handle.map_or(u64::MAX, |h| h.0).to_le_bytes());
            }
            for v in [l.src.x0, l.src.y0, l.src.x1, l.src.y1] {
                bytes.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            for v in [l.dst.left, l.dst.top, l.dst.right, l.dst.bottom] {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            bytes.push(l.transform as u8);
            bytes.push(l.blend as u8);
            bytes.extend_from_slice(format!("{:?}", l.format).as_bytes());
            bytes.push(u8::from(l.is_opaque()));
            bytes.push(u8::from(l.is_video()));
            bytes.push(u8::from(l.is_encrypted()));
        }
        hash_bytes(&bytes)
    }
}

impl std::ops::Index<usize> for LayerStack {
    type Output = Layer;

    fn index(&self, index: usize) -> &Layer {
        &self.layers[index]
    }
}

impl<'a> IntoIterator for &'a LayerStack {
    type Item = &'a Layer;
    type IntoIter = std::slice::Iter<'a, Layer>;

    fn into_iter(self) -> Self::IntoIter {
        self.layers.iter()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/layer/stack.rs"]
mod tests;
