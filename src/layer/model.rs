use crate::foundation::core::{BlendMode, BufferHandle, Compression, PixelFormat, Rect, Transform};
use crate::foundation::fence::Fence;
use crate::foundation::geometry::{IRect, clip_to_display};

/// Identifier of a cached composition inside a [`crate::CompositionManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CompositionId(pub u64);

/// Non-owning link from a layer to the composition that produced it.
///
/// This is a lookup key, never an ownership edge: the composition owns its result layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionRef {
    /// A composition cached by the manager.
    Managed(CompositionId),
    /// The host compositor's render target for a display.
    Host {
        /// Display index.
        display: usize,
    },
}

/// Per-layer flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LayerFlags {
    /// Every pixel of the destination rectangle is fully covered.
    pub opaque: bool,
    /// Protected content; cannot be read back by software compositors.
    pub encrypted: bool,
    /// Produced by a video decoder.
    pub video: bool,
    /// The producer may render into the buffer while it is displayed.
    pub front_buffer_rendered: bool,
    /// The host compositor asked for this layer to be left to it.
    pub skip: bool,
}

/// One source or destination surface taking part in a composition.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Layer {
    /// Native buffer, `None` for layers without backing.
    #[serde(default)]
    pub handle: Option<BufferHandle>,
    /// Source crop in buffer space, before the transform.
    pub src: Rect,
    /// Destination in target space, after the transform.
    pub dst: IRect,
    /// Transform applied from source to destination.
    #[serde(default)]
    pub transform: Transform,
    /// Blending with content beneath.
    #[serde(default)]
    pub blend: BlendMode,
    /// Buffer pixel format.
    pub format: PixelFormat,
    /// Buffer compression.
    #[serde(default)]
    pub compression: Compression,
    /// Per-layer flags.
    #[serde(default)]
    pub flags: LayerFlags,
    /// Expected update rate.
    #[serde(default = "default_fps")]
    pub fps: f32,
    /// Composition that produced this layer, if any.
    #[serde(default)]
    pub composition: Option<CompositionRef>,
    /// Producer-ready signal; readers must wait on it before touching pixels.
    #[serde(skip)]
    pub acquire_fence: Option<Fence>,
}

fn default_fps() -> f32 {
    60.0
}

impl Layer {
    /// A disabled layer with no buffer and no area.
    pub fn empty() -> Self {
        Self {
            handle: None,
            src: Rect::ZERO,
            dst: IRect::default(),
            transform: Transform::None,
            blend: BlendMode::None,
            format: PixelFormat::Abgr8888,
            compression: Compression::None,
            flags: LayerFlags::default(),
            fps: default_fps(),
            composition: None,
            acquire_fence: None,
        }
    }

    /// A buffer-backed layer whose source covers `dst` one-to-one.
    pub fn new(handle: BufferHandle, dst: IRect, format: PixelFormat) -> Self {
        Self {
            handle: Some(handle),
            src: dst.at_origin().to_rect(),
            dst,
            format,
            blend: BlendMode::Premultiplied,
            ..Self::empty()
        }
    }

    /// Render-target description for a `width` x `height` composition.
    pub fn target(width: u32, height: u32, format: PixelFormat, compression: Compression) -> Self {
        let dst = IRect::from_size(width, height);
        Self {
            src: dst.to_rect(),
            dst,
            format,
            compression,
            ..Self::empty()
        }
    }

    /// Builder-style opaque flag.
    pub fn with_opaque(mut self, opaque: bool) -> Self {
        self.flags.opaque = opaque;
        if opaque {
            self.blend = BlendMode::None;
        }
        self
    }

    /// Builder-style blend mode.
    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    /// Builder-style transform.
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Builder-style source crop.
    pub fn with_src(mut self, src: Rect) -> Self {
        self.src = src;
        self
    }

    /// Builder-style fps.
    pub fn with_fps(mut self, fps: f32) -> Self {
        self.fps = fps;
        self
    }

    /// Builder-style acquire fence.
    pub fn with_acquire_fence(mut self, fence: Fence) -> Self {
        self.acquire_fence = Some(fence);
        self
    }

    /// Return `true` when the layer hides everything beneath its destination.
    pub fn is_opaque(&self) -> bool {
        self.flags.opaque || (self.blend == BlendMode::None && self.handle.is_some())
    }

    /// Return `true` for video content (flag or video pixel format).
    pub fn is_video(&self) -> bool {
        self.flags.video || self.format.is_video()
    }

    /// Return `true` for protected content.
    pub fn is_encrypted(&self) -> bool {
        self.flags.encrypted
    }

    /// Return `true` when the layer was produced by a composition.
    pub fn is_composition(&self) -> bool {
        self.composition.is_some()
    }

    /// Return `true` when the layer shows anything.
    pub fn is_enabled(&self) -> bool {
        self.handle.is_some() && !self.dst.is_empty()
    }

    /// Source width rounded to whole pixels.
    pub fn src_width(&self) -> u32 {
        self.src.width().round().max(0.0) as u32
    }

    /// Source height rounded to whole pixels.
    pub fn src_height(&self) -> u32 {
        self.src.height().round().max(0.0) as u32
    }

    /// Copy the buffer-related per-frame state from `from`.
    ///
    /// Geometry and flags are untouched; only the buffer, its format, compression and fence
    /// follow the producer.
    pub fn update_frame_state(&mut self, from: &Layer) {
        self.handle = from.handle;
        self.format = from.format;
        self.compression = from.compression;
        self.acquire_fence = from.acquire_fence.clone();
    }

    /// Clip the destination to a `width` x `height` display, cropping the source to match.
    ///
    /// Returns `false` when nothing of the layer remains visible.
    pub fn clip_to_display(&mut self, width: u32, height: u32) -> bool {
        clip_to_display(&mut self.src, self.transform, &mut self.dst, width, height)
    }

    /// Geometry-only equality: everything that changes how the layer composes, ignoring the
    /// buffer and its fence.
    pub fn same_geometry(&self, other: &Layer) -> bool {
        self.src == other.src
            && self.dst == other.dst
            && self.transform == other.transform
            && self.blend == other.blend
            && self.format == other.format
            && self.flags == other.flags
    }
}

impl Default for Layer {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/layer/model.rs"]
mod tests;
