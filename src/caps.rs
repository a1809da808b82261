use crate::foundation::core::{Compression, PixelFormat, Transform};
use crate::layer::model::Layer;

/// Static capabilities of one hardware composition plane.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PlaneCaps {
    /// Formats the plane can scan out.
    pub formats: Vec<PixelFormat>,
    /// Transforms the plane can apply.
    pub transforms: Vec<Transform>,
    /// Smallest source width the plane accepts.
    pub min_source_width: u32,
    /// Smallest source height the plane accepts.
    pub min_source_height: u32,
    /// Compressions the plane can decode, most compressed first.
    pub compressions: Vec<Compression>,
}

impl Default for PlaneCaps {
    fn default() -> Self {
        Self {
            formats: vec![
                PixelFormat::Argb8888,
                PixelFormat::Abgr8888,
                PixelFormat::Xrgb8888,
                PixelFormat::Xbgr8888,
                PixelFormat::Nv12,
            ],
            transforms: vec![Transform::None, Transform::Rot180],
            min_source_width: 1,
            min_source_height: 1,
            compressions: vec![Compression::RenderClear, Compression::Render],
        }
    }
}

impl PlaneCaps {
    /// Return `true` when the plane can scan out `format`.
    pub fn supports_format(&self, format: PixelFormat) -> bool {
        self.formats.contains(&format)
    }

    /// Return `true` when the plane can apply `transform`.
    pub fn supports_transform(&self, transform: Transform) -> bool {
        transform == Transform::None || self.transforms.contains(&transform)
    }

    /// Compressions to try for a target of `format`, most compressed first.
    ///
    /// The list always ends with [`Compression::None`]; render compression is only offered
    /// for 32-bit RGB formats.
    pub fn compressions_for(&self, format: PixelFormat) -> Vec<Compression> {
        let mut out: Vec<Compression> = if format.is_rgb32() {
            self.compressions
                .iter()
                .copied()
                .filter(|c| *c != Compression::None)
                .collect()
        } else {
            Vec::new()
        };
        out.sort();
        out.dedup();
        out.push(Compression::None);
        out
    }

    /// Return `true` when `layer` can be passed straight through to this plane.
    pub fn is_layer_supported(&self, layer: &Layer) -> bool {
        layer.is_enabled()
            && self.supports_format(layer.format)
            && self.supports_transform(layer.transform)
            && layer.src_width() >= self.min_source_width
            && layer.src_height() >= self.min_source_height
            && (layer.compression == Compression::None
                || self.compressions.contains(&layer.compression))
    }
}

/// Capabilities of one display: one entry per plane, topmost plane first.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DisplayCaps {
    /// Per-plane capabilities.
    pub planes: Vec<PlaneCaps>,
}

impl Default for DisplayCaps {
    fn default() -> Self {
        Self::uniform(3, PlaneCaps::default())
    }
}

impl DisplayCaps {
    /// `count` planes sharing the same capabilities.
    pub fn uniform(count: usize, plane: PlaneCaps) -> Self {
        Self {
            planes: vec![plane; count],
        }
    }

    /// Number of planes.
    pub fn max_planes(&self) -> usize {
        self.planes.len()
    }

    /// Capabilities of plane `index`. Panics when out of range.
    pub fn plane_caps(&self, index: usize) -> &PlaneCaps {
        &self.planes[index]
    }
}

#[cfg(test)]
#[path = "../tests/unit/caps.rs"]
mod tests;
