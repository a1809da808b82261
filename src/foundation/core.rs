pub use kurbo::Rect;

/// Opaque native buffer handle issued by a [`crate::BufferManager`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct BufferHandle(pub u64);

/// Pixel format identity.
///
/// Formats are opaque keys for support and cost decisions; only the bit depth and a few
/// classification predicates are known here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 32-bit, alpha in the top byte, red/green/blue below.
    Argb8888,
    /// 32-bit, byte order R,G,B,A in memory.
    Abgr8888,
    /// 32-bit with an ignored alpha byte.
    Xrgb8888,
    /// 32-bit with an ignored alpha byte, R,G,B,X in memory.
    Xbgr8888,
    /// 24-bit packed.
    Bgr888,
    /// 16-bit packed.
    Rgb565,
    /// Planar 4:2:0 YCrCb.
    Yv12,
    /// Packed 4:2:2 YCbCr.
    Yuyv,
    /// Semi-planar 4:2:0, linear.
    Nv12,
    /// Semi-planar 4:2:0, Y-tiled.
    Nv12YTiled,
    /// 10-bit semi-planar 4:2:0.
    P010,
    /// Any format not in the catalog above.
    Other(u32),
}

/// Format used by the host compositor's render target.
pub const DEFAULT_OUTPUT_FORMAT: PixelFormat = PixelFormat::Abgr8888;

impl PixelFormat {
    /// Bits per pixel used for bandwidth estimates.
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Argb8888 | Self::Abgr8888 | Self::Xrgb8888 | Self::Xbgr8888 | Self::P010 => 32,
            Self::Bgr888 => 24,
            Self::Rgb565 | Self::Yuyv => 16,
            Self::Yv12 | Self::Nv12 | Self::Nv12YTiled => 12,
            Self::Other(_) => 32,
        }
    }

    /// Return `true` for YUV formats produced by video decoders.
    pub fn is_video(self) -> bool {
        matches!(
            self,
            Self::Yv12 | Self::Yuyv | Self::Nv12 | Self::Nv12YTiled | Self::P010
        )
    }

    /// Return `true` when the format carries a meaningful alpha channel.
    pub fn has_alpha(self) -> bool {
        matches!(self, Self::Argb8888 | Self::Abgr8888)
    }

    /// Return `true` for four-byte RGB formats addressable by the CPU renderer.
    pub fn is_rgb32(self) -> bool {
        matches!(
            self,
            Self::Argb8888 | Self::Abgr8888 | Self::Xrgb8888 | Self::Xbgr8888
        )
    }
}

/// Buffer compression, ordered from most compressed to [`Compression::None`].
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Render compression with fast-clear.
    RenderClear,
    /// Render compression.
    Render,
    /// Uncompressed.
    #[default]
    None,
}

/// Layer transform applied between source and destination space.
///
/// The discriminants compose: bit 0 is a horizontal flip, bit 1 a vertical flip and bit 2
/// a 90 degree rotation applied after the flips.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Identity.
    #[default]
    None = 0,
    /// Mirror horizontally.
    FlipH = 1,
    /// Mirror vertically.
    FlipV = 2,
    /// Rotate 180 degrees.
    Rot180 = 3,
    /// Rotate 90 degrees clockwise.
    Rot90 = 4,
    /// Mirror horizontally then rotate 90.
    FlipH90 = 5,
    /// Mirror vertically then rotate 90.
    FlipV90 = 6,
    /// Rotate 270 degrees clockwise.
    Rot270 = 7,
}

impl Transform {
    /// Return `true` when the transform swaps the x and y axes.
    pub fn is_transpose(self) -> bool {
        (self as u32) & (Self::Rot90 as u32) != 0
    }

    /// Return `true` when the transform includes a horizontal mirror.
    pub fn is_flip_h(self) -> bool {
        (self as u32) & (Self::FlipH as u32) != 0
    }

    /// Return `true` when the transform includes a vertical mirror.
    pub fn is_flip_v(self) -> bool {
        (self as u32) & (Self::FlipV as u32) != 0
    }
}

/// How a layer combines with the content beneath it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    /// Replace destination.
    None,
    /// Source-over with premultiplied source.
    #[default]
    Premultiplied,
    /// Source-over with straight (coverage) alpha.
    Coverage,
}

/// Cost metric a composer is asked to estimate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostKind {
    /// Memory bandwidth per second.
    Bandwidth,
    /// Power consumption.
    #[default]
    Power,
    /// Throughput.
    Performance,
    /// Output quality.
    Quality,
    /// Additional memory footprint.
    Memory,
}

/// Bandwidth of one full read or write of a `w` x `h` surface, in kilobits.
pub fn bandwidth_kb(width: u32, height: u32, format: PixelFormat) -> f64 {
    f64::from(width) * f64::from(height) * f64::from(format.bits_per_pixel()) / 1024.0
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
