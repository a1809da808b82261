use crate::foundation::core::PixelFormat;

/// Four premultiplied channels in R, G, B, A order.
pub(crate) type PremulRgba8 = [u8; 4];

/// Premultiplied source-over.
pub(crate) fn over(dst: PremulRgba8, src: PremulRgba8) -> PremulRgba8 {
    if src[3] == 0 {
        return dst;
    }
    if src[3] == 255 {
        return src;
    }
    let inv = 255u16 - u16::from(src[3]);
    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = add_sat_u8(src[i], mul_div255_u8(u16::from(dst[i]), inv));
    }
    out
}

/// Source-over where the colour channels of `src` are not yet multiplied by its alpha.
pub(crate) fn over_coverage(dst: PremulRgba8, src: [u8; 4]) -> PremulRgba8 {
    let a = u16::from(src[3]);
    let premul = [
        mul_div255_u8(u16::from(src[0]), a),
        mul_div255_u8(u16::from(src[1]), a),
        mul_div255_u8(u16::from(src[2]), a),
        src[3],
    ];
    over(dst, premul)
}

pub(crate) fn mul_div255_u16(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}

pub(crate) fn mul_div255_u8(x: u16, y: u16) -> u8 {
    mul_div255_u16(x, y) as u8
}

fn add_sat_u8(a: u8, b: u8) -> u8 {
    a.saturating_add(b)
}

/// Decode one 32-bit pixel stored in `format` into R, G, B, A order.
///
/// Formats without alpha decode as opaque.
pub(crate) fn load_rgba(bytes: &[u8], format: PixelFormat) -> PremulRgba8 {
    let [b0, b1, b2, b3] = [bytes[0], bytes[1], bytes[2], bytes[3]];
    match format {
        PixelFormat::Argb8888 => [b2, b1, b0, b3],
        PixelFormat::Xrgb8888 => [b2, b1, b0, 255],
        PixelFormat::Xbgr8888 => [b0, b1, b2, 255],
        _ => [b0, b1, b2, b3],
    }
}

/// Encode an R, G, B, A pixel into `format`'s byte order.
pub(crate) fn store_rgba(out: &mut [u8], px: PremulRgba8, format: PixelFormat) {
    let bytes = match format {
        PixelFormat::Argb8888 | PixelFormat::Xrgb8888 => [px[2], px[1], px[0], px[3]],
        _ => px,
    };
    out[..4].copy_from_slice(&bytes);
}

/// 64-bit identity hash for cache keys.
pub(crate) fn hash_bytes(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(bytes)
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/math.rs"]
mod tests;
