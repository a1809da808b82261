use std::sync::Arc;

use crate::buffer::BufferManager;
use crate::composer::partitioned::CellRenderer;
use crate::foundation::core::{BlendMode, Compression, PixelFormat};
use crate::foundation::error::{LayercompError, LayercompResult};
use crate::foundation::geometry::{IRect, map_dst_to_src};
use crate::foundation::math::{PremulRgba8, load_rgba, over, over_coverage, store_rgba};
use crate::layer::model::Layer;
use crate::layer::stack::LayerStack;

struct SourcePixels {
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    pixels: Vec<u8>,
}

impl SourcePixels {
    fn sample(&self, x: f64, y: f64) -> PremulRgba8 {
        let ix = (x.floor().max(0.0) as u32).min(self.width - 1) as usize;
        let iy = (y.floor().max(0.0) as u32).min(self.height - 1) as usize;
        let off = iy * self.stride + ix * 4;
        self.pixels
            .get(off..off + 4)
            .map_or([0; 4], |px| load_rgba(px, self.format))
    }
}

struct Frame {
    source: LayerStack,
    target: Layer,
    bounds: IRect,
    stride: usize,
    pixels: Vec<u8>,
    inputs: Vec<Option<SourcePixels>>,
}

/// [`CellRenderer`] drawing into CPU-visible buffers of a [`BufferManager`].
///
/// Sampling is nearest-neighbour through each layer's source crop and transform. Inputs the
/// renderer cannot read are drawn as transparent.
pub struct CpuCellRenderer {
    buffers: Arc<dyn BufferManager>,
    frame: Option<Frame>,
}

impl CpuCellRenderer {
    /// Renderer reading and writing pixels through `buffers`.
    pub fn new(buffers: Arc<dyn BufferManager>) -> Self {
        Self {
            buffers,
            frame: None,
        }
    }

    fn load_input(&self, layer: &Layer) -> LayercompResult<Option<SourcePixels>> {
        if !self.is_layer_supported_as_input(layer) {
            return Ok(None);
        }
        let Some(handle) = layer.handle else {
            return Ok(None);
        };
        let details = self
            .buffers
            .query_details(handle)
            .ok_or_else(|| LayercompError::render(format!("unknown source buffer {}", handle.0)))?;
        // Purged buffers have no content to read; they draw as blank.
        if details.purged || details.width == 0 || details.height == 0 {
            return Ok(None);
        }
        // The layer may claim a format its buffer does not have.
        if !details.format.is_rgb32() {
            tracing::debug!(handle = handle.0, format = ?details.format, "source buffer is not 32-bit rgb");
            return Ok(None);
        }
        let stride = details.stride as usize;
        let pixels = self.buffers.read_pixels(handle)?;
        if stride < details.width as usize * 4 || pixels.len() < stride * details.height as usize {
            tracing::debug!(handle = handle.0, len = pixels.len(), stride, "source buffer too short");
            return Ok(None);
        }
        Ok(Some(SourcePixels {
            width: details.width,
            height: details.height,
            stride,
            format: details.format,
            pixels,
        }))
    }
}

impl CellRenderer for CpuCellRenderer {
    fn is_layer_supported_as_input(&self, layer: &Layer) -> bool {
        layer.format.is_rgb32() && layer.compression == Compression::None && !layer.is_encrypted()
    }

    fn is_layer_supported_as_output(&self, layer: &Layer) -> bool {
        layer.format.is_rgb32() && layer.compression == Compression::None
    }

    fn can_blank_unsupported_inputs(&self) -> bool {
        true
    }

    fn begin_frame(&mut self, source: &LayerStack, target: &Layer) -> LayercompResult<()> {
        let handle = target
            .handle
            .ok_or_else(|| LayercompError::render("render target has no buffer"))?;
        let details = self
            .buffers
            .query_details(handle)
            .ok_or_else(|| LayercompError::render(format!("unknown target buffer {}", handle.0)))?;
        if !details.format.is_rgb32() {
            return Err(LayercompError::render(format!(
                "cannot render into {:?}",
                details.format
            )));
        }

        let mut inputs = Vec::with_capacity(source.len());
        for l in source {
            inputs.push(self.load_input(l)?);
        }
        let stride = details.stride as usize;
        self.frame = Some(Frame {
            source: source.clone(),
            target: target.clone(),
            bounds: IRect::from_size(details.width, details.height),
            stride,
            pixels: vec![0; stride * details.height as usize],
            inputs,
        });
        Ok(())
    }

    fn draw_layer_set(&mut self, layers: &[usize], region: IRect) -> LayercompResult<()> {
        let frame = self
            .frame
            .as_mut()
            .ok_or_else(|| LayercompError::render("draw_layer_set outside begin_frame/end_frame"))?;
        let Some(region) = region.intersect(frame.bounds) else {
            return Ok(());
        };

        for y in region.top..region.bottom {
            for x in region.left..region.right {
                let mut px: PremulRgba8 = [0; 4];
                for &ly in layers.iter().rev() {
                    let layer = frame.source.layer(ly);
                    let Some(input) = &frame.inputs[ly] else {
                        continue;
                    };
                    let Some((sx, sy)) = map_dst_to_src(layer.src, layer.dst, layer.transform, x, y)
                    else {
                        continue;
                    };
                    let s = input.sample(sx, sy);
                    px = match layer.blend {
                        BlendMode::None => s,
                        BlendMode::Premultiplied => over(px, s),
                        BlendMode::Coverage => over_coverage(px, s),
                    };
                }
                let off = y as usize * frame.stride + x as usize * 4;
                store_rgba(&mut frame.pixels[off..off + 4], px, frame.target.format);
            }
        }
        Ok(())
    }

    fn end_frame(&mut self) -> LayercompResult<()> {
        let frame = self
            .frame
            .take()
            .ok_or_else(|| LayercompError::render("end_frame without begin_frame"))?;
        let Some(handle) = frame.target.handle else {
            return Err(LayercompError::render("render target has no buffer"));
        };
        self.buffers.write_pixels(handle, &frame.pixels)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/composer/cpu.rs"]
mod tests;
