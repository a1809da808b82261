use super::*;
use crate::buffer::{BufferUsage, MemoryBufferManager};
use crate::composer::partitioned::PartitionedComposer;
use crate::composer::{Composer, ResourceHandle};
use crate::foundation::core::{BufferHandle, Transform};

fn solid(mgr: &MemoryBufferManager, w: u32, h: u32, px: [u8; 4]) -> BufferHandle {
    let bytes: Vec<u8> = std::iter::repeat_n(px, (w * h) as usize).flatten().collect();
    mgr.create_filled("src", w, h, PixelFormat::Abgr8888, &bytes).unwrap()
}

fn target(mgr: &MemoryBufferManager, w: u32, h: u32) -> Layer {
    let handle = mgr
        .create_buffer("rt", w, h, PixelFormat::Abgr8888, BufferUsage::RenderTarget)
        .unwrap();
    Layer {
        handle: Some(handle),
        ..Layer::target(w, h, PixelFormat::Abgr8888, Compression::None)
    }
}

fn pixel(mgr: &MemoryBufferManager, layer: &Layer, x: usize, y: usize) -> [u8; 4] {
    let bytes = mgr.read_pixels(layer.handle.unwrap()).unwrap();
    let w = layer.dst.width() as usize;
    let off = (y * w + x) * 4;
    [bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]
}

fn compose(mgr: &Arc<MemoryBufferManager>, src: &LayerStack, rt: &Layer) {
    let mut c = PartitionedComposer::new(Box::new(CpuCellRenderer::new(mgr.clone())));
    c.on_compose(src, rt, ResourceHandle(0)).unwrap();
}

#[test]
fn premultiplied_layer_blends_over_opaque_background() {
    let mgr = Arc::new(MemoryBufferManager::new());
    let red = solid(&mgr, 4, 4, [255, 0, 0, 255]);
    let half_blue = solid(&mgr, 2, 4, [0, 0, 128, 128]);
    let src = LayerStack::from_layers(vec![
        Layer::new(half_blue, IRect::new(0, 0, 2, 4), PixelFormat::Abgr8888),
        Layer::new(red, IRect::new(0, 0, 4, 4), PixelFormat::Abgr8888).with_opaque(true),
    ]);
    let rt = target(&mgr, 4, 4);
    compose(&mgr, &src, &rt);

    assert_eq!(pixel(&mgr, &rt, 3, 0), [255, 0, 0, 255]);
    assert_eq!(pixel(&mgr, &rt, 0, 0), [127, 0, 128, 255]);
}

#[test]
fn rotation_samples_through_the_transform() {
    let mgr = Arc::new(MemoryBufferManager::new());
    let bytes = [10, 0, 0, 255, 20, 0, 0, 255];
    let h = mgr
        .create_filled("src", 2, 1, PixelFormat::Abgr8888, &bytes)
        .unwrap();
    let src = LayerStack::from_layers(vec![
        Layer::new(h, IRect::new(0, 0, 2, 1), PixelFormat::Abgr8888)
            .with_opaque(true)
            .with_transform(Transform::Rot180),
    ]);
    let rt = target(&mgr, 2, 1);
    compose(&mgr, &src, &rt);

    assert_eq!(pixel(&mgr, &rt, 0, 0), [20, 0, 0, 255]);
    assert_eq!(pixel(&mgr, &rt, 1, 0), [10, 0, 0, 255]);
}

#[test]
fn unsupported_inputs_are_blanked() {
    let mgr = Arc::new(MemoryBufferManager::new());
    let video = mgr
        .create_buffer("vid", 4, 4, PixelFormat::Yuyv, BufferUsage::Source)
        .unwrap();
    let src = LayerStack::from_layers(vec![Layer::new(
        video,
        IRect::new(0, 0, 4, 4),
        PixelFormat::Yuyv,
    )]);
    let rt = target(&mgr, 4, 4);
    mgr.write_pixels(rt.handle.unwrap(), &[9; 64]).unwrap();
    compose(&mgr, &src, &rt);
    assert_eq!(pixel(&mgr, &rt, 2, 2), [0, 0, 0, 0]);
}

#[test]
fn layer_format_disagreeing_with_its_buffer_draws_blank() {
    let mgr = Arc::new(MemoryBufferManager::new());
    // 16 bits per pixel: half the bytes a 32-bit read would expect.
    let narrow = mgr
        .create_buffer("narrow", 4, 4, PixelFormat::Rgb565, BufferUsage::Source)
        .unwrap();
    let src = LayerStack::from_layers(vec![
        Layer::new(narrow, IRect::new(0, 0, 4, 4), PixelFormat::Argb8888),
    ]);
    let rt = target(&mgr, 4, 4);
    mgr.write_pixels(rt.handle.unwrap(), &[9; 64]).unwrap();
    compose(&mgr, &src, &rt);
    assert_eq!(pixel(&mgr, &rt, 3, 3), [0, 0, 0, 0]);
}

#[test]
fn draw_outside_a_frame_is_an_error() {
    let mgr: Arc<dyn BufferManager> = Arc::new(MemoryBufferManager::new());
    let mut r = CpuCellRenderer::new(mgr);
    assert!(r.draw_layer_set(&[0], IRect::new(0, 0, 1, 1)).is_err());
    assert!(r.end_frame().is_err());
}
