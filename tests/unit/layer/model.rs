use super::*;

#[test]
fn new_layer_maps_source_one_to_one() {
    let l = Layer::new(BufferHandle(1), IRect::new(10, 20, 110, 70), PixelFormat::Argb8888);
    assert_eq!(l.src, Rect::new(0.0, 0.0, 100.0, 50.0));
    assert_eq!(l.src_width(), 100);
    assert_eq!(l.src_height(), 50);
    assert!(!l.is_opaque());
    assert!(l.with_opaque(true).is_opaque());
}

#[test]
fn empty_layer_is_disabled() {
    let l = Layer::empty();
    assert!(!l.is_enabled());
    assert!(!l.is_composition());
    assert_eq!(l, Layer::default());
}

#[test]
fn video_detected_by_flag_or_format() {
    let mut l = Layer::new(BufferHandle(1), IRect::new(0, 0, 8, 8), PixelFormat::Nv12);
    assert!(l.is_video());
    l.format = PixelFormat::Abgr8888;
    assert!(!l.is_video());
    l.flags.video = true;
    assert!(l.is_video());
}

#[test]
fn frame_state_copies_buffer_not_geometry() {
    let mut dst = Layer::new(BufferHandle(1), IRect::new(5, 5, 15, 15), PixelFormat::Nv12)
        .with_transform(Transform::Rot90);
    let fence = Fence::new();
    let result = Layer::target(10, 10, PixelFormat::Abgr8888, Compression::Render)
        .with_acquire_fence(fence.clone());
    let mut result = result;
    result.handle = Some(BufferHandle(9));

    dst.update_frame_state(&result);
    assert_eq!(dst.handle, Some(BufferHandle(9)));
    assert_eq!(dst.format, PixelFormat::Abgr8888);
    assert_eq!(dst.compression, Compression::Render);
    assert_eq!(dst.acquire_fence, Some(fence));
    assert_eq!(dst.dst, IRect::new(5, 5, 15, 15));
    assert_eq!(dst.transform, Transform::Rot90);
}

#[test]
fn clip_to_display_crops_layer() {
    let mut l = Layer::new(BufferHandle(3), IRect::new(-10, 0, 10, 10), PixelFormat::Abgr8888);
    assert!(l.clip_to_display(100, 100));
    assert_eq!(l.dst, IRect::new(0, 0, 10, 10));
    assert_eq!(l.src, Rect::new(10.0, 0.0, 20.0, 10.0));
}

#[test]
fn layer_deserializes_with_defaults() {
    let l: Layer = serde_json::from_value(serde_json::json!({
        "handle": 4,
        "src": { "x0": 0.0, "y0": 0.0, "x1": 8.0, "y1": 8.0 },
        "dst": { "left": 0, "top": 0, "right": 8, "bottom": 8 },
        "format": "abgr8888",
        "flags": { "opaque": true }
    }))
    .unwrap();
    assert_eq!(l.handle, Some(BufferHandle(4)));
    assert!(l.flags.opaque);
    assert_eq!(l.fps, 60.0);
    assert_eq!(l.transform, Transform::None);
}
