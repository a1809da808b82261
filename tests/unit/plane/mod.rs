use std::sync::Arc;

use super::*;
use crate::buffer::{BufferManager, MemoryBufferManager};
use crate::composer::cpu::CpuCellRenderer;
use crate::composer::partitioned::PartitionedComposer;
use crate::config::CompositorOpts;
use crate::filter::Filter;
use crate::foundation::core::BufferHandle;
use crate::foundation::geometry::IRect;
use crate::layer::content::Content;
use crate::layer::model::CompositionRef;

const FMT: PixelFormat = PixelFormat::Argb8888;

fn setup(budget: Option<usize>) -> (Arc<MemoryBufferManager>, CompositionManager) {
    let mgr = Arc::new(match budget {
        Some(b) => MemoryBufferManager::with_budget(b),
        None => MemoryBufferManager::new(),
    });
    let mut cm = CompositionManager::new(mgr.clone(), &CompositorOpts::default());
    mgr.register_tracker(cm.tracker());
    cm.add(Box::new(PartitionedComposer::new(Box::new(CpuCellRenderer::new(
        mgr.clone(),
    )))));
    (mgr, cm)
}

fn display(layers: Vec<Layer>) -> Display {
    Display::new(8, 8, LayerStack::from_layers(layers))
}

fn full(id: u64) -> Layer {
    Layer::new(BufferHandle(id), IRect::from_size(8, 8), FMT)
}

#[test]
fn dedicated_and_composed_planes_build_the_output() {
    let (_, mut cm) = setup(None);
    let caps = DisplayCaps::default();
    let d = display(vec![full(1), full(2), full(3)]);
    let mut pc = PlaneComposition::new(0, 3);
    pc.reset(&mut cm, &d);

    assert!(pc.add_dedicated_layer(0, 0));
    assert!(pc.add_full_screen_composition(&mut cm, &caps, 1, 1, 2, FMT));
    let PlaneRole::Composed { composition, .. } = pc.role(1).clone() else {
        panic!("plane 1 should be composed");
    };
    assert_eq!(cm.composition(composition).map(|c| c.lock_count()), Some(1));

    assert!(pc.on_acquire(&mut cm));
    assert_eq!(pc.acquired_planes(), 2);
    let out = pc.output();
    assert_eq!(out.len(), 2);
    assert!(out.is_geometry_changed());
    assert_eq!(out.layer(0).handle, Some(BufferHandle(1)));
    assert_eq!(out.layer(1).composition, Some(CompositionRef::Managed(composition)));
    assert!(out.layer(1).handle.is_some());

    pc.on_release(&mut cm);
    assert_eq!(pc.acquired_planes(), 0);
    assert_eq!(pc.role(1), &PlaneRole::Uninitialized);
    assert_eq!(cm.composition(composition).map(|c| c.lock_count()), Some(0));
}

#[test]
fn unchanged_assignment_keeps_geometry_flag_clear() {
    let (_, mut cm) = setup(None);
    let caps = DisplayCaps::default();
    let mut pc = PlaneComposition::new(0, 3);
    for frame in 0..2u64 {
        let d = display(vec![full(10 + frame), full(2)]);
        pc.reset(&mut cm, &d);
        assert!(pc.add_dedicated_layer(0, 0));
        assert!(pc.add_full_screen_composition(&mut cm, &caps, 1, 1, 1, FMT));
        assert!(pc.on_acquire(&mut cm));
        assert_eq!(pc.output().is_geometry_changed(), frame == 0);
        pc.on_release(&mut cm);
        cm.on_end_of_frame();
    }
}

#[test]
fn failed_acquire_releases_every_plane() {
    // Room for exactly one 8x8 32-bit render target.
    let (_, mut cm) = setup(Some(300));
    let caps = DisplayCaps::default();
    let half = Layer::new(BufferHandle(2), IRect::new(0, 0, 4, 8), FMT);
    let d = display(vec![full(1), half]);
    let mut pc = PlaneComposition::new(0, 3);
    pc.reset(&mut cm, &d);

    assert!(pc.add_full_screen_composition(&mut cm, &caps, 0, 0, 1, FMT));
    assert!(pc.add_full_screen_composition(&mut cm, &caps, 1, 1, 1, FMT));
    let PlaneRole::Composed { composition: first, .. } = pc.role(0).clone() else {
        panic!("plane 0 should be composed");
    };

    assert!(!pc.on_acquire(&mut cm));
    assert_eq!(pc.acquired_planes(), 0);
    assert!(!cm.composition(first).expect("cached").is_acquired());
}

#[test]
fn host_fallback_shows_the_host_render_target() {
    let (_, mut cm) = setup(None);
    let content = Content::new(vec![display(vec![full(1), full(2)])]);
    cm.host_mut().on_frame_begin(&content);
    let _ = cm.host_mut().on_apply(&content);
    let mut pc = PlaneComposition::new(0, 3);
    pc.reset(&mut cm, content.display(0));

    assert!(pc.add_dedicated_layer(0, 0));
    pc.fallback_to_host(&mut cm);

    assert_eq!(pc.role(0), &PlaneRole::Host { display: 0 });
    assert_eq!(pc.acquired_planes(), 1);
    assert_eq!(pc.output().len(), 1);
    assert_eq!(
        pc.output().layer(0).composition,
        Some(CompositionRef::Host { display: 0 })
    );
    assert_eq!(cm.host().compose_range(0), Some((0, 1)));

    pc.on_release(&mut cm);
    assert_eq!(cm.host().compose_range(0), Some((0, 1)), "unsupported range stays");
}

#[test]
fn preprocess_renders_at_origin_and_shows_at_destination() {
    let (mgr, mut cm) = setup(None);
    let caps = DisplayCaps::default();
    let src = mgr
        .create_filled("src", 4, 4, FMT, &[255; 64])
        .expect("allocated");
    let rotated = Layer::new(src, IRect::new(2, 2, 6, 6), FMT).with_transform(Transform::Rot90);
    let d = display(vec![rotated]);
    let mut pc = PlaneComposition::new(0, 3);
    pc.reset(&mut cm, &d);

    assert!(pc.add_source_preprocess(&mut cm, &caps, 0, 0, FMT));
    let PlaneRole::Preprocessed {
        composition,
        destination,
        ..
    } = pc.role(0).clone()
    else {
        panic!("plane 0 should be preprocessed");
    };
    let entry = cm.composition(composition).expect("cached");
    assert_eq!(entry.source().layer(0).dst, IRect::new(0, 0, 4, 4));
    assert_eq!((entry.spec().width, entry.spec().height), (4, 4));
    assert_eq!(destination.dst, IRect::new(2, 2, 6, 6));
    assert_eq!(destination.transform, Transform::None);
    assert_eq!(destination.src, Rect::new(0.0, 0.0, 4.0, 4.0));

    assert!(pc.on_acquire(&mut cm));
    let target = cm.target(composition).and_then(|l| l.handle);
    assert!(target.is_some());
    assert_eq!(pc.output().layer(0).handle, target);

    let waits = pc.on_compose(&mut cm).expect("composed");
    assert!(waits.is_empty());
    let pixels = mgr.read_pixels(target.expect("target")).expect("readable");
    assert!(pixels.iter().all(|b| *b == 255));
    pc.on_release(&mut cm);
}

#[test]
fn full_screen_composition_renders_source_pixels() {
    let (mgr, mut cm) = setup(None);
    let caps = DisplayCaps::default();
    let bytes: Vec<u8> = (0..64u32).flat_map(|i| [i as u8, 0, 0, 255]).collect();
    let src = mgr
        .create_filled("src", 8, 8, FMT, &bytes)
        .expect("allocated");
    let d = display(vec![Layer::new(src, IRect::from_size(8, 8), FMT)]);
    let mut pc = PlaneComposition::new(0, 3);
    pc.reset(&mut cm, &d);

    assert!(pc.add_full_screen_composition(&mut cm, &caps, 0, 0, 1, FMT));
    assert!(pc.on_acquire(&mut cm));
    pc.on_compose(&mut cm).expect("composed");
    let target = pc.output().layer(0).handle.expect("target");
    assert_eq!(mgr.read_pixels(target).expect("readable"), bytes);
    pc.on_release(&mut cm);
}

#[test]
#[should_panic(expected = "initialized twice")]
fn planes_cannot_be_initialized_twice() {
    let (_, mut cm) = setup(None);
    let mut pc = PlaneComposition::new(0, 3);
    pc.reset(&mut cm, &display(vec![full(1), full(2)]));
    pc.add_dedicated_layer(0, 0);
    pc.add_dedicated_layer(0, 1);
}
