use super::*;
use crate::buffer::MemoryBufferManager;
use crate::caps::PlaneCaps;
use crate::foundation::core::{BufferHandle, Transform};
use crate::foundation::geometry::IRect;
use crate::layer::content::Display;
use crate::plane::PlaneRole;

const FMT: PixelFormat = PixelFormat::Argb8888;

fn full(id: u64) -> Layer {
    Layer::new(BufferHandle(id), IRect::from_size(8, 8), FMT)
}

fn compositor() -> Compositor {
    let mgr: Arc<dyn BufferManager> = Arc::new(MemoryBufferManager::new());
    Compositor::new(CompositorOpts::default(), vec![DisplayCaps::default()], mgr)
        .expect("valid options")
}

fn single(layers: Vec<Layer>) -> Content {
    Content::new(vec![Display::new(8, 8, LayerStack::from_layers(layers))])
}

#[test]
fn stack_policy_dedicates_top_layers_and_composes_the_rest() {
    let mut c = compositor();
    let content = single((1..=5).map(full).collect());
    let out = c.prepare(&content, &mut StackPolicy::default()).expect("prepared");

    assert_eq!(out[0].len(), 3);
    let planes = c.planes(0).expect("display 0");
    assert_eq!(planes.role(0), &PlaneRole::Dedicated { src: 0 });
    assert_eq!(planes.role(1), &PlaneRole::Dedicated { src: 1 });
    assert!(matches!(
        planes.role(2),
        PlaneRole::Composed { src: 2, count: 3, .. }
    ));
    c.end_frame();
}

#[test]
fn stack_policy_preprocesses_unsupported_transforms() {
    let mut c = compositor();
    let content = single(vec![full(1).with_transform(Transform::Rot90), full(2)]);
    c.prepare(&content, &mut StackPolicy::default()).expect("prepared");

    let planes = c.planes(0).expect("display 0");
    assert!(matches!(planes.role(0), PlaneRole::Preprocessed { src: 0, .. }));
    assert_eq!(planes.role(1), &PlaneRole::Dedicated { src: 1 });
    c.end_frame();
}

#[test]
fn empty_display_shows_a_blank_plane() {
    let mut c = compositor();
    let content = single(Vec::new());
    let out = c.prepare(&content, &mut StackPolicy::default()).expect("prepared");
    assert_eq!(out[0].len(), 1);
    assert!(out[0].layer(0).is_opaque());
    c.end_frame();
}

struct Refuse;

impl PlanePolicy for Refuse {
    fn assign(
        &mut self,
        _manager: &mut CompositionManager,
        _caps: &DisplayCaps,
        _planes: &mut PlaneComposition,
    ) -> bool {
        false
    }
}

#[test]
fn refused_assignment_falls_back_to_the_host() {
    let mut c = compositor();
    let content = single(vec![full(1), full(2)]);
    let out = c.prepare(&content, &mut Refuse).expect("host fallback never fails");
    assert_eq!(out[0].len(), 1);
    assert_eq!(
        out[0].layer(0).composition,
        Some(crate::layer::model::CompositionRef::Host { display: 0 })
    );
    assert_eq!(c.manager().host().host_layers(0), &[true, true]);
    c.end_frame();
}

#[test]
fn displays_without_planes_are_rejected() {
    let mgr: Arc<dyn BufferManager> = Arc::new(MemoryBufferManager::new());
    let caps = DisplayCaps::uniform(0, PlaneCaps::default());
    assert!(matches!(
        Compositor::new(CompositorOpts::default(), vec![caps], mgr),
        Err(LayercompError::Config(_))
    ));
}

#[test]
fn caps_beyond_the_list_reuse_the_last_entry() {
    let c = compositor();
    assert_eq!(c.caps(5), DisplayCaps::default());
}
