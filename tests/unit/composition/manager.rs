use std::sync::atomic::AtomicUsize;

use super::*;
use crate::buffer::MemoryBufferManager;
use crate::composer::{Evaluation, ResourceHandle};
use crate::foundation::fence::ComposeOutcome;
use crate::foundation::geometry::IRect;

#[derive(Clone, Default)]
struct Counters {
    evaluations: Arc<AtomicUsize>,
    acquired: Arc<AtomicUsize>,
    composed: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl Counters {
    fn get(c: &AtomicUsize) -> usize {
        c.load(Ordering::SeqCst)
    }
}

struct Scripted {
    name: &'static str,
    cost: f64,
    acquire_ok: bool,
    compressed_ok: bool,
    counters: Counters,
}

impl Scripted {
    fn new(name: &'static str, cost: f64) -> (Self, Counters) {
        let counters = Counters::default();
        (
            Self {
                name,
                cost,
                acquire_ok: true,
                compressed_ok: true,
                counters: counters.clone(),
            },
            counters,
        )
    }
}

impl Composer for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn on_evaluate(&self, _source: &LayerStack, target: &Layer, _kind: CostKind) -> Evaluation {
        self.counters.evaluations.fetch_add(1, Ordering::SeqCst);
        if !self.compressed_ok && target.compression != Compression::None {
            return Evaluation::NotSupported;
        }
        Evaluation::Cost(Cost(self.cost))
    }

    fn on_acquire(&mut self, _source: &LayerStack, _target: &Layer) -> Option<ResourceHandle> {
        if !self.acquire_ok {
            return None;
        }
        Some(ResourceHandle(self.counters.acquired.fetch_add(1, Ordering::SeqCst) as u64))
    }

    fn on_compose(
        &mut self,
        _source: &LayerStack,
        _target: &Layer,
        _resource: ResourceHandle,
    ) -> LayercompResult<ComposeOutcome> {
        self.counters.composed.fetch_add(1, Ordering::SeqCst);
        Ok(ComposeOutcome::default())
    }

    fn on_release(&mut self, _resource: ResourceHandle) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn source(handle: u64) -> LayerStack {
    LayerStack::from_layers(vec![Layer::new(
        BufferHandle(handle),
        IRect::from_size(16, 16),
        PixelFormat::Argb8888,
    )])
}

fn manager(opts: &CompositorOpts) -> (Arc<MemoryBufferManager>, CompositionManager) {
    let mgr = Arc::new(MemoryBufferManager::new());
    let cm = CompositionManager::new(mgr.clone(), opts);
    mgr.register_tracker(cm.tracker());
    (mgr, cm)
}

fn request(cm: &mut CompositionManager, src: &LayerStack) -> Option<CompositionId> {
    cm.request_composition(src, 16, 16, PixelFormat::Argb8888, Compression::None, CostKind::Power)
}

#[test]
fn identical_requests_return_the_same_composition_without_evaluating() {
    let (_, mut cm) = manager(&CompositorOpts::default());
    let (c, counters) = Scripted::new("a", 10.0);
    cm.add(Box::new(c));

    let first = request(&mut cm, &source(1)).expect("supported");
    let evaluations = Counters::get(&counters.evaluations);
    let second = request(&mut cm, &source(1)).expect("supported");

    assert_eq!(first, second);
    assert_eq!(Counters::get(&counters.evaluations), evaluations);
    assert_eq!(cm.stats().hits, 1);
    assert_eq!(cm.stats().misses, 1);
}

#[test]
fn new_buffers_with_same_geometry_reuse_the_entry() {
    let (_, mut cm) = manager(&CompositorOpts::default());
    let (c, _) = Scripted::new("a", 10.0);
    cm.add(Box::new(c));

    let first = request(&mut cm, &source(1)).expect("supported");
    cm.on_end_of_frame();
    let second = request(&mut cm, &source(2)).expect("supported");
    assert_eq!(first, second);
    let src = cm.composition(first).expect("cached").source();
    assert_eq!(src.layer(0).handle, Some(BufferHandle(2)));
}

#[test]
fn claimed_entries_are_not_shared_with_other_buffers() {
    let (_, mut cm) = manager(&CompositorOpts::default());
    let (c, _) = Scripted::new("a", 10.0);
    cm.add(Box::new(c));

    let first = request(&mut cm, &source(1)).expect("supported");
    cm.lock(first);
    let second = request(&mut cm, &source(2)).expect("supported");
    assert_ne!(first, second);
    let src = cm.composition(first).expect("cached").source();
    assert_eq!(src.layer(0).handle, Some(BufferHandle(1)));
    // The same buffers still hit their own entries.
    assert_eq!(request(&mut cm, &source(1)), Some(first));
    assert_eq!(request(&mut cm, &source(2)), Some(second));

    // Used this frame counts as claimed even without a lock.
    let third = request(&mut cm, &source(3)).expect("supported");
    assert_ne!(third, first);
    assert_ne!(third, second);
    assert_eq!(cm.cached(), 3);
}

#[test]
fn sources_with_a_just_freed_buffer_are_not_cached() {
    let (_, mut cm) = manager(&CompositorOpts::default());
    let (c, _) = Scripted::new("a", 10.0);
    cm.add(Box::new(c));

    cm.notify_buffer_free(BufferHandle(7));
    cm.on_end_of_frame();

    let a = request(&mut cm, &source(7)).expect("supported");
    let b = request(&mut cm, &source(7)).expect("supported");
    assert_ne!(a, b);
    assert!(!cm.composition(a).expect("one-off").is_cacheable());
    assert_eq!(cm.stats().hits, 0);
    let cached = request(&mut cm, &source(8)).expect("supported");
    assert!(cm.composition(cached).expect("cached").is_cacheable());

    cm.lock(b);
    cm.on_end_of_frame();
    assert!(cm.composition(a).is_none());
    assert!(cm.composition(b).is_some(), "locked one-off entries stay");
    assert!(cm.composition(cached).is_some());

    // Only the frame right after the free is affected.
    cm.unlock(b);
    cm.on_end_of_frame();
    assert!(cm.composition(b).is_none());
    let later = request(&mut cm, &source(7)).expect("supported");
    assert!(cm.composition(later).expect("cached").is_cacheable());
}

#[test]
fn lowest_cost_wins_and_ties_go_to_the_first_registered() {
    let (_, mut cm) = manager(&CompositorOpts::default());
    let (a, _) = Scripted::new("a", 10.0);
    let (b, _) = Scripted::new("b", 5.0);
    let (c, _) = Scripted::new("c", 5.0);
    cm.add(Box::new(a));
    cm.add(Box::new(b));
    cm.add(Box::new(c));

    let id = request(&mut cm, &source(1)).expect("supported");
    let entry = cm.composition(id).expect("cached");
    assert_eq!(entry.composer_name(), "b");
    assert_eq!(entry.slot(), ComposerSlot::Registered(1));
    assert_eq!(entry.cost(), Cost(5.0));
}

#[test]
fn unsupported_request_returns_none() {
    let (_, mut cm) = manager(&CompositorOpts::default());
    assert!(request(&mut cm, &source(1)).is_none());
}

#[test]
fn compressions_are_tried_most_compressed_first() {
    let (_, mut cm) = manager(&CompositorOpts::default());
    let (mut c, _) = Scripted::new("plain", 1.0);
    c.compressed_ok = false;
    cm.add(Box::new(c));

    let order = [Compression::RenderClear, Compression::Render, Compression::None];
    let id = cm
        .request_with_compressions(&source(1), 16, 16, PixelFormat::Argb8888, &order, CostKind::Power)
        .expect("uncompressed works");
    assert_eq!(cm.composition(id).expect("cached").spec().compression, Compression::None);

    let none = cm.request_with_compressions(
        &source(1),
        16,
        16,
        PixelFormat::Argb8888,
        &order[..2],
        CostKind::Power,
    );
    assert!(none.is_none());
}

#[test]
fn freeing_an_unknown_buffer_is_a_no_op() {
    let (_, mut cm) = manager(&CompositorOpts::default());
    let (c, _) = Scripted::new("a", 1.0);
    cm.add(Box::new(c));
    let id = request(&mut cm, &source(1)).expect("supported");

    cm.notify_buffer_free(BufferHandle(999));
    cm.on_end_of_frame();
    assert!(cm.composition(id).expect("cached").is_valid());
    assert_eq!(cm.stats().invalidations, 0);
}

#[test]
fn freed_source_buffer_invalidates_even_locked_entries() {
    let (_, mut cm) = manager(&CompositorOpts::default());
    let (c, _) = Scripted::new("a", 1.0);
    cm.add(Box::new(c));
    let id = request(&mut cm, &source(1)).expect("supported");
    assert_eq!(cm.lock(id), 1);

    cm.notify_buffer_free(BufferHandle(1));
    cm.on_end_of_frame();

    let entry = cm.composition(id).expect("locked entries are kept");
    assert!(!entry.is_valid());
    assert!(!cm.acquire(id));
    let fresh = request(&mut cm, &source(1)).expect("re-evaluated");
    assert_ne!(fresh, id);

    assert_eq!(cm.unlock(id), 0);
    cm.on_end_of_frame();
    assert!(cm.composition(id).is_none());
}

#[test]
fn freed_target_buffer_invalidates_the_entry() {
    let (mgr, mut cm) = manager(&CompositorOpts::default());
    let (c, _) = Scripted::new("a", 1.0);
    cm.add(Box::new(c));
    let id = request(&mut cm, &source(1)).expect("supported");
    assert!(cm.acquire(id));
    cm.lock(id);
    let target = cm.target(id).and_then(|l| l.handle).expect("allocated");

    mgr.destroy_buffer(target);
    cm.on_end_of_frame();
    let entry = cm.composition(id).expect("locked");
    assert!(!entry.is_valid());
    assert_eq!(entry.target().handle, None);
}

#[test]
fn acquire_compose_release_round_trip() {
    let (mgr, mut cm) = manager(&CompositorOpts::default());
    let (c, counters) = Scripted::new("a", 1.0);
    cm.add(Box::new(c));
    let id = request(&mut cm, &source(1)).expect("supported");

    assert!(cm.compose(id).is_err(), "compose before acquire");
    assert!(cm.acquire(id));
    let handle = cm.target(id).and_then(|l| l.handle).expect("allocated");
    assert_eq!(mgr.get_tag(handle).as_deref(), Some(format!("composition-{}", id.0).as_str()));

    assert!(cm.compose(id).expect("composed").is_none());
    // Nothing changed: skipped.
    cm.compose(id).expect("composed");
    assert_eq!(Counters::get(&counters.composed), 1);

    cm.release(id);
    assert_eq!(Counters::get(&counters.released), 1);
    assert!(!cm.composition(id).expect("cached").is_acquired());

    // A new buffer next frame needs a new compose.
    cm.on_end_of_frame();
    assert_eq!(request(&mut cm, &source(2)), Some(id));
    assert!(cm.acquire(id));
    cm.compose(id).expect("composed");
    assert_eq!(Counters::get(&counters.composed), 2);
}

#[test]
fn failed_target_allocation_releases_the_composer() {
    let opts = CompositorOpts::default();
    let mgr = Arc::new(MemoryBufferManager::with_budget(64));
    let mut cm = CompositionManager::new(mgr.clone(), &opts);
    let (c, counters) = Scripted::new("a", 1.0);
    cm.add(Box::new(c));
    let id = request(&mut cm, &source(1)).expect("supported");

    assert!(!cm.acquire(id));
    assert_eq!(Counters::get(&counters.acquired), 1);
    assert_eq!(Counters::get(&counters.released), 1);
    assert!(!cm.composition(id).expect("cached").is_acquired());
}

#[test]
fn failed_composer_acquire_reports_false() {
    let (_, mut cm) = manager(&CompositorOpts::default());
    let (mut c, counters) = Scripted::new("a", 1.0);
    c.acquire_ok = false;
    cm.add(Box::new(c));
    let id = request(&mut cm, &source(1)).expect("supported");
    assert!(!cm.acquire(id));
    assert_eq!(Counters::get(&counters.released), 0);
}

#[test]
fn idle_unlocked_entries_are_evicted_and_targets_destroyed() {
    let opts = CompositorOpts {
        idle_eviction_frames: 2,
        ..CompositorOpts::default()
    };
    let (mgr, mut cm) = manager(&opts);
    let (c, _) = Scripted::new("a", 1.0);
    cm.add(Box::new(c));
    let id = request(&mut cm, &source(1)).expect("supported");
    assert!(cm.acquire(id));
    cm.release(id);
    let target = cm.target(id).and_then(|l| l.handle).expect("allocated");

    // Used in frame 0, idle through frames 1 and 2.
    cm.on_end_of_frame();
    cm.on_end_of_frame();
    assert!(cm.composition(id).is_some());
    cm.on_end_of_frame();
    assert!(cm.composition(id).is_none());
    assert!(mgr.query_details(target).is_none());
    assert_eq!(cm.stats().evictions, 1);
    // The manager's own free comes back as a no-op.
    cm.on_end_of_frame();
    assert_eq!(cm.stats().invalidations, 0);
}

#[test]
fn perform_composition_acquires_composes_and_releases() {
    let (_, mut cm) = manager(&CompositorOpts::default());
    let (c, counters) = Scripted::new("a", 1.0);
    cm.add(Box::new(c));
    let target = Layer::target(16, 16, PixelFormat::Argb8888, Compression::None);

    assert!(cm.perform_composition(&source(1), &target).expect("no error"));
    assert_eq!(Counters::get(&counters.composed), 1);
    assert_eq!(Counters::get(&counters.released), 1);
    assert_eq!(cm.cached(), 0);
}

#[test]
fn perform_composition_without_composers_is_false() {
    let (_, mut cm) = manager(&CompositorOpts::default());
    let target = Layer::target(16, 16, PixelFormat::Argb8888, Compression::None);
    assert!(!cm.perform_composition(&source(1), &target).expect("no error"));
}
