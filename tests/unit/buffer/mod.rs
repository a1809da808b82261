use super::*;

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(bool, BufferHandle)>>,
}

impl BufferTracker for Recorder {
    fn notify_buffer_alloc(&self, handle: BufferHandle) {
        self.events.lock().unwrap().push((true, handle));
    }
    fn notify_buffer_free(&self, handle: BufferHandle) {
        self.events.lock().unwrap().push((false, handle));
    }
}

#[test]
fn trackers_see_alloc_and_free() {
    let mgr = MemoryBufferManager::new();
    let rec = Arc::new(Recorder::default());
    mgr.register_tracker(rec.clone());
    let h = mgr
        .create_buffer("t", 4, 4, PixelFormat::Abgr8888, BufferUsage::RenderTarget)
        .unwrap();
    mgr.destroy_buffer(h);
    mgr.destroy_buffer(h);
    assert_eq!(*rec.events.lock().unwrap(), vec![(true, h), (false, h)]);
}

#[test]
fn details_and_tags_follow_the_buffer() {
    let mgr = MemoryBufferManager::new();
    let h = mgr
        .create_buffer("a", 3, 2, PixelFormat::Argb8888, BufferUsage::Source)
        .unwrap();
    let d = mgr.query_details(h).unwrap();
    assert_eq!((d.width, d.height, d.stride), (3, 2, 12));
    assert!(!d.purged);
    mgr.set_tag(h, "b");
    assert_eq!(mgr.get_tag(h).as_deref(), Some("b"));
    assert!(mgr.query_details(BufferHandle(999)).is_none());
}

#[test]
fn purge_and_realize_toggle_backing_store() {
    let mgr = MemoryBufferManager::new();
    let h = mgr
        .create_purged_buffer("blank", 2, 2, PixelFormat::Abgr8888)
        .unwrap();
    assert!(mgr.read_pixels(h).is_err());
    assert_eq!(mgr.stats().live_bytes, 0);
    mgr.realize(h);
    assert_eq!(mgr.read_pixels(h).unwrap(), vec![0; 16]);
    mgr.purge(h);
    assert!(mgr.query_details(h).unwrap().purged);
    assert_eq!(mgr.stats().live_bytes, 0);
}

#[test]
fn budget_refuses_oversized_allocations() {
    let mgr = MemoryBufferManager::with_budget(64);
    assert!(
        mgr.create_buffer("ok", 4, 4, PixelFormat::Abgr8888, BufferUsage::Source)
            .is_ok()
    );
    let err = mgr
        .create_buffer("big", 4, 4, PixelFormat::Abgr8888, BufferUsage::Source)
        .unwrap_err();
    assert!(matches!(err, LayercompError::Allocation(_)));
    assert_eq!(mgr.stats().refused, 1);
}

#[test]
fn reallocate_frees_the_old_handle() {
    let mgr = MemoryBufferManager::new();
    let rec = Arc::new(Recorder::default());
    let h = mgr
        .create_buffer("rt", 2, 2, PixelFormat::Abgr8888, BufferUsage::RenderTarget)
        .unwrap();
    mgr.register_tracker(rec.clone());
    let h2 = mgr
        .reallocate_buffer(h, 8, 8, PixelFormat::Abgr8888, BufferUsage::RenderTarget)
        .unwrap();
    assert_ne!(h, h2);
    assert!(mgr.query_details(h).is_none());
    assert_eq!(mgr.get_tag(h2).as_deref(), Some("rt"));
    assert_eq!(*rec.events.lock().unwrap(), vec![(false, h), (true, h2)]);
}

#[test]
fn write_pixels_checks_length() {
    let mgr = MemoryBufferManager::new();
    let h = mgr
        .create_filled("src", 1, 1, PixelFormat::Abgr8888, &[1, 2, 3, 4])
        .unwrap();
    assert_eq!(mgr.read_pixels(h).unwrap(), vec![1, 2, 3, 4]);
    assert!(mgr.write_pixels(h, &[0; 3]).is_err());
}
