use super::*;
use crate::foundation::core::{BufferHandle, PixelFormat};
use crate::foundation::geometry::IRect;

#[test]
fn json_content_is_settled_after_load() {
    let json = r#"{
        "displays": [{
            "width": 64,
            "height": 32,
            "layers": { "layers": [{
                "handle": 1,
                "src": { "x0": 0.0, "y0": 0.0, "x1": 64.0, "y1": 32.0 },
                "dst": { "left": 0, "top": 0, "right": 64, "bottom": 32 },
                "format": "abgr8888",
                "flags": { "video": true }
            }] }
        }]
    }"#;
    let c = Content::from_json_str(json).unwrap();
    assert_eq!(c.len(), 1);
    let d = c.display(0);
    assert!(d.enabled);
    assert!(d.layer_stack().is_settled());
    assert!(d.layer_stack().is_video());
    assert_eq!(d.num_enabled_layers(), 1);
}

#[test]
fn invalid_json_is_a_validation_error() {
    let err = Content::from_json_str("{").unwrap_err();
    assert!(err.to_string().contains("validation error"));
}

#[test]
fn clone_is_independent_of_original() {
    let layer = Layer::new(BufferHandle(1), IRect::new(0, 0, 4, 4), PixelFormat::Abgr8888);
    let original = Content::new(vec![Display::new(4, 4, LayerStack::from_layers(vec![layer]))]);
    let mut copy = original.clone();
    copy.edit_display(0).edit_layer_stack().remove(0);
    copy.edit_display(0).edit_layer_stack().update_layer_flags();
    assert_eq!(original.display(0).layer_stack().len(), 1);
    assert!(copy.display(0).layer_stack().is_empty());
}
