use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        LayercompError::validation("x")
            .to_string()
            .contains("validation error:")
    );
    assert!(
        LayercompError::allocation("x")
            .to_string()
            .contains("allocation failure:")
    );
    assert!(
        LayercompError::display("x")
            .to_string()
            .contains("display error:")
    );
    assert!(LayercompError::render("x").to_string().contains("render error:"));
    assert!(LayercompError::config("x").to_string().contains("config error:"));
}

#[test]
fn fence_timeout_names_the_wait() {
    let err = LayercompError::FenceTimeout {
        label: "layer 2".to_string(),
        timeout_ms: 16,
    };
    let s = err.to_string();
    assert!(s.contains("16ms"));
    assert!(s.contains("layer 2"));
    assert!(err.is_fatal());
    assert!(!LayercompError::allocation("x").is_fatal());
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = LayercompError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}
