use std::path::Path;
use std::time::Duration;

use crate::foundation::core::CostKind;
use crate::foundation::error::{LayercompError, LayercompResult};

/// Options controlling a [`crate::Compositor`] and the components it owns.
///
/// Every field has a default, so a JSON file only needs the values it changes.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CompositorOpts {
    /// Frames an unlocked cached composition may go unused before it is evicted.
    pub idle_eviction_frames: u64,
    /// Bound on every acquire-fence wait, in milliseconds.
    pub fence_timeout_ms: u64,
    /// Layers the host compositor boundary passes through before folding the rest into
    /// its render target.
    pub max_layers: usize,
    /// Update rate assumed for render targets.
    pub default_fps: f32,
    /// Allow the partitioned composer to compose video into a video target.
    pub partition_video: bool,
    /// Metric used to choose between composers.
    pub cost: CostKind,
    /// Frames an unused blank buffer is kept before it is destroyed.
    pub blank_buffer_max_age: u64,
    /// Transparent-layer detection.
    pub transparency: TransparencyOpts,
}

impl Default for CompositorOpts {
    fn default() -> Self {
        Self {
            idle_eviction_frames: 4,
            fence_timeout_ms: 1000,
            max_layers: 64,
            default_fps: 60.0,
            partition_video: true,
            cost: CostKind::Power,
            blank_buffer_max_age: 10,
            transparency: TransparencyOpts::default(),
        }
    }
}

/// Options for the transparency detection filter.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TransparencyOpts {
    /// Run detection at all.
    pub enabled: bool,
    /// Frames a buffer must repeat before the first check.
    pub frames_before_check: u32,
    /// Frames between repeated checks of a layer found not transparent.
    pub frames_before_check_delta: u32,
    /// Layers checked per display.
    pub max_detect_layers: usize,
}

impl Default for TransparencyOpts {
    fn default() -> Self {
        Self {
            enabled: true,
            frames_before_check: 30,
            frames_before_check_delta: 10,
            max_detect_layers: 4,
        }
    }
}

impl CompositorOpts {
    /// Parse options from JSON and validate them.
    pub fn from_json_str(json: &str) -> LayercompResult<Self> {
        let opts: Self = serde_json::from_str(json)
            .map_err(|e| LayercompError::config(format!("invalid options json: {e}")))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Read options from a JSON file.
    pub fn from_path(path: &Path) -> LayercompResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LayercompError::config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Apply `LAYERCOMP_*` environment overrides. Unparsable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(n) = std::env::var("LAYERCOMP_IDLE_EVICTION_FRAMES")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&n| n > 0)
        {
            self.idle_eviction_frames = n;
        }
        if let Some(ms) = std::env::var("LAYERCOMP_FENCE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&n| n > 0)
        {
            self.fence_timeout_ms = ms;
        }
        if let Some(b) = std::env::var("LAYERCOMP_PARTITION_VIDEO")
            .ok()
            .and_then(|v| parse_bool(&v))
        {
            self.partition_video = b;
        }
        self
    }

    /// Reject option combinations no component can work with.
    pub fn validate(&self) -> LayercompResult<()> {
        // Zero would evict every unlocked entry at the end of the frame that created it.
        if self.idle_eviction_frames == 0 {
            return Err(LayercompError::config("idle_eviction_frames must be > 0"));
        }
        if self.fence_timeout_ms == 0 {
            return Err(LayercompError::config("fence_timeout_ms must be > 0"));
        }
        if self.max_layers == 0 {
            return Err(LayercompError::config("max_layers must be > 0"));
        }
        if !self.default_fps.is_finite() || self.default_fps <= 0.0 {
            return Err(LayercompError::config("default_fps must be finite and > 0"));
        }
        if self.transparency.max_detect_layers == 0 && self.transparency.enabled {
            return Err(LayercompError::config(
                "transparency.max_detect_layers must be > 0 when detection is enabled",
            ));
        }
        Ok(())
    }

    /// Fence wait bound as a [`Duration`].
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "../tests/unit/config.rs"]
mod tests;
