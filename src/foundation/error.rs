/// Convenience result type used across layercomp.
pub type LayercompResult<T> = Result<T, LayercompError>;

/// Top-level error taxonomy used by composition APIs.
///
/// A composer declining a request is not an error; see [`crate::Evaluation::NotSupported`].
#[derive(thiserror::Error, Debug)]
pub enum LayercompError {
    /// Invalid caller-provided data (geometry, indices, configuration values).
    #[error("validation error: {0}")]
    Validation(String),

    /// The buffer manager could not produce or reallocate a buffer.
    #[error("allocation failure: {0}")]
    Allocation(String),

    /// A producer-ready wait exceeded its bound.
    #[error("fence timeout after {timeout_ms}ms waiting for {label}")]
    FenceTimeout {
        /// What was being waited on.
        label: String,
        /// The bound that was exceeded.
        timeout_ms: u64,
    },

    /// A display has no valid output for the frame.
    #[error("display error: {0}")]
    Display(String),

    /// A renderer backend failed while composing.
    #[error("render error: {0}")]
    Render(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("config error: {0}")]
    Config(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LayercompError {
    /// Build a [`LayercompError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`LayercompError::Allocation`] value.
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    /// Build a [`LayercompError::Display`] value.
    pub fn display(msg: impl Into<String>) -> Self {
        Self::Display(msg.into())
    }

    /// Build a [`LayercompError::Render`] value.
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// Build a [`LayercompError::Config`] value.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Return `true` for errors that leave a display without output for the frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FenceTimeout { .. } | Self::Display(_))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
