//! Composition strategies.
//!
//! A [`Composer`] answers two questions for a `(source stack, target)` pair: how much would it
//! cost, and can it actually do it. The [`crate::CompositionManager`] asks every registered
//! composer and keeps the cheapest.

pub(crate) mod cpu;
pub(crate) mod fallback;
pub(crate) mod partition;
pub(crate) mod partitioned;

use crate::foundation::core::CostKind;
use crate::foundation::error::LayercompResult;
use crate::foundation::fence::ComposeOutcome;
use crate::layer::model::Layer;
use crate::layer::stack::LayerStack;

/// Estimated cost of a composition in the unit of the requested [`CostKind`].
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, serde::Serialize)]
pub struct Cost(pub f64);

impl Cost {
    /// Largest finite cost; a supported but discouraged composition.
    pub const MAX: Cost = Cost(f32::MAX as f64);
    /// Smallest cost; the composition is free for this metric.
    pub const MIN: Cost = Cost(0.0);
}

/// Outcome of [`Composer::on_evaluate`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Evaluation {
    /// The composer can perform the composition at this cost.
    Cost(Cost),
    /// The composer declines. Not an error.
    NotSupported,
}

impl Evaluation {
    /// Cost when supported.
    pub fn cost(self) -> Option<Cost> {
        match self {
            Self::Cost(c) => Some(c),
            Self::NotSupported => None,
        }
    }

    /// Return `true` when the composer accepted the request.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Cost(_))
    }
}

/// Backend resource reserved by [`Composer::on_acquire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceHandle(pub u64);

/// A pluggable composition backend.
///
/// Calls arrive on the frame thread in the order evaluate, acquire, compose, release.
/// `on_evaluate` has no persistent side effects. Every successful `on_acquire` is paired
/// with exactly one `on_release`.
pub trait Composer: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Feasibility and cost of composing `source` into `target`.
    fn on_evaluate(&self, source: &LayerStack, target: &Layer, kind: CostKind) -> Evaluation;

    /// Reserve the backend resources for a composition, `None` on failure.
    fn on_acquire(&mut self, source: &LayerStack, target: &Layer) -> Option<ResourceHandle>;

    /// Compose `source` into `target`.
    ///
    /// Implementations wait on every source's acquire fence before reading its pixels.
    fn on_compose(
        &mut self,
        source: &LayerStack,
        target: &Layer,
        resource: ResourceHandle,
    ) -> LayercompResult<ComposeOutcome>;

    /// Release what `on_acquire` reserved.
    fn on_release(&mut self, resource: ResourceHandle);

    /// Target owned by the composer itself, if it does not render into a manager-allocated
    /// buffer.
    fn target(&self, _resource: ResourceHandle) -> Option<&Layer> {
        None
    }
}

#[cfg(test)]
#[path = "../../tests/unit/composer/mod.rs"]
mod tests;
