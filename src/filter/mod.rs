//! Per-frame content filters.
//!
//! Filters run in a fixed order once per frame. Each one inspects the content by reference
//! and only materialises an owned copy when it changes something.

pub(crate) mod empty;
pub(crate) mod transparency;

use std::borrow::Cow;

use crate::layer::content::Content;

/// Ordering slot of a filter in the chain. Lower positions run first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterPosition {
    /// Give empty displays something to show.
    Empty,
    /// Drop layers known to be fully transparent.
    Transparency,
    /// Fold unsupported layers into the host compositor's render target.
    HostCompositor,
    /// Filters expecting support-normalised input.
    Planes,
}

/// One step of the per-frame content filter chain.
pub trait Filter: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Slot in the chain.
    fn position(&self) -> FilterPosition;

    /// Return the content this filter wants downstream consumers to see.
    ///
    /// Return [`Cow::Borrowed`] when nothing changes.
    fn on_apply<'a>(&mut self, content: &'a Content) -> Cow<'a, Content>;
}

/// Ordered collection of filters.
#[derive(Default)]
pub struct FilterManager {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterManager {
    /// Empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter. Filters sharing a position run in the order they were added.
    pub fn add(&mut self, filter: Box<dyn Filter>) {
        let at = self
            .filters
            .iter()
            .position(|f| f.position() > filter.position())
            .unwrap_or(self.filters.len());
        tracing::debug!(filter = filter.name(), position = ?filter.position(), "filter added");
        self.filters.insert(at, filter);
    }

    /// Number of owned filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Return `true` when no filters are owned.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run the chain over `content`.
    ///
    /// `injected` filters are owned elsewhere; they run at their own positions, after owned
    /// filters of the same position.
    pub fn apply<'a>(
        &mut self,
        content: &'a Content,
        injected: &mut [&mut dyn Filter],
    ) -> Cow<'a, Content> {
        let mut order: Vec<(FilterPosition, bool, usize)> = self
            .filters
            .iter()
            .enumerate()
            .map(|(i, f)| (f.position(), false, i))
            .chain(
                injected
                    .iter()
                    .enumerate()
                    .map(|(i, f)| (f.position(), true, i)),
            )
            .collect();
        order.sort();

        let mut current: Cow<'a, Content> = Cow::Borrowed(content);
        for (_, is_injected, i) in order {
            let filter: &mut dyn Filter = if is_injected {
                &mut *injected[i]
            } else {
                self.filters[i].as_mut()
            };
            let changed = match filter.on_apply(&current) {
                Cow::Borrowed(_) => None,
                Cow::Owned(c) => Some(c),
            };
            if let Some(c) = changed {
                tracing::trace!(filter = filter.name(), "filter modified content");
                current = Cow::Owned(c);
            }
        }
        current
    }
}

#[cfg(test)]
#[path = "../../tests/unit/filter/mod.rs"]
mod tests;
