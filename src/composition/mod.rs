//! Cached compositions and the manager that selects composers for them.

pub(crate) mod entry;
pub(crate) mod manager;
