pub(crate) mod core;
pub(crate) mod error;
pub(crate) mod fence;
pub(crate) mod geometry;
pub(crate) mod math;
