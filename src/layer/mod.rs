pub(crate) mod content;
pub(crate) mod model;
pub(crate) mod stack;
