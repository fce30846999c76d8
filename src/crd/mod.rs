mod runtime_component;

pub use runtime_component::*;
