// Domain layer: extraction/aggregate models and ports (interfaces) to persistence.

pub mod extraction;
pub mod model;
pub mod ports;
