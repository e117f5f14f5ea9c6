//! Repository layer: entity-scoped database operations.

mod health_record;

pub use health_record::*;
