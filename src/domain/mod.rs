//! Store domain: aggregates, value objects, events and pricing rules
pub mod aggregates;
pub mod events;
pub mod services;
pub mod value_objects;
