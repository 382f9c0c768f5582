// Aggregates the transport, challenge detection and resolver layers used to get past bot walls.

pub mod core;
pub mod detectors;
pub mod resolvers;
