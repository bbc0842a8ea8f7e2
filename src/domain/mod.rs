// Domain layer - Core data types, no I/O
pub mod cycle;
pub mod device;
pub mod metadata;
pub mod snapshot;
pub mod status;
