//! Trace pipeline: parsing tracer event lines and attributing filesystem
//! accesses to containers.

pub mod attributor;
pub mod event;
