//! Test support for arbor: deterministic storage faults and versioned
//! document fixtures.

pub mod fault_vfs;
pub mod fixtures;

pub use fault_vfs::{FaultHit, FaultInjectingVfs, FaultKind, FaultSpec, FaultState};
