//! Domain logic - pure version rules independent of git and the network

pub mod branch;
pub mod constraint;
pub mod stability;
pub mod version;

pub use branch::BranchCandidates;
pub use constraint::{Bound, Constraint, Op};
pub use stability::{Stability, StabilityPolicy};
pub use version::{ReleaseType, Version, EPOCH, NEW_SCHEME_MINOR};
