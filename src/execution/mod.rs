//! Execution Engine Module
//!
//! Moves routed files into the destination tree with a bounded pool of
//! blocking workers. Destination directories are guarded per path; the
//! audit log has its own lock.

pub mod audit;
pub mod locks;
pub mod mover;

pub use audit::*;
pub use locks::*;
pub use mover::*;
