//! Core engine types
//!
//! Jobs, tasks, partitions and the wire formats exchanged with workers.

mod job;
mod outcome;
mod partition;
mod task;

pub use job::*;
pub use outcome::*;
pub use partition::*;
pub use task::*;
