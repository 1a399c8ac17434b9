//! Compute backends
//!
//! This module provides the ComputeBackend abstraction the engine dispatches
//! through, and its implementations.

mod traits;
mod registry;
mod local;
mod mock;
mod process;

pub use traits::*;
pub use registry::*;
pub use local::LocalBackend;
pub use mock::{MockBackend, MockBehavior, MockConfig, MockRejection};
pub use process::ProcessBackend;
