//! Job execution
//!
//! Everything between a caller request and its ordered result:
//! - task lifecycle state machine and job/task records
//! - invocation dispatcher bounding activations in flight
//! - job monitor resolving activations
//! - result collection and the executor façade

mod collector;
mod dispatcher;
mod machine;
mod monitor;
mod runner;
mod state;

pub use collector::*;
pub use dispatcher::*;
pub use machine::*;
pub use monitor::*;
pub use runner::*;
pub use state::*;
