//! fanout - serverless-style job execution engine
//!
//! Runs ordinary functions across many ephemeral compute workers:
//! input is split into partitions, each partition becomes an immutable task
//! payload, tasks are dispatched to a compute backend under a concurrency
//! cap, monitored through a retrying state machine and collected back in
//! input order.
//!
//! ```no_run
//! use std::sync::Arc;
//! use fanout::backend::LocalBackend;
//! use fanout::executor::{Executor, ExecutorConfig, MapOptions};
//! use fanout::function::FunctionCatalog;
//!
//! # async fn demo() -> fanout::error::Result<()> {
//! let catalog = Arc::new(FunctionCatalog::with_builtins());
//! let backend = Arc::new(LocalBackend::new(Arc::clone(&catalog), 0));
//! let executor = Executor::new(ExecutorConfig::default(), backend, catalog)?;
//!
//! let job = executor.map("square", vec![1, 2, 3, 4], MapOptions::default())?;
//! let squares: Vec<i64> = executor.get_result(&job).await?.values()?;
//! assert_eq!(squares, vec![1, 4, 9, 16]);
//! executor.clean(&job).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod function;
pub mod handler;
pub mod logging;
pub mod packager;
pub mod partition;
pub mod types;
pub mod version;

pub use error::{Error, Result};
