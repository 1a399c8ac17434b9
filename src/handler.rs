//! Worker-side task handler
//!
//! Decodes a payload, runs the named function and encodes a [`TaskResult`].
//! User exceptions and panics become tagged errors in the result; they never
//! fail the activation itself.

use std::panic::{self, AssertUnwindSafe};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::Result;
use crate::function::FunctionCatalog;
use crate::types::{TaskPayload, TaskResult};

/// Execute one encoded payload and return the encoded result
pub fn execute_payload(catalog: &FunctionCatalog, bytes: &[u8]) -> Vec<u8> {
    run_payload(catalog, bytes).to_bytes()
}

/// Execute one encoded payload
pub fn run_payload(catalog: &FunctionCatalog, bytes: &[u8]) -> TaskResult {
    let payload: TaskPayload = match serde_json::from_slice(bytes) {
        Ok(payload) => payload,
        Err(e) => return TaskResult::error("payload", format!("undecodable payload: {}", e)),
    };

    let Some(function) = catalog.get(&payload.function) else {
        return TaskResult::error(
            "function_not_found",
            format!("function '{}' is not registered on this worker", payload.function),
        );
    };

    tracing::debug!(
        job_id = %payload.job_id,
        task = payload.index,
        function = %payload.function,
        "Running task"
    );

    let TaskPayload { data, args, .. } = payload;
    match panic::catch_unwind(AssertUnwindSafe(|| function.call(data, &args))) {
        Ok(Ok(value)) => TaskResult::ok(value),
        Ok(Err(message)) => TaskResult::error("user", message),
        Err(panic) => TaskResult::error("panic", panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "function panicked".to_string()
    }
}

/// Read one payload from stdin, write its result to stdout
///
/// This is the entry point the process backend launches.
pub async fn serve_stdio(catalog: &FunctionCatalog) -> Result<()> {
    let mut input = Vec::new();
    tokio::io::stdin().read_to_end(&mut input).await?;

    let output = execute_payload(catalog, &input);

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&output).await?;
    stdout.flush().await?;
    Ok(())
}
