//! Backend selection
//!
//! Maps configured backend names to ComputeBackend implementations.

use std::sync::Arc;

use crate::config::BackendSettings;
use crate::error::{Error, Result};
use crate::function::FunctionCatalog;

use super::{ComputeBackend, LocalBackend, MockBackend, ProcessBackend};

// ─────────────────────────────────────────────────────────────────
// Backend Type
// ─────────────────────────────────────────────────────────────────

/// Supported backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendType {
    /// Worker threads inside this process
    Local,
    /// One worker process per activation
    Process,
    /// Simulated platform (for testing)
    Mock,
}

impl BackendType {
    /// Get all backend types
    pub fn all() -> &'static [BackendType] {
        &[BackendType::Local, BackendType::Process, BackendType::Mock]
    }

    /// Get the backend name
    pub fn name(&self) -> &'static str {
        match self {
            BackendType::Local => "local",
            BackendType::Process => "process",
            BackendType::Mock => "mock",
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "local" => Some(BackendType::Local),
            "process" => Some(BackendType::Process),
            "mock" => Some(BackendType::Mock),
            _ => None,
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ─────────────────────────────────────────────────────────────────
// Backend Factory
// ─────────────────────────────────────────────────────────────────

/// Factory for creating backends
pub struct BackendFactory;

impl BackendFactory {
    /// Create the backend named in `settings`
    pub fn from_settings(
        settings: &BackendSettings,
        catalog: Arc<FunctionCatalog>,
    ) -> Result<Arc<dyn ComputeBackend>> {
        let backend_type = BackendType::from_str(&settings.kind).ok_or_else(|| {
            Error::config_field_invalid(
                "backend.kind",
                format!(
                    "unknown backend '{}' (expected one of: {})",
                    settings.kind,
                    BackendType::all()
                        .iter()
                        .map(BackendType::name)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )
        })?;
        Self::create(backend_type, settings, catalog)
    }

    /// Create a backend of the specified type
    pub fn create(
        backend_type: BackendType,
        settings: &BackendSettings,
        catalog: Arc<FunctionCatalog>,
    ) -> Result<Arc<dyn ComputeBackend>> {
        let backend: Arc<dyn ComputeBackend> = match backend_type {
            BackendType::Local => Arc::new(LocalBackend::new(catalog, settings.local_workers)),
            BackendType::Process => match &settings.process_command {
                Some(command) => {
                    let program = shellexpand::tilde(command).into_owned();
                    Arc::new(ProcessBackend::new(program, settings.process_args.clone()))
                }
                None => Arc::new(ProcessBackend::current_exe()?),
            },
            BackendType::Mock => Arc::new(MockBackend::with_config(Default::default(), catalog)),
        };

        tracing::info!(backend = %backend_type, "Backend selected");
        Ok(backend)
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
