//! Runtime service entry point.

use crate::backend::{BackendSettings, QpuBackend};
use crate::error::{BackendError, BackendResult};

/// Factory for configured backends.
///
/// Currently only the `"qpu"` backend exists; simulator backends would be
/// added here.
#[derive(Debug, Clone, Default)]
pub struct RuntimeService {
    settings: BackendSettings,
}

impl RuntimeService {
    /// Service with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Service handing out backends built from `settings`.
    pub fn with_settings(settings: BackendSettings) -> Self {
        Self { settings }
    }

    /// Request a backend by name.
    pub fn backend(&self, name: &str) -> BackendResult<QpuBackend> {
        match name {
            "qpu" => QpuBackend::new(self.settings.clone()),
            other => Err(BackendError::UnknownBackend(other.to_string())),
        }
    }
}
