//! Provider tunables and the bounded-call helper.

use std::future::Future;
use std::time::Duration;

use nodescale_core::config::{DEFAULT_GROUP_LABEL, ProviderSection};
use nodescale_core::{CloudError, CloudResult};

/// Settings for a managed provider.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// Upper bound on any single backend call.
    pub operation_timeout: Duration,
    /// Node label naming the owning group.
    pub group_label: String,
    /// Max size given to theoretical groups.
    pub autoprovisioned_max_size: usize,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(30),
            group_label: DEFAULT_GROUP_LABEL.to_string(),
            autoprovisioned_max_size: 100,
        }
    }
}

impl ProviderOptions {
    pub fn from_section(section: &ProviderSection) -> Self {
        Self {
            operation_timeout: Duration::from_secs(section.operation_timeout_secs),
            group_label: section.group_label.clone(),
            autoprovisioned_max_size: section.autoprovisioned_max_size,
        }
    }

    /// Builder method: set the backend call timeout.
    pub fn with_operation_timeout(self, timeout: Duration) -> Self {
        Self {
            operation_timeout: timeout,
            ..self
        }
    }
}

/// Run a backend call, turning an elapsed timeout into `Transient`.
pub(crate) async fn bounded<T>(
    timeout: Duration,
    operation: &str,
    call: impl Future<Output = CloudResult<T>>,
) -> CloudResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(CloudError::Transient(format!(
            "{operation} timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}
