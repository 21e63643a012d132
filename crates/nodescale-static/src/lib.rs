//! nodescale-static: an in-process backend seeded from configuration.
//!
//! Simulates node pools without any infrastructure: resizes launch
//! instances that finish booting on the next listing, and node deletion and
//! pool creation can be switched off to model read-only environments.
//!
//! ```text
//! nodescale.toml ──▶ StaticBackend ──▶ ManagedProvider (CloudProvider)
//! ```

pub mod backend;
mod pool;
pub mod pricing;

use std::sync::Arc;

use nodescale_core::{CloudResult, NodescaleConfig};
use nodescale_provider::{ManagedProvider, ProviderOptions};

pub use backend::{BACKEND_NAME, StaticBackend};
pub use pricing::CatalogPricing;

/// Build a connected provider over a [`StaticBackend`].
pub async fn build_provider(config: &NodescaleConfig) -> CloudResult<ManagedProvider> {
    let backend = Arc::new(StaticBackend::from_config(config)?);
    ManagedProvider::connect(
        backend,
        Arc::new(config.resource_limiter()),
        ProviderOptions::from_section(&config.provider),
    )
    .await
}
