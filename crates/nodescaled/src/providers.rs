//! Provider selection by `[provider] name`.

use anyhow::{Context, bail};
use tracing::info;

use nodescale_core::NodescaleConfig;
use nodescale_provider::ManagedProvider;

/// Backends this binary can build.
pub const KNOWN_PROVIDERS: &[&str] = &[nodescale_static::BACKEND_NAME];

/// Build and connect the provider named in the config.
pub async fn build(config: &NodescaleConfig) -> anyhow::Result<ManagedProvider> {
    let name = config.provider.name.as_str();
    let provider = match name {
        nodescale_static::BACKEND_NAME => nodescale_static::build_provider(config)
            .await
            .context("failed to build static provider")?,
        other => bail!(
            "unknown provider {other:?} (known: {})",
            KNOWN_PROVIDERS.join(", ")
        ),
    };
    info!(provider = %name, "provider ready");
    Ok(provider)
}
