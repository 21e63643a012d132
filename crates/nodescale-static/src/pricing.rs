//! Pricing from per-hour catalog prices.

use std::collections::BTreeMap;
use std::time::Duration;

use nodescale_core::{CloudError, CloudResult, MachineType, PricingModel};

const SECS_PER_HOUR: f64 = 3600.0;

/// Prices one node as `price_per_hour × hours`.
#[derive(Debug, Clone, Default)]
pub struct CatalogPricing {
    per_hour: BTreeMap<String, f64>,
}

impl CatalogPricing {
    /// Machine types without a price are left out.
    pub fn from_catalog(catalog: &[MachineType]) -> Self {
        let per_hour = catalog
            .iter()
            .filter_map(|m| m.price_per_hour.map(|price| (m.name.clone(), price)))
            .collect();
        Self { per_hour }
    }

    pub fn is_empty(&self) -> bool {
        self.per_hour.is_empty()
    }
}

impl PricingModel for CatalogPricing {
    fn node_price(&self, machine_type: &str, duration: Duration) -> CloudResult<f64> {
        let per_hour = self
            .per_hour
            .get(machine_type)
            .ok_or_else(|| CloudError::NotFound(format!("no price for machine type {machine_type}")))?;
        Ok(per_hour * duration.as_secs_f64() / SECS_PER_HOUR)
    }
}
