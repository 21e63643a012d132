//! Global bounds on aggregate resources across all node groups.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Inclusive min/max bound for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default)]
    pub min: u64,
    #[serde(default = "unbounded")]
    pub max: u64,
}

fn unbounded() -> u64 {
    u64::MAX
}

/// A resource total that falls outside its bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitViolation {
    Below { resource: String, total: u64, min: u64 },
    Above { resource: String, total: u64, max: u64 },
}

impl fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitViolation::Below { resource, total, min } => {
                write!(f, "{resource} total {total} is below minimum {min}")
            }
            LimitViolation::Above { resource, total, max } => {
                write!(f, "{resource} total {total} is above maximum {max}")
            }
        }
    }
}

/// Min/max limits for resources such as cores and memory, summed over
/// every node in the cluster.
///
/// The provider hands out a shared reference; nothing in this crate
/// mutates a limiter after construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimiter {
    bounds: BTreeMap<String, Bounds>,
}

impl ResourceLimiter {
    pub fn new(bounds: BTreeMap<String, Bounds>) -> Self {
        Self { bounds }
    }

    /// A limiter that bounds nothing.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Builder method: bound one resource.
    pub fn with_limit(mut self, resource: &str, min: u64, max: u64) -> Self {
        self.bounds.insert(resource.to_string(), Bounds { min, max });
        self
    }

    /// Minimum total for a resource, 0 when unbounded.
    pub fn min(&self, resource: &str) -> u64 {
        self.bounds.get(resource).map_or(0, |b| b.min)
    }

    /// Maximum total for a resource, `u64::MAX` when unbounded.
    pub fn max(&self, resource: &str) -> u64 {
        self.bounds.get(resource).map_or(u64::MAX, |b| b.max)
    }

    /// Names of all bounded resources.
    pub fn resources(&self) -> Vec<&str> {
        self.bounds.keys().map(String::as_str).collect()
    }

    /// Compare aggregate totals against every bound.
    ///
    /// A bounded resource missing from `totals` counts as 0.
    pub fn check(&self, totals: &BTreeMap<String, u64>) -> Vec<LimitViolation> {
        let mut violations = Vec::new();
        for (resource, bounds) in &self.bounds {
            let total = totals.get(resource).copied().unwrap_or(0);
            if total < bounds.min {
                violations.push(LimitViolation::Below {
                    resource: resource.clone(),
                    total,
                    min: bounds.min,
                });
            } else if total > bounds.max {
                violations.push(LimitViolation::Above {
                    resource: resource.clone(),
                    total,
                    max: bounds.max,
                });
            }
        }
        violations
    }
}

impl fmt::Display for ResourceLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mins: Vec<String> = self
            .bounds
            .iter()
            .map(|(r, b)| format!("{r}:{}", b.min))
            .collect();
        let maxs: Vec<String> = self
            .bounds
            .iter()
            .map(|(r, b)| format!("{r}:{}", b.max))
            .collect();
        write!(f, "min [{}], max [{}]", mins.join(" "), maxs.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> ResourceLimiter {
        ResourceLimiter::unbounded()
            .with_limit("cpu", 4, 64)
            .with_limit("memory", 0, 262_144)
    }

    #[test]
    fn unbounded_defaults() {
        let limiter = ResourceLimiter::unbounded();
        assert_eq!(limiter.min("cpu"), 0);
        assert_eq!(limiter.max("cpu"), u64::MAX);
        assert!(limiter.resources().is_empty());
    }

    #[test]
    fn reports_configured_bounds() {
        let limiter = limiter();
        assert_eq!(limiter.min("cpu"), 4);
        assert_eq!(limiter.max("memory"), 262_144);
        assert_eq!(limiter.resources(), vec!["cpu", "memory"]);
    }

    #[test]
    fn check_flags_totals_outside_bounds() {
        let totals = BTreeMap::from([("cpu".to_string(), 96), ("memory".to_string(), 1024)]);
        let violations = limiter().check(&totals);

        assert_eq!(
            violations,
            vec![LimitViolation::Above {
                resource: "cpu".to_string(),
                total: 96,
                max: 64,
            }]
        );
    }

    #[test]
    fn missing_total_counts_as_zero() {
        let violations = limiter().check(&BTreeMap::new());
        assert_eq!(violations.len(), 1);
        assert!(matches!(&violations[0], LimitViolation::Below { resource, .. } if resource == "cpu"));
    }

    #[test]
    fn display_lists_mins_and_maxes() {
        let text = ResourceLimiter::unbounded().with_limit("cpu", 1, 8).to_string();
        assert_eq!(text, "min [cpu:1], max [cpu:8]");
    }

    #[test]
    fn bounds_deserialize_with_defaults() {
        let bounds: Bounds = toml::from_str("max = 10").unwrap();
        assert_eq!(bounds, Bounds { min: 0, max: 10 });

        let bounds: Bounds = toml::from_str("min = 2").unwrap();
        assert_eq!(bounds.max, u64::MAX);
    }
}
