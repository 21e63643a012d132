//! nodescale-core: the cloud provider contract for cluster autoscaling.
//!
//! Defines what an autoscaling control loop needs from an infrastructure
//! backend: node groups with bounded target sizes, a provider that
//! enumerates them and maps nodes back to groups, the error taxonomy, and
//! the global resource limiter.
//!
//! # Architecture
//!
//! ```text
//! CloudProvider
//!   ├── NodeGroup (one per pool: min/max/target, members)
//!   ├── ResourceLimiter (shared aggregate bounds)
//!   └── PricingModel (optional, capability-checked)
//! ```

pub mod cloud;
pub mod config;
pub mod error;
pub mod limiter;
pub mod types;

pub use cloud::{CloudProvider, NodeGroup, PricingModel};
pub use config::NodescaleConfig;
pub use error::{CloudError, CloudResult, ErrorKind};
pub use limiter::{Bounds, LimitViolation, ResourceLimiter};
pub use types::*;
