//! nodescale-provider: a managed cloud provider over a pluggable backend.
//!
//! Implements the `nodescale-core` contract once, on top of any
//! [`Backend`]. The provider owns all bookkeeping (target sizes, members,
//! generations); the backend only lists pools and applies changes.
//!
//! # Architecture
//!
//! ```text
//! ManagedProvider
//!   ├── Registry (Arc<Snapshot> swapped on refresh / create / delete)
//!   │   ├── GroupCell per group (state + per-group mutation lock)
//!   │   └── node index (instance id → group id)
//!   ├── Backend (list, resize, delete instances, create/delete pools)
//!   ├── ResourceLimiter (shared, read-only)
//!   └── background refresher (optional, stopped by cleanup)
//! ```
//!
//! # Consistency
//!
//! Mutations block until the backend acknowledges, bounded by
//! [`ProviderOptions::operation_timeout`]; a timeout surfaces as
//! `Transient` and leaves bookkeeping untouched. A refresh never reverts a
//! target committed while its listing was in flight: each group's
//! generation is compared before and after the listing.

pub mod backend;
pub mod group;
pub mod options;
pub mod provider;
mod registry;

pub use backend::{Backend, BackendGroup, GroupRequest};
pub use group::ManagedNodeGroup;
pub use options::ProviderOptions;
pub use provider::ManagedProvider;
