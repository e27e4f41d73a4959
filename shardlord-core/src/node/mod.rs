//! Cluster nodes
//!
//! Identity, configuration and lifecycle of a single engine instance.

pub mod handle;
pub mod identity;
pub mod template;

pub use handle::{NodeHandle, NodePhase};
pub use identity::{ConnectionString, NodeIdentity, NodeRole};
pub use template::{Ceilings, ConfigTemplate, RetryIntervals, Setting};
