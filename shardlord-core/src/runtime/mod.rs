//! Process-level runtime support
//!
//! Shutdown signalling shared by the driver and scoped cluster runs.

pub mod shutdown;

pub use shutdown::ShutdownSignal;
