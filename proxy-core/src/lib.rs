//! Ambient process stack shared by the proxy and its management API:
//! logging/tracing setup, signal-driven shutdown, connection draining,
//! readiness tracking, and build metadata.

pub mod drain;
pub mod readiness;
pub mod signal;
pub mod telemetry;
pub mod version;
