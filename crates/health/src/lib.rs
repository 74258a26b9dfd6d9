//! Channel health monitoring.
//!
//! [`HealthMonitor`] probes channels with minimal synthetic requests, one at
//! a time or as a fleet sweep, and disables or re-enables them through the
//! [`ChannelStore`] depending on the outcome. At most one sweep runs at a time.

mod classify;
mod collaborators;
mod error;
mod monitor;
mod policy;
mod probe;
mod report;
mod scheduler;
mod single_flight;
mod sweep;

pub use classify::{ModelCategory, classify};
pub use collaborators::{ChannelStore, ConsumptionLog, ConsumptionRecord, Notifier};
pub use error::{CollaboratorError, HealthError, HealthResult};
pub use monitor::{HealthMonitor, TestResult};
pub use policy::DisablePolicy;
pub use probe::{ProbeSuccess, Prober};
pub use report::{REPORT_TITLE, SweepReport, escape_markdown};
pub use single_flight::{FlightGuard, SingleFlight};
