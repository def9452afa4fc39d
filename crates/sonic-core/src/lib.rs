//! # Sonic
//!
//! Alert engine for the Sonic crypto portfolio dashboard.
//!
//! Sonic watches open positions and price alerts stored by the dashboard and
//! places a phone call when a metric crosses into a more severe tier.
//!
//! ## Architecture
//!
//! - **Classifier**: maps a metric value onto `None < Low < Medium < High`
//! - **Latch**: only an escalation of severity produces an alert
//! - **Gates**: a cooldown per alert and a refractory period per call channel
//! - **Engine**: polls the metric source and drives everything above
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the monitor
//! sonic run
//!
//! # One pass without placing calls
//! sonic check --dry-run
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod telemetry;

pub use config::{AlertSettings, AppConfig};
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{CycleReport, EvaluationCycle, Notifier};
    pub use crate::config::{AlertSettings, AppConfig, ConfigProvider, FileConfigProvider};
    pub use crate::db::MetricSource;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
}
