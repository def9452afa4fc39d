//! Metric sources for the alert engine
//!
//! The engine only reads: positions, latest prices and standalone price
//! alerts. The dashboard owns the schema and writes these tables.

mod memory;
mod sqlite;

pub use memory::MemoryMetricSource;
pub use sqlite::SqliteMetricSource;

use crate::error::Result;
use crate::models::{Position, PriceAlert, PriceSample};

/// Read access to the metrics the engine evaluates
#[async_trait::async_trait]
pub trait MetricSource: Send + Sync {
    /// All positions currently tracked
    async fn list_subjects(&self) -> Result<Vec<Position>>;

    /// Newest price for an asset symbol
    async fn latest_price(&self, symbol: &str) -> Result<Option<PriceSample>>;

    /// Active price threshold alert definitions
    async fn list_standalone_alerts(&self) -> Result<Vec<PriceAlert>>;
}
