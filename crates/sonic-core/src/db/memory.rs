//! In-process metric source, for tests and dry runs

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::models::{Position, PriceAlert, PriceSample};

use super::MetricSource;

/// Metric source holding its data in memory
#[derive(Default)]
pub struct MemoryMetricSource {
    positions: RwLock<Vec<Position>>,
    prices: RwLock<HashMap<String, PriceSample>>,
    alerts: RwLock<Vec<PriceAlert>>,
    unavailable: RwLock<Option<String>>,
}

impl MemoryMetricSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Source pre-loaded with positions
    pub fn with_positions(positions: Vec<Position>) -> Self {
        let source = Self::new();
        source.set_positions(positions);
        source
    }

    /// Replace all positions
    pub fn set_positions(&self, positions: Vec<Position>) {
        *self.positions.write() = positions;
    }

    /// Replace one position by id, or add it
    pub fn upsert_position(&self, position: Position) {
        let mut positions = self.positions.write();
        match positions.iter_mut().find(|p| p.id == position.id) {
            Some(existing) => *existing = position,
            None => positions.push(position),
        }
    }

    /// Record the latest price of an asset
    pub fn set_price(&self, symbol: &str, price: f64) {
        let symbol = symbol.to_ascii_uppercase();
        self.prices.write().insert(
            symbol.clone(),
            PriceSample {
                asset_type: symbol,
                current_price: price,
                last_update_time: Some(Utc::now().to_rfc3339()),
            },
        );
    }

    /// Replace all price alert definitions
    pub fn set_alerts(&self, alerts: Vec<PriceAlert>) {
        *self.alerts.write() = alerts;
    }

    /// Make every read fail until cleared with `None`
    pub fn set_unavailable(&self, reason: Option<&str>) {
        *self.unavailable.write() = reason.map(String::from);
    }

    fn check_available(&self) -> Result<()> {
        match self.unavailable.read().as_deref() {
            Some(reason) => Err(Error::Database(sqlx::Error::Protocol(reason.to_string()))),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl MetricSource for MemoryMetricSource {
    async fn list_subjects(&self) -> Result<Vec<Position>> {
        self.check_available()?;
        Ok(self.positions.read().clone())
    }

    async fn latest_price(&self, symbol: &str) -> Result<Option<PriceSample>> {
        self.check_available()?;
        Ok(self.prices.read().get(&symbol.to_ascii_uppercase()).cloned())
    }

    async fn list_standalone_alerts(&self) -> Result<Vec<PriceAlert>> {
        self.check_available()?;
        Ok(self.alerts.read().clone())
    }
}
