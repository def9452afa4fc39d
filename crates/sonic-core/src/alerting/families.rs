//! Metric family adapters
//!
//! Each tiered family knows how to read its metric from a position, how its
//! alerts are keyed and how its message reads. Adding a family means adding
//! an adapter here and registering it in [`default_adapters`].

use crate::error::{Error, Result};
use crate::models::{AlertKey, MetricFamily, Position, Severity};

/// Strategy for one tiered metric family
pub trait FamilyAdapter: Send + Sync {
    /// Family this adapter evaluates
    fn family(&self) -> MetricFamily;

    /// Read the metric from `position`, failing with a data error when it is
    /// missing or not a finite number
    fn value(&self, position: &Position) -> Result<f64>;

    /// Key under which severity changes are latched
    fn latch_key(&self, position: &Position) -> AlertKey {
        AlertKey::subject(self.family(), &position.id)
    }

    /// Key under which messages are cooled down
    fn cooldown_key(&self, position: &Position, _severity: Severity) -> AlertKey {
        AlertKey::subject(self.family(), &position.id)
    }

    /// Human-readable alert text
    fn format(&self, position: &Position, value: f64, severity: Severity) -> String;
}

/// Adapters for every tiered family, in evaluation order
pub fn default_adapters() -> Vec<Box<dyn FamilyAdapter>> {
    vec![
        Box::new(TravelPercentAdapter),
        Box::new(ProfitAdapter),
        Box::new(HeatIndexAdapter),
    ]
}

fn finite(position: &Position, name: &str, value: Option<f64>) -> Result<f64> {
    match value {
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(Error::data(&position.id, format!("{name} is not finite ({v})"))),
        None => Err(Error::data(&position.id, format!("{name} is missing"))),
    }
}

/// Travel towards liquidation; negative and worse as it decreases
#[derive(Debug, Clone, Copy, Default)]
pub struct TravelPercentAdapter;

impl FamilyAdapter for TravelPercentAdapter {
    fn family(&self) -> MetricFamily {
        MetricFamily::TravelPercent
    }

    fn value(&self, position: &Position) -> Result<f64> {
        finite(position, "current_travel_percent", position.current_travel_percent)
    }

    // Each tier cools down on its own
    fn cooldown_key(&self, position: &Position, severity: Severity) -> AlertKey {
        AlertKey::level(self.family(), &position.id, severity)
    }

    fn format(&self, position: &Position, value: f64, severity: Severity) -> String {
        format!(
            "Travel Percent Liquid ALERT: {} {} (Wallet: {}) - Current Travel% = {:.2}%, Level = {}",
            position.asset_name(),
            position.side(),
            position.wallet(),
            value,
            severity
        )
    }
}

/// Profit after fees, falling back to value minus collateral
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfitAdapter;

impl FamilyAdapter for ProfitAdapter {
    fn family(&self) -> MetricFamily {
        MetricFamily::Profit
    }

    fn value(&self, position: &Position) -> Result<f64> {
        let reported = match position.profit {
            Some(p) if !p.is_finite() => {
                return Err(Error::data(&position.id, format!("profit is not finite ({p})")))
            }
            Some(p) if p != 0.0 => return Ok(p),
            other => other,
        };

        match (position.value, position.collateral) {
            (Some(value), Some(collateral)) => {
                let computed = value - collateral;
                if computed.is_finite() {
                    Ok(computed)
                } else {
                    Err(Error::data(&position.id, "value - collateral is not finite"))
                }
            }
            // A reported zero stands when there is nothing to recompute it from
            _ => reported.ok_or_else(|| {
                Error::data(&position.id, "profit is missing and value/collateral unavailable")
            }),
        }
    }

    fn format(&self, position: &Position, value: f64, severity: Severity) -> String {
        format!(
            "Profit ALERT: {} {} profit of {:.2} (Level: {}).",
            position.asset_name(),
            position.side(),
            value,
            severity
        )
    }
}

/// Position heat index
#[derive(Debug, Clone, Copy, Default)]
pub struct HeatIndexAdapter;

impl FamilyAdapter for HeatIndexAdapter {
    fn family(&self) -> MetricFamily {
        MetricFamily::HeatIndex
    }

    fn value(&self, position: &Position) -> Result<f64> {
        finite(position, "heat_index", position.heat_index)
    }

    fn format(&self, position: &Position, value: f64, severity: Severity) -> String {
        format!(
            "Heat Index ALERT: {} {} heat index {:.2} (Level: {}).",
            position.asset_name(),
            position.side(),
            value,
            severity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn position() -> Position {
        Position {
            id: "pos-1".to_string(),
            asset_type: "btc".to_string(),
            position_type: "LONG".to_string(),
            wallet_name: Some("Vault".to_string()),
            current_travel_percent: Some(-42.5),
            profit: Some(250.0),
            value: Some(1500.0),
            collateral: Some(1000.0),
            heat_index: Some(7.0),
            current_price: Some(60_000.0),
        }
    }

    #[test]
    fn test_travel_message_and_keys() {
        let adapter = TravelPercentAdapter;
        let pos = position();
        assert_eq!(adapter.value(&pos).unwrap(), -42.5);
        assert_eq!(
            adapter.format(&pos, -42.5, Severity::Low),
            "Travel Percent Liquid ALERT: Bitcoin Long (Wallet: Vault) - Current Travel% = -42.50%, Level = LOW"
        );
        assert_eq!(adapter.latch_key(&pos).as_str(), "travel_percent:pos-1");
        assert_eq!(
            adapter.cooldown_key(&pos, Severity::High).as_str(),
            "travel_percent:pos-1:high"
        );
    }

    #[test]
    fn test_missing_travel_percent_is_data_error() {
        let pos = Position {
            current_travel_percent: None,
            ..position()
        };
        assert!(TravelPercentAdapter.value(&pos).unwrap_err().is_data());

        let nan = Position {
            current_travel_percent: Some(f64::NAN),
            ..position()
        };
        assert!(TravelPercentAdapter.value(&nan).is_err());
    }

    #[test]
    fn test_profit_uses_reported_value() {
        assert_eq!(ProfitAdapter.value(&position()).unwrap(), 250.0);
        assert_eq!(
            ProfitAdapter.cooldown_key(&position(), Severity::High).as_str(),
            "profit:pos-1"
        );
    }

    #[test]
    fn test_profit_falls_back_to_value_minus_collateral() {
        let zero = Position {
            profit: Some(0.0),
            ..position()
        };
        assert_eq!(ProfitAdapter.value(&zero).unwrap(), 500.0);

        let missing = Position {
            profit: None,
            ..position()
        };
        assert_eq!(ProfitAdapter.value(&missing).unwrap(), 500.0);
    }

    #[test]
    fn test_profit_without_any_source_is_data_error() {
        let pos = Position {
            profit: None,
            value: None,
            ..position()
        };
        assert!(ProfitAdapter.value(&pos).unwrap_err().is_data());

        let reported_zero = Position {
            profit: Some(0.0),
            collateral: None,
            ..position()
        };
        assert_eq!(ProfitAdapter.value(&reported_zero).unwrap(), 0.0);
    }

    #[test]
    fn test_profit_and_heat_messages() {
        assert_eq!(
            ProfitAdapter.format(&position(), 250.0, Severity::Medium),
            "Profit ALERT: Bitcoin Long profit of 250.00 (Level: MEDIUM)."
        );
        assert_eq!(
            HeatIndexAdapter.format(&position(), 7.0, Severity::High),
            "Heat Index ALERT: Bitcoin Long heat index 7.00 (Level: HIGH)."
        );
    }

    #[test]
    fn test_default_adapters_cover_tiered_families() {
        let families: Vec<MetricFamily> = default_adapters().iter().map(|a| a.family()).collect();
        assert_eq!(families, MetricFamily::TIERED.to_vec());
    }
}
