//! Alert data models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Alert severity tier, ordered `None < Low < Medium < High`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// No threshold crossed
    #[default]
    None,
    /// Low tier crossed
    Low,
    /// Medium tier crossed
    Medium,
    /// High tier crossed
    High,
}

impl Severity {
    /// Upper-case label used in alert messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "NONE",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way a metric gets worse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Higher values are worse
    IncreasingBad,
    /// Lower values are worse (thresholds are ordered `low > medium > high`)
    DecreasingBad,
}

/// A family of metrics evaluated against the same kind of rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricFamily {
    /// Percent travelled from entry towards liquidation (negative)
    TravelPercent,
    /// Position profit in USD
    Profit,
    /// Position heat index
    HeatIndex,
    /// Standalone "price crosses trigger" alerts
    PriceThreshold,
}

impl MetricFamily {
    /// Families classified against tiered thresholds
    pub const TIERED: [MetricFamily; 3] = [
        MetricFamily::TravelPercent,
        MetricFamily::Profit,
        MetricFamily::HeatIndex,
    ];

    /// Stable tag used in alert keys and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricFamily::TravelPercent => "travel_percent",
            MetricFamily::Profit => "profit",
            MetricFamily::HeatIndex => "heat_index",
            MetricFamily::PriceThreshold => "price_threshold",
        }
    }

    /// Key of this family's section under `alert_ranges` in the config file
    pub fn range_key(&self) -> Option<&'static str> {
        match self {
            MetricFamily::TravelPercent => Some("travel_percent_liquid_ranges"),
            MetricFamily::Profit => Some("profit_ranges"),
            MetricFamily::HeatIndex => Some("heat_index_ranges"),
            MetricFamily::PriceThreshold => None,
        }
    }

    /// Direction used when the config does not name one
    pub fn default_direction(&self) -> Direction {
        match self {
            MetricFamily::TravelPercent => Direction::DecreasingBad,
            _ => Direction::IncreasingBad,
        }
    }
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "travel_percent" | "travel_percent_liquid" => Ok(MetricFamily::TravelPercent),
            "profit" => Ok(MetricFamily::Profit),
            "heat_index" => Ok(MetricFamily::HeatIndex),
            "price_threshold" => Ok(MetricFamily::PriceThreshold),
            other => Err(format!("unknown metric family '{other}'")),
        }
    }
}

/// Deterministic join key for latch, cooldown and refractory state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertKey(String);

impl AlertKey {
    /// Refractory key shared by every message of an aggregated batch
    pub const AGGREGATED: &'static str = "aggregated-alert";

    /// Key scoped to a family and subject
    pub fn subject(family: MetricFamily, subject_id: &str) -> Self {
        Self(format!("{}:{}", family.as_str(), subject_id))
    }

    /// Key scoped to a family, subject and severity tier
    pub fn level(family: MetricFamily, subject_id: &str, severity: Severity) -> Self {
        Self(format!(
            "{}:{}:{}",
            family.as_str(),
            subject_id,
            severity.as_str().to_ascii_lowercase()
        ))
    }

    /// Per-asset key for price threshold alerts
    pub fn price(symbol: &str) -> Self {
        Self(format!(
            "{}:{}",
            MetricFamily::PriceThreshold.as_str(),
            symbol.to_ascii_uppercase()
        ))
    }

    /// Shared channel key for aggregated batches
    pub fn aggregated() -> Self {
        Self(Self::AGGREGATED.to_string())
    }

    /// Borrow the key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Channels a severity tier may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelNotifications {
    /// Phone call
    pub call: bool,
    /// SMS
    pub sms: bool,
    /// Email
    pub email: bool,
}

/// Tiered thresholds for one metric family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Whether the family is evaluated at all
    pub enabled: bool,

    /// Which way the metric gets worse
    pub direction: Direction,

    /// Low tier boundary (`None` = tier never triggers)
    pub low: Option<f64>,

    /// Medium tier boundary
    pub medium: Option<f64>,

    /// High tier boundary
    pub high: Option<f64>,

    /// Channels allowed for a low alert
    pub low_notifications: Option<LevelNotifications>,

    /// Channels allowed for a medium alert
    pub medium_notifications: Option<LevelNotifications>,

    /// Channels allowed for a high alert
    pub high_notifications: Option<LevelNotifications>,
}

impl ThresholdConfig {
    /// Enabled thresholds with no per-level channel restrictions.
    ///
    /// A boundary of exactly `0.0` is treated as unset.
    pub fn new(direction: Direction, low: Option<f64>, medium: Option<f64>, high: Option<f64>) -> Self {
        Self {
            enabled: true,
            direction,
            low: normalize_tier(low),
            medium: normalize_tier(medium),
            high: normalize_tier(high),
            low_notifications: None,
            medium_notifications: None,
            high_notifications: None,
        }
    }

    /// Same thresholds, administratively disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Boundary configured for a tier
    pub fn threshold_for(&self, severity: Severity) -> Option<f64> {
        match severity {
            Severity::None => None,
            Severity::Low => self.low,
            Severity::Medium => self.medium,
            Severity::High => self.high,
        }
    }

    /// Channel flags configured for a tier
    pub fn notifications_for(&self, severity: Severity) -> Option<&LevelNotifications> {
        match severity {
            Severity::None => None,
            Severity::Low => self.low_notifications.as_ref(),
            Severity::Medium => self.medium_notifications.as_ref(),
            Severity::High => self.high_notifications.as_ref(),
        }
    }

    /// Whether an alert at this tier may place a call.
    ///
    /// A tier without a notifications block is unrestricted.
    pub fn call_allowed(&self, severity: Severity) -> bool {
        self.notifications_for(severity).map_or(true, |n| n.call)
    }

    /// Check that the set tiers are ordered consistently with the direction
    pub fn validate(&self) -> Result<(), String> {
        let tiers: Vec<(Severity, f64)> = [
            (Severity::Low, self.low),
            (Severity::Medium, self.medium),
            (Severity::High, self.high),
        ]
        .into_iter()
        .filter_map(|(s, t)| t.map(|t| (s, t)))
        .collect();

        for (s, t) in &tiers {
            if !t.is_finite() {
                return Err(format!("{s} threshold is not a finite number"));
            }
        }

        for pair in tiers.windows(2) {
            let ((lower, a), (upper, b)) = (pair[0], pair[1]);
            let ordered = match self.direction {
                Direction::IncreasingBad => a <= b,
                Direction::DecreasingBad => a >= b,
            };
            if !ordered {
                return Err(format!(
                    "{lower} threshold {a} and {upper} threshold {b} are out of order for {:?}",
                    self.direction
                ));
            }
        }

        Ok(())
    }
}

fn normalize_tier(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0)
}

/// Trigger condition of a price threshold alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriceCondition {
    /// Fires when the price is at or above the trigger
    Above,
    /// Fires when the price is at or below the trigger
    Below,
}

impl PriceCondition {
    /// Whether `price` satisfies the condition against `trigger`
    pub fn is_met(&self, price: f64, trigger: f64) -> bool {
        match self {
            PriceCondition::Above => price >= trigger,
            PriceCondition::Below => price <= trigger,
        }
    }

    /// Upper-case label used in alert messages
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceCondition::Above => "ABOVE",
            PriceCondition::Below => "BELOW",
        }
    }
}

impl FromStr for PriceCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ABOVE" => Ok(PriceCondition::Above),
            "BELOW" => Ok(PriceCondition::Below),
            other => Err(format!("unknown price condition '{other}'")),
        }
    }
}

/// A standalone price threshold alert definition
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceAlert {
    /// Alert identifier
    pub id: String,

    /// Asset symbol the alert watches
    pub asset_type: String,

    /// Raw condition (`ABOVE` / `BELOW`)
    pub condition: String,

    /// Trigger price
    pub trigger_value: Option<f64>,

    /// Position side the alert was created for
    pub position_type: Option<String>,

    /// Wallet the alert was created for
    pub wallet_name: Option<String>,
}

/// A formatted alert that passed the latch and cooldown gates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    /// Cooldown key the message was admitted under
    pub key: AlertKey,

    /// Family that produced the message
    pub family: MetricFamily,

    /// Subject identifier (position id or asset symbol)
    pub subject: String,

    /// Severity tier of the alert
    pub severity: Severity,

    /// Human-readable text
    pub text: String,

    /// Whether this alert may use the call channel
    pub call_allowed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_total_order() {
        assert!(Severity::None < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert_eq!(Severity::default(), Severity::None);
    }

    #[test]
    fn test_alert_keys_are_deterministic() {
        let a = AlertKey::level(MetricFamily::TravelPercent, "pos-1", Severity::Medium);
        let b = AlertKey::level(MetricFamily::TravelPercent, "pos-1", Severity::Medium);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "travel_percent:pos-1:medium");
        assert_eq!(AlertKey::subject(MetricFamily::Profit, "pos-1").as_str(), "profit:pos-1");
        assert_eq!(AlertKey::price("btc").as_str(), "price_threshold:BTC");
    }

    #[test]
    fn test_zero_tier_is_unset() {
        let cfg = ThresholdConfig::new(Direction::IncreasingBad, Some(0.0), Some(10.0), Some(20.0));
        assert_eq!(cfg.low, None);
        assert_eq!(cfg.medium, Some(10.0));
    }

    #[test]
    fn test_validate_rejects_out_of_order_tiers() {
        let inc = ThresholdConfig::new(Direction::IncreasingBad, Some(30.0), Some(20.0), None);
        assert!(inc.validate().is_err());

        let dec = ThresholdConfig::new(Direction::DecreasingBad, Some(-25.0), Some(-50.0), Some(-75.0));
        assert!(dec.validate().is_ok());

        let dec_bad = ThresholdConfig::new(Direction::DecreasingBad, Some(-50.0), Some(-25.0), None);
        assert!(dec_bad.validate().is_err());
    }

    #[test]
    fn test_validate_skips_unset_tiers() {
        let cfg = ThresholdConfig::new(Direction::IncreasingBad, Some(10.0), None, Some(50.0));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_call_allowed_defaults_to_true() {
        let mut cfg = ThresholdConfig::new(Direction::IncreasingBad, Some(1.0), Some(2.0), Some(3.0));
        assert!(cfg.call_allowed(Severity::High));

        cfg.high_notifications = Some(LevelNotifications {
            call: false,
            sms: true,
            email: false,
        });
        assert!(!cfg.call_allowed(Severity::High));
        assert!(cfg.call_allowed(Severity::Low));
    }

    #[test]
    fn test_price_condition() {
        assert_eq!("above".parse::<PriceCondition>(), Ok(PriceCondition::Above));
        assert_eq!(" BELOW ".parse::<PriceCondition>(), Ok(PriceCondition::Below));
        assert!("sideways".parse::<PriceCondition>().is_err());

        assert!(PriceCondition::Above.is_met(100.0, 100.0));
        assert!(!PriceCondition::Above.is_met(99.9, 100.0));
        assert!(PriceCondition::Below.is_met(100.0, 100.0));
        assert!(!PriceCondition::Below.is_met(100.1, 100.0));
    }
}
