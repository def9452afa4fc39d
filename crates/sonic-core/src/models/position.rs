//! Position and price data models

use serde::{Deserialize, Serialize};

/// An open position tracked by the dashboard
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct Position {
    /// Position identifier
    pub id: String,

    /// Asset symbol (e.g., "BTC")
    pub asset_type: String,

    /// Position side (e.g., "LONG", "SHORT")
    pub position_type: String,

    /// Wallet holding the position
    pub wallet_name: Option<String>,

    /// Percent travelled towards liquidation (negative) or profit target
    pub current_travel_percent: Option<f64>,

    /// Profit after fees in USD
    pub profit: Option<f64>,

    /// Current position value
    pub value: Option<f64>,

    /// Posted collateral
    pub collateral: Option<f64>,

    /// Heat index
    pub heat_index: Option<f64>,

    /// Last known asset price
    pub current_price: Option<f64>,
}

impl Position {
    /// Full asset name used in messages
    pub fn asset_name(&self) -> String {
        asset_display_name(&self.asset_type)
    }

    /// Capitalised side ("Long", "Short")
    pub fn side(&self) -> String {
        capitalize(&self.position_type)
    }

    /// Wallet name, or "Unknown"
    pub fn wallet(&self) -> &str {
        self.wallet_name.as_deref().unwrap_or("Unknown")
    }
}

/// Latest price of an asset
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceSample {
    /// Asset symbol
    pub asset_type: String,

    /// Price
    pub current_price: f64,

    /// When the price was recorded (as stored by the price monitor)
    pub last_update_time: Option<String>,
}

/// Full display name of an asset symbol; unknown symbols render upper-cased
pub fn asset_display_name(symbol: &str) -> String {
    let symbol = symbol.to_ascii_uppercase();
    match symbol.as_str() {
        "BTC" => "Bitcoin".to_string(),
        "ETH" => "Ethereum".to_string(),
        "SOL" => "Solana".to_string(),
        _ => symbol,
    }
}

/// Upper-case the first character and lower-case the rest
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_display_name() {
        assert_eq!(asset_display_name("btc"), "Bitcoin");
        assert_eq!(asset_display_name("SOL"), "Solana");
        assert_eq!(asset_display_name("doge"), "DOGE");
    }

    #[test]
    fn test_side_is_capitalized() {
        let pos = Position {
            position_type: "SHORT".to_string(),
            ..Default::default()
        };
        assert_eq!(pos.side(), "Short");
        assert_eq!(capitalize(""), "");
    }
}
