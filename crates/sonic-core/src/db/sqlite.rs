//! Read-only access to the dashboard's SQLite database

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{Position, PriceAlert, PriceSample};

use super::MetricSource;

/// Metric source over the `positions`, `prices` and `alerts` tables
#[derive(Clone)]
pub struct SqliteMetricSource {
    pool: SqlitePool,
}

impl SqliteMetricSource {
    /// Open the database read-only
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?.read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        debug!(url = %config.url, "Connected to dashboard database");
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MetricSource for SqliteMetricSource {
    async fn list_subjects(&self) -> Result<Vec<Position>> {
        let positions = sqlx::query_as::<_, Position>(
            r#"
            SELECT id,
                   COALESCE(asset_type, '') AS asset_type,
                   COALESCE(position_type, '') AS position_type,
                   wallet_name,
                   current_travel_percent, pnl_after_fees_usd AS profit,
                   value, collateral, heat_index, current_price
              FROM positions
             ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(positions)
    }

    async fn latest_price(&self, symbol: &str) -> Result<Option<PriceSample>> {
        let price = sqlx::query_as::<_, PriceSample>(
            r#"
            SELECT asset_type, current_price,
                   CAST(last_update_time AS TEXT) AS last_update_time
              FROM prices
             WHERE UPPER(asset_type) = UPPER(?1)
             ORDER BY last_update_time DESC
             LIMIT 1
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(price)
    }

    async fn list_standalone_alerts(&self) -> Result<Vec<PriceAlert>> {
        let alerts = sqlx::query_as::<_, PriceAlert>(
            r#"
            SELECT a.id,
                   COALESCE(a.asset_type, 'BTC') AS asset_type,
                   COALESCE(a.condition, 'ABOVE') AS condition,
                   a.trigger_value,
                   p.position_type,
                   p.wallet_name
              FROM alerts a
              LEFT JOIN positions p ON p.id = a.position_reference_id
             WHERE a.alert_type = 'PRICE_THRESHOLD'
               AND LOWER(a.status) = 'active'
             ORDER BY a.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(alerts)
    }
}
