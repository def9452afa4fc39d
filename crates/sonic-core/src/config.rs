//! Configuration management for Sonic
//!
//! The dashboard stores its settings in `sonic_config.json`. This module reads
//! that file (plus `SONIC__*` environment overrides) and turns it into an
//! immutable [`AlertSettings`] snapshot for the evaluation engine.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{Direction, LevelNotifications, MetricFamily, ThresholdConfig};

/// Default file name of the dashboard config
pub const CONFIG_FILE_NAME: &str = "sonic_config.json";

/// Prefix of environment overrides (`SONIC__ALERT_COOLDOWN_SECONDS=60`)
pub const ENV_PREFIX: &str = "SONIC";

/// Main configuration struct
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Monitor configuration
    #[serde(default)]
    pub system_config: SystemConfig,

    /// Minimum seconds between two messages for the same alert
    #[serde(default = "default_cooldown_seconds")]
    pub alert_cooldown_seconds: u64,

    /// Minimum seconds between two outbound calls on the same channel
    #[serde(default = "default_refractory_seconds")]
    pub call_refractory_period: u64,

    /// Raw per-family threshold ranges, parsed one family at a time
    #[serde(default)]
    pub alert_ranges: HashMap<String, serde_json::Value>,

    /// Twilio Studio credentials
    #[serde(default)]
    pub twilio_config: Option<TwilioConfig>,

    /// Dashboard database
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            system_config: SystemConfig::default(),
            alert_cooldown_seconds: default_cooldown_seconds(),
            call_refractory_period: default_refractory_seconds(),
            alert_ranges: HashMap::new(),
            twilio_config: None,
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_cooldown_seconds() -> u64 {
    900
}

fn default_refractory_seconds() -> u64 {
    3600
}

/// How emitted messages are handed to the notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPolicy {
    /// One call per cycle carrying every message, under a single refractory key
    #[default]
    Aggregate,
    /// One call per message, refractory keyed by the message's alert key
    PerAlert,
}

/// Monitor configuration
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Master switch for alert evaluation
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default = "default_true")]
    pub alert_monitor_enabled: bool,

    /// Time between evaluation passes
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Upper bound on one outbound notification call
    #[serde(default = "default_notification_timeout", with = "humantime_serde")]
    pub notification_timeout: Duration,

    /// Aggregation policy
    #[serde(default)]
    pub notification_policy: NotificationPolicy,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            alert_monitor_enabled: true,
            poll_interval: default_poll_interval(),
            notification_timeout: default_notification_timeout(),
            notification_policy: NotificationPolicy::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_notification_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Twilio Studio flow credentials
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwilioConfig {
    /// Account SID
    pub account_sid: Option<String>,
    /// Auth token
    pub auth_token: Option<String>,
    /// Studio flow SID
    pub flow_sid: Option<String>,
    /// Number to call
    pub to_phone: Option<String>,
    /// Caller number
    pub from_phone: Option<String>,
    /// API base URL override
    pub base_url: Option<String>,
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Maximum connections
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://mother_brain.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
    /// Optional log file, rotated daily
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

impl AppConfig {
    /// Load the JSON file at `path` and apply `SONIC__*` environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Json))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Reject values the monitor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.system_config.poll_interval.is_zero() {
            return Err(Error::config("system_config.poll_interval must be greater than zero"));
        }
        if self.system_config.notification_timeout.is_zero() {
            return Err(Error::config(
                "system_config.notification_timeout must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Config path used when none is given: the platform config directory if
    /// it holds a config file, otherwise the working directory
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "sonic")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
    }

    /// Copy with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(twilio) = copy.twilio_config.as_mut() {
            if twilio.auth_token.is_some() {
                twilio.auth_token = Some("********".to_string());
            }
        }
        copy
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct RangeConfig {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    enabled: bool,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    low: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    medium: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    high: Option<f64>,
    #[serde(default)]
    direction: Option<Direction>,
    #[serde(default)]
    low_notifications: Option<NotificationFlags>,
    #[serde(default)]
    medium_notifications: Option<NotificationFlags>,
    #[serde(default)]
    high_notifications: Option<NotificationFlags>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct NotificationFlags {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    call: bool,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    sms: bool,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    email: bool,
}

impl From<NotificationFlags> for LevelNotifications {
    fn from(flags: NotificationFlags) -> Self {
        Self {
            call: flags.call,
            sms: flags.sms,
            email: flags.email,
        }
    }
}

fn parse_range(family: MetricFamily, raw: &serde_json::Value) -> std::result::Result<ThresholdConfig, String> {
    let range: RangeConfig = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;

    let mut thresholds = ThresholdConfig::new(
        range.direction.unwrap_or_else(|| family.default_direction()),
        range.low,
        range.medium,
        range.high,
    );
    thresholds.enabled = range.enabled;
    thresholds.low_notifications = range.low_notifications.map(Into::into);
    thresholds.medium_notifications = range.medium_notifications.map(Into::into);
    thresholds.high_notifications = range.high_notifications.map(Into::into);

    if thresholds.enabled {
        thresholds.validate()?;
    }

    Ok(thresholds)
}

#[derive(Debug, Clone)]
enum FamilyThresholds {
    Configured(ThresholdConfig),
    Invalid(String),
}

/// Immutable alert settings the engine reads at the start of each cycle
#[derive(Debug, Clone)]
pub struct AlertSettings {
    /// Whether evaluation runs at all
    pub monitor_enabled: bool,
    /// Cooldown window per alert key
    pub alert_cooldown: chrono::Duration,
    /// Refractory window per call channel
    pub call_refractory: chrono::Duration,
    /// Time between passes
    pub poll_interval: Duration,
    /// Bound on one outbound call
    pub notification_timeout: Duration,
    /// Aggregation policy
    pub notification_policy: NotificationPolicy,
    thresholds: BTreeMap<MetricFamily, FamilyThresholds>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

impl AlertSettings {
    /// Build a snapshot from a loaded config. Families that fail to parse are
    /// kept as errors so only that family is skipped.
    pub fn from_app_config(config: &AppConfig) -> Self {
        let mut thresholds = BTreeMap::new();

        for family in MetricFamily::TIERED {
            let Some(raw) = family.range_key().and_then(|key| config.alert_ranges.get(key)) else {
                continue;
            };

            let entry = match parse_range(family, raw) {
                Ok(cfg) => FamilyThresholds::Configured(cfg),
                Err(e) => {
                    warn!(family = %family, error = %e, "Invalid threshold configuration");
                    FamilyThresholds::Invalid(e)
                }
            };
            thresholds.insert(family, entry);
        }

        Self {
            monitor_enabled: config.system_config.alert_monitor_enabled,
            alert_cooldown: seconds(config.alert_cooldown_seconds),
            call_refractory: seconds(config.call_refractory_period),
            poll_interval: config.system_config.poll_interval,
            notification_timeout: config.system_config.notification_timeout,
            notification_policy: config.system_config.notification_policy,
            thresholds,
        }
    }

    /// Thresholds for `family`.
    ///
    /// `Ok(None)` means the family is not configured and is treated as
    /// disabled; `Err` means its configuration is malformed.
    pub fn thresholds(&self, family: MetricFamily) -> Result<Option<&ThresholdConfig>> {
        match self.thresholds.get(&family) {
            None => Ok(None),
            Some(FamilyThresholds::Configured(cfg)) => Ok(Some(cfg)),
            Some(FamilyThresholds::Invalid(msg)) => {
                Err(Error::config(format!("{family} thresholds: {msg}")))
            }
        }
    }

    /// Replace the thresholds of one family
    pub fn with_thresholds(mut self, family: MetricFamily, thresholds: ThresholdConfig) -> Self {
        self.thresholds
            .insert(family, FamilyThresholds::Configured(thresholds));
        self
    }

    /// Set the cooldown window
    pub fn with_cooldown(mut self, window: chrono::Duration) -> Self {
        self.alert_cooldown = window;
        self
    }

    /// Set the refractory window
    pub fn with_refractory(mut self, window: chrono::Duration) -> Self {
        self.call_refractory = window;
        self
    }

    /// Set the aggregation policy
    pub fn with_policy(mut self, policy: NotificationPolicy) -> Self {
        self.notification_policy = policy;
        self
    }

    /// Enable or disable the monitor
    pub fn with_monitor_enabled(mut self, enabled: bool) -> Self {
        self.monitor_enabled = enabled;
        self
    }
}

// Clamp so absurd config values cannot overflow chrono's range
const MAX_WINDOW_SECS: i64 = 100 * 365 * 24 * 3600;

fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX).min(MAX_WINDOW_SECS))
}

/// Source of alert settings snapshots
pub trait ConfigProvider: Send + Sync {
    /// Snapshot in effect now
    fn current(&self) -> Arc<AlertSettings>;

    /// Rebuild the snapshot from the underlying source and swap it in whole
    fn reload(&self) -> Result<Arc<AlertSettings>>;
}

/// Provider over a fixed snapshot
#[derive(Debug, Clone)]
pub struct StaticConfigProvider {
    settings: Arc<AlertSettings>,
}

impl StaticConfigProvider {
    /// Wrap a snapshot
    pub fn new(settings: AlertSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn current(&self) -> Arc<AlertSettings> {
        self.settings.clone()
    }

    fn reload(&self) -> Result<Arc<AlertSettings>> {
        Ok(self.settings.clone())
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    app: Arc<AppConfig>,
    settings: Arc<AlertSettings>,
}

/// Provider backed by the dashboard's JSON config file
pub struct FileConfigProvider {
    path: PathBuf,
    snapshot: RwLock<Snapshot>,
    // Last reload error, so a broken file is reported once
    last_error: Mutex<Option<String>>,
}

impl FileConfigProvider {
    /// Load the file once; fails if it cannot be read or parsed
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let app = AppConfig::load(&path)?;
        let settings = AlertSettings::from_app_config(&app);

        info!(
            path = %path.display(),
            cooldown_secs = app.alert_cooldown_seconds,
            refractory_secs = app.call_refractory_period,
            monitor_enabled = settings.monitor_enabled,
            "Alert configuration loaded"
        );

        Ok(Self {
            path,
            snapshot: RwLock::new(Snapshot {
                app: Arc::new(app),
                settings: Arc::new(settings),
            }),
            last_error: Mutex::new(None),
        })
    }

    /// Full application config of the current snapshot
    pub fn app_config(&self) -> Arc<AppConfig> {
        self.snapshot.read().app.clone()
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for FileConfigProvider {
    fn current(&self) -> Arc<AlertSettings> {
        self.snapshot.read().settings.clone()
    }

    fn reload(&self) -> Result<Arc<AlertSettings>> {
        let app = match AppConfig::load(&self.path) {
            Ok(app) => app,
            Err(e) => {
                let message = e.to_string();
                let mut last_error = self.last_error.lock();
                if last_error.as_deref() == Some(message.as_str()) {
                    debug!(path = %self.path.display(), error = %e, "Config still invalid, keeping previous snapshot");
                } else {
                    warn!(path = %self.path.display(), error = %e, "Config reload failed, keeping previous snapshot");
                    *last_error = Some(message);
                }
                return Err(e);
            }
        };
        *self.last_error.lock() = None;

        let mut snapshot = self.snapshot.write();
        if *snapshot.app == app {
            return Ok(snapshot.settings.clone());
        }

        let settings = Arc::new(AlertSettings::from_app_config(&app));
        *snapshot = Snapshot {
            app: Arc::new(app),
            settings: settings.clone(),
        };

        info!(path = %self.path.display(), "Alert configuration reloaded");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{
        "alert_cooldown_seconds": 120,
        "call_refractory_period": 1800,
        "system_config": {
            "alert_monitor_enabled": true,
            "poll_interval": "30s",
            "notification_policy": "per_alert"
        },
        "alert_ranges": {
            "travel_percent_liquid_ranges": {
                "enabled": true, "low": -25.0, "medium": -50.0, "high": -75.0,
                "high_notifications": {"call": true}
            },
            "profit_ranges": {"enabled": "true", "low": "100", "medium": 0, "high": 1000},
            "heat_index_ranges": {"enabled": false, "low": 5, "medium": 10, "high": 15},
            "size_ranges": {"enabled": true, "low": 1}
        },
        "twilio_config": {"account_sid": "AC123", "auth_token": "secret"}
    }"#;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_sample_config() {
        let file = write_config(SAMPLE);
        let provider = FileConfigProvider::load(file.path()).unwrap();
        let settings = provider.current();

        assert_eq!(settings.alert_cooldown, chrono::Duration::seconds(120));
        assert_eq!(settings.call_refractory, chrono::Duration::seconds(1800));
        assert_eq!(settings.poll_interval, Duration::from_secs(30));
        assert_eq!(settings.notification_timeout, Duration::from_secs(30));
        assert_eq!(settings.notification_policy, NotificationPolicy::PerAlert);

        let travel = settings
            .thresholds(MetricFamily::TravelPercent)
            .unwrap()
            .unwrap();
        assert_eq!(travel.direction, Direction::DecreasingBad);
        assert_eq!(travel.high, Some(-75.0));
        assert!(travel.call_allowed(crate::models::Severity::High));

        let profit = settings.thresholds(MetricFamily::Profit).unwrap().unwrap();
        assert!(profit.enabled);
        assert_eq!(profit.low, Some(100.0));
        assert_eq!(profit.medium, None);
        assert_eq!(profit.direction, Direction::IncreasingBad);

        let heat = settings.thresholds(MetricFamily::HeatIndex).unwrap().unwrap();
        assert!(!heat.enabled);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = FileConfigProvider::load("/nonexistent/sonic_config.json");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_defaults_when_sections_absent() {
        let file = write_config("{}");
        let provider = FileConfigProvider::load(file.path()).unwrap();
        let settings = provider.current();

        assert!(settings.monitor_enabled);
        assert_eq!(settings.alert_cooldown, chrono::Duration::seconds(900));
        assert_eq!(settings.call_refractory, chrono::Duration::seconds(3600));
        assert_eq!(settings.notification_policy, NotificationPolicy::Aggregate);
        assert!(settings.thresholds(MetricFamily::Profit).unwrap().is_none());
    }

    #[test]
    fn test_malformed_family_is_isolated() {
        let file = write_config(
            r#"{"alert_ranges": {
                "profit_ranges": {"enabled": true, "low": "lots"},
                "travel_percent_liquid_ranges": {"enabled": true, "low": -25, "medium": -10}
            , "heat_index_ranges": {"enabled": true, "low": 5}}}"#,
        );
        let provider = FileConfigProvider::load(file.path()).unwrap();
        let settings = provider.current();

        assert!(matches!(
            settings.thresholds(MetricFamily::Profit),
            Err(Error::Config(_))
        ));
        // -25 then -10 is out of order for a decreasing metric
        assert!(settings.thresholds(MetricFamily::TravelPercent).is_err());
        assert!(settings.thresholds(MetricFamily::HeatIndex).unwrap().is_some());
    }

    #[test]
    fn test_reload_swaps_snapshot() {
        let file = write_config(r#"{"alert_cooldown_seconds": 60}"#);
        let provider = FileConfigProvider::load(file.path()).unwrap();
        let before = provider.current();
        assert_eq!(before.alert_cooldown, chrono::Duration::seconds(60));

        std::fs::write(file.path(), r#"{"alert_cooldown_seconds": 5}"#).unwrap();

        let after = provider.reload().unwrap();
        assert_eq!(after.alert_cooldown, chrono::Duration::seconds(5));
        assert_eq!(provider.current().alert_cooldown, chrono::Duration::seconds(5));
        // snapshots handed out earlier are untouched
        assert_eq!(before.alert_cooldown, chrono::Duration::seconds(60));
    }

    #[test]
    fn test_failed_reload_keeps_previous_snapshot() {
        let file = write_config(r#"{"alert_cooldown_seconds": 60}"#);
        let provider = FileConfigProvider::load(file.path()).unwrap();

        std::fs::write(file.path(), "{ not json").unwrap();

        assert!(provider.reload().is_err());
        assert_eq!(provider.current().alert_cooldown, chrono::Duration::seconds(60));
    }

    #[test]
    fn test_zero_durations_are_rejected() {
        let file = write_config(r#"{"system_config": {"poll_interval": "0s"}}"#);
        let err = FileConfigProvider::load(file.path()).err().unwrap();
        assert!(matches!(&err, Error::Config(msg) if msg.contains("poll_interval")));

        let file = write_config(r#"{"system_config": {"notification_timeout": "0s"}}"#);
        let err = AppConfig::load(file.path()).unwrap_err();
        assert!(matches!(&err, Error::Config(msg) if msg.contains("notification_timeout")));
    }

    #[test]
    fn test_reload_rejects_zero_poll_interval() {
        let file = write_config(r#"{"system_config": {"poll_interval": "30s"}}"#);
        let provider = FileConfigProvider::load(file.path()).unwrap();

        std::fs::write(file.path(), r#"{"system_config": {"poll_interval": "0s"}}"#).unwrap();

        assert!(provider.reload().is_err());
        assert_eq!(provider.current().poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_unchanged_reload_keeps_snapshot() {
        let file = write_config(SAMPLE);
        let provider = FileConfigProvider::load(file.path()).unwrap();
        let before = provider.current();

        let after = provider.reload().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(Arc::ptr_eq(&before, &provider.current()));
    }

    #[test]
    fn test_reload_swaps_app_and_settings_together() {
        let file = write_config(r#"{"alert_cooldown_seconds": 60}"#);
        let provider = FileConfigProvider::load(file.path()).unwrap();

        std::fs::write(file.path(), r#"{"alert_cooldown_seconds": 5}"#).unwrap();
        provider.reload().unwrap();

        let snapshot = provider.snapshot.read().clone();
        assert_eq!(snapshot.app.alert_cooldown_seconds, 5);
        assert_eq!(snapshot.settings.alert_cooldown, chrono::Duration::seconds(5));
        assert_eq!(provider.app_config().alert_cooldown_seconds, 5);
    }

    #[test]
    fn test_redacted_masks_auth_token() {
        let file = write_config(SAMPLE);
        let app = AppConfig::load(file.path()).unwrap();
        let redacted = app.redacted();
        let twilio = redacted.twilio_config.unwrap();
        assert_eq!(twilio.auth_token.as_deref(), Some("********"));
        assert_eq!(twilio.account_sid.as_deref(), Some("AC123"));
    }
}
