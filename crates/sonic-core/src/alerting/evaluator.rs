//! Alert evaluation engine
//!
//! One pass reads every position, runs each enabled metric family through
//! classification, the severity latch and the cooldown gate, then evaluates
//! standalone price alerts and hands the resulting messages to the notifier
//! through the refractory gate.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{AlertSettings, ConfigProvider, NotificationPolicy};
use crate::db::MetricSource;
use crate::error::{Error, Result};
use crate::models::{
    asset_display_name, capitalize, AlertKey, AlertMessage, MetricFamily, Position, PriceAlert,
    PriceCondition, Severity, ThresholdConfig,
};

use super::classifier::classify;
use super::families::{default_adapters, FamilyAdapter};
use super::gate::{CooldownGate, NotificationGate};
use super::notifier::{NotificationReceipt, Notifier, NotifyError};
use super::state::AlertStateStore;

/// Shortest period accepted by [`EvaluationCycle::run_forever`]
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Mutable engine state, owned by whichever pass holds the lock
#[derive(Debug, Default)]
struct EngineState {
    latch: AlertStateStore,
    cooldown: CooldownGate,
    refractory: NotificationGate,
}

/// What one evaluation pass did
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Correlates the pass with its log lines
    pub cycle_id: Uuid,
    /// Evaluation time of the pass
    pub started_at: DateTime<Utc>,
    /// False when the monitor was administratively disabled and nothing ran
    pub monitor_enabled: bool,
    /// Positions read from the metric source
    pub subjects_evaluated: usize,
    /// Price alert definitions read from the metric source
    pub price_alerts_evaluated: usize,
    /// Messages that passed the latch and cooldown gates
    pub messages: Vec<AlertMessage>,
    /// Subjects skipped for one family because of bad data
    pub skipped: Vec<SkippedSubject>,
    /// Families skipped for the whole pass because of bad configuration
    pub skipped_families: Vec<SkippedFamily>,
    /// What happened to each outbound notification
    pub notifications: Vec<NotificationOutcome>,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>, monitor_enabled: bool) -> Self {
        Self {
            cycle_id: Uuid::now_v7(),
            started_at,
            monitor_enabled,
            subjects_evaluated: 0,
            price_alerts_evaluated: 0,
            messages: Vec::new(),
            skipped: Vec::new(),
            skipped_families: Vec::new(),
            notifications: Vec::new(),
        }
    }

    /// Number of calls that reached the provider
    pub fn calls_placed(&self) -> usize {
        self.notifications
            .iter()
            .filter(|n| matches!(n, NotificationOutcome::Sent { .. } | NotificationOutcome::AlreadyActive { .. }))
            .count()
    }
}

/// A subject skipped for one family
#[derive(Debug, Clone, Serialize)]
pub struct SkippedSubject {
    /// Position or price alert id
    pub subject: String,
    /// Family that could not be evaluated
    pub family: MetricFamily,
    /// Error text
    pub reason: String,
}

/// A family skipped for a whole pass
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFamily {
    /// Family with invalid thresholds
    pub family: MetricFamily,
    /// Error text
    pub reason: String,
}

/// Fate of one outbound notification
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationOutcome {
    /// The notifier accepted the message
    Sent {
        /// Refractory key of the channel
        key: AlertKey,
        /// Notifier receipt
        receipt: NotificationReceipt,
    },
    /// The provider already had a call in progress; treated as sent
    AlreadyActive {
        /// Refractory key of the channel
        key: AlertKey,
    },
    /// The channel is inside its refractory period
    Suppressed {
        /// Refractory key of the channel
        key: AlertKey,
        /// When the channel was last used
        last_call: Option<DateTime<Utc>>,
    },
    /// No message in the batch may place a call
    LogOnly {
        /// Refractory key the batch would have used
        key: AlertKey,
    },
    /// Transport failure or timeout; retried by a later pass
    Failed {
        /// Refractory key of the channel
        key: AlertKey,
        /// Error text
        error: String,
    },
}

/// The alert engine.
///
/// [`run_once`](Self::run_once) is safe to call from anywhere while
/// [`run_forever`](Self::run_forever) is running: passes are single-flight,
/// so a concurrent call waits for the in-flight pass and then runs its own.
pub struct EvaluationCycle {
    source: Arc<dyn MetricSource>,
    config: Arc<dyn ConfigProvider>,
    notifier: Arc<dyn Notifier>,
    adapters: Vec<Box<dyn FamilyAdapter>>,
    state: Mutex<EngineState>,
}

impl EvaluationCycle {
    /// Create an engine evaluating every built-in family
    pub fn new(
        source: Arc<dyn MetricSource>,
        config: Arc<dyn ConfigProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            config,
            notifier,
            adapters: default_adapters(),
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Replace the family adapters
    pub fn with_adapters(mut self, adapters: Vec<Box<dyn FamilyAdapter>>) -> Self {
        self.adapters = adapters;
        self
    }

    /// Run one pass now
    pub async fn run_once(&self) -> Result<CycleReport> {
        let mut state = self.state.lock().await;
        self.pass(&mut state, Utc::now()).await
    }

    /// Run one pass with an explicit evaluation time
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut state = self.state.lock().await;
        self.pass(&mut state, now).await
    }

    /// Evaluate every `poll_interval` until `cancel` fires.
    ///
    /// Cancellation only interrupts the wait between passes; a pass in flight
    /// always completes, including its notification call.
    pub async fn run_forever(&self, poll_interval: Duration, cancel: CancellationToken) {
        let poll_interval = if poll_interval < MIN_POLL_INTERVAL {
            warn!(
                requested_ms = poll_interval.as_millis() as u64,
                "Poll interval too short, using the minimum"
            );
            MIN_POLL_INTERVAL
        } else {
            poll_interval
        };

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_ms = poll_interval.as_millis() as u64,
            "Alert monitor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Alert monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    // Reload reads the config file, keep it off the runtime threads
                    let config = self.config.clone();
                    match tokio::task::spawn_blocking(move || config.reload()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => debug!(error = %e, "Using previous configuration snapshot"),
                        Err(e) => warn!(error = %e, "Config reload task failed"),
                    }

                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Evaluation cycle failed");
                    }
                }
            }
        }
    }

    async fn pass(&self, state: &mut EngineState, now: DateTime<Utc>) -> Result<CycleReport> {
        let settings = self.config.current();
        let mut report = CycleReport::new(now, settings.monitor_enabled);
        let span = info_span!("evaluation_cycle", cycle_id = %report.cycle_id);

        async move {
            if !settings.monitor_enabled {
                info!("Alert monitor disabled, skipping cycle");
                return Ok(report);
            }

            // Read everything before touching state so a source failure leaves it intact
            let positions = self.source.list_subjects().await?;
            let price_alerts = self.source.list_standalone_alerts().await?;
            report.subjects_evaluated = positions.len();
            report.price_alerts_evaluated = price_alerts.len();

            let families = self.resolve_families(&settings, &mut report);

            for position in &positions {
                for (adapter, thresholds) in &families {
                    match evaluate_family(state, &settings, *adapter, thresholds, position, now) {
                        Ok(Some(message)) => {
                            info!(key = %message.key, level = ?message.severity, "Alert emitted");
                            report.messages.push(message);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(subject = %position.id, family = %adapter.family(), error = %e, "Skipping subject");
                            report.skipped.push(SkippedSubject {
                                subject: position.id.clone(),
                                family: adapter.family(),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }

            for alert in &price_alerts {
                match self.evaluate_price_alert(state, &settings, alert, now).await {
                    Ok(Some(message)) => {
                        info!(key = %message.key, "Price alert emitted");
                        report.messages.push(message);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(subject = %alert.id, error = %e, "Skipping price alert");
                        report.skipped.push(SkippedSubject {
                            subject: alert.id.clone(),
                            family: MetricFamily::PriceThreshold,
                            reason: e.to_string(),
                        });
                    }
                }
            }

            report.notifications = self.dispatch(state, &settings, &report.messages, now).await;

            info!(
                subjects = report.subjects_evaluated,
                messages = report.messages.len(),
                skipped = report.skipped.len(),
                calls = report.calls_placed(),
                "Evaluation cycle complete"
            );

            Ok::<_, Error>(report)
        }
        .instrument(span)
        .await
    }

    fn resolve_families<'a>(
        &'a self,
        settings: &'a AlertSettings,
        report: &mut CycleReport,
    ) -> Vec<(&'a dyn FamilyAdapter, &'a ThresholdConfig)> {
        let mut families = Vec::with_capacity(self.adapters.len());

        for adapter in &self.adapters {
            match settings.thresholds(adapter.family()) {
                Ok(Some(thresholds)) if thresholds.enabled => {
                    families.push((adapter.as_ref(), thresholds));
                }
                Ok(_) => debug!(family = %adapter.family(), "Family disabled"),
                Err(e) => {
                    warn!(family = %adapter.family(), error = %e, "Skipping family");
                    report.skipped_families.push(SkippedFamily {
                        family: adapter.family(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        families
    }

    async fn evaluate_price_alert(
        &self,
        state: &mut EngineState,
        settings: &AlertSettings,
        alert: &PriceAlert,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertMessage>> {
        let condition: PriceCondition = alert
            .condition
            .parse()
            .map_err(|e: String| Error::data(&alert.id, e))?;

        let trigger = match alert.trigger_value {
            Some(t) if t.is_finite() => t,
            _ => return Err(Error::data(&alert.id, "trigger_value is missing or not finite")),
        };

        let Some(sample) = self.source.latest_price(&alert.asset_type).await? else {
            debug!(subject = %alert.id, asset = %alert.asset_type, "No price available");
            return Ok(None);
        };
        let price = sample.current_price;

        if !condition.is_met(price, trigger) {
            return Ok(None);
        }

        // Single-level alert: no latch, cooldown only
        let key = AlertKey::price(&alert.asset_type);
        if !state.cooldown.allow(&key, now, settings.alert_cooldown) {
            debug!(key = %key, "Price alert in cooldown");
            return Ok(None);
        }

        Ok(Some(AlertMessage {
            key,
            family: MetricFamily::PriceThreshold,
            subject: alert.id.clone(),
            severity: Severity::High,
            text: format_price_message(alert, condition, trigger, price),
            call_allowed: true,
        }))
    }

    async fn dispatch(
        &self,
        state: &mut EngineState,
        settings: &AlertSettings,
        messages: &[AlertMessage],
        now: DateTime<Utc>,
    ) -> Vec<NotificationOutcome> {
        if messages.is_empty() {
            return Vec::new();
        }

        match settings.notification_policy {
            NotificationPolicy::Aggregate => {
                let text = messages
                    .iter()
                    .map(|m| m.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                let call_allowed = messages.iter().any(|m| m.call_allowed);

                vec![
                    self.deliver(state, settings, AlertKey::aggregated(), &text, call_allowed, now)
                        .await,
                ]
            }
            NotificationPolicy::PerAlert => {
                let mut outcomes = Vec::with_capacity(messages.len());
                for message in messages {
                    outcomes.push(
                        self.deliver(
                            state,
                            settings,
                            message.key.clone(),
                            &message.text,
                            message.call_allowed,
                            now,
                        )
                        .await,
                    );
                }
                outcomes
            }
        }
    }

    async fn deliver(
        &self,
        state: &mut EngineState,
        settings: &AlertSettings,
        key: AlertKey,
        text: &str,
        call_allowed: bool,
        now: DateTime<Utc>,
    ) -> NotificationOutcome {
        if !call_allowed {
            info!(key = %key, message = %text, "Calls disabled for these levels, alert logged only");
            return NotificationOutcome::LogOnly { key };
        }

        if !state.refractory.is_open(&key, now, settings.call_refractory) {
            let last_call = state.refractory.last_call(&key);
            info!(key = %key, last_call = ?last_call, "Call suppressed, refractory period active");
            return NotificationOutcome::Suppressed { key, last_call };
        }

        let timeout = settings.notification_timeout;
        let result = match tokio::time::timeout(timeout, self.notifier.send(text)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(timeout)),
        };

        match result {
            Ok(receipt) => {
                state.refractory.record_call(&key, now);
                info!(key = %key, channel = %receipt.channel, id = ?receipt.id, "Notification sent");
                NotificationOutcome::Sent { key, receipt }
            }
            Err(NotifyError::AlreadyActive) => {
                state.refractory.record_call(&key, now);
                info!(key = %key, "Call already active for contact, treating as sent");
                NotificationOutcome::AlreadyActive { key }
            }
            Err(e) => {
                error!(key = %key, error = %e, "Notification failed");
                NotificationOutcome::Failed {
                    key,
                    error: e.to_string(),
                }
            }
        }
    }
}

/// classify -> latch -> cooldown for one family of one position
fn evaluate_family(
    state: &mut EngineState,
    settings: &AlertSettings,
    adapter: &dyn FamilyAdapter,
    thresholds: &ThresholdConfig,
    position: &Position,
    now: DateTime<Utc>,
) -> Result<Option<AlertMessage>> {
    let value = adapter.value(position)?;

    let Some(severity) = classify(value, thresholds) else {
        return Ok(None);
    };

    debug!(subject = %position.id, family = %adapter.family(), value, level = ?severity, "Classified");

    if !state.latch.should_notify(&adapter.latch_key(position), severity) {
        return Ok(None);
    }

    let key = adapter.cooldown_key(position, severity);
    if !state.cooldown.allow(&key, now, settings.alert_cooldown) {
        debug!(key = %key, "Alert in cooldown");
        return Ok(None);
    }

    Ok(Some(AlertMessage {
        key,
        family: adapter.family(),
        subject: position.id.clone(),
        severity,
        text: adapter.format(position, value, severity),
        call_allowed: thresholds.call_allowed(severity),
    }))
}

fn format_price_message(alert: &PriceAlert, condition: PriceCondition, trigger: f64, price: f64) -> String {
    let mut head = asset_display_name(&alert.asset_type);

    let side = capitalize(alert.position_type.as_deref().unwrap_or_default());
    if !side.is_empty() {
        head.push(' ');
        head.push_str(&side);
    }

    if let Some(wallet) = alert.wallet_name.as_deref().filter(|w| *w != "Unknown") {
        head.push_str(", Wallet: ");
        head.push_str(wallet);
    }

    format!(
        "Price ALERT: {head} - Condition: {}, Trigger: {trigger}, Current: {price}",
        condition.as_str()
    )
}
