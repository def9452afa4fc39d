//! Alert evaluation for Sonic
//!
//! Threshold classification, the severity latch, cooldown and refractory
//! gates, metric family adapters, notifiers and the engine that ties them
//! together.

mod classifier;
mod evaluator;
mod families;
mod gate;
mod notifier;
mod state;

pub use classifier::classify;
pub use evaluator::{
    CycleReport, EvaluationCycle, NotificationOutcome, SkippedFamily, SkippedSubject,
    MIN_POLL_INTERVAL,
};
pub use families::{
    default_adapters, FamilyAdapter, HeatIndexAdapter, ProfitAdapter, TravelPercentAdapter,
};
pub use gate::{CooldownGate, NotificationGate, TimedGate};
pub use notifier::{LogNotifier, NotificationReceipt, Notifier, NotifyError, TwilioNotifier};
pub use state::AlertStateStore;
