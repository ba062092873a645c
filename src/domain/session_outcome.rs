use serde::Serialize;
use thiserror::Error;

use super::fault_code::is_real_error;
use super::session_metrics::SessionMetrics;
use super::session_segmenter::{SessionBounds, StopType};

/// SoC at or above this value means the vehicle was full.
pub const FULL_SOC_PERCENT: f64 = 99.0;

const SUCCESSFUL_STOP_REASONS: [&str; 4] = ["NoError", "Local", "Remote", "UserRequestedStop"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Successful,
    Failed,
    Incomplete,
    #[serde(rename = "Pre-Charging Failure")]
    PreChargingFailure,
}

#[derive(Debug, Error, PartialEq)]
pub enum ClassificationError {
    #[error("session stop {stop} precedes start {start}")]
    InvertedBounds { start: usize, stop: usize },
    #[error("error window end {window_end} precedes stop {stop}")]
    WindowBeforeStop { stop: usize, window_end: usize },
}

#[derive(Debug, Clone, Copy)]
enum Rule {
    IncompleteStop,
    NeverCharged,
    VehicleFull,
    FaultedStop,
    UnclearStop,
    Reason,
    StopReason,
    ErrorPresence,
}

/// Evaluated in order; the first rule that yields an outcome decides.
const RULES: [Rule; 8] = [
    Rule::IncompleteStop,
    Rule::NeverCharged,
    Rule::VehicleFull,
    Rule::FaultedStop,
    Rule::UnclearStop,
    Rule::Reason,
    Rule::StopReason,
    Rule::ErrorPresence,
];

/// Classifies a session. Errors describe inconsistent inputs; callers
/// record the session as `Failed` in that case.
pub fn classify(
    bounds: &SessionBounds,
    metrics: &SessionMetrics,
) -> Result<Outcome, ClassificationError> {
    validate(bounds)?;

    let outcome = RULES
        .iter()
        .find_map(|rule| evaluate(*rule, bounds, metrics))
        .unwrap_or_else(|| error_presence(metrics));

    Ok(outcome)
}

fn validate(bounds: &SessionBounds) -> Result<(), ClassificationError> {
    if bounds.stop < bounds.start {
        return Err(ClassificationError::InvertedBounds {
            start: bounds.start,
            stop: bounds.stop,
        });
    }
    if bounds.window_end < bounds.stop {
        return Err(ClassificationError::WindowBeforeStop {
            stop: bounds.stop,
            window_end: bounds.window_end,
        });
    }
    Ok(())
}

fn evaluate(rule: Rule, bounds: &SessionBounds, metrics: &SessionMetrics) -> Option<Outcome> {
    match rule {
        Rule::IncompleteStop => {
            (bounds.stop_type == StopType::Incomplete).then_some(Outcome::Incomplete)
        }
        Rule::NeverCharged => (!bounds.reached_charging).then_some(Outcome::PreChargingFailure),
        Rule::VehicleFull => metrics
            .max_soc
            .filter(|soc| soc.is_finite() && *soc >= FULL_SOC_PERCENT)
            .map(|_| Outcome::Successful),
        Rule::FaultedStop => (bounds.stop_type == StopType::Faulted).then_some(Outcome::Failed),
        // Reason and error checks only apply to sessions with a recognised stop.
        Rule::UnclearStop => {
            (bounds.stop_type == StopType::NoClearStop).then_some(Outcome::Failed)
        }
        Rule::Reason => match metrics.reason.as_deref()? {
            "Remote" | "Local" => Some(Outcome::Successful),
            "EVDisconnected" => Some(Outcome::Failed),
            "Reboot" => Some(error_presence(metrics)),
            _ => None,
        },
        Rule::StopReason => {
            let stop_reason = metrics.stop_reason.as_deref()?;
            Some(if SUCCESSFUL_STOP_REASONS.contains(&stop_reason) {
                Outcome::Successful
            } else {
                Outcome::Failed
            })
        }
        Rule::ErrorPresence => Some(error_presence(metrics)),
    }
}

fn error_presence(metrics: &SessionMetrics) -> Outcome {
    if has_real_errors(metrics) {
        Outcome::Failed
    } else {
        Outcome::Successful
    }
}

pub fn has_real_errors(metrics: &SessionMetrics) -> bool {
    metrics
        .errors
        .iter()
        .flat_map(|record| record.values())
        .any(is_real_error)
}

/// The error a failed session is reported under: the first real error value
/// in the session, or `Precharging Failure` when charging never started.
pub fn primary_error(outcome: Outcome, metrics: &SessionMetrics) -> Option<String> {
    match outcome {
        Outcome::PreChargingFailure => Some("Precharging Failure".to_string()),
        Outcome::Failed => metrics
            .errors
            .iter()
            .flat_map(|record| record.values())
            .find(|value| is_real_error(value))
            .map(str::to_string)
            .or_else(|| metrics.reason.clone())
            .or_else(|| metrics.stop_reason.clone()),
        Outcome::Successful | Outcome::Incomplete => None,
    }
}
