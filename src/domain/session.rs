use serde::Serialize;

use super::cross_reference::TransactionIdSource;
use super::models::LogEvent;
use super::session_metrics::{ErrorRecord, SessionMetrics, StartMode};
use super::session_outcome::{Outcome, primary_error};
use super::session_segmenter::{SessionBounds, StopType};
use super::timestamp::format_timestamp;

/// One reconstructed charging session as reported to callers.
///
/// Positions (`*_index`) point into the connector stream; `*_seq` values
/// point into the chronological log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub connector_id: u32,
    pub start_index: usize,
    pub stop_index: usize,
    pub window_end_index: usize,
    pub start_seq: usize,
    pub stop_seq: usize,
    pub window_end_seq: usize,
    pub stop_type: StopType,
    pub transaction_id: Option<String>,
    pub transaction_id_source: Option<TransactionIdSource>,
    pub start_mode: Option<StartMode>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration_minutes: Option<f64>,
    pub reached_charging: bool,
    pub meter_start_wh: Option<f64>,
    pub meter_stop_wh: Option<f64>,
    pub energy_kwh: Option<f64>,
    pub peak_power_kw: Option<f64>,
    pub max_soc: Option<f64>,
    pub reason: Option<String>,
    pub stop_reason: Option<String>,
    pub errors: Vec<ErrorRecord>,
    pub primary_error: Option<String>,
    pub outcome: Outcome,
}

impl Session {
    pub fn assemble(
        connector_id: u32,
        events: &[&LogEvent],
        bounds: &SessionBounds,
        metrics: SessionMetrics,
        outcome: Outcome,
    ) -> Self {
        let primary_error = primary_error(outcome, &metrics);
        let (transaction_id, transaction_id_source) = match &bounds.transaction {
            Some(resolved) => (Some(resolved.id.clone()), Some(resolved.source)),
            None => (None, None),
        };

        Self {
            connector_id,
            start_index: bounds.start,
            stop_index: bounds.stop,
            window_end_index: bounds.window_end,
            start_seq: events[bounds.start].seq,
            stop_seq: events[bounds.stop].seq,
            window_end_seq: events[bounds.window_end].seq,
            stop_type: bounds.stop_type,
            transaction_id,
            transaction_id_source,
            start_mode: metrics.start_mode,
            start_time: metrics.start_time.map(format_timestamp),
            end_time: metrics.end_time.map(format_timestamp),
            duration_minutes: metrics.duration_minutes,
            reached_charging: bounds.reached_charging,
            meter_start_wh: metrics.meter_start_wh,
            meter_stop_wh: metrics.meter_stop_wh,
            energy_kwh: metrics.energy_kwh,
            peak_power_kw: metrics.peak_power_kw,
            max_soc: metrics.max_soc,
            reason: metrics.reason,
            stop_reason: metrics.stop_reason,
            errors: metrics.errors,
            primary_error,
            outcome,
        }
    }
}
