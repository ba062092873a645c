use chrono::NaiveDateTime;
use serde::Serialize;

use super::fault_code::{SESSION_IGNORED_VALUES, error_code_label, is_ignored, stop_reason_label};
use super::models::{Command, LogEvent};
use super::numeric::round_to;
use super::session_segmenter::SessionBounds;
use super::timestamp::format_timestamp;

pub const AUTO_START_MARKER: &str = "VID";
pub const RFID_TAG_LENGTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StartMode {
    #[serde(rename = "Auto-Start")]
    AutoStart,
    #[serde(rename = "RFID-Start")]
    RfidStart,
    #[serde(rename = "Remote-Start")]
    RemoteStart,
}

impl StartMode {
    pub fn from_id_tag(id_tag: &str) -> Self {
        let id_tag = id_tag.trim();
        if id_tag.contains(AUTO_START_MARKER) {
            Self::AutoStart
        } else if id_tag.chars().count() == RFID_TAG_LENGTH {
            Self::RfidStart
        } else {
            Self::RemoteStart
        }
    }
}

/// Error-bearing fields of one event inside a session, ignored values removed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub seq: usize,
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl ErrorRecord {
    fn from_event(event: &LogEvent) -> Option<Self> {
        let keep = |value: &Option<String>| {
            value
                .as_deref()
                .filter(|value| !is_ignored(value, SESSION_IGNORED_VALUES))
                .map(str::to_string)
        };

        let info = keep(&event.info);
        let vendor_error_code = keep(&event.vendor_error_code);
        let record = Self {
            seq: event.seq,
            timestamp: event.device_time.map(format_timestamp),
            error_code: keep(&event.error_code).map(|code| {
                error_code_label(&code, info.as_deref(), vendor_error_code.as_deref())
            }),
            info,
            vendor_error_code,
            reason: keep(&event.reason),
            stop_reason: keep(&event.stop_reason).map(|value| stop_reason_label(&value)),
        };

        (!record.is_empty()).then_some(record)
    }

    fn is_empty(&self) -> bool {
        self.values().next().is_none()
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        [
            &self.error_code,
            &self.info,
            &self.vendor_error_code,
            &self.reason,
            &self.stop_reason,
        ]
        .into_iter()
        .filter_map(|value| value.as_deref())
    }
}

/// Derived facts about one session. All numbers are finite or `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetrics {
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub duration_minutes: Option<f64>,
    pub start_mode: Option<StartMode>,
    pub meter_start_wh: Option<f64>,
    pub meter_stop_wh: Option<f64>,
    pub energy_kwh: Option<f64>,
    pub peak_power_kw: Option<f64>,
    pub max_soc: Option<f64>,
    pub reason: Option<String>,
    pub stop_reason: Option<String>,
    pub errors: Vec<ErrorRecord>,
}

/// Computes session metrics over three ranges of the connector stream:
/// the session itself (`start..=stop`), the error window
/// (`stop..=window_end`) and their union.
pub fn build_metrics(events: &[&LogEvent], bounds: &SessionBounds) -> SessionMetrics {
    let session = &events[bounds.start..=bounds.stop];
    let window = &events[bounds.stop..=bounds.window_end];
    let extent = &events[bounds.start..=bounds.window_end];

    let start_time = session.iter().find_map(|event| event.device_time);
    let end_time = window.iter().rev().find_map(|event| event.device_time);
    let duration_minutes = match (start_time, end_time) {
        (Some(start), Some(end)) => {
            round_to((end - start).num_milliseconds() as f64 / 60_000.0, 2)
        }
        _ => None,
    };

    let start_mode = session
        .iter()
        .filter(|event| event.command == Command::StartTransactionRequest)
        .find_map(|event| event.id_tag.as_deref())
        .map(StartMode::from_id_tag);

    let meter_start_wh = session.iter().find_map(|event| event.meter_start);
    let meter_stop_wh = extent
        .iter()
        .rev()
        .find_map(|event| event.meter_stop)
        .or_else(|| {
            extent
                .iter()
                .rev()
                .find_map(|event| event.samples.energy_register_wh)
        });
    let energy_kwh = match (meter_start_wh, meter_stop_wh) {
        (Some(start), Some(stop)) => round_to((stop - start) / 1000.0, 3),
        _ => None,
    };

    let peak_power_kw = extent
        .iter()
        .filter_map(|event| event.samples.power_w)
        .reduce(f64::max)
        .and_then(|watts| round_to(watts / 1000.0, 2));
    let max_soc = session
        .iter()
        .filter_map(|event| event.samples.soc_ev)
        .reduce(f64::max);

    let reason = last_meaningful(window, |event| event.reason.as_deref())
        .or_else(|| last_meaningful(session, |event| event.reason.as_deref()));
    let stop_reason = last_meaningful(window, |event| event.stop_reason.as_deref())
        .or_else(|| last_meaningful(session, |event| event.stop_reason.as_deref()));

    let errors = extent
        .iter()
        .filter_map(|event| ErrorRecord::from_event(event))
        .collect();

    SessionMetrics {
        start_time,
        end_time,
        duration_minutes,
        start_mode,
        meter_start_wh,
        meter_stop_wh,
        energy_kwh,
        peak_power_kw,
        max_soc,
        reason,
        stop_reason,
        errors,
    }
}

fn last_meaningful(range: &[&LogEvent], field: fn(&LogEvent) -> Option<&str>) -> Option<String> {
    range
        .iter()
        .rev()
        .filter_map(|event| field(event))
        .find(|value| !is_ignored(value, SESSION_IGNORED_VALUES))
        .map(str::to_string)
}
