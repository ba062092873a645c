use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use super::fault_code::{IDLE_IGNORED_VALUES, error_code_label, is_ignored, is_other_error};
use super::models::{Command, ConnectorStream, LogEvent, Status};
use super::session_segmenter::SessionBounds;
use super::timestamp::format_timestamp;

/// Events this long after a session's window still count as part of it.
pub const IDLE_BUFFER_MINUTES: i64 = 2;
/// Repeats of the same fault within this span collapse into one incident.
pub const DEDUP_WINDOW_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultCategory {
    Warning,
    Fault,
}

/// A fault reported while no session was active.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleFaultIncident {
    pub seq: usize,
    pub connector_id: u32,
    pub timestamp: Option<String>,
    pub last_seen: Option<String>,
    pub command: String,
    pub status: Option<String>,
    pub error_code: Option<String>,
    pub info: Option<String>,
    pub vendor_error_code: Option<String>,
    pub category: FaultCategory,
    pub occurrences: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Signature {
    connector_id: u32,
    error_code: Option<String>,
    info: Option<String>,
    vendor_error_code: Option<String>,
}

struct Retained {
    index: usize,
    at: Option<NaiveDateTime>,
    status: Option<Status>,
}

/// Finds status notifications carrying errors outside every session.
///
/// A session covers `start..=window_end` plus any later events stamped within
/// the idle buffer of the window end. Repeats of one fault signature with the
/// same status inside the dedup window are folded into the retained incident.
pub fn detect_idle_faults(
    stream: &ConnectorStream<'_>,
    sessions: &[SessionBounds],
) -> Vec<IdleFaultIncident> {
    let events = stream.events.as_slice();
    let covered = session_coverage(events, sessions);
    let dedup_window = Duration::minutes(DEDUP_WINDOW_MINUTES);

    let mut incidents: Vec<IdleFaultIncident> = Vec::new();
    let mut retained: HashMap<Signature, Retained> = HashMap::new();

    for (position, event) in events.iter().enumerate() {
        if covered[position] || event.command != Command::StatusNotificationRequest {
            continue;
        }
        let keep = |value: &Option<String>| {
            value
                .as_deref()
                .filter(|value| !is_ignored(value, IDLE_IGNORED_VALUES))
                .map(str::to_string)
        };
        let signature = Signature {
            connector_id: event.connector_id.unwrap_or(stream.connector_id),
            error_code: keep(&event.error_code),
            info: keep(&event.info),
            vendor_error_code: keep(&event.vendor_error_code),
        };
        if signature.error_code.is_none()
            && signature.info.is_none()
            && signature.vendor_error_code.is_none()
        {
            continue;
        }

        if let Some(previous) = retained.get(&signature)
            && previous.status == event.status
            && let (Some(first), Some(now)) = (previous.at, event.device_time)
            && now >= first
            && now - first <= dedup_window
        {
            let incident = &mut incidents[previous.index];
            incident.occurrences += 1;
            incident.last_seen = Some(format_timestamp(now));
            continue;
        }

        retained.insert(
            signature.clone(),
            Retained {
                index: incidents.len(),
                at: event.device_time,
                status: event.status.clone(),
            },
        );
        incidents.push(incident_from(event, signature));
    }

    incidents
}

fn incident_from(event: &LogEvent, signature: Signature) -> IdleFaultIncident {
    let error_code = signature.error_code.map(|code| {
        error_code_label(
            &code,
            signature.info.as_deref(),
            signature.vendor_error_code.as_deref(),
        )
    });
    let category = categorize(event.status.as_ref(), error_code.as_deref());
    let timestamp = event.device_time.map(format_timestamp);

    IdleFaultIncident {
        seq: event.seq,
        connector_id: signature.connector_id,
        last_seen: timestamp.clone(),
        timestamp,
        command: event.command.as_str().to_string(),
        status: event.status.as_ref().map(|status| status.as_str().to_string()),
        error_code,
        info: signature.info,
        vendor_error_code: signature.vendor_error_code,
        category,
        occurrences: 1,
    }
}

/// Non-`OtherError` faults reported while the connector looks healthy are
/// warnings; everything else is a fault.
fn categorize(status: Option<&Status>, error_code: Option<&str>) -> FaultCategory {
    let healthy = matches!(
        status,
        Some(Status::Available | Status::Preparing | Status::Finishing)
    );
    let other_error = error_code.is_some_and(is_other_error);
    if healthy && !other_error {
        FaultCategory::Warning
    } else {
        FaultCategory::Fault
    }
}

fn session_coverage(events: &[&LogEvent], sessions: &[SessionBounds]) -> Vec<bool> {
    let mut covered = vec![false; events.len()];
    let buffer = Duration::minutes(IDLE_BUFFER_MINUTES);

    for session in sessions {
        let window_end = session.window_end.min(events.len().saturating_sub(1));
        for flag in covered.iter_mut().take(window_end + 1).skip(session.start) {
            *flag = true;
        }

        let Some(window_end_time) = events[window_end].device_time else {
            continue;
        };
        for (position, event) in events.iter().enumerate().skip(window_end + 1) {
            let Some(time) = event.device_time else {
                continue;
            };
            if time > window_end_time + buffer {
                break;
            }
            if time >= window_end_time {
                covered[position] = true;
            }
        }
    }

    covered
}
