use chrono::Duration;
use serde::Serialize;

use super::cross_reference::{
    AssignedTransactions, ResolvedTransaction, SearchWindow, resolve_transaction_id,
};
use super::models::{ConnectorStream, LogEvent, Status};

/// Events this long after the stop still belong to the session.
pub const ERROR_WINDOW_MINUTES: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopType {
    #[serde(rename = "meterStop")]
    MeterStop,
    Available,
    Faulted,
    Finishing,
    Incomplete,
    #[serde(rename = "No_Clear_Stop")]
    NoClearStop,
}

/// Positions into a connector stream for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBounds {
    pub start: usize,
    pub stop: usize,
    pub window_end: usize,
    /// Exclusive end of the search boundary.
    pub boundary_end: usize,
    pub stop_type: StopType,
    pub transaction: Option<ResolvedTransaction>,
    pub reached_charging: bool,
    /// The boundary runs to the end of the stream.
    pub is_final: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segmentation {
    pub sessions: Vec<SessionBounds>,
    pub dropped_zero_length: usize,
}

#[derive(Debug, Clone, Copy)]
enum StopRule {
    MatchingMeterStop,
    StatusTransition,
    Fallback,
}

const STOP_RULES: [StopRule; 3] = [
    StopRule::MatchingMeterStop,
    StopRule::StatusTransition,
    StopRule::Fallback,
];

/// Splits a connector stream into sessions, one per `Preparing` event.
///
/// Transaction ids are resolved in stream order so that earlier sessions
/// claim their ids first.
pub fn segment(stream: &ConnectorStream<'_>) -> Segmentation {
    let events = stream.events.as_slice();
    let starts: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, event)| event.has_status(&Status::Preparing))
        .map(|(position, _)| position)
        .collect();

    let mut segmentation = Segmentation::default();
    let mut assigned = AssignedTransactions::default();
    let mut previous_start = None;

    for (index, &start) in starts.iter().enumerate() {
        let end = starts.get(index + 1).copied().unwrap_or(events.len());
        let is_final = end == events.len();

        if end - start <= 1 && !is_final {
            segmentation.dropped_zero_length += 1;
            continue;
        }

        let window = SearchWindow {
            start,
            end,
            previous_start,
            reached_charging: events[start..end].iter().any(|event| event.is_charging()),
        };
        let transaction = resolve_transaction_id(events, stream.connector_id, &window, &assigned);
        if let Some(resolved) = &transaction {
            assigned.record(&resolved.id);
        }

        let transaction_id = transaction.as_ref().map(|resolved| resolved.id.as_str());
        let (stop, stop_type) = detect_stop(events, start, end, transaction_id, is_final);
        let window_end = error_window_end(events, stop, end);

        segmentation.sessions.push(SessionBounds {
            start,
            stop,
            window_end,
            boundary_end: end,
            stop_type,
            transaction,
            reached_charging: events[start..=stop].iter().any(|event| event.is_charging()),
            is_final,
        });
        previous_start = Some(start);
    }

    segmentation
}

fn detect_stop(
    events: &[&LogEvent],
    start: usize,
    end: usize,
    transaction_id: Option<&str>,
    is_final: bool,
) -> (usize, StopType) {
    let last = end - 1;
    STOP_RULES
        .iter()
        .find_map(|rule| match rule {
            StopRule::MatchingMeterStop => {
                let transaction_id = transaction_id?;
                (start..end)
                    .find(|&position| {
                        let event = events[position];
                        event.has_status(&Status::MeterStop)
                            && event.transaction_id.as_deref() == Some(transaction_id)
                    })
                    .map(|position| (position, StopType::MeterStop))
            }
            StopRule::StatusTransition => (start..end).find_map(|position| {
                let stop_type = match events[position].status.as_ref()? {
                    Status::Available => StopType::Available,
                    Status::Faulted => StopType::Faulted,
                    Status::Finishing => StopType::Finishing,
                    _ => return None,
                };
                Some((position, stop_type))
            }),
            StopRule::Fallback if events[last].is_charging() || is_final => {
                Some((last, StopType::Incomplete))
            }
            StopRule::Fallback => Some((last, StopType::NoClearStop)),
        })
        .unwrap_or((last, StopType::NoClearStop))
}

/// Last position in `[stop, end)` whose device time is within the error
/// window of the stop event. Falls back to `stop` when the stop has no time.
fn error_window_end(events: &[&LogEvent], stop: usize, end: usize) -> usize {
    let Some(stop_time) = events[stop].device_time else {
        return stop;
    };
    let limit = stop_time + Duration::minutes(ERROR_WINDOW_MINUTES);

    (stop..end)
        .rev()
        .find(|&position| {
            events[position]
                .device_time
                .is_some_and(|time| time <= limit)
        })
        .unwrap_or(stop)
}
