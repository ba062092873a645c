use std::thread;

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::cross_reference::backfill_connector_ids;
use super::idle_faults::detect_idle_faults;
use super::models::{ConnectorStream, LogEvent, LogRow, RowOrder, Status};
use super::ocpp_payload::extract_fields;
use super::session::Session;
use super::session_metrics::{SessionMetrics, build_metrics};
use super::session_outcome::{Outcome, classify};
use super::session_segmenter::{SessionBounds, StopType, segment};
use super::summary::{ConnectorSummary, summarize};
use super::timestamp::{format_timestamp, parse_timestamp};

pub const DEFAULT_CONNECTORS: [u32; 2] = [1, 2];

#[derive(Debug, Error, PartialEq)]
pub enum AnalysisError {
    #[error("log not recognizable: none of {rows} rows carries a JSON payload")]
    UnrecognizedLog { rows: usize },
    #[error("analysis of connector {connector_id} panicked")]
    ConnectorWorkerPanicked { connector_id: u32 },
}

/// Descriptive metadata for charge points, keyed by charge point id.
pub trait ChargePointDirectory {
    fn lookup(&self, charge_point_id: &str) -> Option<Value>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDirectory;

impl ChargePointDirectory for NoDirectory {
    fn lookup(&self, _charge_point_id: &str) -> Option<Value> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisOptions {
    pub row_order: RowOrder,
    pub connectors: Vec<u32>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            row_order: RowOrder::Chronological,
            connectors: DEFAULT_CONNECTORS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQuality {
    pub rows_total: usize,
    pub rows_unparseable_payload: usize,
    pub rows_missing_timestamp: usize,
    pub noise_rows_dropped: usize,
    pub connector_ids_backfilled: usize,
    pub sessions_without_transaction_id: usize,
    pub sessions_dropped_zero_length: usize,
    pub sessions_dropped_trailing: usize,
    pub classifications_defaulted: usize,
}

impl DataQuality {
    fn absorb(&mut self, connector: &ConnectorQuality) {
        self.sessions_without_transaction_id += connector.sessions_without_transaction_id;
        self.sessions_dropped_zero_length += connector.sessions_dropped_zero_length;
        self.sessions_dropped_trailing += connector.sessions_dropped_trailing;
        self.classifications_defaulted += connector.classifications_defaulted;
    }
}

#[derive(Debug, Clone, Default)]
struct ConnectorQuality {
    sessions_without_transaction_id: usize,
    sessions_dropped_zero_length: usize,
    sessions_dropped_trailing: usize,
    classifications_defaulted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorReport {
    pub connector_id: u32,
    pub sessions: Vec<Session>,
    pub summary: ConnectorSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub charge_point_id: Option<String>,
    pub charge_point: Option<Value>,
    pub date_range: Option<DateRange>,
    pub connectors: Vec<ConnectorReport>,
    pub data_quality: DataQuality,
}

/// Reconstructs and classifies the sessions of one charge point log.
///
/// Rows are normalized to chronological order first, so a log and its
/// reversed copy (with `RowOrder::Reversed`) give the same report. Connector
/// streams are analysed in parallel over a shared, frozen event list.
pub fn analyze(
    rows: &[LogRow],
    options: &AnalysisOptions,
    directory: &dyn ChargePointDirectory,
) -> Result<AnalysisReport, AnalysisError> {
    let mut quality = DataQuality {
        rows_total: rows.len(),
        ..DataQuality::default()
    };

    let ordered: Vec<&LogRow> = match options.row_order {
        RowOrder::Chronological => rows.iter().collect(),
        RowOrder::Reversed => rows.iter().rev().collect(),
    };

    let mut structured_rows = 0;
    let mut events: Vec<LogEvent> = Vec::with_capacity(ordered.len());
    for (seq, row) in ordered.iter().enumerate() {
        let fields = extract_fields(row.payload.as_deref().unwrap_or_default());
        if fields.structured {
            structured_rows += 1;
        } else {
            quality.rows_unparseable_payload += 1;
        }

        let device_time = row.real_time.as_deref().and_then(parse_timestamp);
        if device_time.is_none() {
            quality.rows_missing_timestamp += 1;
        }
        let received_time = row.received_time.as_deref().and_then(parse_timestamp);

        let event = LogEvent::from_fields(seq, row, device_time, received_time, fields);
        if event.command.is_noise() {
            quality.noise_rows_dropped += 1;
            continue;
        }
        events.push(event);
    }

    if !rows.is_empty() && structured_rows == 0 {
        warn!(rows = rows.len(), "rejecting log without any JSON payload");
        return Err(AnalysisError::UnrecognizedLog { rows: rows.len() });
    }

    quality.connector_ids_backfilled = backfill_connector_ids(&mut events);
    let events = events;

    let outcomes: Vec<Result<(ConnectorReport, ConnectorQuality), AnalysisError>> =
        thread::scope(|scope| {
            let workers: Vec<_> = options
                .connectors
                .iter()
                .map(|&connector_id| {
                    let events = &events;
                    (
                        connector_id,
                        scope.spawn(move || analyze_connector(events, connector_id)),
                    )
                })
                .collect();

            workers
                .into_iter()
                .map(|(connector_id, worker)| {
                    worker
                        .join()
                        .map_err(|_| AnalysisError::ConnectorWorkerPanicked { connector_id })
                })
                .collect()
        });

    let mut connectors = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        let (report, connector_quality) = outcome?;
        quality.absorb(&connector_quality);
        connectors.push(report);
    }

    let charge_point_id = rows
        .iter()
        .filter_map(|row| row.charge_point_id.as_deref())
        .map(str::trim)
        .find(|id| !id.is_empty())
        .map(str::to_string);
    let charge_point = charge_point_id
        .as_deref()
        .and_then(|id| directory.lookup(id));

    let report = AnalysisReport {
        charge_point_id,
        charge_point,
        date_range: date_range(&events),
        connectors,
        data_quality: quality,
    };

    info!(
        rows = report.data_quality.rows_total,
        events = events.len(),
        connectors = report.connectors.len(),
        sessions = report
            .connectors
            .iter()
            .map(|connector| connector.sessions.len())
            .sum::<usize>(),
        "log analysed"
    );

    Ok(report)
}

fn analyze_connector(events: &[LogEvent], connector_id: u32) -> (ConnectorReport, ConnectorQuality) {
    let stream = ConnectorStream::partition(events, connector_id);
    if stream.is_empty() {
        debug!(connector_id, "no events for connector");
    }
    let segmentation = segment(&stream);
    let mut quality = ConnectorQuality {
        sessions_dropped_zero_length: segmentation.dropped_zero_length,
        ..ConnectorQuality::default()
    };

    let mut sessions = Vec::with_capacity(segmentation.sessions.len());
    for bounds in &segmentation.sessions {
        let metrics = build_metrics(&stream.events, bounds);
        if is_trailing_artifact(&stream.events, bounds, &metrics) {
            debug!(connector_id, start = bounds.start, "dropping trailing artifact session");
            quality.sessions_dropped_trailing += 1;
            continue;
        }

        let outcome = classify(bounds, &metrics).unwrap_or_else(|err| {
            warn!(connector_id, start = bounds.start, error = %err, "classification failed; recording session as failed");
            quality.classifications_defaulted += 1;
            Outcome::Failed
        });
        if bounds.transaction.is_none() {
            quality.sessions_without_transaction_id += 1;
        }
        debug!(
            connector_id,
            start = bounds.start,
            stop = bounds.stop,
            stop_type = ?bounds.stop_type,
            outcome = ?outcome,
            "session classified"
        );

        sessions.push(Session::assemble(
            connector_id,
            &stream.events,
            bounds,
            metrics,
            outcome,
        ));
    }

    let incidents = detect_idle_faults(&stream, &segmentation.sessions);
    let summary = summarize(&sessions, &incidents);
    debug!(
        connector_id,
        events = stream.len(),
        sessions = sessions.len(),
        idle_incidents = incidents.len(),
        "connector analysed"
    );

    (
        ConnectorReport {
            connector_id,
            sessions,
            summary,
        },
        quality,
    )
}

/// A final session cut off mid-charge with nothing tying it to a transaction
/// end: no reason, no stopReason, no meterStop and no transaction id.
fn is_trailing_artifact(
    events: &[&LogEvent],
    bounds: &SessionBounds,
    metrics: &SessionMetrics,
) -> bool {
    bounds.is_final
        && bounds.stop_type == StopType::Incomplete
        && bounds.reached_charging
        && bounds.transaction.is_none()
        && metrics.reason.is_none()
        && metrics.stop_reason.is_none()
        && !events[bounds.start..=bounds.window_end]
            .iter()
            .any(|event| event.has_status(&Status::MeterStop))
}

fn date_range(events: &[LogEvent]) -> Option<DateRange> {
    let times = || events.iter().filter_map(|event| event.device_time);
    let start: NaiveDateTime = times().min()?;
    let end: NaiveDateTime = times().max()?;
    Some(DateRange {
        start: format_timestamp(start),
        end: format_timestamp(end),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::{AnalysisError, AnalysisOptions, ChargePointDirectory, NoDirectory, analyze};
    use crate::domain::models::{LogRow, RowOrder};
    use crate::domain::session_outcome::Outcome;
    use crate::domain::session_metrics::StartMode;
    use crate::domain::idle_faults::FaultCategory;
    use crate::test_support::{fixture_rows, row};

    struct StaticDirectory;

    impl ChargePointDirectory for StaticDirectory {
        fn lookup(&self, charge_point_id: &str) -> Option<Value> {
            (charge_point_id == "CP-001").then(|| json!({"site": "Depot North"}))
        }
    }

    fn scenario_a_rows() -> Vec<LogRow> {
        vec![
            row(1, "16/10/2026 10:00:00", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Preparing", "errorCode": "NoError"})),
            row(2, "16/10/2026 10:00:05", "StartTransactionRequest", json!({"connectorId": 1, "idTag": "VID123", "meterStart": 1000})),
            row(2, "16/10/2026 10:00:06", "StartTransactionResponse", json!({"transactionId": 7, "idTagInfo": {"status": "Accepted"}})),
            row(3, "16/10/2026 10:00:10", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Charging", "errorCode": "NoError"})),
            row(4, "16/10/2026 10:30:00", "StopTransactionRequest", json!({"transactionId": 7, "meterStop": 5000, "reason": "Local"})),
            row(5, "16/10/2026 10:30:05", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Finishing", "errorCode": "NoError"})),
        ]
    }

    fn options(row_order: RowOrder) -> AnalysisOptions {
        AnalysisOptions {
            row_order,
            connectors: vec![1],
        }
    }

    #[test]
    fn scenario_a_auto_start_successful_session() {
        let report = analyze(&scenario_a_rows(), &options(RowOrder::Chronological), &NoDirectory)
            .expect("analysis should succeed");

        let sessions = &report.connectors[0].sessions;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].start_mode, Some(StartMode::AutoStart));
        assert_eq!(sessions[0].energy_kwh, Some(4.0));
        assert_eq!(sessions[0].outcome, Outcome::Successful);
        assert_eq!(sessions[0].transaction_id.as_deref(), Some("7"));
        assert_eq!(report.data_quality.connector_ids_backfilled, 2);
    }

    #[test]
    fn scenario_b_other_error_before_meter_stop_fails_session() {
        let mut rows = scenario_a_rows();
        rows[4] = row(4, "16/10/2026 10:30:00", "StopTransactionRequest", json!({"transactionId": 7, "meterStop": 5000}));
        rows.insert(
            4,
            row(9, "16/10/2026 10:29:00", "StatusNotificationRequest", json!({
                "connectorId": 1, "status": "SuspendedEVSE", "errorCode": "OtherError",
                "info": "overcurrent protection tripped"
            })),
        );

        let report = analyze(&rows, &options(RowOrder::Chronological), &NoDirectory)
            .expect("analysis should succeed");

        let session = &report.connectors[0].sessions[0];
        assert_eq!(session.outcome, Outcome::Failed);
        assert!(session.errors.iter().any(|record| {
            record.error_code.as_deref() == Some("OtherError:OverCurrentDetected")
        }));
        assert_eq!(session.primary_error.as_deref(), Some("OtherError:OverCurrentDetected"));
    }

    #[test]
    fn scenario_c_preparing_without_follow_up_is_incomplete() {
        let rows = vec![
            row(1, "16/10/2026 09:00:00", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Available", "errorCode": "NoError"})),
            row(2, "16/10/2026 09:05:00", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Preparing", "errorCode": "NoError"})),
            row(3, "16/10/2026 09:06:00", "MeterValuesRequest", json!({"connectorId": 1, "meterValue": []})),
        ];

        let report = analyze(&rows, &options(RowOrder::Chronological), &NoDirectory)
            .expect("analysis should succeed");

        let sessions = &report.connectors[0].sessions;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].outcome, Outcome::Incomplete);
    }

    #[test]
    fn scenario_d_idle_fault_deduplication() {
        let fault = |id: u64, time: &str| {
            row(id, time, "StatusNotificationRequest", json!({
                "connectorId": 1, "status": "Faulted", "errorCode": "GroundFailure", "vendorErrorCode": "GF"
            }))
        };
        let close = vec![fault(1, "16/10/2026 11:00:00"), fault(2, "16/10/2026 11:05:00")];
        let apart = vec![fault(1, "16/10/2026 11:00:00"), fault(2, "16/10/2026 11:40:00")];

        let close_report = analyze(&close, &options(RowOrder::Chronological), &NoDirectory)
            .expect("analysis should succeed");
        let apart_report = analyze(&apart, &options(RowOrder::Chronological), &NoDirectory)
            .expect("analysis should succeed");

        let close_summary = &close_report.connectors[0].summary;
        assert_eq!(close_summary.idle_error_count, 1);
        assert_eq!(close_summary.idle_errors[0].occurrences, 2);
        assert_eq!(close_summary.idle_errors[0].category, FaultCategory::Fault);
        assert_eq!(apart_report.connectors[0].summary.idle_error_count, 2);
    }

    #[test]
    fn reversed_log_gives_identical_report() {
        let rows = fixture_rows("two_connectors.json");
        let mut reversed = rows.clone();
        reversed.reverse();

        let forward = analyze(&rows, &AnalysisOptions::default(), &NoDirectory)
            .expect("analysis should succeed");
        let backward = analyze(
            &reversed,
            &AnalysisOptions {
                row_order: RowOrder::Reversed,
                ..AnalysisOptions::default()
            },
            &NoDirectory,
        )
        .expect("analysis should succeed");

        assert_eq!(forward, backward);
        assert_eq!(forward.connectors.len(), 2);
        assert!(!forward.connectors[0].sessions.is_empty());
        assert!(!forward.connectors[1].sessions.is_empty());
    }

    #[test]
    fn repeated_runs_serialize_identically() {
        let rows = fixture_rows("two_connectors.json");

        let first = analyze(&rows, &AnalysisOptions::default(), &NoDirectory)
            .expect("analysis should succeed");
        let second = analyze(&rows, &AnalysisOptions::default(), &NoDirectory)
            .expect("analysis should succeed");

        let first_json = serde_json::to_string(&first).expect("report should serialize");
        let second_json = serde_json::to_string(&second).expect("report should serialize");
        assert_eq!(first_json, second_json);

        let value: Value = serde_json::from_str(&first_json).expect("report should parse");
        let mut pending = vec![&value];
        while let Some(node) = pending.pop() {
            match node {
                Value::Number(number) => {
                    assert!(number.as_f64().is_some_and(f64::is_finite), "non-finite number {number}");
                }
                Value::Array(items) => pending.extend(items),
                Value::Object(fields) => pending.extend(fields.values()),
                Value::Null | Value::Bool(_) | Value::String(_) => {}
            }
        }
    }

    #[test]
    fn sessions_respect_preparing_count_and_never_overlap() {
        let rows = fixture_rows("two_connectors.json");

        let report = analyze(&rows, &AnalysisOptions::default(), &NoDirectory)
            .expect("analysis should succeed");

        for connector in &report.connectors {
            let preparing = rows
                .iter()
                .filter(|row| {
                    row.payload.as_deref().is_some_and(|payload| {
                        payload.contains("Preparing")
                            && (payload.contains(&format!("\"connectorId\":{}", connector.connector_id))
                                || payload.contains(&format!("\"connectorId\": {}", connector.connector_id)))
                    })
                })
                .count();
            assert!(connector.sessions.len() <= preparing);
            for pair in connector.sessions.windows(2) {
                assert!(pair[0].window_end_index <= pair[1].start_index);
            }
        }
    }

    #[test]
    fn back_to_back_preparing_is_dropped_and_counted() {
        let rows = vec![
            row(1, "16/10/2026 10:00:00", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Preparing"})),
            row(2, "16/10/2026 10:00:01", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Preparing"})),
            row(3, "16/10/2026 10:01:00", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Available"})),
        ];

        let report = analyze(&rows, &options(RowOrder::Chronological), &NoDirectory)
            .expect("analysis should succeed");

        assert_eq!(report.connectors[0].sessions.len(), 1);
        assert_eq!(report.connectors[0].sessions[0].outcome, Outcome::PreChargingFailure);
        assert_eq!(report.data_quality.sessions_dropped_zero_length, 1);
    }

    #[test]
    fn trailing_cut_off_session_is_dropped() {
        let rows = vec![
            row(1, "16/10/2026 10:00:00", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Preparing"})),
            row(2, "16/10/2026 10:00:10", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Charging"})),
            row(3, "16/10/2026 10:05:00", "MeterValuesRequest", json!({"connectorId": 1, "meterValue": []})),
        ];

        let report = analyze(&rows, &options(RowOrder::Chronological), &NoDirectory)
            .expect("analysis should succeed");

        assert!(report.connectors[0].sessions.is_empty());
        assert_eq!(report.data_quality.sessions_dropped_trailing, 1);
    }

    #[test]
    fn final_session_that_stopped_cleanly_is_kept() {
        let rows = vec![
            row(1, "16/10/2026 10:00:00", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Preparing"})),
            row(2, "16/10/2026 10:00:10", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Charging"})),
            row(3, "16/10/2026 10:20:00", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Available"})),
        ];

        let report = analyze(&rows, &options(RowOrder::Chronological), &NoDirectory)
            .expect("analysis should succeed");

        assert_eq!(report.connectors[0].sessions.len(), 1);
        assert_eq!(report.connectors[0].sessions[0].outcome, Outcome::Successful);
        assert_eq!(report.data_quality.sessions_dropped_trailing, 0);
    }

    #[test]
    fn final_charging_session_with_transaction_stays_incomplete() {
        let rows = vec![
            row(1, "16/10/2026 10:00:00", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Preparing"})),
            row(2, "16/10/2026 10:00:05", "StartTransactionRequest", json!({"connectorId": 1, "idTag": "04A1B2C3", "meterStart": 0})),
            row(2, "16/10/2026 10:00:06", "StartTransactionResponse", json!({"transactionId": 12, "idTagInfo": {"status": "Accepted"}})),
            row(3, "16/10/2026 10:00:10", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Charging"})),
        ];

        let report = analyze(&rows, &options(RowOrder::Chronological), &NoDirectory)
            .expect("analysis should succeed");

        assert_eq!(report.connectors[0].sessions.len(), 1);
        assert_eq!(report.connectors[0].sessions[0].outcome, Outcome::Incomplete);
        assert_eq!(report.data_quality.sessions_dropped_trailing, 0);
    }

    #[test]
    fn full_battery_reading_above_hundred_is_successful() {
        let rows = vec![
            row(1, "16/10/2026 10:00:00", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Preparing"})),
            row(2, "16/10/2026 10:00:10", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Charging"})),
            row(3, "16/10/2026 10:40:00", "MeterValuesRequest", json!({
                "connectorId": 1,
                "meterValue": [{"sampledValue": [{"value": "100.4", "measurand": "SoC", "location": "EV", "unit": "Percent"}]}]
            })),
            row(4, "16/10/2026 10:41:00", "StatusNotificationRequest", json!({"connectorId": 1, "status": "Finishing", "errorCode": "GroundFailure"})),
        ];

        let report = analyze(&rows, &options(RowOrder::Chronological), &NoDirectory)
            .expect("analysis should succeed");

        let session = &report.connectors[0].sessions[0];
        assert_eq!(session.max_soc, Some(100.4));
        assert_eq!(session.outcome, Outcome::Successful);
        assert_eq!(report.data_quality.classifications_defaulted, 0);
    }

    #[test]
    fn rejects_log_without_any_json_payload() {
        let rows = vec![
            row(1, "16/10/2026 10:00:00", "StatusNotificationRequest", json!("not a payload")),
            LogRow::default(),
        ];

        let result = analyze(&rows, &options(RowOrder::Chronological), &NoDirectory);

        assert_eq!(result, Err(AnalysisError::UnrecognizedLog { rows: 2 }));
    }

    #[test]
    fn empty_log_yields_empty_connectors() {
        let report = analyze(&[], &AnalysisOptions::default(), &NoDirectory)
            .expect("empty log should analyse");

        assert_eq!(report.connectors.len(), 2);
        assert!(report.connectors.iter().all(|connector| connector.sessions.is_empty()));
        assert_eq!(report.date_range, None);
    }

    #[test]
    fn looks_up_charge_point_metadata_and_date_range() {
        let mut rows = scenario_a_rows();
        rows[0].charge_point_id = Some("CP-001".to_string());

        let report = analyze(&rows, &options(RowOrder::Chronological), &StaticDirectory)
            .expect("analysis should succeed");

        assert_eq!(report.charge_point_id.as_deref(), Some("CP-001"));
        assert_eq!(report.charge_point, Some(json!({"site": "Depot North"})));
        let range = report.date_range.expect("date range should exist");
        assert_eq!(range.start, "2026-10-16 10:00:00");
        assert_eq!(range.end, "2026-10-16 10:30:05");
    }
}
