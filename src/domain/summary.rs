use std::collections::BTreeMap;

use serde::Serialize;

use super::idle_faults::{FaultCategory, IdleFaultIncident};
use super::numeric::{mean, round_to};
use super::session::Session;
use super::session_metrics::StartMode;
use super::session_outcome::Outcome;

/// Per-connector aggregates. Empty input gives an all-zero summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorSummary {
    pub total_sessions: usize,
    pub charging_sessions: usize,
    pub successful_sessions: usize,
    pub failed_sessions: usize,
    pub incomplete_sessions: usize,
    pub pre_charging_failures: usize,
    pub successful_error_summary: BTreeMap<String, usize>,
    pub failed_error_summary: BTreeMap<String, usize>,
    pub remote_starts: usize,
    pub auto_starts: usize,
    pub rfid_starts: usize,
    pub peak_power_kw: f64,
    pub avg_power_kw: f64,
    pub total_energy_kwh: f64,
    pub avg_energy_kwh: f64,
    pub total_duration_minutes: f64,
    pub avg_duration_minutes: f64,
    pub idle_warning_count: usize,
    pub idle_fault_count: usize,
    pub idle_error_count: usize,
    pub idle_error_codes: BTreeMap<String, usize>,
    pub idle_warnings: Vec<IdleFaultIncident>,
    pub idle_faults: Vec<IdleFaultIncident>,
    pub idle_errors: Vec<IdleFaultIncident>,
}

pub fn summarize(sessions: &[Session], incidents: &[IdleFaultIncident]) -> ConnectorSummary {
    let mut summary = ConnectorSummary {
        total_sessions: sessions.len(),
        ..ConnectorSummary::default()
    };

    for session in sessions {
        if session.reached_charging {
            summary.charging_sessions += 1;
        }
        match session.start_mode {
            Some(StartMode::RemoteStart) => summary.remote_starts += 1,
            Some(StartMode::AutoStart) => summary.auto_starts += 1,
            Some(StartMode::RfidStart) => summary.rfid_starts += 1,
            None => {}
        }

        let histogram = match session.outcome {
            Outcome::Successful => {
                summary.successful_sessions += 1;
                Some(&mut summary.successful_error_summary)
            }
            Outcome::Failed => {
                summary.failed_sessions += 1;
                Some(&mut summary.failed_error_summary)
            }
            Outcome::Incomplete => {
                summary.incomplete_sessions += 1;
                None
            }
            Outcome::PreChargingFailure => {
                summary.pre_charging_failures += 1;
                None
            }
        };
        if let Some(histogram) = histogram {
            for value in session.errors.iter().flat_map(|record| record.values()) {
                *histogram.entry(value.to_string()).or_default() += 1;
            }
        }
    }

    let peak_powers: Vec<f64> = sessions.iter().filter_map(|session| session.peak_power_kw).collect();
    let energies: Vec<f64> = sessions.iter().filter_map(|session| session.energy_kwh).collect();
    let durations: Vec<f64> = sessions
        .iter()
        .filter_map(|session| session.duration_minutes)
        .collect();

    summary.peak_power_kw = peak_powers.iter().copied().reduce(f64::max).unwrap_or(0.0);
    summary.avg_power_kw = rounded_mean(&peak_powers);
    summary.total_energy_kwh = round_to(energies.iter().sum(), 3).unwrap_or(0.0);
    summary.avg_energy_kwh = rounded_mean(&energies);
    summary.total_duration_minutes = round_to(durations.iter().sum(), 2).unwrap_or(0.0);
    summary.avg_duration_minutes = rounded_mean(&durations);

    for incident in incidents {
        match incident.category {
            FaultCategory::Warning => summary.idle_warnings.push(incident.clone()),
            FaultCategory::Fault => summary.idle_faults.push(incident.clone()),
        }
        if let Some(code) = &incident.error_code {
            *summary.idle_error_codes.entry(code.clone()).or_default() += incident.occurrences as usize;
        }
    }
    summary.idle_warning_count = summary.idle_warnings.len();
    summary.idle_fault_count = summary.idle_faults.len();
    summary.idle_errors = incidents.to_vec();
    summary.idle_error_count = incidents.len();

    summary
}

fn rounded_mean(values: &[f64]) -> f64 {
    mean(values)
        .and_then(|value| round_to(value, 2))
        .unwrap_or(0.0)
}
