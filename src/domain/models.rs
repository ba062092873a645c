use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::ocpp_payload::{MeterSamples, PayloadFields};

/// One row of a charge point message export.
///
/// Column names follow the export format (`Id`, `real_time`, `received_time`,
/// `command`, `payLoadData`, `cp_id`); camelCase aliases are accepted too.
/// Values may arrive as strings, numbers or embedded JSON and are kept as text.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LogRow {
    #[serde(
        default,
        rename = "Id",
        alias = "id",
        deserialize_with = "loose_text"
    )]
    pub id: Option<String>,
    #[serde(
        default,
        rename = "real_time",
        alias = "realTime",
        deserialize_with = "loose_text"
    )]
    pub real_time: Option<String>,
    #[serde(
        default,
        rename = "received_time",
        alias = "receivedTime",
        deserialize_with = "loose_text"
    )]
    pub received_time: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub command: Option<String>,
    #[serde(
        default,
        rename = "payLoadData",
        alias = "payload",
        alias = "payloadData",
        deserialize_with = "loose_text"
    )]
    pub payload: Option<String>,
    #[serde(
        default,
        rename = "cp_id",
        alias = "chargePointId",
        deserialize_with = "loose_text"
    )]
    pub charge_point_id: Option<String>,
}

fn loose_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowOrder {
    #[default]
    Chronological,
    Reversed,
}

impl RowOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chronological => "chronological",
            Self::Reversed => "reversed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "chronological" | "oldest-first" | "asc" => Some(Self::Chronological),
            "reversed" | "newest-first" | "desc" => Some(Self::Reversed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    StatusNotificationRequest,
    StartTransactionRequest,
    StartTransactionResponse,
    StopTransactionRequest,
    StopTransactionResponse,
    MeterValuesRequest,
    AuthorizeRequest,
    AuthorizeResponse,
    RemoteStartTransactionResponse,
    RemoteStopTransactionResponse,
    HeartbeatRequest,
    HeartbeatResponse,
    Other(String),
}

impl Command {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "StatusNotificationRequest" => Self::StatusNotificationRequest,
            "StartTransactionRequest" => Self::StartTransactionRequest,
            "StartTransactionResponse" => Self::StartTransactionResponse,
            "StopTransactionRequest" => Self::StopTransactionRequest,
            "StopTransactionResponse" => Self::StopTransactionResponse,
            "MeterValuesRequest" => Self::MeterValuesRequest,
            "AuthorizeRequest" => Self::AuthorizeRequest,
            "AuthorizeResponse" => Self::AuthorizeResponse,
            "RemoteStartTransactionResponse" => Self::RemoteStartTransactionResponse,
            "RemoteStopTransactionResponse" => Self::RemoteStopTransactionResponse,
            "HeartbeatRequest" => Self::HeartbeatRequest,
            "HeartbeatResponse" => Self::HeartbeatResponse,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::StatusNotificationRequest => "StatusNotificationRequest",
            Self::StartTransactionRequest => "StartTransactionRequest",
            Self::StartTransactionResponse => "StartTransactionResponse",
            Self::StopTransactionRequest => "StopTransactionRequest",
            Self::StopTransactionResponse => "StopTransactionResponse",
            Self::MeterValuesRequest => "MeterValuesRequest",
            Self::AuthorizeRequest => "AuthorizeRequest",
            Self::AuthorizeResponse => "AuthorizeResponse",
            Self::RemoteStartTransactionResponse => "RemoteStartTransactionResponse",
            Self::RemoteStopTransactionResponse => "RemoteStopTransactionResponse",
            Self::HeartbeatRequest => "HeartbeatRequest",
            Self::HeartbeatResponse => "HeartbeatResponse",
            Self::Other(raw) => raw,
        }
    }

    /// Commands that carry no session information and are dropped before analysis.
    pub fn is_noise(&self) -> bool {
        matches!(
            self,
            Self::RemoteStartTransactionResponse
                | Self::AuthorizeResponse
                | Self::RemoteStopTransactionResponse
                | Self::HeartbeatRequest
                | Self::HeartbeatResponse
        )
    }

    pub fn is_start_transaction(&self) -> bool {
        matches!(
            self,
            Self::StartTransactionRequest | Self::StartTransactionResponse
        )
    }

    pub fn is_stop_transaction(&self) -> bool {
        matches!(
            self,
            Self::StopTransactionRequest | Self::StopTransactionResponse
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Status {
    Available,
    Preparing,
    Charging,
    SuspendedEv,
    SuspendedEvse,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
    MeterStart,
    MeterStop,
    Other(String),
}

impl Status {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Available" => Self::Available,
            "Preparing" => Self::Preparing,
            "Charging" => Self::Charging,
            "SuspendedEV" => Self::SuspendedEv,
            "SuspendedEVSE" => Self::SuspendedEvse,
            "Finishing" => Self::Finishing,
            "Reserved" => Self::Reserved,
            "Unavailable" => Self::Unavailable,
            "Faulted" => Self::Faulted,
            "meterStart" => Self::MeterStart,
            "meterStop" => Self::MeterStop,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Available => "Available",
            Self::Preparing => "Preparing",
            Self::Charging => "Charging",
            Self::SuspendedEv => "SuspendedEV",
            Self::SuspendedEvse => "SuspendedEVSE",
            Self::Finishing => "Finishing",
            Self::Reserved => "Reserved",
            Self::Unavailable => "Unavailable",
            Self::Faulted => "Faulted",
            Self::MeterStart => "meterStart",
            Self::MeterStop => "meterStop",
            Self::Other(raw) => raw,
        }
    }
}

/// A normalized, immutable view of one log row.
///
/// `seq` is the row's position in chronological order and survives noise
/// filtering, so it can be used to point back into the uploaded log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub seq: usize,
    pub message_id: Option<String>,
    pub device_time: Option<NaiveDateTime>,
    pub received_time: Option<NaiveDateTime>,
    pub command: Command,
    pub status: Option<Status>,
    pub connector_id: Option<u32>,
    pub transaction_id: Option<String>,
    pub id_tag: Option<String>,
    pub meter_start: Option<f64>,
    pub meter_stop: Option<f64>,
    pub error_code: Option<String>,
    pub info: Option<String>,
    pub vendor_error_code: Option<String>,
    pub reason: Option<String>,
    pub stop_reason: Option<String>,
    pub samples: MeterSamples,
}

impl LogEvent {
    pub fn from_fields(
        seq: usize,
        row: &LogRow,
        device_time: Option<NaiveDateTime>,
        received_time: Option<NaiveDateTime>,
        fields: PayloadFields,
    ) -> Self {
        let command = Command::parse(row.command.as_deref().unwrap_or_default());
        let status = derive_status(&command, &fields);

        Self {
            seq,
            message_id: row.id.as_ref().map(|id| id.trim().to_string()),
            device_time,
            received_time,
            command,
            status,
            connector_id: fields.connector_id,
            transaction_id: fields.transaction_id,
            id_tag: fields.id_tag,
            meter_start: fields.meter_start,
            meter_stop: fields.meter_stop,
            error_code: fields.error_code,
            info: fields.info,
            vendor_error_code: fields.vendor_error_code,
            reason: fields.reason,
            stop_reason: fields.stop_reason,
            samples: fields.samples,
        }
    }

    pub fn has_status(&self, status: &Status) -> bool {
        self.status.as_ref() == Some(status)
    }

    pub fn is_charging(&self) -> bool {
        self.has_status(&Status::Charging)
    }

    /// Connector 0 addresses the whole charge point and is part of every stream.
    pub fn belongs_to(&self, connector_id: u32) -> bool {
        matches!(self.connector_id, Some(id) if id == connector_id || id == 0)
    }
}

fn derive_status(command: &Command, fields: &PayloadFields) -> Option<Status> {
    if fields.carries_meter_stop {
        return Some(Status::MeterStop);
    }
    if *command == Command::StartTransactionRequest {
        return Some(Status::MeterStart);
    }
    fields.status.as_deref().map(Status::parse)
}

/// The chronological slice of events visible to one connector.
#[derive(Debug, Clone)]
pub struct ConnectorStream<'a> {
    pub connector_id: u32,
    pub events: Vec<&'a LogEvent>,
}

impl<'a> ConnectorStream<'a> {
    pub fn partition(events: &'a [LogEvent], connector_id: u32) -> Self {
        Self {
            connector_id,
            events: events
                .iter()
                .filter(|event| event.belongs_to(connector_id))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
