use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Meter readings kept from a `MeterValues` payload. Power and the energy
/// register are normalized to W and Wh.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeterSamples {
    pub current_import_ev: Option<f64>,
    pub current_import_outlet: Option<f64>,
    pub energy_register_wh: Option<f64>,
    pub power_w: Option<f64>,
    pub soc_ev: Option<f64>,
    pub voltage_ev: Option<f64>,
    pub voltage_inlet: Option<f64>,
    pub voltage_outlet: Option<f64>,
    pub temperature_cable: Option<f64>,
}

impl MeterSamples {
    fn set(&mut self, attribute: MeterAttribute, value: f64) {
        let slot = match attribute {
            MeterAttribute::CurrentImportEv => &mut self.current_import_ev,
            MeterAttribute::CurrentImportOutlet => &mut self.current_import_outlet,
            MeterAttribute::EnergyRegister => &mut self.energy_register_wh,
            MeterAttribute::Power => &mut self.power_w,
            MeterAttribute::SocEv => &mut self.soc_ev,
            MeterAttribute::VoltageEv => &mut self.voltage_ev,
            MeterAttribute::VoltageInlet => &mut self.voltage_inlet,
            MeterAttribute::VoltageOutlet => &mut self.voltage_outlet,
            MeterAttribute::TemperatureCable => &mut self.temperature_cable,
        };
        *slot = Some(value);
    }
}

/// Fields pulled out of one raw payload. Absent or empty values are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadFields {
    pub status: Option<String>,
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
    pub carries_meter_stop: bool,
    /// True when the payload parsed as JSON rather than being text-scanned.
    pub structured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MeterAttribute {
    CurrentImportEv,
    CurrentImportOutlet,
    EnergyRegister,
    Power,
    SocEv,
    VoltageEv,
    VoltageInlet,
    VoltageOutlet,
    TemperatureCable,
}

impl MeterAttribute {
    fn lookup(measurand: &str, location: Option<&str>) -> Option<Self> {
        let exact = location.and_then(|location| {
            METER_ATTRIBUTES
                .iter()
                .find(|(name, loc, _)| *name == measurand && *loc == Some(location))
        });
        exact
            .or_else(|| {
                METER_ATTRIBUTES
                    .iter()
                    .find(|(name, loc, _)| *name == measurand && loc.is_none())
            })
            .map(|(_, _, attribute)| *attribute)
    }

    fn scales_kilo_units(self) -> bool {
        matches!(self, Self::Power | Self::EnergyRegister)
    }
}

const METER_ATTRIBUTES: &[(&str, Option<&str>, MeterAttribute)] = &[
    ("Current.Import", Some("EV"), MeterAttribute::CurrentImportEv),
    ("Current.Import", Some("Outlet"), MeterAttribute::CurrentImportOutlet),
    ("Energy.Active.Import.Register", None, MeterAttribute::EnergyRegister),
    ("Power.Active.Import", None, MeterAttribute::Power),
    ("SoC", Some("EV"), MeterAttribute::SocEv),
    ("Voltage", Some("EV"), MeterAttribute::VoltageEv),
    ("Voltage", Some("Inlet"), MeterAttribute::VoltageInlet),
    ("Voltage", Some("Outlet"), MeterAttribute::VoltageOutlet),
    ("Temperature", Some("Cable"), MeterAttribute::TemperatureCable),
];

const STATUS_KEYS: &[&str] = &["status"];
const CONNECTOR_KEYS: &[&str] = &["connectorId"];
const TRANSACTION_KEYS: &[&str] = &["transactionId"];
const ID_TAG_KEYS: &[&str] = &["idTag"];
const ID_TAG_INFO_KEYS: &[&str] = &["idTagInfo"];
const METER_START_KEYS: &[&str] = &["meterStart"];
const METER_STOP_KEYS: &[&str] = &["meterStop"];
const ERROR_CODE_KEYS: &[&str] = &["errorCode"];
const INFO_KEYS: &[&str] = &["info"];
const VENDOR_ERROR_KEYS: &[&str] = &["vendorErrorCode"];
const REASON_KEYS: &[&str] = &["reason"];
const STOP_REASON_KEYS: &[&str] = &["StopReason"];

const MAX_NESTING: usize = 2;

static TEXT_FIELD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\\*"(?P<key>[A-Za-z_]+)\\*"\s*:\s*(?P<value>\\*"[^"\\]*\\*"|-?[0-9]+(?:\.[0-9]+)?)"#,
    )
    .expect("text field pattern should compile")
});

static STOP_REASON_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"StopReason:\s*(?P<value>[A-Za-z0-9_]+)")
        .expect("stop reason pattern should compile")
});

/// Extracts the OCPP fields of interest from a raw payload.
///
/// Handles plain JSON objects, a `payload` envelope holding either an object
/// or a JSON-encoded string, OCPP-J call frames, and as a last resort scans
/// the text with a field pattern. Never fails: missing data is `None`.
pub fn extract_fields(raw: &str) -> PayloadFields {
    extract_nested(raw, 0)
}

fn extract_nested(raw: &str, depth: usize) -> PayloadFields {
    let text = raw.trim();
    if text.is_empty() {
        return PayloadFields::default();
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(object)) => match object.get("payload") {
            Some(Value::Object(inner)) => from_object(inner, text),
            Some(Value::String(inner)) if depth < MAX_NESTING => extract_nested(inner, depth + 1),
            _ => from_object(&object, text),
        },
        Ok(Value::Array(frame)) => match frame.iter().rev().find_map(Value::as_object) {
            Some(inner) => from_object(inner, text),
            None => scan_text(text),
        },
        Ok(Value::String(inner)) if depth < MAX_NESTING => extract_nested(&inner, depth + 1),
        _ => scan_text(text),
    }
}

fn from_object(object: &Map<String, Value>, raw: &str) -> PayloadFields {
    let id_tag = if find_value(object, ID_TAG_INFO_KEYS).is_some() {
        None
    } else {
        object.get("idTag").and_then(value_to_text)
    };
    let meter_stop_value = find_value(object, METER_STOP_KEYS);

    PayloadFields {
        status: find_text(object, STATUS_KEYS),
        connector_id: find_value(object, CONNECTOR_KEYS).and_then(value_to_u32),
        transaction_id: find_value(object, TRANSACTION_KEYS).and_then(value_to_identifier),
        id_tag,
        meter_start: find_value(object, METER_START_KEYS).and_then(value_to_f64),
        meter_stop: meter_stop_value.and_then(value_to_f64),
        error_code: find_text(object, ERROR_CODE_KEYS),
        info: find_text(object, INFO_KEYS),
        vendor_error_code: find_text(object, VENDOR_ERROR_KEYS),
        reason: find_text(object, REASON_KEYS),
        stop_reason: find_text(object, STOP_REASON_KEYS).or_else(|| scan_stop_reason(raw)),
        samples: extract_samples(object),
        carries_meter_stop: meter_stop_value.is_some(),
        structured: true,
    }
}

fn scan_text(text: &str) -> PayloadFields {
    let mut found: HashMap<String, String> = HashMap::new();
    for captures in TEXT_FIELD_PATTERN.captures_iter(text) {
        let (Some(key), Some(value)) = (captures.name("key"), captures.name("value")) else {
            continue;
        };
        let value = value
            .as_str()
            .trim_matches(|ch: char| ch == '"' || ch == '\\')
            .trim();
        if value.is_empty() {
            continue;
        }
        found
            .entry(normalize_key(key.as_str()))
            .or_insert_with(|| value.to_string());
    }

    let text_field = |keys: &[&str]| keys.iter().find_map(|key| found.get(&normalize_key(key)).cloned());
    let number_field = |keys: &[&str]| text_field(keys).and_then(|value| value.parse::<f64>().ok()).filter(|value| value.is_finite());
    let id_tag = if text.contains("idTagInfo") {
        None
    } else {
        text_field(ID_TAG_KEYS)
    };

    PayloadFields {
        status: text_field(STATUS_KEYS),
        connector_id: text_field(CONNECTOR_KEYS).and_then(|value| value.parse().ok()),
        transaction_id: text_field(TRANSACTION_KEYS),
        id_tag,
        meter_start: number_field(METER_START_KEYS),
        meter_stop: number_field(METER_STOP_KEYS),
        error_code: text_field(ERROR_CODE_KEYS),
        info: text_field(INFO_KEYS),
        vendor_error_code: text_field(VENDOR_ERROR_KEYS),
        reason: text_field(REASON_KEYS),
        stop_reason: text_field(STOP_REASON_KEYS).or_else(|| scan_stop_reason(text)),
        samples: MeterSamples::default(),
        carries_meter_stop: text.contains("meterStop"),
        structured: false,
    }
}

fn scan_stop_reason(text: &str) -> Option<String> {
    STOP_REASON_PATTERN
        .captures(text)?
        .name("value")
        .map(|value| value.as_str().to_string())
}

fn extract_samples(object: &Map<String, Value>) -> MeterSamples {
    let mut samples = MeterSamples::default();
    let Some(meter_values) = find_value(object, &["meterValue"]).and_then(Value::as_array) else {
        return samples;
    };

    let sampled_values = meter_values
        .iter()
        .filter_map(|entry| entry.get("sampledValue").and_then(Value::as_array))
        .flatten();

    for sampled in sampled_values {
        let Some(measurand) = sampled.get("measurand").and_then(Value::as_str) else {
            continue;
        };
        let location = sampled.get("location").and_then(Value::as_str);
        let Some(attribute) = MeterAttribute::lookup(measurand, location) else {
            continue;
        };
        let Some(value) = sampled.get("value").and_then(value_to_f64) else {
            continue;
        };
        let kilo = sampled
            .get("unit")
            .and_then(Value::as_str)
            .is_some_and(|unit| unit.eq_ignore_ascii_case("kW") || unit.eq_ignore_ascii_case("kWh"));
        let value = if kilo && attribute.scales_kilo_units() {
            value * 1000.0
        } else {
            value
        };
        samples.set(attribute, value);
    }

    samples
}

fn find_text(object: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    find_value(object, aliases).and_then(value_to_text)
}

/// Looks up a key on this level (exact, then normalized) before descending
/// into nested objects.
fn find_value<'a>(object: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    if let Some(value) = aliases.iter().find_map(|alias| object.get(*alias)) {
        return Some(value);
    }

    let normalized_aliases: Vec<String> =
        aliases.iter().map(|alias| normalize_key(alias)).collect();

    let same_level = object.iter().find_map(|(key, value)| {
        normalized_aliases
            .contains(&normalize_key(key))
            .then_some(value)
    });
    if same_level.is_some() {
        return same_level;
    }

    object
        .values()
        .filter_map(Value::as_object)
        .find_map(|nested| find_value(nested, aliases))
}

fn normalize_key(value: &str) -> String {
    value
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .flat_map(|ch| ch.to_lowercase())
        .collect()
}

fn value_to_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn value_to_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn value_to_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|id| u32::try_from(id).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Transaction ids are compared as text; integral floats lose their fraction.
fn value_to_identifier(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => match (number.as_i64(), number.as_f64()) {
            (Some(integer), _) => Some(integer.to_string()),
            (None, Some(float)) if float.is_finite() && float.fract() == 0.0 => {
                Some(format!("{float:.0}"))
            }
            _ => Some(number.to_string()),
        },
        Value::String(text) => {
            let cleaned = text.trim_matches(|ch: char| {
                ch == '"' || ch == '\\' || ch.is_whitespace()
            });
            (!cleaned.is_empty()).then(|| cleaned.to_string())
        }
        _ => None,
    }
}
