use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde_json::Value;

use crate::adapters::db::{open_connection, run_migrations};
use crate::adapters::log_file::load_rows;
use crate::domain::models::{Command, LogEvent, LogRow, Status};
use crate::domain::ocpp_payload::MeterSamples;

static TEST_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn open_test_connection(test_name: &str) -> Connection {
    let template = ensure_template_db();
    let test_db_path = unique_test_db_path(test_name);

    if let Some(parent) = test_db_path.parent() {
        std::fs::create_dir_all(parent).expect("test db dir should be creatable");
    }

    std::fs::copy(&template, &test_db_path).expect("template db should be copied");
    open_connection(test_db_path.to_string_lossy().as_ref()).expect("test db should open")
}

fn ensure_template_db() -> PathBuf {
    static TEMPLATE_PATH: OnceLock<PathBuf> = OnceLock::new();

    TEMPLATE_PATH
        .get_or_init(|| {
            let template_path = std::env::var("TEST_DB_TEMPLATE_PATH")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| test_db_dir().join("audit_template.sqlite"));

            if let Some(parent) = template_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).expect("template parent dir should be creatable");
            }

            let mut connection = open_connection(template_path.to_string_lossy().as_ref())
                .expect("template db opens");
            run_migrations(&mut connection).expect("template migrations should succeed");

            template_path
        })
        .clone()
}

fn test_db_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("target").join("testdb")
}

fn unique_test_db_path(test_name: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let counter = TEST_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    test_db_dir().join(format!("{test_name}-{now}-{counter}.sqlite"))
}

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join("logs")
        .join(name)
}

pub fn fixture_rows(name: &str) -> Vec<LogRow> {
    load_rows(&fixture_path(name)).expect("fixture log should load")
}

/// Builds an export row; string payloads are kept verbatim, anything else is
/// serialized the way the export embeds JSON.
pub fn row(id: u64, real_time: &str, command: &str, payload: Value) -> LogRow {
    let payload = match payload {
        Value::String(text) => text,
        other => other.to_string(),
    };
    LogRow {
        id: Some(id.to_string()),
        real_time: Some(real_time.to_string()),
        received_time: Some(real_time.to_string()),
        command: Some(command.to_string()),
        payload: Some(payload),
        charge_point_id: None,
    }
}

fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 16)
        .and_then(|date| date.and_hms_opt(8, 0, 0))
        .expect("base time should be valid")
}

/// Assembles `LogEvent`s directly for component tests.
pub struct EventBuilder {
    event: LogEvent,
}

impl EventBuilder {
    pub fn new(seq: usize, command: Command) -> Self {
        let status = match command {
            Command::StartTransactionRequest => Some(Status::MeterStart),
            _ => None,
        };
        Self {
            event: LogEvent {
                seq,
                message_id: None,
                device_time: None,
                received_time: None,
                command,
                status,
                connector_id: None,
                transaction_id: None,
                id_tag: None,
                meter_start: None,
                meter_stop: None,
                error_code: None,
                info: None,
                vendor_error_code: None,
                reason: None,
                stop_reason: None,
                samples: MeterSamples::default(),
            },
        }
    }

    pub fn status(seq: usize, connector_id: u32, status: &str) -> Self {
        let mut builder = Self::new(seq, Command::StatusNotificationRequest).connector(connector_id);
        builder.event.status = Some(Status::parse(status));
        builder
    }

    pub fn connector(mut self, connector_id: u32) -> Self {
        self.event.connector_id = Some(connector_id);
        self
    }

    pub fn transaction(mut self, transaction_id: &str) -> Self {
        self.event.transaction_id = Some(transaction_id.to_string());
        self
    }

    pub fn message(mut self, message_id: &str) -> Self {
        self.event.message_id = Some(message_id.to_string());
        self
    }

    /// Device time as minutes after 2026-10-16 08:00:00.
    pub fn minute(mut self, minutes: i64) -> Self {
        self.event.device_time = Some(base_time() + Duration::minutes(minutes));
        self
    }

    pub fn id_tag(mut self, id_tag: &str) -> Self {
        self.event.id_tag = Some(id_tag.to_string());
        self
    }

    pub fn meter_start(mut self, wh: f64) -> Self {
        self.event.meter_start = Some(wh);
        self
    }

    pub fn meter_stop(mut self, wh: f64) -> Self {
        self.event.meter_stop = Some(wh);
        self.event.status = Some(Status::MeterStop);
        self
    }

    pub fn reason(mut self, reason: &str) -> Self {
        self.event.reason = Some(reason.to_string());
        self
    }

    pub fn error(mut self, error_code: &str, info: Option<&str>, vendor_error_code: Option<&str>) -> Self {
        self.event.error_code = Some(error_code.to_string());
        self.event.info = info.map(str::to_string);
        self.event.vendor_error_code = vendor_error_code.map(str::to_string);
        self
    }

    pub fn power_w(mut self, watts: f64) -> Self {
        self.event.samples.power_w = Some(watts);
        self
    }

    pub fn energy_register_wh(mut self, wh: f64) -> Self {
        self.event.samples.energy_register_wh = Some(wh);
        self
    }

    pub fn soc(mut self, percent: f64) -> Self {
        self.event.samples.soc_ev = Some(percent);
        self
    }

    pub fn build(self) -> LogEvent {
        self.event
    }
}
