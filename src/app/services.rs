use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use serde_json::Value;
use thiserror::Error;

use crate::adapters::db;
use crate::adapters::db::{
    AnalysisListing, AnalysisRecord, ChargePointRecord, DbError, NewAnalysisRecord,
};
use crate::domain::analysis::{
    AnalysisError, AnalysisOptions, AnalysisReport, ChargePointDirectory, analyze,
};
use crate::domain::models::{LogRow, RowOrder};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database lock poisoned")]
    DbLockPoisoned,
    #[error("database operation failed: {0}")]
    Database(#[from] DbError),
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("report serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub rows: Vec<LogRow>,
    pub row_order: RowOrder,
    pub filename: Option<String>,
    pub user_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredAnalysis {
    pub id: String,
    pub created_at: String,
    pub report: AnalysisReport,
}

pub trait AnalysisQueryHandler {
    fn get_analysis(&self, id: &str) -> Result<Option<AnalysisRecord>, ServiceError>;
    fn list_analyses(&self, limit: u32, offset: u32) -> Result<Vec<AnalysisListing>, ServiceError>;
    fn count_analyses(&self) -> Result<i64, ServiceError>;
    fn get_schema_version(&self) -> Result<u32, ServiceError>;
    fn get_charge_point(&self, id: &str) -> Result<Option<ChargePointRecord>, ServiceError>;
}

pub trait AnalysisCommandHandler {
    fn run_analysis(&self, request: &AnalysisRequest) -> Result<StoredAnalysis, ServiceError>;
    fn delete_analysis(&self, id: &str) -> Result<bool, ServiceError>;
    fn replace_charge_points(&self, records: &[ChargePointRecord]) -> Result<usize, ServiceError>;
}

#[derive(Clone)]
pub struct SqliteAnalysisService {
    connection: Arc<Mutex<Connection>>,
    connectors: Vec<u32>,
}

impl SqliteAnalysisService {
    pub fn new(connection: Arc<Mutex<Connection>>, connectors: Vec<u32>) -> Self {
        Self {
            connection,
            connectors,
        }
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, ServiceError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| ServiceError::DbLockPoisoned)?;
        op(&connection).map_err(ServiceError::from)
    }

    fn with_connection_mut<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, DbError>,
    ) -> Result<T, ServiceError> {
        let mut connection = self
            .connection
            .lock()
            .map_err(|_| ServiceError::DbLockPoisoned)?;
        op(&mut connection).map_err(ServiceError::from)
    }
}

impl ChargePointDirectory for SqliteAnalysisService {
    fn lookup(&self, charge_point_id: &str) -> Option<Value> {
        let record = match self.get_charge_point(charge_point_id) {
            Ok(record) => record?,
            Err(error) => {
                tracing::warn!(charge_point_id, error = %error, "charge point lookup failed");
                return None;
            }
        };

        match serde_json::from_str(&record.record_json) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(charge_point_id, error = %error, "stored charge point record is not valid json");
                None
            }
        }
    }
}

impl AnalysisQueryHandler for SqliteAnalysisService {
    fn get_analysis(&self, id: &str) -> Result<Option<AnalysisRecord>, ServiceError> {
        self.with_connection(|connection| db::get_analysis(connection, id))
    }

    fn list_analyses(&self, limit: u32, offset: u32) -> Result<Vec<AnalysisListing>, ServiceError> {
        self.with_connection(|connection| db::list_analyses(connection, limit, offset))
    }

    fn count_analyses(&self) -> Result<i64, ServiceError> {
        self.with_connection(db::count_analyses)
    }

    fn get_schema_version(&self) -> Result<u32, ServiceError> {
        self.with_connection(db::schema_version)
    }

    fn get_charge_point(&self, id: &str) -> Result<Option<ChargePointRecord>, ServiceError> {
        self.with_connection(|connection| db::get_charge_point(connection, id))
    }
}

impl AnalysisCommandHandler for SqliteAnalysisService {
    fn run_analysis(&self, request: &AnalysisRequest) -> Result<StoredAnalysis, ServiceError> {
        let options = AnalysisOptions {
            row_order: request.row_order,
            connectors: self.connectors.clone(),
        };
        let report = analyze(&request.rows, &options, self)?;
        let report_json = serde_json::to_string(&report)?;
        let session_count: usize = report
            .connectors
            .iter()
            .map(|connector| connector.sessions.len())
            .sum();

        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let new_analysis = NewAnalysisRecord {
            created_at: created_at.clone(),
            filename: request.filename.clone(),
            user_email: request.user_email.clone(),
            row_order: request.row_order.as_str().to_string(),
            charge_point_id: report.charge_point_id.clone(),
            session_count: i64::try_from(session_count).unwrap_or(i64::MAX),
            report_json,
        };
        let id = self.with_connection(|connection| db::insert_analysis(connection, &new_analysis))?;

        tracing::info!(
            analysis_id = %id,
            filename = ?new_analysis.filename,
            charge_point_id = ?new_analysis.charge_point_id,
            session_count,
            "analysis persisted"
        );

        Ok(StoredAnalysis {
            id,
            created_at,
            report,
        })
    }

    fn delete_analysis(&self, id: &str) -> Result<bool, ServiceError> {
        self.with_connection(|connection| db::delete_analysis(connection, id))
    }

    fn replace_charge_points(&self, records: &[ChargePointRecord]) -> Result<usize, ServiceError> {
        self.with_connection_mut(|connection| db::replace_charge_points(connection, records))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::{
        AnalysisCommandHandler, AnalysisQueryHandler, AnalysisRequest, ServiceError,
        SqliteAnalysisService,
    };
    use crate::adapters::db::ChargePointRecord;
    use crate::domain::analysis::{AnalysisError, ChargePointDirectory};
    use crate::domain::models::{LogRow, RowOrder};
    use crate::test_support::{fixture_rows, open_test_connection};

    fn service(name: &str) -> SqliteAnalysisService {
        let connection = open_test_connection(name);
        SqliteAnalysisService::new(Arc::new(Mutex::new(connection)), vec![1, 2])
    }

    #[test]
    fn persists_analysis_of_fixture_log() {
        let service = service("service-persist");
        let request = AnalysisRequest {
            rows: fixture_rows("two_connectors.json"),
            row_order: RowOrder::Chronological,
            filename: Some("two_connectors.json".to_string()),
            user_email: Some("ops@example.com".to_string()),
        };

        let stored = service.run_analysis(&request).expect("analysis should run");
        let record = service
            .get_analysis(&stored.id)
            .expect("query should succeed")
            .expect("analysis should be stored");

        let sessions: usize = stored
            .report
            .connectors
            .iter()
            .map(|connector| connector.sessions.len())
            .sum();
        assert_eq!(record.session_count, sessions as i64);
        assert_eq!(record.charge_point_id.as_deref(), Some("CP-DEPOT-07"));
        assert_eq!(record.row_order, "chronological");
        assert_eq!(service.count_analyses().expect("count should succeed"), 1);

        let report: serde_json::Value =
            serde_json::from_str(&record.report_json).expect("stored report should be json");
        assert_eq!(report["chargePointId"], "CP-DEPOT-07");
    }

    #[test]
    fn enriches_report_from_charge_point_directory() {
        let service = service("service-directory");
        service
            .replace_charge_points(&[ChargePointRecord {
                id: "CP-DEPOT-07".to_string(),
                record_json: json!({"site": "Depot 7", "model": "AC22"}).to_string(),
            }])
            .expect("directory should be stored");

        let stored = service
            .run_analysis(&AnalysisRequest {
                rows: fixture_rows("two_connectors.json"),
                ..AnalysisRequest::default()
            })
            .expect("analysis should run");

        assert_eq!(stored.report.charge_point, Some(json!({"site": "Depot 7", "model": "AC22"})));
        assert_eq!(service.lookup("CP-UNKNOWN"), None);
    }

    #[test]
    fn rejects_unrecognized_log_without_persisting() {
        let service = service("service-unrecognized");

        let result = service.run_analysis(&AnalysisRequest {
            rows: vec![LogRow::default()],
            ..AnalysisRequest::default()
        });

        assert!(matches!(
            result,
            Err(ServiceError::Analysis(AnalysisError::UnrecognizedLog { rows: 1 }))
        ));
        assert_eq!(service.count_analyses().expect("count should succeed"), 0);
    }

    #[test]
    fn deletes_stored_analysis() {
        let service = service("service-delete");
        let stored = service
            .run_analysis(&AnalysisRequest {
                rows: fixture_rows("two_connectors.json"),
                ..AnalysisRequest::default()
            })
            .expect("analysis should run");

        assert!(service.delete_analysis(&stored.id).expect("delete should succeed"));
        assert!(!service.delete_analysis(&stored.id).expect("delete should succeed"));
        assert_eq!(service.get_analysis(&stored.id).expect("query should succeed"), None);
    }
}
