use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use uuid::Uuid;

pub const LATEST_SCHEMA_VERSION: u32 = 2;

const MIGRATIONS: &[(u32, &str)] = &[
    (
        1,
        r#"
CREATE TABLE IF NOT EXISTS analyses (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    filename TEXT,
    user_email TEXT,
    row_order TEXT NOT NULL,
    charge_point_id TEXT,
    session_count INTEGER NOT NULL,
    report_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_analyses_created_at_desc
ON analyses (created_at DESC);
"#,
    ),
    (
        2,
        r#"
CREATE TABLE IF NOT EXISTS charge_points (
    id TEXT PRIMARY KEY,
    record_json TEXT NOT NULL
);
"#,
    ),
];

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
}

pub fn open_connection(path: &str) -> Result<Connection, DbError> {
    Connection::open(path).map_err(DbError::from)
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), DbError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, DbError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAnalysisRecord {
    pub created_at: String,
    pub filename: Option<String>,
    pub user_email: Option<String>,
    pub row_order: String,
    pub charge_point_id: Option<String>,
    pub session_count: i64,
    pub report_json: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRecord {
    pub id: String,
    pub created_at: String,
    pub filename: Option<String>,
    pub user_email: Option<String>,
    pub row_order: String,
    pub charge_point_id: Option<String>,
    pub session_count: i64,
    pub report_json: String,
}

/// Listing view of an analysis, without the stored report.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisListing {
    pub id: String,
    pub created_at: String,
    pub filename: Option<String>,
    pub user_email: Option<String>,
    pub row_order: String,
    pub charge_point_id: Option<String>,
    pub session_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargePointRecord {
    pub id: String,
    pub record_json: String,
}

pub fn insert_analysis(
    connection: &Connection,
    new_analysis: &NewAnalysisRecord,
) -> Result<String, DbError> {
    let id = Uuid::new_v4().to_string();

    connection.execute(
        "INSERT INTO analyses (id, created_at, filename, user_email, row_order, charge_point_id, session_count, report_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            new_analysis.created_at,
            new_analysis.filename,
            new_analysis.user_email,
            new_analysis.row_order,
            new_analysis.charge_point_id,
            new_analysis.session_count,
            new_analysis.report_json,
        ],
    )?;

    Ok(id)
}

pub fn get_analysis(connection: &Connection, id: &str) -> Result<Option<AnalysisRecord>, DbError> {
    let record = connection
        .query_row(
            "SELECT id, created_at, filename, user_email, row_order, charge_point_id, session_count, report_json
             FROM analyses
             WHERE id = ?1",
            params![id],
            |row| {
                Ok(AnalysisRecord {
                    id: row.get(0)?,
                    created_at: row.get(1)?,
                    filename: row.get(2)?,
                    user_email: row.get(3)?,
                    row_order: row.get(4)?,
                    charge_point_id: row.get(5)?,
                    session_count: row.get(6)?,
                    report_json: row.get(7)?,
                })
            },
        )
        .optional()?;

    Ok(record)
}

pub fn list_analyses(
    connection: &Connection,
    limit: u32,
    offset: u32,
) -> Result<Vec<AnalysisListing>, DbError> {
    let mut statement = connection.prepare(
        "SELECT id, created_at, filename, user_email, row_order, charge_point_id, session_count
         FROM analyses
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?1 OFFSET ?2",
    )?;

    let rows = statement.query_map(params![i64::from(limit), i64::from(offset)], |row| {
        Ok(AnalysisListing {
            id: row.get(0)?,
            created_at: row.get(1)?,
            filename: row.get(2)?,
            user_email: row.get(3)?,
            row_order: row.get(4)?,
            charge_point_id: row.get(5)?,
            session_count: row.get(6)?,
        })
    })?;

    let mut analyses = Vec::new();
    for row in rows {
        analyses.push(row?);
    }

    Ok(analyses)
}

pub fn count_analyses(connection: &Connection) -> Result<i64, DbError> {
    let count = connection.query_row("SELECT COUNT(*) FROM analyses", [], |row| row.get(0))?;
    Ok(count)
}

pub fn delete_analysis(connection: &Connection, id: &str) -> Result<bool, DbError> {
    let deleted = connection.execute("DELETE FROM analyses WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

/// Replaces the whole charge point directory in one transaction.
pub fn replace_charge_points(
    connection: &mut Connection,
    records: &[ChargePointRecord],
) -> Result<usize, DbError> {
    let transaction = connection.transaction()?;
    transaction.execute("DELETE FROM charge_points", [])?;
    {
        let mut statement = transaction
            .prepare("INSERT OR REPLACE INTO charge_points (id, record_json) VALUES (?1, ?2)")?;
        for record in records {
            statement.execute(params![record.id, record.record_json])?;
        }
    }
    transaction.commit()?;

    Ok(records.len())
}

pub fn get_charge_point(
    connection: &Connection,
    id: &str,
) -> Result<Option<ChargePointRecord>, DbError> {
    let record = connection
        .query_row(
            "SELECT id, record_json FROM charge_points WHERE id = ?1",
            params![id],
            |row| {
                Ok(ChargePointRecord {
                    id: row.get(0)?,
                    record_json: row.get(1)?,
                })
            },
        )
        .optional()?;

    Ok(record)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{
        ChargePointRecord, LATEST_SCHEMA_VERSION, NewAnalysisRecord, count_analyses,
        delete_analysis, get_analysis, get_charge_point, insert_analysis, list_analyses,
        open_connection, replace_charge_points, run_migrations, schema_version,
    };

    fn temp_db_path(name: &str) -> PathBuf {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join(name);
        std::mem::forget(dir);
        path
    }

    fn migrated_connection(name: &str) -> rusqlite::Connection {
        let db_path = temp_db_path(name);
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        run_migrations(&mut connection).expect("migrations should succeed");
        connection
    }

    fn analysis(created_at: &str, charge_point_id: &str, session_count: i64) -> NewAnalysisRecord {
        NewAnalysisRecord {
            created_at: created_at.to_string(),
            filename: Some(format!("{charge_point_id}.json")),
            user_email: None,
            row_order: "chronological".to_string(),
            charge_point_id: Some(charge_point_id.to_string()),
            session_count,
            report_json: format!("{{\"chargePointId\":\"{charge_point_id}\"}}"),
        }
    }

    #[test]
    fn migrates_fresh_database_to_latest_version() {
        let connection = migrated_connection("fresh.sqlite");

        let version = schema_version(&connection).expect("schema version should be queryable");
        assert_eq!(version, LATEST_SCHEMA_VERSION);

        let tables: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('analyses', 'charge_points')",
                [],
                |row| row.get(0),
            )
            .expect("table check should work");
        assert_eq!(tables, 2);
    }

    #[test]
    fn migrations_are_idempotent_and_keep_data() {
        let db_path = temp_db_path("rerun.sqlite");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        run_migrations(&mut connection).expect("first migration run should succeed");
        insert_analysis(&connection, &analysis("2026-10-16T10:00:00Z", "CP-1", 3))
            .expect("insert should succeed");

        run_migrations(&mut connection).expect("second migration run should succeed");

        assert_eq!(
            schema_version(&connection).expect("schema version should be queryable"),
            LATEST_SCHEMA_VERSION
        );
        assert_eq!(count_analyses(&connection).expect("count should succeed"), 1);
    }

    #[test]
    fn rejects_newer_schema_versions() {
        let db_path = temp_db_path("future.sqlite");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        connection
            .pragma_update(None, "user_version", LATEST_SCHEMA_VERSION + 1)
            .expect("pragma update should succeed");

        let result = run_migrations(&mut connection);

        assert!(result.is_err());
    }

    #[test]
    fn inserts_reads_and_deletes_analysis() {
        let connection = migrated_connection("analysis.sqlite");

        let id = insert_analysis(&connection, &analysis("2026-10-16T10:00:00Z", "CP-7", 4))
            .expect("insert should succeed");
        let stored = get_analysis(&connection, &id)
            .expect("query should succeed")
            .expect("analysis should exist");

        assert_eq!(stored.charge_point_id.as_deref(), Some("CP-7"));
        assert_eq!(stored.session_count, 4);
        assert_eq!(stored.report_json, "{\"chargePointId\":\"CP-7\"}");

        assert!(delete_analysis(&connection, &id).expect("delete should succeed"));
        assert!(!delete_analysis(&connection, &id).expect("delete should succeed"));
        assert_eq!(get_analysis(&connection, &id).expect("query should succeed"), None);
    }

    #[test]
    fn lists_analyses_newest_first_with_limit_and_offset() {
        let connection = migrated_connection("list.sqlite");
        for (created_at, charge_point_id) in [
            ("2026-10-14T10:00:00Z", "CP-A"),
            ("2026-10-15T10:00:00Z", "CP-B"),
            ("2026-10-16T10:00:00Z", "CP-C"),
        ] {
            insert_analysis(&connection, &analysis(created_at, charge_point_id, 1))
                .expect("insert should succeed");
        }

        let page = list_analyses(&connection, 2, 1).expect("query should succeed");

        assert_eq!(page.len(), 2);
        assert_eq!(page[0].charge_point_id.as_deref(), Some("CP-B"));
        assert_eq!(page[1].charge_point_id.as_deref(), Some("CP-A"));
    }

    #[test]
    fn replaces_charge_point_directory() {
        let mut connection = migrated_connection("charge-points.sqlite");
        let first = [ChargePointRecord {
            id: "CP-OLD".to_string(),
            record_json: "{}".to_string(),
        }];
        let second = [ChargePointRecord {
            id: "CP-NEW".to_string(),
            record_json: "{\"site\":\"Depot\"}".to_string(),
        }];

        replace_charge_points(&mut connection, &first).expect("replace should succeed");
        let stored = replace_charge_points(&mut connection, &second).expect("replace should succeed");

        assert_eq!(stored, 1);
        assert_eq!(get_charge_point(&connection, "CP-OLD").expect("query should succeed"), None);
        let record = get_charge_point(&connection, "CP-NEW")
            .expect("query should succeed")
            .expect("charge point should exist");
        assert_eq!(record.record_json, "{\"site\":\"Depot\"}");
    }
}
