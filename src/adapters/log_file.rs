use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::models::{LogRow, RowOrder};

#[derive(Debug, Error)]
pub enum LogFileError {
    #[error("failed to read log file: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse log file: {0}")]
    Json(#[from] serde_json::Error),
}

/// A log export on disk: either a bare array of rows or an object carrying
/// the rows plus an optional declared row order.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LogFile {
    Rows(Vec<LogRow>),
    Export {
        rows: Vec<LogRow>,
        #[serde(default, alias = "rowOrder")]
        row_order: Option<RowOrder>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedLog {
    pub rows: Vec<LogRow>,
    pub row_order: Option<RowOrder>,
}

pub fn load_log(path: &Path) -> Result<LoadedLog, LogFileError> {
    let content = fs::read_to_string(path)?;
    parse_log(&content)
}

pub fn load_rows(path: &Path) -> Result<Vec<LogRow>, LogFileError> {
    load_log(path).map(|log| log.rows)
}

pub fn parse_log(content: &str) -> Result<LoadedLog, LogFileError> {
    let file: LogFile = serde_json::from_str(content)?;

    Ok(match file {
        LogFile::Rows(rows) => LoadedLog {
            rows,
            row_order: None,
        },
        LogFile::Export { rows, row_order } => LoadedLog { rows, row_order },
    })
}
