use crate::app::AppError;
use crate::domain::analysis::DEFAULT_CONNECTORS;

const DEFAULT_CORS_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:5173"];
const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_bind: String,
    pub db_path: String,
    pub cors_allowed_origins: Vec<String>,
    pub connectors: Vec<u32>,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let connectors = match non_empty(&lookup, "CONNECTORS") {
            Some(raw) => parse_connectors(&raw)?,
            None => DEFAULT_CONNECTORS.to_vec(),
        };

        Ok(Self {
            http_bind: non_empty(&lookup, "HTTP_BIND").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            db_path: non_empty(&lookup, "DB_PATH")
                .unwrap_or_else(|| "/var/lib/ocpp-audit/audit.db".to_string()),
            cors_allowed_origins: non_empty(&lookup, "CORS_ALLOWED_ORIGINS")
                .map(|raw| split_list(&raw).map(str::to_string).collect())
                .unwrap_or_else(|| DEFAULT_CORS_ORIGINS.iter().map(|o| o.to_string()).collect()),
            connectors,
            max_upload_bytes: parse_or_default(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        })
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|item| !item.is_empty())
}

fn parse_connectors(raw: &str) -> Result<Vec<u32>, AppError> {
    let mut connectors = Vec::new();
    for item in split_list(raw) {
        let connector = item
            .parse::<u32>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| AppError::config("CONNECTORS must be a comma separated list of positive numbers"))?;
        if !connectors.contains(&connector) {
            connectors.push(connector);
        }
    }
    if connectors.is_empty() {
        return Err(AppError::config("CONNECTORS must name at least one connector"));
    }
    Ok(connectors)
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}
