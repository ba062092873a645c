mod config;
mod error;
mod logging;
mod runtime;
pub mod services;

pub use error::AppError;
pub use logging::init as init_logging;

pub fn run_api() -> Result<(), AppError> {
    let dotenv_loaded = dotenvy::dotenv().is_ok();
    logging::init()?;

    let config = config::AppConfig::from_env()?;

    tracing::info!(
        dotenv_loaded,
        db_path = %config.db_path,
        http_bind = %config.http_bind,
        connectors = ?config.connectors,
        cors_allowed_origins = ?config.cors_allowed_origins,
        max_upload_bytes = config.max_upload_bytes,
        "application bootstrap initialized"
    );

    runtime::run(config)
}
