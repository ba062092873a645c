pub mod api;
pub mod db;
pub mod log_file;
