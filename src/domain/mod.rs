pub mod analysis;
pub mod cross_reference;
pub mod fault_code;
pub mod idle_faults;
pub mod models;
pub mod numeric;
pub mod ocpp_payload;
pub mod session;
pub mod session_metrics;
pub mod session_outcome;
pub mod session_segmenter;
pub mod summary;
pub mod timestamp;
