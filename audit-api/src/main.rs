fn main() {
    if let Err(err) = ocpp_session_audit::app::run_api() {
        eprintln!("api startup failed: {err}");
        std::process::exit(1);
    }
}
