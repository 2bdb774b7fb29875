//! Tests for `src/logging.rs`.

use duet::logging::LoggingGuard;

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_production_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    // The global subscriber can only be installed once per process, so this
    // binary holds no other test that initialises logging.
    let guard = duet::logging::init_production(&logs_dir, "info").expect("init should succeed");
    assert!(logs_dir.exists(), "logs directory should be created");
    assert_eq!(guard.logs_dir(), logs_dir.as_path());
}
