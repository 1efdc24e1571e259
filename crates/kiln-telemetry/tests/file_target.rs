//! File logging installs a global subscriber, so it gets its own binary.

use kiln_telemetry::{LogConfig, LogFormat, TelemetryError, setup_logging};

#[test]
fn file_target_writes_and_second_init_fails() {
    let dir = tempfile::tempdir().unwrap();
    let logs = dir.path().join("logs");
    let config = LogConfig::new("info")
        .with_format(LogFormat::Json)
        .with_file_logging(&logs, "host");

    let guard = setup_logging(&config).unwrap();
    tracing::info!(module_id = "alpha", "module enabled");
    drop(guard);

    let written: String = std::fs::read_dir(&logs)
        .unwrap()
        .map(|e| std::fs::read_to_string(e.unwrap().path()).unwrap())
        .collect();
    assert!(written.contains("module enabled"));
    assert!(written.contains("alpha"));

    let again = setup_logging(&LogConfig::new("info"));
    assert!(matches!(again, Err(TelemetryError::InitError(_))));
}
