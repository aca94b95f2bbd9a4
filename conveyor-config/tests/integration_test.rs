//! Integration tests for conveyor-config

use conveyor_config::*;
use conveyor_execution::{ControlLaw, RetireMode};
use conveyor_queue::QueueKind;
use std::io::Write;
use std::time::Duration;
use temp_env::with_vars;

#[test]
fn test_default_config_validation() {
    let config = ConveyorConfig::default();
    assert!(config.validate_all().is_ok());
    assert_eq!(config.queues.jobs.port, 9999);
    assert_eq!(config.queues.results.port, 9998);
    assert_eq!(config.queues.queue_type, QueueKind::Priority);
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("CONVEYOR_JOBS_PORT", Some("7001")),
        ("CONVEYOR_JOBS_SECRET", Some("s3cret")),
        ("CONVEYOR_RESULTS_ADDRESS", Some("10.0.0.5")),
        ("CONVEYOR_INITIAL_WORKERS", Some("2")),
        ("CONVEYOR_MAX_WORKERS", Some("8")),
        ("CONVEYOR_SAMPLE_TIME", Some("250ms")),
        ("CONVEYOR_LOG_LEVEL", Some("debug")),
        ("CONVEYOR_QUEUE_TYPE", Some("fifo")),
    ];

    with_vars(vars, || {
        let config = ConfigLoader::new().from_env().unwrap();

        assert_eq!(config.queues.jobs.port, 7001);
        assert_eq!(config.queues.jobs.secret, "s3cret");
        assert_eq!(config.queues.results.address, "10.0.0.5");
        assert_eq!(config.queues.queue_type, QueueKind::Fifo);
        assert_eq!(config.workers.initial_workers, 2);
        assert_eq!(config.workers.max_workers, 8);
        assert_eq!(config.workers.sample_time, Duration::from_millis(250));
        assert_eq!(config.logging.level, LogLevel::Debug);
    });
}

#[test]
fn test_invalid_env_value() {
    with_vars(vec![("CONVEYOR_JOBS_PORT", Some("not-a-port"))], || {
        let err = ConfigLoader::new().from_env().unwrap_err();
        assert!(matches!(err, ConfigError::EnvError(_)));
    });
}

#[test]
fn test_env_override_still_validated() {
    with_vars(
        vec![
            ("CONVEYOR_INITIAL_WORKERS", Some("5")),
            ("CONVEYOR_MAX_WORKERS", Some("2")),
        ],
        || {
            let err = ConfigLoader::new().from_env().unwrap_err();
            assert!(matches!(err, ConfigError::DomainError { .. }));
        },
    );
}

#[test]
fn test_yaml_file_with_env_override() {
    let yaml = r#"
queues:
  jobs:
    address: "0.0.0.0"
    port: 5555
    secret: "from-file"
  queue_type: journaled
  journal_path: "/tmp/conveyor-jobs.jsonl"

workers:
  initial_workers: 1
  max_workers: 4
  consume_rate: 2.5
  sample_time: 2s
  control_law: source_compatible
  retire_mode: signal
  graceful_timeout: 10s

logging:
  level: warn
  format: json
"#;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    with_vars(vec![("CONVEYOR_JOBS_SECRET", Some("from-env"))], || {
        let config = ConfigLoader::new().load(Some(file.path())).unwrap();

        assert_eq!(config.queues.jobs.address, "0.0.0.0");
        assert_eq!(config.queues.jobs.port, 5555);
        assert_eq!(config.queues.jobs.secret, "from-env");
        assert_eq!(config.queues.results.port, 9998);
        assert_eq!(config.queues.queue_type, QueueKind::Journaled);
        assert_eq!(config.workers.consume_rate, 2.5);
        assert_eq!(config.workers.sample_time, Duration::from_secs(2));
        assert_eq!(config.workers.control_law, ControlLaw::SourceCompatible);
        assert_eq!(config.workers.retire_mode, RetireMode::Signal);
        assert_eq!(config.logging.format, LogFormat::Json);

        let endpoint = config.queues.jobs.to_endpoint();
        assert_eq!(endpoint.socket_address(), "0.0.0.0:5555");
    });
}

#[test]
fn test_journaled_queue_requires_path() {
    let yaml = "queues:\n  queue_type: journaled\n";
    let config: ConveyorConfig = serde_yaml::from_str(yaml).unwrap();
    let err = config.validate_all().unwrap_err();
    assert!(err.to_string().contains("journal_path"));
}

#[test]
fn test_generated_sample_parses_back() {
    let sample = ConveyorConfig::generate_sample();
    let parsed: ConveyorConfig = serde_yaml::from_str(&sample).unwrap();
    assert_eq!(parsed, ConveyorConfig::default());
    assert!(sample.contains("sample_time: 1s"));
}

#[test]
fn test_missing_file() {
    let err = ConfigLoader::new()
        .from_file("/nonexistent/conveyor.yaml")
        .unwrap_err();
    assert!(matches!(err, ConfigError::FileReadError(_)));
}
