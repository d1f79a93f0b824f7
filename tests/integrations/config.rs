use clap::Parser;
use incidentcast::cli::Cli;
use incidentcast::config::Config;
use serial_test::serial;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// A helper function to run a test with a temporary config file.
fn with_config_file<F>(toml_content: &str, test_fn: F)
where
    F: FnOnce(PathBuf),
{
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", toml_content).unwrap();
    let path = file.path().to_path_buf();
    test_fn(path);
}

fn cli(args: &[&str]) -> Cli {
    Cli::parse_from(std::iter::once("incidentcast").chain(args.iter().copied()))
}

#[test]
#[serial]
fn test_defaults_without_file() {
    let config = Config::load(&cli(&[])).unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.server.endpoint_path, "/active/");
    assert_eq!(config.sessions.snapshot_limit, 25);
}

#[test]
#[serial]
fn test_load_full_valid_config() {
    let toml_content = r#"
        log_level = "debug"
        [server]
        listen_address = "0.0.0.0:9000"
        endpoint_path = "/live/"
        handshake_timeout_ms = 2500
        [sessions]
        snapshot_limit = 10
        outbound_queue_capacity = 32
        write_timeout_ms = 750
        [time]
        site_timezone = "+01:00"
        [auth.tokens.abc123]
        user_id = 4
        username = "noc"
        [metrics]
        enabled = true
        listen_address = "127.0.0.1:9191"
    "#;

    with_config_file(toml_content, |path| {
        let config = Config::load(&cli(&["--config", path.to_str().unwrap()])).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.server.listen_address.port(), 9000);
        assert_eq!(config.server.endpoint_path, "/live/");
        assert_eq!(config.sessions.snapshot_limit, 10);
        assert_eq!(config.sessions.outbound_queue_capacity, 32);
        assert_eq!(config.sessions.write_timeout(), std::time::Duration::from_millis(750));
        assert_eq!(config.server.handshake_timeout().as_millis(), 2500);
        assert_eq!(config.server.shutdown_grace_ms, 5_000);
        assert_eq!(config.site_offset().unwrap().local_minus_utc(), 3600);
        assert_eq!(config.auth.tokens["abc123"].user_id, 4);
        assert!(config.metrics.enabled);
    });
}

#[test]
#[serial]
fn test_cli_overrides_file_and_env() {
    with_config_file("[sessions]\nsnapshot_limit = 10\n", |path| {
        std::env::set_var("INCIDENTCAST_SESSIONS__SNAPSHOT_LIMIT", "15");
        let from_env = Config::load(&cli(&["--config", path.to_str().unwrap()])).unwrap();
        assert_eq!(from_env.sessions.snapshot_limit, 15);

        let from_cli = Config::load(&cli(&[
            "--config",
            path.to_str().unwrap(),
            "--snapshot-limit",
            "40",
            "--site-timezone",
            "-05:00",
            "--listen",
            "127.0.0.1:7000",
        ]))
        .unwrap();
        std::env::remove_var("INCIDENTCAST_SESSIONS__SNAPSHOT_LIMIT");

        assert_eq!(from_cli.sessions.snapshot_limit, 40);
        assert_eq!(from_cli.site_offset().unwrap().local_minus_utc(), -5 * 3600);
        assert_eq!(from_cli.server.listen_address.port(), 7000);
    });
}

#[test]
#[serial]
fn test_invalid_timezone_is_rejected() {
    with_config_file("[time]\nsite_timezone = \"Mars/Olympus\"\n", |path| {
        assert!(Config::load(&cli(&["--config", path.to_str().unwrap()])).is_err());
    });
}
