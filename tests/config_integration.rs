use rest_mcp_bridge::config::{AppConfig, Transport};
use serial_test::serial;
use std::env;
use std::fs;

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        for key in [
            "BASE_URL",
            "PORT",
            "HOST",
            "MCP_TRANSPORT",
            "CONFIG_FILE",
            "UPSTREAM_TIMEOUT_SECS",
            "SESSION_IDLE_TIMEOUT_SECS",
            "BRIDGE_SERVER__PORT",
            "BRIDGE_UPSTREAM__BASE_URL",
            "BRIDGE_SERVER__REQUEST_TIMEOUT_SECS",
        ] {
            env::remove_var(key);
        }
    }
}

fn load(args: &[&str]) -> Result<AppConfig, config::ConfigError> {
    let mut argv = vec!["rest-mcp-bridge"];
    argv.extend_from_slice(args);
    AppConfig::load_from_args(argv)
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = load(&["--base-url", "http://127.0.0.1:8080/api"]).expect("defaults load");
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.transport, Transport::Http);
    assert_eq!(config.upstream.timeout_secs, 30);
    assert_eq!(config.sessions.idle_timeout_secs, 30 * 60);
    assert_eq!(config.server.body_limit_bytes, 2 * 1024 * 1024);
}

#[test]
#[serial]
fn test_missing_base_url_is_fatal() {
    clear_env_vars();

    let err = load(&[]).expect_err("BASE_URL is required");
    assert!(err.to_string().contains("BASE_URL"), "got: {err}");

    let err = load(&["--base-url", "  "]).expect_err("blank BASE_URL");
    assert!(err.to_string().contains("BASE_URL"), "got: {err}");
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("BASE_URL", "https://api.example.com");
        env::set_var("PORT", "9090");
        env::set_var("MCP_TRANSPORT", "stdio");
    }

    let config = load(&[]).expect("Failed to load config");
    assert_eq!(config.upstream.base_url, "https://api.example.com");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.transport, Transport::Stdio);

    clear_env_vars();
}

#[test]
#[serial]
fn test_prefixed_env_and_cli_precedence() {
    clear_env_vars();
    unsafe {
        env::set_var("BRIDGE_UPSTREAM__BASE_URL", "https://prefixed.example.com");
        env::set_var("BRIDGE_SERVER__PORT", "7000");
    }

    let config = load(&[]).expect("prefixed env");
    assert_eq!(config.upstream.base_url, "https://prefixed.example.com");
    assert_eq!(config.server.port, 7000);

    // CLI flag wins over the prefixed variable.
    let config = load(&["--port", "7100", "--upstream-timeout-secs", "5"]).expect("cli");
    assert_eq!(config.server.port, 7100);
    assert_eq!(config.upstream.timeout_secs, 5);

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let dir = tempfile::tempdir().expect("tempdir");
    let file_path = dir.path().join("bridge.yaml");
    let config_content = r#"
server:
  port: 7070
upstream:
  base_url: "https://from-file.example.com/rest"
sessions:
  idle_timeout_secs: 120
"#;
    fs::write(&file_path, config_content).expect("Failed to write temp config");

    unsafe {
        env::set_var("CONFIG_FILE", &file_path);
    }

    let config = load(&[]).expect("Failed to load config from file");
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.upstream.base_url, "https://from-file.example.com/rest");
    assert_eq!(config.sessions.idle_timeout_secs, 120);

    clear_env_vars();
}

#[test]
#[serial]
fn test_upstream_timeout_must_fit_request_timeout() {
    clear_env_vars();

    let err = load(&[
        "--base-url",
        "https://api.example.com",
        "--upstream-timeout-secs",
        "60",
    ])
    .expect_err("upstream timeout equal to request timeout");
    assert!(err.to_string().contains("must be shorter"), "got: {err}");

    unsafe {
        env::set_var("BRIDGE_SERVER__REQUEST_TIMEOUT_SECS", "120");
    }
    let config = load(&[
        "--base-url",
        "https://api.example.com",
        "--upstream-timeout-secs",
        "60",
    ])
    .expect("longer request timeout");
    assert_eq!(config.upstream.timeout_secs, 60);
    assert_eq!(config.server.request_timeout_secs, 120);

    clear_env_vars();
}
