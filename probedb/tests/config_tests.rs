//! Tests for configuration loading and database path resolution
//!
//! Tests that touch PROBED_DATABASE are marked #[serial] so they do not
//! race on the process environment.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use probedb::config::{
    default_database_path, resolve_database_path, StoreConfig, TomlConfig, DATABASE_ENV,
};
use probedb::Error;
use serial_test::serial;
use tempfile::TempDir;

#[test]
#[serial]
fn test_cli_argument_has_highest_priority() {
    env::set_var(DATABASE_ENV, "/tmp/from-env.db");

    let path = resolve_database_path(
        Some(Path::new("/tmp/from-cli.db")),
        Some(Path::new("/tmp/from-toml.db")),
    )
    .unwrap();
    assert_eq!(path, PathBuf::from("/tmp/from-cli.db"));

    env::remove_var(DATABASE_ENV);
}

#[test]
#[serial]
fn test_env_var_overrides_toml() {
    env::set_var(DATABASE_ENV, "/tmp/from-env.db");

    let path = resolve_database_path(None, Some(Path::new("/tmp/from-toml.db"))).unwrap();
    assert_eq!(path, PathBuf::from("/tmp/from-env.db"));

    env::remove_var(DATABASE_ENV);
}

#[test]
#[serial]
fn test_empty_env_var_is_ignored() {
    env::set_var(DATABASE_ENV, "");

    let path = resolve_database_path(None, Some(Path::new("/tmp/from-toml.db"))).unwrap();
    assert_eq!(path, PathBuf::from("/tmp/from-toml.db"));

    env::remove_var(DATABASE_ENV);
}

#[test]
#[serial]
fn test_default_used_without_overrides() {
    env::remove_var(DATABASE_ENV);

    let path = resolve_database_path(None, None).ok();
    assert_eq!(path, default_database_path().ok());
}

#[test]
fn test_load_explicit_config_file() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("config.toml");
    std::fs::write(
        &file,
        r#"
database = "/var/lib/probed/probe.db"
listen_address = "127.0.0.1:9000"
max_connections = 4
busy_timeout_ms = 250
"#,
    )
    .unwrap();

    let config = TomlConfig::load(Some(&file)).unwrap();
    assert_eq!(config.database, Some(PathBuf::from("/var/lib/probed/probe.db")));
    assert_eq!(config.listen_address, "127.0.0.1:9000");
    assert_eq!(config.max_connections, 4);
    assert_eq!(config.busy_timeout_ms, 250);
}

#[test]
fn test_missing_explicit_config_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let result = TomlConfig::load(Some(&dir.path().join("absent.toml")));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_malformed_config_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("config.toml");
    std::fs::write(&file, "max_connections = \"many\"\n").unwrap();

    let result = TomlConfig::load(Some(&file));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_store_config_takes_toml_settings() {
    env::remove_var(DATABASE_ENV);

    let toml = TomlConfig {
        database: Some(PathBuf::from("/tmp/from-toml.db")),
        max_connections: 3,
        busy_timeout_ms: 1500,
        ..Default::default()
    };
    let config = StoreConfig::resolve(None, &toml).unwrap();
    assert_eq!(
        config,
        StoreConfig {
            database: PathBuf::from("/tmp/from-toml.db"),
            max_connections: 3,
            busy_timeout: Duration::from_millis(1500),
        }
    );
}
