//! Configuration loading, validation and root folder resolution
//!
//! Tests touching POLYRADAR_* environment variables are marked #[serial].

use polyradar_common::config::{
    is_valid_model_name, CompiledDefaults, RootFolderInitializer, RootFolderResolver, TomlConfig,
    DATABASE_FILE, ENV_PUBLIC_URL, ENV_ROOT_FOLDER, ENV_WEBHOOK_SECRET,
};
use polyradar_common::Error;
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_defaults_are_valid() {
    let config = TomlConfig::default();
    config.validate().unwrap();

    assert_eq!(config.server.port, 5780);
    assert_eq!(
        config.model_names(),
        vec!["model1", "model2", "model3", "model4"]
    );
    assert_eq!(config.result_timeout(), Duration::from_secs(900));
    assert_eq!(config.billing.analysis_cost, 100);
    assert!(config.webhooks.shared_secret.is_none());
}

#[test]
fn test_compiled_defaults() {
    let defaults = CompiledDefaults::for_current_platform();
    assert!(!defaults.root_folder.as_os_str().is_empty());
    assert_eq!(defaults.log_level, "info");
}

#[test]
fn test_partial_toml_keeps_other_defaults() {
    let config = TomlConfig::from_toml_str(
        r#"
        root_folder = "/tmp/polyradar-test"

        [server]
        port = 9000

        [lifecycle]
        result_timeout_secs = 60
        "#,
    )
    .unwrap();

    assert_eq!(config.root_folder, Some(PathBuf::from("/tmp/polyradar-test")));
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.bind_address, "127.0.0.1");
    assert_eq!(config.lifecycle.result_timeout_secs, 60);
    assert_eq!(config.lifecycle.sweep_interval_secs, 30);
    assert_eq!(config.webhooks.models.len(), 4);
}

#[test]
fn test_custom_models_replace_defaults() {
    let config = TomlConfig::from_toml_str(
        r#"
        [webhooks]
        timeline_url = "http://localhost:9999/timeline"

        [[webhooks.models]]
        name = "gpt"
        url = "http://localhost:9999/gpt"

        [[webhooks.models]]
        name = "claude"
        url = "http://localhost:9999/claude"
        "#,
    )
    .unwrap();

    config.validate().unwrap();
    assert_eq!(config.model_names(), vec!["gpt", "claude"]);
    assert_eq!(config.webhooks.timeline_url, "http://localhost:9999/timeline");
}

#[test]
fn test_malformed_toml_is_a_config_error() {
    let err = TomlConfig::from_toml_str("[server\nport = ").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_validate_rejects_duplicate_models() {
    let mut config = TomlConfig::default();
    let first = config.webhooks.models[0].clone();
    config.webhooks.models.push(first);

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("Duplicate model name"));
}

#[test]
fn test_validate_rejects_bad_values() {
    let mut config = TomlConfig::default();
    config.webhooks.models.clear();
    assert!(config.validate().is_err());

    let mut config = TomlConfig::default();
    config.webhooks.insights_url = "not a url".to_string();
    assert!(config.validate().is_err());

    let mut config = TomlConfig::default();
    config.lifecycle.poll_interval_secs = 0;
    assert!(config.validate().is_err());

    let mut config = TomlConfig::default();
    config.billing.analysis_cost = -1;
    assert!(config.validate().is_err());
}

#[test]
fn test_model_name_rules() {
    assert!(is_valid_model_name("model1"));
    assert!(is_valid_model_name("gpt-4_turbo"));
    assert!(!is_valid_model_name(""));
    assert!(!is_valid_model_name("a/b"));
    assert!(!is_valid_model_name("has space"));
}

#[test]
#[serial]
fn test_missing_config_file_falls_back_to_defaults() {
    env::remove_var(ENV_PUBLIC_URL);
    env::remove_var(ENV_WEBHOOK_SECRET);

    let dir = tempfile::tempdir().unwrap();
    let config = TomlConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();

    assert_eq!(config, TomlConfig::default());
}

#[test]
#[serial]
fn test_load_reads_file_and_applies_env_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[server]\npublic_base_url = \"https://file.example\"\n").unwrap();

    env::set_var(ENV_PUBLIC_URL, "https://env.example");
    env::set_var(ENV_WEBHOOK_SECRET, "s3cret");

    let config = TomlConfig::load(Some(&path)).unwrap();

    env::remove_var(ENV_PUBLIC_URL);
    env::remove_var(ENV_WEBHOOK_SECRET);

    assert_eq!(config.server.public_base_url, "https://env.example");
    assert_eq!(config.webhooks.shared_secret.as_deref(), Some("s3cret"));
}

#[test]
#[serial]
fn test_load_fails_on_unparseable_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "this is = = not toml").unwrap();

    assert!(TomlConfig::load(Some(&path)).is_err());
}

#[test]
#[serial]
fn test_root_folder_priority() {
    env::remove_var(ENV_ROOT_FOLDER);

    let cli = PathBuf::from("/tmp/from-cli");
    let toml = PathBuf::from("/tmp/from-toml");

    let resolved = RootFolderResolver::new("test")
        .with_cli_arg(Some(cli.clone()))
        .with_toml_value(Some(toml.clone()))
        .resolve();
    assert_eq!(resolved, cli);

    env::set_var(ENV_ROOT_FOLDER, "/tmp/from-env");
    let resolved = RootFolderResolver::new("test")
        .with_toml_value(Some(toml.clone()))
        .resolve();
    assert_eq!(resolved, PathBuf::from("/tmp/from-env"));
    env::remove_var(ENV_ROOT_FOLDER);

    let resolved = RootFolderResolver::new("test")
        .with_toml_value(Some(toml.clone()))
        .resolve();
    assert_eq!(resolved, toml);

    let resolved = RootFolderResolver::new("test").resolve();
    assert_eq!(resolved, CompiledDefaults::for_current_platform().root_folder);
}

#[test]
fn test_initializer_creates_folder() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("a").join("b");

    let initializer = RootFolderInitializer::new(root.clone());
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert_eq!(initializer.database_path(), root.join(DATABASE_FILE));
}
