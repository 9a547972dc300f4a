//! Integration tests for configuration parsing and handling.
//!
//! These tests verify that grouped configuration files resolve into
//! validated connection settings.

use std::io::Write;
use std::time::Duration;

use mortar::mongodb::{ReadConcern, ReadPreference, ReturnAs, WriteConcernLevel};
use mortar::{MongoConfig, MongoConfigFile};

/// Test minimal configuration
#[test]
fn test_config_minimal() {
    let file = MongoConfigFile::parse(
        r#"
        active = "default"

        [groups.default]
        database = "test"
        "#,
    )
    .expect("Failed to parse config");

    let config = file.resolve(None).unwrap();
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 27017);
    assert_eq!(config.connection_uri(), "mongodb://127.0.0.1:27017/test");
}

/// Test full configuration with all options
#[test]
fn test_config_full() {
    let file = MongoConfigFile::parse(
        r#"
        active = "production"

        [groups.production]
        host = "db.internal"
        port = 27018
        database = "shop"
        authentication = true
        username = "app"
        password = "secret"
        tls = true
        replica_set = "rs0"
        auth_source = "admin"
        server_selection_try_once = true
        debug = true
        return_as = "object"
        write_concern = 2
        journal = false
        read_preference = "nearest"
        read_concern = "local"
        legacy_support = true
        app_name = "storefront"
        connect_timeout = 5
        server_selection_timeout = 15
        "#,
    )
    .expect("Failed to parse config");

    let config = file.resolve(None).unwrap();
    assert_eq!(config.host, "db.internal");
    assert_eq!(config.port, 27018);
    assert_eq!(config.username.as_deref(), Some("app"));
    assert_eq!(config.replica_set.as_deref(), Some("rs0"));
    assert_eq!(config.auth_source.as_deref(), Some("admin"));
    assert_eq!(config.return_as, ReturnAs::Object);
    assert_eq!(config.write_concern, WriteConcernLevel::W(2));
    assert_eq!(config.read_preference, ReadPreference::Nearest);
    assert_eq!(config.read_concern, ReadConcern::Local);
    assert_eq!(config.connect_timeout, Some(Duration::from_secs(5)));
    assert!(config.tls);
    assert!(config.debug);
    assert!(config.legacy_support);

    let concern = config.write_concern();
    assert_eq!(concern.journal, Some(false));
    assert_eq!(concern.timeout, Duration::from_millis(1000));
}

/// Test that unknown keys are rejected
#[test]
fn test_config_unknown_key() {
    let result = MongoConfigFile::parse(
        r#"
        [groups.default]
        database = "test"
        hots = "typo"
        "#,
    );
    assert!(result.is_err());
}

/// Test that authentication without credentials fails validation
#[test]
fn test_config_missing_credentials() {
    let file = MongoConfigFile::parse(
        r#"
        active = "default"

        [groups.default]
        database = "test"
        authentication = true
        username = "app"
        "#,
    )
    .unwrap();

    let err = file.resolve(None).unwrap_err();
    assert!(err.to_string().contains("password"));
}

/// Test loading configuration from disk
#[test]
fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        active = "default"

        [groups.default]
        database = "from_disk"

        [groups.analytics]
        database = "warehouse"
        read_preference = "secondary"
        "#
    )
    .unwrap();

    let loaded = MongoConfigFile::from_file(file.path()).unwrap();
    assert_eq!(loaded.resolve(None).unwrap().database, "from_disk");

    let analytics = loaded.resolve(Some("analytics")).unwrap();
    assert_eq!(analytics.read_preference, ReadPreference::Secondary);
}

/// Test the builder and the file agree on defaults
#[test]
fn test_builder_matches_file_defaults() {
    let built = MongoConfig::builder().database("test").build().unwrap();
    let parsed = MongoConfigFile::parse(
        r#"
        active = "default"
        [groups.default]
        database = "test"
        "#,
    )
    .unwrap()
    .resolve(None)
    .unwrap();

    assert_eq!(built, parsed);
}
