//! Core infrastructure tests.

mod common;

use common::*;
use rudder::core::config::{Config, ConfigOverrides};
use rudder::core::error::RudderError;
use rudder::core::namespace::{resolve_namespace, DEFAULT_NAMESPACE};
use rudder::core::runtime::{ComponentHealth, Runtime};
use rudder::ops::version::{is_compatible, VersionInfo};
use rudder::storage::{StoreKind, StoreOptions};
use std::io::Write;
use tempfile::NamedTempFile;
use tonic::Code;

// ============================================================================
// Config tests
// ============================================================================

#[test]
fn parse_minimal_config() {
    let file = create_minimal_config();
    let config = Config::from_file(file.path()).unwrap();
    assert!(config.server.insecure);
    assert_eq!(config.storage.driver, "memory");
    assert_eq!(config.server.auth_timeout_ms, 10_000);
}

#[test]
fn parse_full_config() {
    let file = write_config(
        r#"
[server]
listen = "127.0.0.1:44134"
tls_chain_path = "/etc/rudder/tls.crt"
tls_key_path = "/etc/rudder/tls.key"
client_ca_path = "/etc/rudder/ca.crt"
auth_timeout_ms = 2500

[[cluster.tokens]]
token = "abc"
username = "alice"
groups = ["admins"]

[[cluster.basic_users]]
username = "admin"
password = "secret"

[storage]
driver = "object-store"
provider = "s3"
container = "releases"
prefix = "prod"
s3_region = "eu-west-1"

[telemetry]
log_level = "warn"
"#,
    );
    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.cluster.tokens[0].groups, vec!["admins"]);
    assert_eq!(config.server.auth_timeout_ms, 2500);

    let options = StoreOptions::from_config(&config.storage).unwrap();
    assert_eq!(options.kind(), StoreKind::ObjectStore);
}

#[test]
fn unselected_driver_settings_are_ignored() {
    let config = Config::from_toml(
        r#"
[server]
insecure = true

[storage]
driver = "config-object"
provider = "not-a-provider"
container = ""
"#,
    )
    .unwrap();
    assert_eq!(
        StoreOptions::from_config(&config.storage).unwrap(),
        StoreOptions::ConfigObject
    );
}

#[test]
fn validate_rejects_bad_settings() {
    for content in [
        // TLS required unless insecure
        "",
        "[server]\ninsecure = true\nlisten = \"nowhere\"",
        "[server]\ninsecure = true\n[storage]\ndriver = \"etcd\"",
        "[server]\ninsecure = true\n[storage]\ndriver = \"object-store\"\nprovider = \"s3\"",
        "[server]\ninsecure = true\n[telemetry]\nlog_level = \"loud\"",
        "[server]\ninsecure = true\n[[cluster.tokens]]\ntoken = \"\"\nusername = \"bob\"",
    ] {
        assert!(Config::from_toml(content).is_err(), "accepted: {}", content);
    }
}

#[test]
fn overrides_apply() {
    let mut config = Config::from_toml("[server]\ninsecure = true").unwrap();
    config.apply_overrides(&ConfigOverrides {
        log_level: Some("trace".to_string()),
        listen: Some("127.0.0.1:9000".to_string()),
        storage_driver: Some("custom-resource".to_string()),
        insecure: false,
    });
    config.validate().unwrap();
    assert_eq!(config.telemetry.log_level, "trace");
    assert_eq!(config.listen_addr().unwrap().port(), 9000);
    assert_eq!(config.storage.driver, "custom-resource");
    assert!(config.server.insecure);
}

// ============================================================================
// Namespace tests
// ============================================================================

#[test]
fn namespace_resolution_order() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"  tenant-a \n").unwrap();

    assert_eq!(resolve_namespace(Some("override".into()), file.path()), "override");
    assert_eq!(resolve_namespace(Some("   ".into()), file.path()), "tenant-a");
    assert_eq!(resolve_namespace(None, file.path()), "tenant-a");

    let missing = std::path::Path::new("/nonexistent/namespace");
    assert_eq!(resolve_namespace(None, missing), DEFAULT_NAMESPACE);
}

// ============================================================================
// Version tests
// ============================================================================

#[test]
fn version_compatibility_matrix() {
    let cases = [
        ("v2.1.0", "v2.1.0", true),
        ("v2.1.0", "v2.3.4", true),
        ("v2.3.0", "v2.1.0", false),
        ("v2.1.0", "v3.0.0", false),
        ("v0.3.0", "v0.3.9", true),
        ("v0.3.0", "v0.4.0", false),
        ("v2.1.0-rc.1", "v2.1.0-rc.1", true),
        ("v2.1.0-rc.1", "v2.1.0", false),
        ("v1.0.0+unreleased", "v9.0.0", true),
        ("", "v2.1.0", false),
        ("garbage", "v2.1.0", false),
    ];
    for (client, server, expected) in cases {
        assert_eq!(is_compatible(client, server), expected, "{} -> {}", client, server);
    }
    assert!(VersionInfo::new("v2.1.0").admits_client("v2.0.1"));
}

// ============================================================================
// Error tests
// ============================================================================

#[test]
fn errors_map_to_grpc_status() {
    let cases = [
        (RudderError::MissingMetadata, Code::Unauthenticated),
        (RudderError::unauthenticated("x"), Code::Unauthenticated),
        (RudderError::release_not_found("web"), Code::NotFound),
        (RudderError::release_exists("web"), Code::AlreadyExists),
        (RudderError::conflict("stale"), Code::Aborted),
        (RudderError::unavailable("down"), Code::Unavailable),
        (RudderError::invalid_request("bad"), Code::InvalidArgument),
    ];
    for (err, code) in cases {
        let status = err.to_status();
        assert_eq!(status.code(), code, "{:?}", err);
        assert_eq!(RudderError::code_of(&status), Some(err.error_code()));
    }
}

// ============================================================================
// Runtime tests
// ============================================================================

#[tokio::test]
async fn runtime_serves_and_stops() {
    let config = Config::from_toml(
        r#"
[server]
insecure = true
listen = "127.0.0.1:0"

[storage]
driver = "config-object"
"#,
    )
    .unwrap();
    let mut runtime = Runtime::with_namespace(config, "releases").unwrap();
    runtime.start().await.unwrap();
    assert!(runtime.health().is_ready());
    assert_eq!(runtime.storage().unwrap().namespace(), "releases");

    runtime.stop().await.unwrap();
    assert_eq!(runtime.health().listener, ComponentHealth::Stopped);
    assert!(runtime.health().is_alive());
}

#[test]
fn runtime_rejects_invalid_config() {
    let mut config = Config::from_toml("[server]\ninsecure = true").unwrap();
    config.server.auth_timeout_ms = 0;
    assert!(Runtime::with_namespace(config, "default").is_err());
}
