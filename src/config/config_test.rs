use std::io::Write;

use crate::ChannelConfig;
use crate::GqlChannelConfig;
use crate::InternalChannelConfig;
use crate::Settings;
use crate::StorageBackend;

#[test]
fn test_defaults_without_any_source() {
    let settings = Settings::load(None).expect("defaults should load");

    assert_eq!(settings.storage.backend, StorageBackend::Memory);
    assert_eq!(settings.executor.workers, 2);
    assert_eq!(settings.sync.poll_interval_ms, 2000);
    assert_eq!(settings.retry.push.base_delay_ms, 1000);
    assert_eq!(settings.retry.push.max_delay_ms, 300000);
}

#[test]
fn test_load_from_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        r#"
[storage]
backend = "sled"
db_root_dir = "/tmp/reactor-test"

[executor]
workers = 8

[sync]
poll_interval_ms = 500
"#
    )
    .unwrap();

    let name = path.with_extension("");
    let settings = Settings::load(Some(name.to_str().unwrap())).expect("file should load");

    assert_eq!(settings.storage.backend, StorageBackend::Sled);
    assert_eq!(settings.storage.db_root_dir, "/tmp/reactor-test");
    assert_eq!(settings.executor.workers, 8);
    assert_eq!(settings.sync.poll_interval_ms, 500);
    // untouched sections keep defaults
    assert_eq!(settings.cache.max_documents, 1000);
}

#[test]
fn test_gql_channel_config_validation() {
    assert!(GqlChannelConfig::new("http://localhost:4001/graphql")
        .validate()
        .is_ok());

    assert!(GqlChannelConfig::new("").validate().is_err());
    assert!(GqlChannelConfig::new("ftp://remote/graphql").validate().is_err());

    let mut bad_delays = GqlChannelConfig::new("http://localhost/graphql");
    bad_delays.retry_base_delay_ms = 5000;
    bad_delays.retry_max_delay_ms = 100;
    assert!(bad_delays.validate().is_err());
}

#[test]
fn test_channel_config_tagged_union_deserializes() {
    let gql: ChannelConfig = serde_json::from_value(serde_json::json!({
        "type": "gql",
        "url": "https://remote.example/graphql",
        "poll_interval_ms": 750
    }))
    .unwrap();

    match &gql {
        ChannelConfig::Gql(c) => {
            assert_eq!(c.url, "https://remote.example/graphql");
            assert_eq!(c.poll_interval_ms, 750);
            // omitted fields resolve to defaults, not an open bag
            assert_eq!(c.max_failures, 5);
        }
        other => panic!("unexpected variant: {:?}", other),
    }
    assert!(gql.validate().is_ok());

    let internal: ChannelConfig = serde_json::from_value(serde_json::json!({
        "type": "internal",
        "pair_key": "a-b"
    }))
    .unwrap();
    assert_eq!(
        internal,
        ChannelConfig::Internal(InternalChannelConfig {
            pair_key: "a-b".to_string()
        })
    );
}
