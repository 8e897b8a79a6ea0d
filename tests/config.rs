use std::fs;

use assert_matches::assert_matches;

use gen3_expansion::config::{Config, ConfigLoader, SessionConfig};
use gen3_expansion::error::Gen3Error;

#[test]
fn explicit_config_file_is_read() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("gen3x.json");
    fs::write(
        &path,
        r#"{"endpoint": "https://data.example.org/", "chunk_size": 12, "auxiliary_nodes": ["publication"]}"#,
    )
    .unwrap();

    let config: Config = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    let resolved = ConfigLoader::resolve_config(config, None).unwrap();
    assert_eq!(resolved.endpoint, "https://data.example.org");
    assert_eq!(resolved.chunk_size, 12);
    assert_eq!(resolved.auxiliary_nodes, vec!["publication".to_string()]);
    assert_eq!(resolved.root_nodes, SessionConfig::default().root_nodes);
}

#[test]
fn missing_config_file_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(Some(&path)),
        Err(Gen3Error::ConfigRead(reported)) if reported == path
    );
}

#[test]
fn malformed_config_file_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("gen3x.json");
    fs::write(&path, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(&path)),
        Err(Gen3Error::ConfigParse(_))
    );
}

#[test]
fn zero_chunk_size_is_rejected() {
    let config = Config {
        chunk_size: Some(0),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config, None),
        Err(Gen3Error::ConfigParse(_))
    );
}

#[test]
fn zero_page_limit_falls_back_to_default() {
    let config = Config {
        index_page_limit: Some(0),
        request_timeout_secs: Some(5),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config, None).unwrap();
    assert_eq!(resolved.index_page_limit, 100);
    assert_eq!(resolved.request_timeout_secs, 5);
}
