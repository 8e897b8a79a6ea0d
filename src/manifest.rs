use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Gen3Error;
use crate::fs_util::{file_name, write_atomic};
use crate::indexd::IndexRecord;

static COPY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.+cp (s3.+) \.$").expect("copy line regex is valid"));

/// One object in the JSON manifest consumed by the download client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub object_id: String,
    pub location: String,
    pub size: String,
}

/// Extracts the object paths copied by a portal download script.
pub fn parse_dcc_manifest(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim_end)
        .filter_map(|line| COPY_LINE.captures(line))
        .map(|captures| captures[1].to_string())
        .collect()
}

pub fn build_client_manifest(
    locations: &[String],
    records: &[IndexRecord],
) -> Result<Vec<ManifestEntry>, Gen3Error> {
    let by_location = records
        .iter()
        .filter_map(|record| record.urls.first().map(|url| (url.as_str(), record)))
        .collect::<HashMap<_, _>>();
    locations
        .iter()
        .map(|location| {
            let record = by_location
                .get(location.as_str())
                .ok_or_else(|| Gen3Error::MissingIndexRecord(location.clone()))?;
            Ok(ManifestEntry {
                object_id: record.did.clone(),
                location: location.clone(),
                size: record.size.map(|size| size.to_string()).unwrap_or_default(),
            })
        })
        .collect()
}

pub fn write_client_manifest(path: &Path, entries: &[ManifestEntry]) -> Result<(), Gen3Error> {
    let content =
        serde_json::to_vec_pretty(entries).map_err(|err| Gen3Error::Filesystem(err.to_string()))?;
    write_atomic(path, &content)
}

pub fn default_manifest_path(manifest: &Path) -> Result<PathBuf, Gen3Error> {
    let name = file_name(manifest)?;
    let dir = manifest.parent().unwrap_or_else(|| Path::new(""));
    Ok(dir.join(format!("gen3_manifest_{name}.json")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use assert_matches::assert_matches;

    use super::*;

    const DCC: &str = "#!/bin/sh\n\
aws --profile collab --endpoint-url https://object.example.org s3 cp s3://oicr.icgc/data/aaa .\n\
echo done\n\
aws --profile collab --endpoint-url https://object.example.org s3 cp s3://oicr.icgc/data/bbb .   \n";

    fn record(did: &str, url: &str, size: Option<u64>) -> IndexRecord {
        IndexRecord {
            did: did.to_string(),
            size,
            urls: vec![url.to_string()],
            file_name: None,
            hashes: BTreeMap::new(),
        }
    }

    #[test]
    fn parses_copy_lines_only() {
        assert_eq!(
            parse_dcc_manifest(DCC),
            vec!["s3://oicr.icgc/data/aaa", "s3://oicr.icgc/data/bbb"]
        );
    }

    #[test]
    fn maps_locations_to_guids() {
        let locations = parse_dcc_manifest(DCC);
        let records = vec![
            record("dg.1/b", "s3://oicr.icgc/data/bbb", None),
            record("dg.1/a", "s3://oicr.icgc/data/aaa", Some(42)),
        ];
        let entries = build_client_manifest(&locations, &records).unwrap();
        assert_eq!(entries[0].object_id, "dg.1/a");
        assert_eq!(entries[0].size, "42");
        assert_eq!(entries[1].size, "");
    }

    #[test]
    fn missing_record_is_an_error() {
        let locations = vec!["s3://nowhere/x".to_string()];
        assert_matches!(
            build_client_manifest(&locations, &[]),
            Err(Gen3Error::MissingIndexRecord(location)) if location == "s3://nowhere/x"
        );
    }

    #[test]
    fn default_path_is_next_to_input() {
        let path = default_manifest_path(Path::new("/tmp/dcc_manifest.sh")).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/gen3_manifest_dcc_manifest.sh.json"));
    }
}
