use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::SessionConfig;
use crate::error::Gen3Error;
use crate::fs_util::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub did: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    #[serde(default, rename = "fileCount")]
    pub file_count: Option<u64>,
    #[serde(default, rename = "totalFileSize")]
    pub total_file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct IndexPage {
    #[serde(default)]
    records: Option<Vec<IndexRecord>>,
}

pub trait IndexClient: Send + Sync {
    fn list_page(&self, limit: usize, page: usize) -> Result<Vec<IndexRecord>, Gen3Error>;
    fn stats(&self) -> Result<IndexStats, Gen3Error>;
    fn get_record(&self, guid: &str) -> Result<IndexRecord, Gen3Error>;
}

#[derive(Clone)]
pub struct IndexHttpClient {
    client: Client,
    base_url: String,
}

impl IndexHttpClient {
    pub fn new(config: &SessionConfig) -> Result<Self, Gen3Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("gen3x/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| Gen3Error::IndexHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|err| Gen3Error::IndexHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: format!("{}/index", config.api_base()),
        })
    }

    fn handle_status(response: Response) -> Result<Response, Gen3Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "index request failed".to_string());
        Err(Gen3Error::IndexStatus { status, message })
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, Gen3Error> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .map_err(|err| Gen3Error::IndexHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        response
            .json::<T>()
            .map_err(|err| Gen3Error::IndexHttp(format!("unable to parse index response: {err}")))
    }
}

impl IndexClient for IndexHttpClient {
    fn list_page(&self, limit: usize, page: usize) -> Result<Vec<IndexRecord>, Gen3Error> {
        let url = format!("{}/index/", self.base_url);
        let page_data: IndexPage = self.get_json(
            &url,
            &[("limit", limit.to_string()), ("page", page.to_string())],
        )?;
        match page_data.records {
            Some(records) => Ok(records),
            None => {
                warn!("no records field in index page {page}");
                Ok(Vec::new())
            }
        }
    }

    fn stats(&self) -> Result<IndexStats, Gen3Error> {
        self.get_json(&format!("{}/_stats", self.base_url), &[])
    }

    fn get_record(&self, guid: &str) -> Result<IndexRecord, Gen3Error> {
        self.get_json(&format!("{}/index/{guid}", self.base_url), &[])
    }
}

/// Pages through the index until an empty page comes back.
pub fn fetch_all_records<I: IndexClient + ?Sized>(
    client: &I,
    limit: usize,
    start_page: usize,
    sink: &dyn ProgressSink,
) -> Result<Vec<IndexRecord>, Gen3Error> {
    let limit = limit.max(1);
    let mut page = start_page;
    let mut records = Vec::new();
    loop {
        let batch = client.list_page(limit, page)?;
        if batch.is_empty() {
            break;
        }
        if batch.len() != limit {
            info!("page {page} returned {} records (limit {limit})", batch.len());
        }
        records.extend(batch);
        sink.event(ProgressEvent {
            message: format!("phase=Index; page {page}, {} records total", records.len()),
            elapsed: None,
        });
        page += 1;
    }
    info!("retrieved {} index records", records.len());
    Ok(records)
}

pub fn save_records(path: &Path, records: &[IndexRecord]) -> Result<(), Gen3Error> {
    let content =
        serde_json::to_vec(records).map_err(|err| Gen3Error::Filesystem(err.to_string()))?;
    write_atomic(path, &content)
}

pub fn load_records(path: &Path) -> Result<Vec<IndexRecord>, Gen3Error> {
    let content = fs::read_to_string(path)
        .map_err(|err| Gen3Error::Filesystem(format!("read {}: {err}", path.display())))?;
    serde_json::from_str(&content).map_err(|err| {
        Gen3Error::ManifestParse(format!("index records in {}: {err}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct PagedIndex {
        pages: Vec<Vec<IndexRecord>>,
        requested: Mutex<Vec<usize>>,
    }

    impl IndexClient for PagedIndex {
        fn list_page(&self, _limit: usize, page: usize) -> Result<Vec<IndexRecord>, Gen3Error> {
            self.requested.lock().unwrap().push(page);
            Ok(self.pages.get(page).cloned().unwrap_or_default())
        }

        fn stats(&self) -> Result<IndexStats, Gen3Error> {
            Ok(IndexStats::default())
        }

        fn get_record(&self, guid: &str) -> Result<IndexRecord, Gen3Error> {
            Err(Gen3Error::IndexStatus {
                status: 404,
                message: guid.to_string(),
            })
        }
    }

    struct Silent;

    impl ProgressSink for Silent {
        fn event(&self, _event: ProgressEvent) {}
    }

    fn record(did: &str) -> IndexRecord {
        IndexRecord {
            did: did.to_string(),
            size: Some(1),
            urls: vec![format!("s3://bucket/{did}")],
            file_name: None,
            hashes: BTreeMap::new(),
        }
    }

    #[test]
    fn pages_until_empty_page() {
        let index = PagedIndex {
            pages: vec![vec![record("a"), record("b")], vec![record("c")]],
            requested: Mutex::new(Vec::new()),
        };
        let records = fetch_all_records(&index, 2, 0, &Silent).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(*index.requested.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn records_file_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("records.json");
        save_records(&path, &[record("a")]).unwrap();
        assert_eq!(load_records(&path).unwrap(), vec![record("a")]);
    }
}
