use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};

use crate::config::SessionConfig;
use crate::dictionary::DictionaryGraph;
use crate::domain::ProjectId;
use crate::error::Gen3Error;

pub const TSV_CONTENT_TYPE: &str = "text/tab-separated-values";

pub trait SubmissionClient: Send + Sync {
    /// Returns the reply body whatever the HTTP status; `Err` means the
    /// request never completed.
    fn submit_tsv(&self, project: &ProjectId, body: &str) -> Result<String, Gen3Error>;
    fn delete_entities(&self, project: &ProjectId, ids: &[String]) -> Result<String, Gen3Error>;
    fn export_node(&self, project: &ProjectId, node: &str) -> Result<String, Gen3Error>;
    fn dictionary(&self) -> Result<DictionaryGraph, Gen3Error>;
}

#[derive(Clone)]
pub struct SheepdogHttpClient {
    client: Client,
    base_url: String,
}

impl SheepdogHttpClient {
    pub fn new(config: &SessionConfig) -> Result<Self, Gen3Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("gen3x/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| Gen3Error::SubmissionHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|err| Gen3Error::SubmissionHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: format!("{}/api/v0/submission", config.api_base()),
        })
    }

    pub fn project_url(&self, project: &ProjectId) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            project.program(),
            project.project()
        )
    }

    fn handle_status(response: Response) -> Result<Response, Gen3Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "submission request failed".to_string());
        Err(Gen3Error::SubmissionStatus { status, message })
    }

    fn read_body(response: Response) -> Result<String, Gen3Error> {
        response
            .text()
            .map_err(|err| Gen3Error::SubmissionHttp(err.to_string()))
    }
}

impl SubmissionClient for SheepdogHttpClient {
    fn submit_tsv(&self, project: &ProjectId, body: &str) -> Result<String, Gen3Error> {
        let response = self
            .client
            .put(self.project_url(project))
            .header(CONTENT_TYPE, TSV_CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .map_err(|err| Gen3Error::SubmissionHttp(err.to_string()))?;
        Self::read_body(response)
    }

    fn delete_entities(&self, project: &ProjectId, ids: &[String]) -> Result<String, Gen3Error> {
        let url = format!("{}/entities/{}", self.project_url(project), ids.join(","));
        let response = self
            .client
            .delete(url)
            .send()
            .map_err(|err| Gen3Error::SubmissionHttp(err.to_string()))?;
        Self::read_body(response)
    }

    fn export_node(&self, project: &ProjectId, node: &str) -> Result<String, Gen3Error> {
        let url = format!("{}/export/", self.project_url(project));
        let response = self
            .client
            .get(url)
            .query(&[("node_label", node), ("format", "tsv")])
            .send()
            .map_err(|err| Gen3Error::SubmissionHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        Self::read_body(response)
    }

    fn dictionary(&self) -> Result<DictionaryGraph, Gen3Error> {
        let url = format!("{}/_dictionary/_all", self.base_url);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| Gen3Error::SubmissionHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let value: serde_json::Value = response
            .json()
            .map_err(|err| Gen3Error::DictionaryParse(err.to_string()))?;
        DictionaryGraph::from_value(value)
    }
}
