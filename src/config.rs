use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::Gen3Error;
use crate::order::{OrderOptions, default_auxiliary_nodes, default_root_nodes};

pub const CONFIG_FILE_NAME: &str = "gen3x.json";
pub const ENDPOINT_ENV: &str = "GEN3_ENDPOINT";
pub const DEFAULT_CHUNK_SIZE: usize = 30;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub index_page_limit: Option<usize>,
    #[serde(default)]
    pub root_nodes: Option<Vec<String>>,
    #[serde(default)]
    pub auxiliary_nodes: Option<Vec<String>>,
}

/// Settings shared by every client and operation of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub endpoint: String,
    pub chunk_size: usize,
    pub request_timeout_secs: u64,
    pub index_page_limit: usize,
    pub root_nodes: Vec<String>,
    pub auxiliary_nodes: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_timeout_secs: 60,
            index_page_limit: 100,
            root_nodes: default_root_nodes(),
            auxiliary_nodes: default_auxiliary_nodes(),
        }
    }
}

impl SessionConfig {
    pub fn order_options(&self) -> OrderOptions {
        OrderOptions {
            root_nodes: self.root_nodes.clone(),
            auxiliary_nodes: self.auxiliary_nodes.clone(),
        }
    }

    pub fn api_base(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&Path>) -> Result<SessionConfig, Gen3Error> {
        let config = match Self::locate(path)? {
            Some(config_path) => {
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| Gen3Error::ConfigRead(config_path.clone()))?;
                serde_json::from_str::<Config>(&content)
                    .map_err(|err| Gen3Error::ConfigParse(err.to_string()))?
            }
            None => Config::default(),
        };
        let endpoint_override = std::env::var(ENDPOINT_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty());
        Self::resolve_config(config, endpoint_override)
    }

    pub fn resolve_config(
        config: Config,
        endpoint_override: Option<String>,
    ) -> Result<SessionConfig, Gen3Error> {
        let defaults = SessionConfig::default();
        let chunk_size = config.chunk_size.unwrap_or(defaults.chunk_size);
        if chunk_size == 0 {
            return Err(Gen3Error::ConfigParse(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        let endpoint = endpoint_override
            .or(config.endpoint)
            .unwrap_or(defaults.endpoint);
        Ok(SessionConfig {
            endpoint: endpoint.trim().trim_end_matches('/').to_string(),
            chunk_size,
            request_timeout_secs: config
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            index_page_limit: config
                .index_page_limit
                .filter(|limit| *limit > 0)
                .unwrap_or(defaults.index_page_limit),
            root_nodes: config.root_nodes.unwrap_or(defaults.root_nodes),
            auxiliary_nodes: config.auxiliary_nodes.unwrap_or(defaults.auxiliary_nodes),
        })
    }

    fn locate(path: Option<&Path>) -> Result<Option<PathBuf>, Gen3Error> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(Gen3Error::ConfigRead(path.to_path_buf()));
            }
            return Ok(Some(path.to_path_buf()));
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(Some(local));
        }
        let user = ProjectDirs::from("org", "gen3", "gen3x")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|path| path.exists());
        Ok(user)
    }
}
