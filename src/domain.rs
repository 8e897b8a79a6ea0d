use std::fmt;
use std::path::Path;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::Gen3Error;

pub const ROOT_NODE: &str = "project";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId {
    program: String,
    project: String,
}

impl ProjectId {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn project(&self) -> &str {
        &self.project
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.program, self.project)
    }
}

impl FromStr for ProjectId {
    type Err = Gen3Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (program, project) = trimmed
            .split_once('-')
            .ok_or_else(|| Gen3Error::InvalidProjectId(value.to_string()))?;
        if program.is_empty() || project.is_empty() {
            return Err(Gen3Error::InvalidProjectId(value.to_string()));
        }
        Ok(Self {
            program: program.to_string(),
            project: project.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    Csv,
    Tsv,
    Xlsx,
}

impl TableFormat {
    pub fn from_path(path: &Path) -> Result<Self, Gen3Error> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(TableFormat::Csv),
            "tsv" | "txt" => Ok(TableFormat::Tsv),
            "xlsx" => Ok(TableFormat::Xlsx),
            _ => Err(Gen3Error::UnsupportedFormat(path.display().to_string())),
        }
    }

    pub fn delimiter(self) -> Option<u8> {
        match self {
            TableFormat::Csv => Some(b','),
            TableFormat::Tsv => Some(b'\t'),
            TableFormat::Xlsx => None,
        }
    }
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableFormat::Csv => write!(f, "csv"),
            TableFormat::Tsv => write!(f, "tsv"),
            TableFormat::Xlsx => write!(f, "xlsx"),
        }
    }
}

pub fn link_submitter_column(node: &str) -> String {
    format!("{node}s.submitter_id")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKey {
    SubmitterId,
    Id,
}

/// A column header that references a parent record, e.g. `cases.submitter_id`
/// or `visits.id#2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkColumn {
    pub link: String,
    pub key: LinkKey,
    pub index: Option<u32>,
}

impl LinkColumn {
    pub fn parse(header: &str) -> Option<Self> {
        let (base, index) = match header.rsplit_once('#') {
            Some((base, suffix)) => (base, Some(suffix.parse::<u32>().ok()?)),
            None => (header, None),
        };
        let (link, key) = if let Some(link) = base.strip_suffix(".submitter_id") {
            (link, LinkKey::SubmitterId)
        } else if let Some(link) = base.strip_suffix(".id") {
            (link, LinkKey::Id)
        } else {
            return None;
        };
        if link.is_empty() {
            return None;
        }
        Some(Self {
            link: link.to_string(),
            key,
            index,
        })
    }

    pub fn header(&self) -> String {
        let key = match self.key {
            LinkKey::SubmitterId => "submitter_id",
            LinkKey::Id => "id",
        };
        match self.index {
            Some(index) => format!("{}.{key}#{index}", self.link),
            None => format!("{}.{key}", self.link),
        }
    }
}
