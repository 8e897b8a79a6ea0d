use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Gen3Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTarget {
    pub name: String,
    pub target_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub multiplicity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Link {
    Subgroup {
        subgroup: Vec<LinkTarget>,
        #[serde(default)]
        exclusive: bool,
        #[serde(default)]
        required: bool,
    },
    Direct(LinkTarget),
}

impl Link {
    pub fn targets(&self) -> Vec<&LinkTarget> {
        match self {
            Link::Subgroup { subgroup, .. } => subgroup.iter().collect(),
            Link::Direct(target) => vec![target],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSchema {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl NodeSchema {
    pub fn property_names(&self) -> Vec<&str> {
        self.properties.keys().map(String::as_str).collect()
    }

    pub fn link_names(&self) -> Vec<&str> {
        self.links
            .iter()
            .flat_map(Link::targets)
            .map(|target| target.name.as_str())
            .collect()
    }
}

/// Node-type schemas keyed by node name, as served by `_dictionary/_all`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DictionaryGraph {
    nodes: BTreeMap<String, NodeSchema>,
}

impl DictionaryGraph {
    pub fn new(nodes: BTreeMap<String, NodeSchema>) -> Self {
        Self { nodes }
    }

    pub fn load(path: &Path) -> Result<Self, Gen3Error> {
        let content = fs::read_to_string(path)
            .map_err(|err| Gen3Error::Filesystem(format!("read {}: {err}", path.display())))?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, Gen3Error> {
        let value: Value = serde_json::from_str(content)
            .map_err(|err| Gen3Error::DictionaryParse(err.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, Gen3Error> {
        let Value::Object(entries) = value else {
            return Err(Gen3Error::DictionaryParse(
                "dictionary must be a JSON object".to_string(),
            ));
        };
        let mut nodes = BTreeMap::new();
        for (name, entry) in entries {
            if name.starts_with('_') || !entry.is_object() {
                continue;
            }
            match serde_json::from_value::<NodeSchema>(entry) {
                Ok(schema) => {
                    nodes.insert(name, schema);
                }
                Err(err) => debug!("skipping dictionary entry {name}: {err}"),
            }
        }
        Ok(Self { nodes })
    }

    pub fn get(&self, node: &str) -> Option<&NodeSchema> {
        self.nodes.get(node)
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn link_targets(&self, node: &str) -> Vec<&str> {
        self.nodes
            .get(node)
            .map(|schema| {
                schema
                    .links
                    .iter()
                    .flat_map(Link::targets)
                    .map(|target| target.target_type.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DICTIONARY: &str = r#"{
        "_settings": {"enable_case_cache": false},
        "_terms": {},
        "project": {"id": "project", "links": [{"name": "programs", "target_type": "program"}]},
        "case": {
            "id": "case",
            "required": ["submitter_id", "projects"],
            "properties": {"submitter_id": {"type": "string"}, "projects": {"$ref": "_definitions.yaml#/to_one"}},
            "links": [{"name": "projects", "target_type": "project", "required": true}]
        },
        "imaging_file": {
            "id": "imaging_file",
            "links": [
                {"exclusive": false, "required": true, "subgroup": [
                    {"name": "imaging_mri_exams", "target_type": "imaging_mri_exam"},
                    {"name": "core_metadata_collections", "target_type": "core_metadata_collection"}
                ]}
            ]
        }
    }"#;

    #[test]
    fn parses_nodes_and_skips_meta_entries() {
        let graph = DictionaryGraph::from_json_str(DICTIONARY).unwrap();
        assert_eq!(graph.len(), 3);
        assert!(!graph.contains("_settings"));
        let case = graph.get("case").unwrap();
        assert_eq!(case.required, vec!["submitter_id", "projects"]);
        assert_eq!(case.property_names(), vec!["projects", "submitter_id"]);
    }

    #[test]
    fn flattens_subgroup_targets() {
        let graph = DictionaryGraph::from_json_str(DICTIONARY).unwrap();
        assert_eq!(
            graph.link_targets("imaging_file"),
            vec!["imaging_mri_exam", "core_metadata_collection"]
        );
        assert_eq!(
            graph.get("imaging_file").unwrap().link_names(),
            vec!["imaging_mri_exams", "core_metadata_collections"]
        );
        assert!(graph.link_targets("missing").is_empty());
    }
}
