use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::dictionary::DictionaryGraph;
use crate::domain::ROOT_NODE;
use crate::error::Gen3Error;
use crate::fs_util::{file_name, list_files};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderOptions {
    pub root_nodes: Vec<String>,
    pub auxiliary_nodes: Vec<String>,
}

impl Default for OrderOptions {
    fn default() -> Self {
        Self {
            root_nodes: default_root_nodes(),
            auxiliary_nodes: default_auxiliary_nodes(),
        }
    }
}

pub fn default_root_nodes() -> Vec<String> {
    ["project", "study", "case", "visit"]
        .iter()
        .map(|node| node.to_string())
        .collect()
}

pub fn default_auxiliary_nodes() -> Vec<String> {
    vec!["core_metadata_collection".to_string()]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeDepth {
    pub node: String,
    pub depth: u32,
}

enum Evaluation {
    Resolved(u32),
    Pending {
        missing: Vec<String>,
        auxiliary_only: bool,
    },
}

/// Computes link-hop depths from `project` so parents can be processed before children.
pub struct OrderResolver<'a> {
    dictionary: &'a DictionaryGraph,
    options: &'a OrderOptions,
}

impl<'a> OrderResolver<'a> {
    pub fn new(dictionary: &'a DictionaryGraph, options: &'a OrderOptions) -> Self {
        Self {
            dictionary,
            options,
        }
    }

    pub fn resolve(&self, working_set: &[String]) -> Result<BTreeMap<String, u32>, Gen3Error> {
        let mut present = Vec::new();
        for node in working_set {
            if node == ROOT_NODE || present.contains(node) {
                continue;
            }
            if !self.dictionary.contains(node) {
                warn!("node `{node}` is not in the data dictionary, skipping");
                continue;
            }
            present.push(node.clone());
        }
        let present_set = present.iter().cloned().collect::<HashSet<_>>();

        let mut depths = HashMap::from([(ROOT_NODE.to_string(), 0u32)]);
        for root in &self.options.root_nodes {
            if !present_set.contains(root) {
                depths.insert(root.clone(), 0);
            }
        }

        let mut queue = present.iter().cloned().collect::<VecDeque<_>>();
        let mut members = present_set.clone();
        let mut requeues = HashMap::<String, usize>::new();
        let mut seen_auxiliary = HashSet::<String>::new();

        while let Some(node) = queue.pop_front() {
            if depths.contains_key(&node) {
                continue;
            }
            let allow_auxiliary = seen_auxiliary.contains(&node);
            match self.evaluate(&node, &depths, &present_set, allow_auxiliary)? {
                Evaluation::Resolved(depth) => {
                    debug!("node {node} resolved at depth {depth}");
                    depths.insert(node, depth);
                }
                Evaluation::Pending {
                    missing,
                    auxiliary_only,
                } => {
                    for dependency in &missing {
                        if !members.contains(dependency) && !depths.contains_key(dependency) {
                            debug!("pulling ancestor {dependency} of {node} into resolution");
                            members.insert(dependency.clone());
                            queue.push_back(dependency.clone());
                        }
                    }
                    if auxiliary_only {
                        seen_auxiliary.insert(node.clone());
                    }
                    let count = requeues.entry(node.clone()).or_insert(0);
                    *count += 1;
                    if *count > members.len() + 2 {
                        return Err(Gen3Error::OrderResolution {
                            node,
                            reason: format!(
                                "links still unresolved after {count} passes ({})",
                                missing.join(", ")
                            ),
                        });
                    }
                    debug!("re-queueing {node}, waiting on {}", missing.join(", "));
                    queue.push_back(node);
                }
            }
        }

        Ok(present
            .into_iter()
            .filter_map(|node| {
                let depth = depths.get(&node).copied()?;
                (depth > 0).then_some((node, depth))
            })
            .collect())
    }

    pub fn submission_order(&self, working_set: &[String]) -> Result<Vec<NodeDepth>, Gen3Error> {
        let mut order = self
            .resolve(working_set)?
            .into_iter()
            .map(|(node, depth)| NodeDepth { node, depth })
            .collect::<Vec<_>>();
        order.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.node.cmp(&b.node)));
        Ok(order)
    }

    fn evaluate(
        &self,
        node: &str,
        depths: &HashMap<String, u32>,
        present: &HashSet<String>,
        allow_auxiliary: bool,
    ) -> Result<Evaluation, Gen3Error> {
        let Some(schema) = self.dictionary.get(node) else {
            return Err(Gen3Error::OrderResolution {
                node: node.to_string(),
                reason: "node is not in the data dictionary".to_string(),
            });
        };

        let mut link_depths = Vec::new();
        let mut missing = Vec::new();
        let mut auxiliary_seen = false;

        for link in &schema.links {
            let (auxiliary, regular): (Vec<&str>, Vec<&str>) = link
                .targets()
                .into_iter()
                .map(|target| target.target_type.as_str())
                .partition(|target| !allow_auxiliary && self.is_auxiliary(target));
            if regular.is_empty() {
                auxiliary_seen |= !auxiliary.is_empty();
                continue;
            }

            let known = regular
                .iter()
                .copied()
                .filter(|target| {
                    *target == ROOT_NODE
                        || depths.contains_key(*target)
                        || self.dictionary.contains(target)
                })
                .collect::<Vec<_>>();
            if known.is_empty() {
                return Err(Gen3Error::OrderResolution {
                    node: node.to_string(),
                    reason: format!(
                        "link target(s) not in the data dictionary: {}",
                        regular.join(", ")
                    ),
                });
            }

            // Alternatives that exist locally win over ones that would have to be pulled in.
            let available = known
                .iter()
                .copied()
                .filter(|target| depths.contains_key(*target) || present.contains(*target))
                .collect::<Vec<_>>();
            let considered = if available.is_empty() { known } else { available };

            let resolved = considered
                .iter()
                .filter_map(|target| depths.get(*target).copied())
                .collect::<Vec<_>>();
            if resolved.len() == considered.len() {
                if let Some(min) = resolved.into_iter().min() {
                    link_depths.push(min + 1);
                }
            } else {
                missing.extend(
                    considered
                        .iter()
                        .filter(|target| !depths.contains_key(**target))
                        .map(|target| target.to_string()),
                );
            }
        }

        if !missing.is_empty() {
            return Ok(Evaluation::Pending {
                missing,
                auxiliary_only: false,
            });
        }
        if let Some(depth) = link_depths.into_iter().max() {
            return Ok(Evaluation::Resolved(depth));
        }
        if auxiliary_seen {
            return Ok(Evaluation::Pending {
                missing: Vec::new(),
                auxiliary_only: true,
            });
        }
        Err(Gen3Error::OrderResolution {
            node: node.to_string(),
            reason: "node declares no links".to_string(),
        })
    }

    fn is_auxiliary(&self, node: &str) -> bool {
        self.options
            .auxiliary_nodes
            .iter()
            .any(|auxiliary| auxiliary == node)
    }
}

/// Finds node names from files named `{prefix}_{project}_{node}.{suffix}`.
pub fn discover_nodes(
    dir: &Path,
    prefix: &str,
    project: &str,
    suffix: &str,
) -> Result<Vec<String>, Gen3Error> {
    let pattern = format!(
        "^{}_{}_(.+)\\.{}$",
        regex::escape(prefix),
        regex::escape(project),
        regex::escape(suffix)
    );
    let regex = Regex::new(&pattern).map_err(|err| Gen3Error::Filesystem(err.to_string()))?;
    let mut nodes = Vec::new();
    for path in list_files(dir)? {
        let name = file_name(&path)?;
        if let Some(captures) = regex.captures(name) {
            nodes.push(captures[1].to_string());
        }
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn nodes(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn graph(json: &str) -> DictionaryGraph {
        DictionaryGraph::from_json_str(json).unwrap()
    }

    const CHAIN: &str = r#"{
        "project": {"links": [{"name": "programs", "target_type": "program"}]},
        "case": {"links": [{"name": "projects", "target_type": "project"}]},
        "visit": {"links": [{"name": "cases", "target_type": "case"}]}
    }"#;

    #[test]
    fn chain_depths() {
        let dictionary = graph(CHAIN);
        let options = OrderOptions::default();
        let resolver = OrderResolver::new(&dictionary, &options);
        let depths = resolver.resolve(&nodes(&["visit", "case"])).unwrap();
        assert_eq!(depths, BTreeMap::from([("case".to_string(), 1), ("visit".to_string(), 2)]));
    }

    #[test]
    fn absent_roots_are_pinned_to_zero() {
        let dictionary = graph(
            r#"{
            "case": {"links": [{"name": "projects", "target_type": "project"}]},
            "visit": {"links": [{"name": "cases", "target_type": "case"}]},
            "imaging_exam": {"links": [{"name": "visits", "target_type": "visit"}]}
        }"#,
        );
        let options = OrderOptions::default();
        let resolver = OrderResolver::new(&dictionary, &options);
        let depths = resolver.resolve(&nodes(&["imaging_exam"])).unwrap();
        assert_eq!(depths, BTreeMap::from([("imaging_exam".to_string(), 1)]));
    }

    #[test]
    fn cycle_is_reported_instead_of_looping() {
        let dictionary = graph(
            r#"{
            "a": {"links": [{"name": "bs", "target_type": "b"}]},
            "b": {"links": [{"name": "as", "target_type": "a"}]}
        }"#,
        );
        let options = OrderOptions::default();
        let resolver = OrderResolver::new(&dictionary, &options);
        assert_matches!(
            resolver.resolve(&nodes(&["a", "b"])),
            Err(Gen3Error::OrderResolution { node, .. }) if node == "a" || node == "b"
        );
    }

    #[test]
    fn unknown_link_target_fails_fast() {
        let dictionary = graph(r#"{"sample": {"links": [{"name": "ghosts", "target_type": "ghost"}]}}"#);
        let options = OrderOptions::default();
        let resolver = OrderResolver::new(&dictionary, &options);
        assert_matches!(
            resolver.resolve(&nodes(&["sample"])),
            Err(Gen3Error::OrderResolution { node, .. }) if node == "sample"
        );
    }
}
