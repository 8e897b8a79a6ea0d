use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{LinkColumn, LinkKey, link_submitter_column};
use crate::error::Gen3Error;
use crate::fs_util::{file_name, list_files};
use crate::table::{Dataset, SUBMITTER_ID};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditOutcome {
    pub file: PathBuf,
    pub rows: usize,
    pub changed: usize,
    pub written: bool,
}

/// Node TSVs on disk named `{prefix}_{project}_{node}.tsv`.
#[derive(Debug, Clone)]
pub struct MigrationWorkspace {
    dir: PathBuf,
    prefix: String,
    project: String,
}

impl MigrationWorkspace {
    pub fn new(dir: impl Into<PathBuf>, prefix: &str, project: &str) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.to_string(),
            project: project.to_string(),
        }
    }

    pub fn node_path(&self, node: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}_{node}.tsv", self.prefix, self.project))
    }

    pub fn load(&self, node: &str) -> Result<Dataset, Gen3Error> {
        Dataset::load(&self.node_path(node))
    }

    fn load_optional(&self, node: &str) -> Result<Option<Dataset>, Gen3Error> {
        let path = self.node_path(node);
        if !path.exists() {
            return Ok(None);
        }
        Dataset::load(&path).map(Some)
    }

    fn save(&self, node: &str, dataset: &Dataset, changed: usize) -> Result<EditOutcome, Gen3Error> {
        let file = self.node_path(node);
        dataset.write_tsv(&file)?;
        Ok(EditOutcome {
            file,
            rows: dataset.len(),
            changed,
            written: true,
        })
    }

    fn unchanged(&self, node: &str, dataset: &Dataset) -> EditOutcome {
        EditOutcome {
            file: self.node_path(node),
            rows: dataset.len(),
            changed: 0,
            written: false,
        }
    }

    /// Copies every file in `dir` named `{prefix}*{suffix}` to `{name}_{file}`.
    pub fn make_temp_files(
        dir: &Path,
        prefix: &str,
        suffix: &str,
        name: &str,
    ) -> Result<Vec<PathBuf>, Gen3Error> {
        let copy_prefix = format!("{name}_");
        let mut copies = Vec::new();
        for path in list_files(dir)? {
            let file = file_name(&path)?;
            if !file.starts_with(prefix) || !file.ends_with(suffix) {
                continue;
            }
            if !prefix.starts_with(&copy_prefix) && file.starts_with(&copy_prefix) {
                continue;
            }
            let target = dir.join(format!("{copy_prefix}{file}"));
            fs::copy(&path, &target).map_err(|err| {
                Gen3Error::Filesystem(format!("copy {}: {err}", path.display()))
            })?;
            copies.push(target);
        }
        info!("copied {} files to {copy_prefix}*", copies.len());
        Ok(copies)
    }

    pub fn merge_nodes(&self, in_nodes: &[String], out_node: &str) -> Result<EditOutcome, Gen3Error> {
        let mut tables = Vec::new();
        for node in in_nodes {
            match self.load_optional(node)? {
                Some(table) => {
                    info!("{node} node found with {} records", table.len());
                    tables.push(table);
                }
                None => warn!("can't read file {}", self.node_path(node).display()),
            }
        }
        if tables.is_empty() {
            return Err(Gen3Error::Filesystem(format!(
                "none of the nodes to merge into {out_node} have a TSV in {}",
                self.dir.display()
            )));
        }
        let mut merged = Dataset::concat(&tables);
        merged.set_column("type", out_node);
        let rows = merged.len();
        let outcome = self.save(out_node, &merged, rows)?;
        info!(
            "total of {rows} records written to node {out_node} in {}",
            outcome.file.display()
        );
        Ok(outcome)
    }

    /// Fills an empty `{link}s.submitter_id` with `{submitter_id}_{link}`.
    pub fn add_missing_links(&self, node: &str, link: &str) -> Result<EditOutcome, Gen3Error> {
        let mut dataset = self.load(node)?;
        let table = self.node_path(node).display().to_string();
        let link_column = dataset.require_column(&link_submitter_column(link), &table)?;
        let sid_column = dataset.require_column(SUBMITTER_ID, &table)?;

        let mut changed = 0;
        for row in 0..dataset.len() {
            if dataset.cell(row, link_column).is_empty() {
                let value = format!("{}_{link}", dataset.cell(row, sid_column));
                dataset.set_cell(row, link_column, &value);
                changed += 1;
            }
        }
        if changed == 0 {
            info!("no records are missing links to {link} in the {node} TSV");
            return Ok(self.unchanged(node, &dataset));
        }
        info!("{changed} links to node {link} added for {node}");
        self.save(node, &dataset, changed)
    }

    /// Creates `link` records for submitter_ids referenced by `node` but absent
    /// from the link TSV, carrying the `old_parent` link and fixed properties.
    pub fn create_missing_links(
        &self,
        node: &str,
        link: &str,
        old_parent: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<EditOutcome, Gen3Error> {
        let source = self.load(node)?;
        let table = self.node_path(node).display().to_string();
        let link_name = link_submitter_column(link);
        let parent_name = link_submitter_column(old_parent);
        let link_column = source.require_column(&link_name, &table)?;
        let parent_column = source.require_column(&parent_name, &table)?;

        let mut links = self
            .load_optional(link)?
            .unwrap_or_else(|| Dataset::new(vec![SUBMITTER_ID.to_string()]));
        let existing = links
            .column(SUBMITTER_ID)
            .unwrap_or_default()
            .into_iter()
            .map(str::to_string)
            .collect::<HashSet<_>>();

        let mut created = HashSet::new();
        for row in 0..source.len() {
            let sid = source.cell(row, link_column);
            if sid.is_empty() || existing.contains(sid) || !created.insert(sid.to_string()) {
                continue;
            }
            let mut record = BTreeMap::from([
                (SUBMITTER_ID.to_string(), sid.to_string()),
                ("type".to_string(), link.to_string()),
                (parent_name.clone(), source.cell(row, parent_column).to_string()),
            ]);
            record.extend(properties.clone());
            links.push_record(&record);
        }

        if created.is_empty() {
            info!("all {node} records already link to existing {link} records");
            return Ok(self.unchanged(link, &links));
        }
        info!("creating {} records in {link} node for missing {node} links", created.len());
        self.save(link, &links, created.len())
    }

    /// Moves property columns from one node to a new record per row of another
    /// node linked to the same parent.
    pub fn move_properties(
        &self,
        from_node: &str,
        to_node: &str,
        properties: &[String],
        parent_node: &str,
    ) -> Result<EditOutcome, Gen3Error> {
        let source = self.load(from_node)?;
        let table = self.node_path(from_node).display().to_string();
        let parent_name = link_submitter_column(parent_node);
        let parent_column = source.require_column(&parent_name, &table)?;
        let sid_column = source.require_column(SUBMITTER_ID, &table)?;
        let property_columns = properties
            .iter()
            .map(|property| source.require_column(property, &table))
            .collect::<Result<Vec<_>, _>>()?;

        let unlinked = (0..source.len())
            .filter(|row| source.cell(*row, parent_column).is_empty())
            .count();
        if unlinked > 0 {
            warn!("{unlinked} {from_node} records have no link to {parent_node}, nothing moved");
            return Ok(self.unchanged(from_node, &source));
        }
        let has_data = property_columns
            .iter()
            .any(|column| (0..source.len()).any(|row| !source.cell(row, *column).is_empty()));
        if !has_data {
            info!("no non-null {to_node} data found in {from_node} records");
            return Ok(self.unchanged(from_node, &source));
        }

        let mut target = self
            .load_optional(to_node)?
            .unwrap_or_else(|| Dataset::new(vec![SUBMITTER_ID.to_string()]));
        let mut existing = target
            .column(SUBMITTER_ID)
            .unwrap_or_default()
            .into_iter()
            .map(str::to_string)
            .collect::<HashSet<_>>();

        let mut added = 0;
        for row in 0..source.len() {
            let sid = format!("{}_{to_node}", source.cell(row, sid_column));
            if !existing.insert(sid.clone()) {
                continue;
            }
            let mut record = BTreeMap::from([
                (SUBMITTER_ID.to_string(), sid),
                ("type".to_string(), to_node.to_string()),
                ("project_id".to_string(), self.project.clone()),
                (parent_name.clone(), source.cell(row, parent_column).to_string()),
            ]);
            for (property, column) in properties.iter().zip(&property_columns) {
                record.insert(property.clone(), source.cell(row, *column).to_string());
            }
            target.push_record(&record);
            added += 1;
        }
        info!("{added} new {to_node} records created from data moved from {from_node}");
        self.save(to_node, &target, added)
    }

    pub fn change_property_names(
        &self,
        node: &str,
        renames: &BTreeMap<String, String>,
    ) -> Result<EditOutcome, Gen3Error> {
        let mut dataset = self.load(node)?;
        let changed = dataset.rename_columns(renames);
        for old in renames.keys() {
            if !renames.values().any(|new| new == old) && dataset.has_column(old) {
                warn!("column {old} is still present in {node}");
            }
        }
        self.save(node, &dataset, changed)
    }

    pub fn drop_properties(&self, node: &str, properties: &[String]) -> Result<EditOutcome, Gen3Error> {
        let mut dataset = self.load(node)?;
        for property in properties {
            if !dataset.has_column(property) {
                warn!("property {property} not found in {node}");
            }
        }
        let changed = dataset.drop_columns(properties);
        self.save(node, &dataset, changed)
    }

    /// Drops `{link}.submitter_id`/`{link}.id`, or their numbered `#N` variants.
    pub fn drop_links(&self, node: &str, links: &[String]) -> Result<EditOutcome, Gen3Error> {
        let mut dataset = self.load(node)?;
        let mut to_drop = Vec::new();
        for link in links {
            let pair = |index: Option<u32>| {
                [LinkKey::SubmitterId, LinkKey::Id].map(|key| {
                    LinkColumn {
                        link: link.clone(),
                        key,
                        index,
                    }
                    .header()
                })
            };
            let plain = pair(None);
            if plain.iter().any(|header| dataset.has_column(header)) {
                to_drop.extend(plain);
                continue;
            }
            let mut index = 1;
            loop {
                let numbered = pair(Some(index));
                if !numbered.iter().any(|header| dataset.has_column(header)) {
                    break;
                }
                to_drop.extend(numbered);
                index += 1;
            }
        }
        let changed = dataset.drop_columns(&to_drop);
        info!("dropped {changed} link columns from {node}");
        self.save(node, &dataset, changed)
    }

    /// Rebuilds `{link}.submitter_id` from the first non-empty `{sublink}.submitter_id`.
    pub fn merge_links(
        &self,
        node: &str,
        link: &str,
        links_to_merge: &[String],
    ) -> Result<EditOutcome, Gen3Error> {
        let mut dataset = self.load(node)?;
        let link_name = format!("{link}.{SUBMITTER_ID}");
        dataset.set_column(&link_name, "");
        let target = dataset.ensure_column(&link_name);

        let mut changed = 0;
        for sublink in links_to_merge {
            let Some(source) = dataset.column_index(&format!("{sublink}.{SUBMITTER_ID}")) else {
                warn!("link column {sublink}.{SUBMITTER_ID} not found in {node}");
                continue;
            };
            for row in 0..dataset.len() {
                let value = dataset.cell(row, source).to_string();
                if dataset.cell(row, target).is_empty() && !value.is_empty() {
                    dataset.set_cell(row, target, &value);
                    changed += 1;
                }
            }
        }
        info!("links merged to {link} in {node}");
        self.save(node, &dataset, changed)
    }
}
