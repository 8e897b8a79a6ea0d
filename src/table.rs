use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use csv::{ReaderBuilder, WriterBuilder};
use tracing::warn;

use crate::domain::TableFormat;
use crate::error::Gen3Error;
use crate::fs_util::write_atomic;

pub const SUBMITTER_ID: &str = "submitter_id";

/// An ordered table of string cells. Missing cells are stored as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let mut dataset = Self::new(headers);
        for row in rows {
            dataset.push_row(row);
        }
        dataset
    }

    pub fn load(path: &Path) -> Result<Self, Gen3Error> {
        let format = TableFormat::from_path(path)?;
        let Some(delimiter) = format.delimiter() else {
            return Self::from_workbook(path);
        };
        let file = File::open(path).map_err(|err| {
            Gen3Error::Filesystem(format!("open {}: {err}", path.display()))
        })?;
        Self::from_reader(file, delimiter, path)
    }

    /// Reads the first worksheet of a workbook, every cell as text.
    pub fn from_workbook(path: &Path) -> Result<Self, Gen3Error> {
        let parse_err = |message: String| Gen3Error::TableParse {
            path: path.to_path_buf(),
            message,
        };
        let mut workbook = open_workbook_auto(path).map_err(|err| parse_err(err.to_string()))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| parse_err("workbook has no worksheets".to_string()))?
            .map_err(|err| parse_err(err.to_string()))?;

        let mut rows = range.rows();
        let Some(header) = rows.next() else {
            return Ok(Self::default());
        };
        let mut headers = header.iter().map(cell_text).collect::<Vec<_>>();
        while headers.last().is_some_and(String::is_empty) {
            headers.pop();
        }
        let mut dataset = Self::new(headers);
        for (index, row) in rows.enumerate() {
            let values = row.iter().map(cell_text).collect::<Vec<_>>();
            dataset.push_parsed_row(values, index + 2, path)?;
        }
        Ok(dataset)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        delimiter: u8,
        source: &Path,
    ) -> Result<Self, Gen3Error> {
        let parse_err = |err: csv::Error| Gen3Error::TableParse {
            path: source.to_path_buf(),
            message: err.to_string(),
        };
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .has_headers(true)
            .from_reader(reader);
        let headers = reader
            .headers()
            .map_err(parse_err)?
            .iter()
            .map(|value| value.trim_start_matches('\u{feff}').to_string())
            .collect::<Vec<_>>();
        let mut dataset = Self::new(headers);
        for (index, record) in reader.records().enumerate() {
            let record = record.map_err(parse_err)?;
            let line = record
                .position()
                .map(|position| position.line() as usize)
                .unwrap_or(index + 2);
            dataset.push_parsed_row(record.iter().map(str::to_string).collect(), line, source)?;
        }
        Ok(dataset)
    }

    /// Rejects rows with values beyond the header; trailing empty cells are dropped.
    fn push_parsed_row(
        &mut self,
        mut row: Vec<String>,
        line: usize,
        source: &Path,
    ) -> Result<(), Gen3Error> {
        let width = self.headers.len();
        if row.len() > width {
            if row[width..].iter().any(|cell| !cell.is_empty()) {
                return Err(Gen3Error::TableParse {
                    path: source.to_path_buf(),
                    message: format!(
                        "line {line} has {} cells but the header has {width} columns",
                        row.len()
                    ),
                });
            }
            row.truncate(width);
        }
        self.push_row(row);
        Ok(())
    }

    pub fn parse_tsv(content: &str) -> Result<Self, Gen3Error> {
        Self::from_reader(content.as_bytes(), b'\t', Path::new("<response>"))
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn require_column(&self, name: &str, table: &str) -> Result<usize, Gen3Error> {
        self.column_index(name)
            .ok_or_else(|| Gen3Error::MissingColumn {
                column: name.to_string(),
                table: table.to_string(),
            })
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|values| values.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn value(&self, row: usize, name: &str) -> Option<&str> {
        self.column_index(name).map(|column| self.cell(row, column))
    }

    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let column = self.column_index(name)?;
        Some((0..self.rows.len()).map(|row| self.cell(row, column)).collect())
    }

    pub fn submitter_ids(&self) -> Result<Vec<&str>, Gen3Error> {
        self.column(SUBMITTER_ID)
            .ok_or_else(|| Gen3Error::MissingColumn {
                column: SUBMITTER_ID.to_string(),
                table: "dataset".to_string(),
            })
    }

    pub fn ensure_unique_submitter_ids(&self) -> Result<(), Gen3Error> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for id in self.submitter_ids()? {
            if !seen.insert(id) && !duplicates.iter().any(|dup: &String| dup == id) {
                duplicates.push(id.to_string());
            }
        }
        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(Gen3Error::DuplicateSubmitterIds(duplicates))
        }
    }

    pub fn push_row(&mut self, mut row: Vec<String>) {
        if row.len() > self.headers.len() {
            if row[self.headers.len()..].iter().any(|cell| !cell.is_empty()) {
                warn!(
                    "dropping {} cells beyond the {} header columns",
                    row.len() - self.headers.len(),
                    self.headers.len()
                );
            }
            row.truncate(self.headers.len());
        }
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn push_record(&mut self, record: &BTreeMap<String, String>) {
        for key in record.keys() {
            self.ensure_column(key);
        }
        let row = self
            .headers
            .iter()
            .map(|header| record.get(header).cloned().unwrap_or_default())
            .collect();
        self.rows.push(row);
    }

    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(index) = self.column_index(name) {
            return index;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
        self.headers.len() - 1
    }

    pub fn set_cell(&mut self, row: usize, column: usize, value: &str) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|values| values.get_mut(column)) {
            *cell = value.to_string();
        }
    }

    pub fn set_column(&mut self, name: &str, value: &str) {
        let column = self.ensure_column(name);
        for row in &mut self.rows {
            row[column] = value.to_string();
        }
    }

    pub fn rename_columns(&mut self, renames: &BTreeMap<String, String>) -> usize {
        let mut renamed = 0;
        for header in &mut self.headers {
            if let Some(new_name) = renames.get(header.as_str()) {
                *header = new_name.clone();
                renamed += 1;
            }
        }
        renamed
    }

    pub fn drop_columns(&mut self, names: &[String]) -> usize {
        let keep = self
            .headers
            .iter()
            .map(|header| !names.contains(header))
            .collect::<Vec<_>>();
        let dropped = keep.iter().filter(|kept| !**kept).count();
        if dropped == 0 {
            return 0;
        }
        let retain = |values: &mut Vec<String>| {
            let mut flags = keep.iter();
            values.retain(|_| *flags.next().unwrap_or(&true));
        };
        retain(&mut self.headers);
        for row in &mut self.rows {
            retain(row);
        }
        dropped
    }

    pub fn select_rows(&self, indices: &[usize]) -> Dataset {
        Dataset {
            headers: self.headers.clone(),
            rows: indices
                .iter()
                .filter_map(|index| self.rows.get(*index).cloned())
                .collect(),
        }
    }

    pub fn filter_rows<F>(&self, mut predicate: F) -> Dataset
    where
        F: FnMut(usize) -> bool,
    {
        let indices = (0..self.rows.len())
            .filter(|index| predicate(*index))
            .collect::<Vec<_>>();
        self.select_rows(&indices)
    }

    pub fn filter_by_submitter_ids(&self, ids: &[String]) -> Result<Dataset, Gen3Error> {
        let wanted = ids.iter().map(String::as_str).collect::<HashSet<_>>();
        let column = self
            .column_index(SUBMITTER_ID)
            .ok_or_else(|| Gen3Error::MissingColumn {
                column: SUBMITTER_ID.to_string(),
                table: "dataset".to_string(),
            })?;
        Ok(self.filter_rows(|row| wanted.contains(self.cell(row, column))))
    }

    /// Concatenates tables, taking the union of their headers in first-seen order.
    pub fn concat(datasets: &[Dataset]) -> Dataset {
        let mut merged = Dataset::default();
        for dataset in datasets {
            for header in &dataset.headers {
                merged.ensure_column(header);
            }
        }
        for dataset in datasets {
            let mapping = dataset
                .headers
                .iter()
                .map(|header| merged.column_index(header).unwrap_or_default())
                .collect::<Vec<_>>();
            for row in &dataset.rows {
                let mut values = vec![String::new(); merged.headers.len()];
                for (source, target) in mapping.iter().enumerate() {
                    values[*target] = row.get(source).cloned().unwrap_or_default();
                }
                merged.rows.push(values);
            }
        }
        merged
    }

    pub fn index_by(&self, column: &str) -> Option<HashMap<&str, usize>> {
        let index = self.column_index(column)?;
        Some(
            (0..self.rows.len())
                .map(|row| (self.cell(row, index), row))
                .collect(),
        )
    }

    pub fn to_tsv_string(&self, indices: &[usize]) -> Result<String, Gen3Error> {
        let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(Vec::new());
        writer
            .write_record(&self.headers)
            .map_err(|err| Gen3Error::Filesystem(err.to_string()))?;
        for index in indices {
            if let Some(row) = self.rows.get(*index) {
                writer
                    .write_record(row)
                    .map_err(|err| Gen3Error::Filesystem(err.to_string()))?;
            }
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| Gen3Error::Filesystem(err.to_string()))?;
        String::from_utf8(bytes).map_err(|err| Gen3Error::Filesystem(err.to_string()))
    }

    pub fn write_tsv(&self, path: &Path) -> Result<(), Gen3Error> {
        let all = (0..self.rows.len()).collect::<Vec<_>>();
        let content = self.to_tsv_string(&all)?;
        write_atomic(path, content.as_bytes())
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sample() -> Dataset {
        Dataset::from_rows(
            vec!["type".into(), "submitter_id".into(), "cases.submitter_id".into()],
            vec![
                vec!["visit".into(), "v1".into(), "c1".into()],
                vec!["visit".into(), "v2".into()],
            ],
        )
    }

    #[test]
    fn short_rows_are_padded() {
        let dataset = sample();
        assert_eq!(dataset.value(1, "cases.submitter_id"), Some(""));
    }

    #[test]
    fn duplicate_submitter_ids_are_reported_once() {
        let mut dataset = sample();
        dataset.push_row(vec!["visit".into(), "v1".into(), "c2".into()]);
        dataset.push_row(vec!["visit".into(), "v1".into(), "c3".into()]);
        assert_matches!(
            dataset.ensure_unique_submitter_ids(),
            Err(Gen3Error::DuplicateSubmitterIds(ids)) if ids == vec!["v1".to_string()]
        );
    }

    #[test]
    fn drop_and_rename_columns() {
        let mut dataset = sample();
        let renames = BTreeMap::from([("type".to_string(), "node".to_string())]);
        assert_eq!(dataset.rename_columns(&renames), 1);
        assert_eq!(dataset.drop_columns(&["cases.submitter_id".to_string()]), 1);
        assert_eq!(dataset.headers(), ["node", "submitter_id"]);
        assert_eq!(dataset.rows()[0], vec!["visit", "v1"]);
    }

    #[test]
    fn concat_unions_headers() {
        let left = Dataset::from_rows(
            vec!["submitter_id".into(), "a".into()],
            vec![vec!["s1".into(), "1".into()]],
        );
        let right = Dataset::from_rows(
            vec!["b".into(), "submitter_id".into()],
            vec![vec!["2".into(), "s2".into()]],
        );
        let merged = Dataset::concat(&[left, right]);
        assert_eq!(merged.headers(), ["submitter_id", "a", "b"]);
        assert_eq!(merged.rows()[1], vec!["s2", "", "2"]);
    }

    #[test]
    fn over_long_rows_are_rejected() {
        let result = Dataset::parse_tsv("type\tsubmitter_id\ncase\tc1\nCase\tc2\textra\n");
        assert_matches!(
            result,
            Err(Gen3Error::TableParse { message, .. }) if message.starts_with("line 3 ")
        );
    }

    #[test]
    fn trailing_empty_cells_are_dropped() {
        let dataset = Dataset::parse_tsv("type\tsubmitter_id\ncase\tc1\t\t\n").unwrap();
        assert_eq!(dataset.rows()[0], vec!["case", "c1"]);
    }

    #[test]
    fn tsv_string_contains_selected_rows() {
        let dataset = sample();
        let body = dataset.to_tsv_string(&[1]).unwrap();
        assert_eq!(body, "type\tsubmitter_id\tcases.submitter_id\nvisit\tv2\t\n");
    }
}
