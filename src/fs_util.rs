use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::Builder;

use crate::error::Gen3Error;

pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), Gen3Error> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|err| Gen3Error::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".gen3x-write")
        .tempfile_in(&parent)
        .map_err(|err| Gen3Error::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| Gen3Error::Filesystem(err.to_string()))?;
    temp.persist(path)
        .map_err(|err| Gen3Error::Filesystem(format!("persist {}: {err}", path.display())))?;
    Ok(())
}

pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, Gen3Error> {
    let entries = fs::read_dir(dir)
        .map_err(|err| Gen3Error::Filesystem(format!("read dir {}: {err}", dir.display())))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| Gen3Error::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn file_name(path: &Path) -> Result<&str, Gen3Error> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Gen3Error::Filesystem(format!("invalid file name: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_content() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join("out.tsv");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let files = list_files(&temp.path().join("nested")).unwrap();
        assert_eq!(files, vec![path]);
    }
}
