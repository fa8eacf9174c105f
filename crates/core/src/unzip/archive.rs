//! Zip extraction.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;
use zip::ZipArchive;

use super::{UnzipError, Unzipper};
use crate::model::NodeSnapshot;

/// Directory an archive is unpacked into: a sibling named after its stem.
pub fn extract_dir(archive: &Path) -> PathBuf {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    archive.with_file_name(stem)
}

fn extract_zip(archive_path: &Path, target_dir: &Path) -> Result<usize, UnzipError> {
    let archive_err = |e: zip::result::ZipError| UnzipError::Archive {
        path: archive_path.display().to_string(),
        message: e.to_string(),
    };

    let file = fs::File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(archive_err)?;
    fs::create_dir_all(target_dir)?;

    let mut extracted = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(archive_err)?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => return Err(UnzipError::PathTraversal(entry.name().to_string())),
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)?;
            continue;
        }
        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = fs::File::create(&entry_path)?;
        io::copy(&mut entry, &mut outfile)?;
        extracted += 1;
    }
    Ok(extracted)
}

/// Extracts zip archives on a blocking thread.
#[derive(Debug, Clone, Default)]
pub struct ZipUnzipper;

impl ZipUnzipper {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Unzipper for ZipUnzipper {
    async fn run(&self, node: &NodeSnapshot, archive: &Path) -> Result<PathBuf, UnzipError> {
        if !archive.exists() {
            return Err(UnzipError::NotFound(archive.display().to_string()));
        }
        let archive = archive.to_path_buf();
        let target = extract_dir(&archive);
        let urn = node.urn;

        tokio::task::spawn_blocking(move || {
            let count = extract_zip(&archive, &target)?;
            info!(urn, "Extracted {} file(s) to {}", count, target.display());
            Ok(target)
        })
        .await
        .map_err(|e| UnzipError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, NodeAttrs};
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, contents) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    fn node() -> NodeSnapshot {
        NodeSnapshot::from(&Node::new(4, "parks", NodeAttrs::default()))
    }

    #[test]
    fn test_extract_dir() {
        assert_eq!(
            extract_dir(Path::new("/data/opensite_ab.zip")),
            PathBuf::from("/data/opensite_ab")
        );
    }

    #[tokio::test]
    async fn test_unzip_extracts_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("layers.zip");
        write_zip(&archive, &[("a.geojson", "{}"), ("nested/b.geojson", "{}")]);

        let target = ZipUnzipper::new().run(&node(), &archive).await.unwrap();
        assert_eq!(target, dir.path().join("layers"));
        assert!(target.join("a.geojson").exists());
        assert!(target.join("nested/b.geojson").exists());
    }

    #[tokio::test]
    async fn test_unzip_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../escape.txt", "x")]);

        let err = ZipUnzipper::new().run(&node(), &archive).await.unwrap_err();
        assert!(matches!(err, UnzipError::PathTraversal(_)));
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_unzip_missing_archive() {
        let err = ZipUnzipper::new()
            .run(&node(), Path::new("/nonexistent/a.zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, UnzipError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unzip_invalid_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, b"not a zip").unwrap();

        let err = ZipUnzipper::new().run(&node(), &archive).await.unwrap_err();
        assert!(matches!(err, UnzipError::Archive { .. }));
    }
}
