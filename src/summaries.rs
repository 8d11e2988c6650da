//! Summary discovery on the local filesystem.
//!
//! Walks a summaries root with [`walkdir`], keeping files whose relative
//! path matches `**/*.<ext>` for the configured extensions and skipping the
//! state directory. Results are sorted by relative path so ingestion order
//! (and therefore every document position) is deterministic.
//!
//! Also lists the `summary_<timestamp>` run directories a summarizer leaves
//! under a common root, for interactive selection.

use chrono::{DateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use summary_rag_core::models::DocumentMetadata;
use summary_rag_core::preprocess::split_metadata_line;
use summary_rag_core::{KbError, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::IngestConfig;

/// A summary file read from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryFile {
    /// Path relative to the summaries root, with `/` separators.
    pub relative_path: String,
    pub raw: String,
    pub size: u64,
    /// Hex SHA-256 of the raw bytes.
    pub digest: String,
    pub modified: DateTime<Utc>,
}

impl SummaryFile {
    /// Split off the metadata line and derive the document metadata.
    pub fn to_document_parts(&self) -> (String, DocumentMetadata) {
        let (source, content) = split_metadata_line(&self.raw);
        let source_path = source.unwrap_or_else(|| self.relative_path.clone());
        let metadata = DocumentMetadata {
            file_type: file_type_of(&source_path),
            directory: directory_of(&source_path),
            source_path,
            created_at: self.modified,
            summary_path: self.relative_path.clone(),
        };
        (content, metadata)
    }
}

/// Discover and read every summary under `root`.
///
/// # Errors
///
/// [`KbError::DirectoryNotFound`] when `root` is not a directory;
/// [`KbError::Io`] when a matched file cannot be read.
pub fn discover_summaries(
    root: &Path,
    ingest: &IngestConfig,
    state_dir: &Path,
) -> Result<Vec<SummaryFile>> {
    if !root.is_dir() {
        return Err(KbError::DirectoryNotFound(root.to_path_buf()));
    }

    let includes: Vec<String> = ingest
        .extensions
        .iter()
        .map(|ext| format!("**/*.{}", ext.trim_start_matches('.')))
        .collect();
    let include_set = build_globset(&includes)?;

    let mut excludes = vec!["**/.git/**".to_string()];
    if let Ok(relative_state) = state_dir.strip_prefix(root) {
        excludes.push(format!("{}/**", to_slash(relative_state)));
    }
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| KbError::Io(std::io::Error::other(e)))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = to_slash(relative);

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        files.push(read_summary(path, rel_str)?);
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    debug!(root = %root.display(), count = files.len(), "discovered summaries");
    Ok(files)
}

fn read_summary(path: &Path, relative_path: String) -> Result<SummaryFile> {
    let bytes = std::fs::read(path)?;
    let metadata = std::fs::metadata(path)?;
    let modified_secs = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    Ok(SummaryFile {
        relative_path,
        digest: hex::encode(Sha256::digest(&bytes)),
        size: bytes.len() as u64,
        raw: String::from_utf8_lossy(&bytes).into_owned(),
        modified: Utc
            .timestamp_opt(modified_secs, 0)
            .single()
            .unwrap_or_default(),
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            KbError::Configuration(format!("invalid glob pattern '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| KbError::Configuration(format!("invalid glob set: {}", e)))
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Extension including the dot, or empty.
fn file_type_of(source_path: &str) -> String {
    let name = source_path.rsplit(['/', '\\']).next().unwrap_or(source_path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx..].to_string(),
        _ => String::new(),
    }
}

fn directory_of(source_path: &str) -> String {
    match source_path.rfind(['/', '\\']) {
        Some(idx) => source_path[..idx].to_string(),
        None => String::new(),
    }
}

/// One `summary_<timestamp>` run directory.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRun {
    pub path: PathBuf,
    pub name: String,
    pub info: Option<SummaryRunInfo>,
}

/// Contents of a run's `metadata.json`, as far as listing needs them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SummaryRunInfo {
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub final_statistics: Option<RunStatistics>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunStatistics {
    #[serde(default)]
    pub successful: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub total_tokens_used: u64,
}

pub const RUN_DIR_PREFIX: &str = "summary_";

/// List `summary_*` directories under `root`, newest first. Run names
/// embed a sortable `%Y-%m-%d_%H-%M-%S` timestamp, so name order is
/// creation order. A missing root gives an empty list.
pub fn find_summary_directories(root: &Path) -> Result<Vec<SummaryRun>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(RUN_DIR_PREFIX) {
            continue;
        }
        let path = entry.path();
        let info = read_run_info(&path);
        runs.push(SummaryRun { path, name, info });
    }

    runs.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(runs)
}

fn read_run_info(dir: &Path) -> Option<SummaryRunInfo> {
    let path = dir.join("metadata.json");
    let content = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&content) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable run metadata");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn ingest() -> IngestConfig {
        IngestConfig::default()
    }

    #[test]
    fn discovers_sorted_and_skips_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::create_dir_all(root.join(".kb_state/cache")).unwrap();
        fs::write(root.join("b/z.md"), "z").unwrap();
        fs::write(root.join("a.md"), "a").unwrap();
        fs::write(root.join("notes.txt"), "skip").unwrap();
        fs::write(root.join(".kb_state/cache/x.md"), "state").unwrap();

        let files = discover_summaries(root, &ingest(), &root.join(".kb_state")).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "b/z.md"]);
        assert_eq!(files[0].size, 1);
        assert_eq!(files[0].digest.len(), 64);
    }

    #[test]
    fn missing_root_is_directory_not_found() {
        let err = discover_summaries(
            Path::new("/definitely/not/here"),
            &ingest(),
            Path::new("/definitely/not/here/.kb_state"),
        )
        .unwrap_err();
        assert!(matches!(err, KbError::DirectoryNotFound(_)));
    }

    #[test]
    fn metadata_line_drives_document_metadata() {
        let file = SummaryFile {
            relative_path: "components/Form.tsx.md".into(),
            raw: "Source: `src/components/forms/Form.tsx`\n\nRenders a form.".into(),
            size: 0,
            digest: String::new(),
            modified: Utc::now(),
        };
        let (content, meta) = file.to_document_parts();
        assert_eq!(content, "Renders a form.");
        assert_eq!(meta.source_path, "src/components/forms/Form.tsx");
        assert_eq!(meta.file_type, ".tsx");
        assert_eq!(meta.directory, "src/components/forms");
        assert_eq!(meta.summary_path, "components/Form.tsx.md");
    }

    #[test]
    fn summary_path_is_used_without_metadata_line() {
        let file = SummaryFile {
            relative_path: "utils/strings.md".into(),
            raw: "Helpers for strings.".into(),
            size: 0,
            digest: String::new(),
            modified: Utc::now(),
        };
        let (content, meta) = file.to_document_parts();
        assert_eq!(content, "Helpers for strings.");
        assert_eq!(meta.source_path, "utils/strings.md");
        assert_eq!(meta.file_type, ".md");
        assert_eq!(meta.directory, "utils");
    }

    #[test]
    fn file_type_and_directory_edge_cases() {
        assert_eq!(file_type_of("Makefile"), "");
        assert_eq!(file_type_of(".env"), "");
        assert_eq!(file_type_of("a.b/c"), "");
        assert_eq!(directory_of("top.py"), "");
        assert_eq!(directory_of("C:\\code\\a.ts"), "C:\\code");
    }

    #[test]
    fn run_directories_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("summary_2024-01-01_10-00-00")).unwrap();
        fs::create_dir_all(root.join("summary_2024-03-05_09-30-00")).unwrap();
        fs::create_dir_all(root.join("other")).unwrap();
        fs::write(
            root.join("summary_2024-03-05_09-30-00/metadata.json"),
            r#"{"created_at": "2024-03-05_09-30-00", "model": "gpt-4",
                "final_statistics": {"successful": 12, "failed": 1, "total_tokens_used": 3400}}"#,
        )
        .unwrap();

        let runs = find_summary_directories(root).unwrap();
        let names: Vec<_> = runs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["summary_2024-03-05_09-30-00", "summary_2024-01-01_10-00-00"]
        );
        let info = runs[0].info.as_ref().unwrap();
        assert_eq!(info.model.as_deref(), Some("gpt-4"));
        assert_eq!(info.final_statistics.as_ref().unwrap().successful, 12);
        assert!(runs[1].info.is_none());
    }
}
