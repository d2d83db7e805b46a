use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use super::SourceItem;
use crate::error::IngestionError;
use crate::traits::DocumentSource;
use crate::types::{DocumentMetadata, SourceType};

/// Local mirror of the shared cloud-drive folder.
///
/// Walks the directory recursively in path order. Hidden files are ignored;
/// every other file is handed to the extractor, which decides on the format.
pub struct DirectorySource {
    name: String,
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self { name: format!("drive:{}", root.display()), root }
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<SourceItem>, IngestionError> {
        let root = self.root.clone();
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || walk_directory(&root))
            .await
            .map_err(|e| IngestionError::Source { source_name: name, reason: e.to_string() })?
    }
}

fn walk_directory(root: &Path) -> Result<Vec<SourceItem>, IngestionError> {
    if !root.is_dir() {
        return Err(IngestionError::Source {
            source_name: root.display().to_string(),
            reason: "directory does not exist".to_string(),
        });
    }
    let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.into_path())
        .collect();
    paths.sort();

    let mut items = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(source) => {
                let err = IngestionError::Read { path: path.clone(), source };
                tracing::warn!(error = %err, "skipping unreadable file");
                continue;
            }
        };
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let key = relative.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
        let file_name = path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| key.clone());
        let title = path.file_stem().map(|s| s.to_string_lossy().into_owned());
        items.push(SourceItem {
            key: format!("drive/{key}"),
            source_type: SourceType::CloudDrive,
            bytes,
            metadata: DocumentMetadata { file_name, mime_type: guess_mime_type(&path).to_string(), url: None, title },
        });
    }
    Ok(items)
}

/// Mime type from the file extension.
pub fn guess_mime_type(path: &Path) -> &'static str {
    let ext = path.extension().and_then(|s| s.to_str()).map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("txt") => "text/plain",
        Some("md" | "markdown") => "text/markdown",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        Some("pdf") => "application/pdf",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// JSON export written by the literature crawler.
pub struct CrawlerExportSource {
    name: String,
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CrawlerExport {
    #[serde(default)]
    papers: Vec<CrawledPaper>,
}

#[derive(Debug, Deserialize)]
struct CrawledPaper {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl CrawlerExportSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self { name: format!("crawler:{}", path.display()), path }
    }
}

#[async_trait]
impl DocumentSource for CrawlerExportSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<SourceItem>, IngestionError> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|source| IngestionError::Read { path: self.path.clone(), source })?;
        let export: CrawlerExport = serde_json::from_slice(&raw)
            .map_err(|e| IngestionError::Source { source_name: self.name.clone(), reason: e.to_string() })?;

        Ok(export
            .papers
            .into_iter()
            .map(|p| {
                let origin = p.source.unwrap_or_else(|| "ncbi".to_string());
                let key = p.url.clone().unwrap_or_else(|| format!("{origin}/{}", p.id));
                let title = if p.title.trim().is_empty() { None } else { Some(p.title) };
                SourceItem {
                    key,
                    source_type: SourceType::CrawledPaper,
                    bytes: p.content.into_bytes(),
                    metadata: DocumentMetadata {
                        file_name: format!("{origin}_{}", p.id),
                        mime_type: "text/plain".to_string(),
                        url: p.url,
                        title,
                    },
                }
            })
            .collect())
    }
}
