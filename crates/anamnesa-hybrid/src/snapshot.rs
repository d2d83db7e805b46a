//! Immutable index snapshots and their on-disk store.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/CURRENT                      active corpus version
//! <root>/<corpus_version>/manifest.json
//! <root>/<corpus_version>/chunks.json
//! <root>/<corpus_version>/vector.bin
//! <root>/<corpus_version>/keyword.bin
//! ```
//!
//! A version directory is written under a temporary name and renamed into
//! place, then `CURRENT` is replaced the same way, so readers never observe a
//! half-written snapshot.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anamnesa_core::config::{Bm25Config, TokenizerConfig, VectorConfig};
use anamnesa_core::error::{Error, IndexLoadError, Result};
use anamnesa_core::types::{ChunkRecord, ChunkId};
use anamnesa_text::{Analyzer, KeywordArtifact, KeywordIndex};
use anamnesa_vector::{VectorArtifact, VectorIndex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const FORMAT_VERSION: u32 = 1;

const MANIFEST: &str = "manifest.json";
const CHUNKS: &str = "chunks.json";
const VECTOR: &str = "vector.bin";
const KEYWORD: &str = "keyword.bin";
const CURRENT: &str = "CURRENT";

/// Everything a query needs, frozen at build time.
pub struct IndexSnapshot {
    corpus_version: String,
    embedder_id: String,
    created_at: DateTime<Utc>,
    chunks: Vec<ChunkRecord>,
    by_id: HashMap<ChunkId, usize>,
    vector: VectorIndex,
    keyword: KeywordIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactEntry {
    pub name: String,
    pub blake3: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub corpus_version: String,
    pub created_at: DateTime<Utc>,
    pub embedder_id: String,
    pub dim: usize,
    pub chunk_count: usize,
    pub vector_count: usize,
    pub keyword_terms: usize,
    pub artifacts: Vec<ArtifactEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotStats {
    pub corpus_version: String,
    pub embedder_id: String,
    pub created_at: DateTime<Utc>,
    pub documents: usize,
    pub chunks: usize,
    pub vectors: usize,
    pub keyword_terms: usize,
    pub approximate_vector_search: bool,
}

impl IndexSnapshot {
    pub fn new(
        corpus_version: String,
        embedder_id: String,
        chunks: Vec<ChunkRecord>,
        vector: VectorIndex,
        keyword: KeywordIndex,
    ) -> std::result::Result<Self, IndexLoadError> {
        Self::assemble(corpus_version, embedder_id, Utc::now(), chunks, vector, keyword)
    }

    /// Snapshot with no chunks; every query against it returns nothing.
    pub fn empty(dim: usize, tokenizer: TokenizerConfig, bm25: Bm25Config, vector: VectorConfig) -> Self {
        Self {
            corpus_version: "empty".to_string(),
            embedder_id: String::new(),
            created_at: Utc::now(),
            chunks: Vec::new(),
            by_id: HashMap::new(),
            vector: VectorIndex::new(dim, vector),
            keyword: KeywordIndex::new(Analyzer::new(tokenizer), bm25),
        }
    }

    fn assemble(
        corpus_version: String,
        embedder_id: String,
        created_at: DateTime<Utc>,
        chunks: Vec<ChunkRecord>,
        vector: VectorIndex,
        keyword: KeywordIndex,
    ) -> std::result::Result<Self, IndexLoadError> {
        let mut by_id = HashMap::with_capacity(chunks.len());
        for (i, record) in chunks.iter().enumerate() {
            if by_id.insert(record.chunk.chunk_id.clone(), i).is_some() {
                return Err(IndexLoadError::Inconsistent(format!("duplicate chunk id {}", record.chunk.chunk_id)));
            }
        }
        if let Some(id) = vector.ids().iter().find(|id| !by_id.contains_key(*id)) {
            return Err(IndexLoadError::Inconsistent(format!("vector entry {id} has no chunk")));
        }
        if let Some(id) = keyword.ids().iter().find(|id| !by_id.contains_key(*id)) {
            return Err(IndexLoadError::Inconsistent(format!("keyword entry {id} has no chunk")));
        }
        Ok(Self { corpus_version, embedder_id, created_at, chunks, by_id, vector, keyword })
    }

    pub fn corpus_version(&self) -> &str {
        &self.corpus_version
    }

    pub fn embedder_id(&self) -> &str {
        &self.embedder_id
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk(&self, chunk_id: &str) -> Option<&ChunkRecord> {
        self.by_id.get(chunk_id).map(|&i| &self.chunks[i])
    }

    pub fn chunks(&self) -> &[ChunkRecord] {
        &self.chunks
    }

    pub fn vector(&self) -> &VectorIndex {
        &self.vector
    }

    pub fn keyword(&self) -> &KeywordIndex {
        &self.keyword
    }

    pub fn stats(&self) -> SnapshotStats {
        let mut documents: Vec<&str> = self.chunks.iter().map(|c| c.chunk.document_id.as_str()).collect();
        documents.sort_unstable();
        documents.dedup();
        SnapshotStats {
            corpus_version: self.corpus_version.clone(),
            embedder_id: self.embedder_id.clone(),
            created_at: self.created_at,
            documents: documents.len(),
            chunks: self.chunks.len(),
            vectors: self.vector.len(),
            keyword_terms: self.keyword.term_count(),
            approximate_vector_search: self.vector.is_approximate(),
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> IndexLoadError {
    IndexLoadError::Io { path: path.to_path_buf(), source }
}

fn checksum(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Write `snapshot` into `dir` (created if missing) with a manifest.
pub fn save_snapshot(snapshot: &IndexSnapshot, dir: &Path) -> Result<Manifest> {
    fs::create_dir_all(dir)?;
    let encode = |what: &str, e: Box<bincode::ErrorKind>| Error::Operation(format!("failed to encode {what}: {e}"));

    let chunks = serde_json::to_vec(&snapshot.chunks).map_err(|e| Error::Operation(format!("failed to encode chunks: {e}")))?;
    let vector = bincode::serialize(&snapshot.vector.to_artifact()).map_err(|e| encode(VECTOR, e))?;
    let keyword = bincode::serialize(&snapshot.keyword.to_artifact()).map_err(|e| encode(KEYWORD, e))?;

    let mut artifacts = Vec::with_capacity(3);
    for (name, bytes) in [(CHUNKS, &chunks), (VECTOR, &vector), (KEYWORD, &keyword)] {
        fs::write(dir.join(name), bytes)?;
        artifacts.push(ArtifactEntry { name: name.to_string(), blake3: checksum(bytes), bytes: bytes.len() as u64 });
    }

    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        corpus_version: snapshot.corpus_version.clone(),
        created_at: snapshot.created_at,
        embedder_id: snapshot.embedder_id.clone(),
        dim: snapshot.vector.dim(),
        chunk_count: snapshot.chunks.len(),
        vector_count: snapshot.vector.len(),
        keyword_terms: snapshot.keyword.term_count(),
        artifacts,
    };
    let json = serde_json::to_vec_pretty(&manifest).map_err(|e| Error::Operation(format!("failed to encode manifest: {e}")))?;
    fs::write(dir.join(MANIFEST), json)?;
    Ok(manifest)
}

fn read_manifest(dir: &Path) -> std::result::Result<Manifest, IndexLoadError> {
    if !dir.is_dir() {
        return Err(IndexLoadError::Missing(dir.to_path_buf()));
    }
    let path = dir.join(MANIFEST);
    let raw = fs::read(&path).map_err(|e| io_err(&path, e))?;
    let manifest: Manifest = serde_json::from_slice(&raw).map_err(|e| IndexLoadError::Manifest(e.to_string()))?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(IndexLoadError::FormatVersion { found: manifest.format_version, expected: FORMAT_VERSION });
    }
    Ok(manifest)
}

fn read_artifact(dir: &Path, manifest: &Manifest, name: &str) -> std::result::Result<Vec<u8>, IndexLoadError> {
    let entry = manifest
        .artifacts
        .iter()
        .find(|a| a.name == name)
        .ok_or_else(|| IndexLoadError::Manifest(format!("artifact {name} not listed")))?;
    let path = dir.join(name);
    let bytes = fs::read(&path).map_err(|e| io_err(&path, e))?;
    if bytes.len() as u64 != entry.bytes || checksum(&bytes) != entry.blake3 {
        return Err(IndexLoadError::Checksum { artifact: name.to_string() });
    }
    Ok(bytes)
}

/// Load and validate the snapshot in `dir`.
///
/// The manifest's corpus version must match `expected_version` when given.
/// Checksums, decoding and cross-artifact consistency are all verified.
pub fn load_snapshot(
    dir: &Path,
    expected_version: Option<&str>,
    vector_config: VectorConfig,
) -> std::result::Result<IndexSnapshot, IndexLoadError> {
    let manifest = read_manifest(dir)?;
    if let Some(expected) = expected_version {
        if manifest.corpus_version != expected {
            return Err(IndexLoadError::VersionMismatch {
                expected: expected.to_string(),
                found: manifest.corpus_version,
            });
        }
    }

    let decode = |artifact: &str, reason: String| IndexLoadError::Decode { artifact: artifact.to_string(), reason };
    let chunks: Vec<ChunkRecord> =
        serde_json::from_slice(&read_artifact(dir, &manifest, CHUNKS)?).map_err(|e| decode(CHUNKS, e.to_string()))?;
    let vector: VectorArtifact =
        bincode::deserialize(&read_artifact(dir, &manifest, VECTOR)?).map_err(|e| decode(VECTOR, e.to_string()))?;
    let keyword: KeywordArtifact =
        bincode::deserialize(&read_artifact(dir, &manifest, KEYWORD)?).map_err(|e| decode(KEYWORD, e.to_string()))?;

    if vector.dim != manifest.dim {
        return Err(IndexLoadError::Inconsistent(format!(
            "vector dimension {} differs from manifest {}",
            vector.dim, manifest.dim
        )));
    }
    if chunks.len() != manifest.chunk_count || vector.ids.len() != manifest.vector_count {
        return Err(IndexLoadError::Inconsistent("artifact sizes differ from manifest counts".to_string()));
    }

    let vector = VectorIndex::from_artifact(vector, vector_config)?;
    let keyword = KeywordIndex::from_artifact(keyword)?;
    let snapshot = IndexSnapshot::assemble(
        manifest.corpus_version,
        manifest.embedder_id,
        manifest.created_at,
        chunks,
        vector,
        keyword,
    )?;
    tracing::info!(
        dir = %dir.display(),
        corpus_version = snapshot.corpus_version(),
        chunks = snapshot.len(),
        "loaded index snapshot"
    );
    Ok(snapshot)
}

/// Versioned snapshot directories plus the `CURRENT` pointer.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version_dir(&self, corpus_version: &str) -> PathBuf {
        self.root.join(corpus_version)
    }

    /// Active version named by `CURRENT`, if any.
    pub fn current_version(&self) -> Option<String> {
        fs::read_to_string(self.root.join(CURRENT))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Stored versions, oldest first by manifest timestamp.
    pub fn versions(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut found: Vec<(DateTime<Utc>, String)> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .filter_map(|name| read_manifest(&self.root.join(&name)).ok().map(|m| (m.created_at, name)))
            .collect();
        found.sort();
        found.into_iter().map(|(_, name)| name).collect()
    }

    /// Persist `snapshot` under its corpus version and make it current.
    pub fn save(&self, snapshot: &IndexSnapshot) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let version = snapshot.corpus_version();
        let target = self.version_dir(version);
        let staging = self.root.join(format!(".staging-{version}-{}", std::process::id()));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        save_snapshot(snapshot, &staging)?;
        if target.exists() {
            fs::remove_dir_all(&target)?;
        }
        fs::rename(&staging, &target)?;
        self.set_current(version)?;
        tracing::info!(dir = %target.display(), corpus_version = version, "saved index snapshot");
        Ok(target)
    }

    /// Point `CURRENT` at an already stored version.
    pub fn set_current(&self, corpus_version: &str) -> Result<()> {
        if !self.version_dir(corpus_version).is_dir() {
            return Err(Error::NotFound(format!("snapshot version {corpus_version}")));
        }
        let pointer = self.root.join(format!(".{CURRENT}.tmp"));
        fs::write(&pointer, format!("{corpus_version}\n"))?;
        fs::rename(&pointer, self.root.join(CURRENT))?;
        Ok(())
    }

    /// Load a specific version, validating it.
    pub fn load(&self, corpus_version: &str, vector_config: VectorConfig) -> std::result::Result<IndexSnapshot, IndexLoadError> {
        load_snapshot(&self.version_dir(corpus_version), Some(corpus_version), vector_config)
    }

    /// Load the version named by `CURRENT`.
    pub fn load_current(&self, vector_config: VectorConfig) -> std::result::Result<IndexSnapshot, IndexLoadError> {
        let version = self.current_version().ok_or_else(|| IndexLoadError::Missing(self.root.join(CURRENT)))?;
        self.load(&version, vector_config)
    }

    /// Delete all but the newest `keep` versions besides the current one.
    pub fn prune(&self, keep: usize) -> Result<Vec<String>> {
        let current = self.current_version();
        let others: Vec<String> = self.versions().into_iter().filter(|v| Some(v) != current.as_ref()).collect();
        let excess = others.len().saturating_sub(keep);
        let mut removed = Vec::new();
        for version in others.into_iter().take(excess) {
            fs::remove_dir_all(self.version_dir(&version))?;
            tracing::info!(corpus_version = %version, "pruned old snapshot");
            removed.push(version);
        }
        Ok(removed)
    }
}
