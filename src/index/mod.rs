// Embedding index module
// Keeps the persisted row vectors in step with the schema document


pub mod consistency;
pub mod flat;
pub mod store;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::SliceError;
use crate::embeddings::{Embedder, normalize};
use crate::schema::{RowVocabulary, SchemaDocument, extract};

pub use consistency::{ConsistencyValidator, IndexReport};
pub use flat::{FlatIndex, Neighbor};
pub use store::IndexStore;

/// A build lock untouched for this long belongs to a dead process
const STALE_LOCK_AGE: Duration = Duration::from_secs(10 * 60);
const LOCK_REFRESH_INTERVAL: Duration = Duration::from_secs(2 * 60);
const DEFAULT_BATCH_SIZE: usize = 16;
const DEFAULT_CONCURRENT_BATCHES: usize = 4;

/// Where a schema document and its index artifacts live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub schema: PathBuf,
    /// LanceDB directory holding one table per generation
    pub index: PathBuf,
    /// JSON manifest naming the committed generation and its rows
    pub rows: PathBuf,
}

impl IndexPaths {
    /// Artifacts next to the schema: `graph.json` gives `graph.lance` and `graph.rows.json`
    #[inline]
    pub fn for_schema(schema: impl Into<PathBuf>) -> Self {
        let schema = schema.into();
        Self {
            index: schema.with_extension("lance"),
            rows: schema.with_extension("rows.json"),
            schema,
        }
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.index.with_extension("build.lock")
    }
}

/// The row list of one committed index generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub generation: String,
    pub model: String,
    pub dimension: usize,
    /// Modification time of the schema document the rows were extracted from
    pub schema_modified: DateTime<Utc>,
    pub built_at: DateTime<Utc>,
    pub rows: RowVocabulary,
}

impl IndexManifest {
    /// `Ok(None)` when no manifest has been committed yet
    #[inline]
    pub async fn read(path: &Path) -> Result<Option<Self>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read index manifest {}", path.display()));
            }
        };

        let manifest = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse index manifest {}", path.display()))?;
        Ok(Some(manifest))
    }

    /// Write to a sibling temporary file and rename it over `path`
    #[inline]
    pub async fn commit(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize index manifest")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path =
            path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e)
                .with_context(|| format!("Failed to write index manifest {}", path.display()));
        }
        Ok(())
    }
}

/// Why an index has to be (re)built
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
    Forced,
    MissingManifest,
    UnreadableManifest(String),
    MissingGeneration,
    SchemaModified,
    ModelChanged { indexed: String, configured: String },
}

impl fmt::Display for RebuildReason {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forced => f.write_str("rebuild requested"),
            Self::MissingManifest => f.write_str("no index has been built"),
            Self::UnreadableManifest(e) => write!(f, "index manifest is unreadable: {}", e),
            Self::MissingGeneration => f.write_str("indexed vectors are missing"),
            Self::SchemaModified => f.write_str("schema changed since the last build"),
            Self::ModelChanged {
                indexed,
                configured,
            } => write!(
                f,
                "embedding model changed from {} to {}",
                indexed, configured
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    UpToDate {
        generation: String,
    },
    Built {
        generation: String,
        rows: usize,
        reason: RebuildReason,
    },
}

impl BuildOutcome {
    #[inline]
    pub fn generation(&self) -> &str {
        match self {
            Self::UpToDate { generation } | Self::Built { generation, .. } => generation,
        }
    }

    #[inline]
    pub fn was_built(&self) -> bool {
        matches!(self, Self::Built { .. })
    }
}

/// A committed generation read fully into memory
#[derive(Debug, Clone)]
pub struct LoadedIndex {
    pub manifest: IndexManifest,
    pub vectors: FlatIndex,
}

impl LoadedIndex {
    #[inline]
    pub fn rows(&self) -> &RowVocabulary {
        &self.manifest.rows
    }

    #[inline]
    pub fn generation(&self) -> &str {
        &self.manifest.generation
    }
}

/// Builds and loads the embedding index of one schema document
pub struct IndexBuilder {
    paths: IndexPaths,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    concurrent_batches: usize,
    show_progress: bool,
    build_gate: Mutex<()>,
}

impl IndexBuilder {
    #[inline]
    pub fn new(paths: IndexPaths, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            paths,
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrent_batches: DEFAULT_CONCURRENT_BATCHES,
            show_progress: false,
            build_gate: Mutex::new(()),
        }
    }

    /// Rows per embedding request and how many requests may be in flight
    #[inline]
    pub fn with_batching(mut self, batch_size: usize, concurrent_batches: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self.concurrent_batches = concurrent_batches.max(1);
        self
    }

    /// Draw a progress bar while embedding, when stderr is a terminal
    #[inline]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    #[inline]
    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }

    #[inline]
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// `None` when the committed index matches the schema document and model
    #[inline]
    pub async fn rebuild_reason(&self, force: bool) -> Result<Option<RebuildReason>> {
        if force {
            return Ok(Some(RebuildReason::Forced));
        }

        let schema_modified = schema_modified(&self.paths.schema).await?;

        let manifest = match IndexManifest::read(&self.paths.rows).await {
            Ok(Some(manifest)) => manifest,
            Ok(None) => return Ok(Some(RebuildReason::MissingManifest)),
            Err(e) => {
                warn!("{:#}", e);
                return Ok(Some(RebuildReason::UnreadableManifest(format!("{:#}", e))));
            }
        };

        if schema_modified > manifest.schema_modified {
            return Ok(Some(RebuildReason::SchemaModified));
        }

        if manifest.model != self.embedder.model() {
            return Ok(Some(RebuildReason::ModelChanged {
                indexed: manifest.model,
                configured: self.embedder.model().to_string(),
            }));
        }

        if !manifest.rows.is_empty() {
            if !self.paths.index.exists() {
                return Ok(Some(RebuildReason::MissingGeneration));
            }
            let store = IndexStore::open(&self.paths.index).await?;
            if !store.has_generation(&manifest.generation).await? {
                return Ok(Some(RebuildReason::MissingGeneration));
            }
        }

        Ok(None)
    }

    /// Rebuild the index if it is stale or `force` is set. Concurrent callers
    /// in this process wait for one build and then see its result.
    #[inline]
    pub async fn ensure_index(&self, force: bool) -> Result<BuildOutcome> {
        let _gate = self.build_gate.lock().await;

        let Some(reason) = self.rebuild_reason(force).await? else {
            let generation = IndexManifest::read(&self.paths.rows)
                .await?
                .map(|manifest| manifest.generation)
                .unwrap_or_default();
            debug!("Index generation {} is up to date", generation);
            return Ok(BuildOutcome::UpToDate { generation });
        };

        info!(
            "Building index for {}: {}",
            self.paths.schema.display(),
            reason
        );

        let _lock = BuildLock::acquire(&self.paths.lock_file()).await?;
        self.build(reason).await
    }

    async fn build(&self, reason: RebuildReason) -> Result<BuildOutcome> {
        let schema_modified = schema_modified(&self.paths.schema).await?;
        let schema = SchemaDocument::load(&self.paths.schema).await?;
        let rows = extract(&schema);
        info!("Extracted {} rows from schema", rows.len());

        let vectors = self.embed_rows(&rows).await?;
        let dimension = vectors.first().map_or(0, Vec::len);

        let previous = match IndexManifest::read(&self.paths.rows).await {
            Ok(manifest) => manifest.map(|manifest| manifest.generation),
            Err(_) => None,
        };

        let generation = Uuid::new_v4().simple().to_string();
        let store = IndexStore::open(&self.paths.index).await?;
        store.write_generation(&generation, &rows, &vectors).await?;

        let manifest = IndexManifest {
            generation: generation.clone(),
            model: self.embedder.model().to_string(),
            dimension,
            schema_modified,
            built_at: Utc::now(),
            rows,
        };
        manifest.commit(&self.paths.rows).await?;
        info!(
            "Committed index generation {} with {} rows",
            generation,
            manifest.rows.len()
        );

        let mut keep = vec![generation.as_str()];
        keep.extend(previous.as_deref());
        match store.prune(&keep, STALE_LOCK_AGE).await {
            Ok(0) => {}
            Ok(dropped) => debug!("Pruned {} superseded index generations", dropped),
            Err(e) => warn!("Failed to prune old index generations: {}", e),
        }

        Ok(BuildOutcome::Built {
            generation,
            rows: manifest.rows.len(),
            reason,
        })
    }

    /// Unit-normalized vectors in row order. Any failed request fails the whole set.
    async fn embed_rows(&self, rows: &RowVocabulary) -> Result<Vec<Vec<f32>>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let texts = rows.texts();
        let bar = self.progress_bar(texts.len());
        let embedder = &self.embedder;

        let batches: Vec<Vec<Vec<f32>>> = futures::stream::iter(texts.chunks(self.batch_size))
            .map(|batch| {
                let bar = &bar;
                async move {
                    let embeddings = embedder
                        .embed_batch(batch)
                        .await
                        .map_err(|e| SliceError::Embedding(format!("{:#}", e)))?;
                    if embeddings.len() != batch.len() {
                        return Err(SliceError::Embedding(format!(
                            "Expected {} embeddings, got {}",
                            batch.len(),
                            embeddings.len()
                        )));
                    }
                    bar.inc(batch.len() as u64);
                    Ok::<_, SliceError>(embeddings)
                }
            })
            .buffered(self.concurrent_batches)
            .try_collect()
            .await
            .inspect_err(|_| bar.abandon())?;
        bar.finish_and_clear();

        let mut vectors: Vec<Vec<f32>> = batches.into_iter().flatten().collect();
        let dimension = vectors.first().map_or(0, Vec::len);
        if dimension == 0 {
            return Err(SliceError::Embedding(
                "Embedding service returned empty vectors".to_string(),
            )
            .into());
        }
        for (row, vector) in rows.iter().zip(&mut vectors) {
            if vector.len() != dimension {
                return Err(SliceError::Embedding(format!(
                    "Embedding for '{}' has dimension {}, expected {}",
                    row,
                    vector.len(),
                    dimension
                ))
                .into());
            }
            normalize(vector);
        }

        Ok(vectors)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress || !console::user_attended_stderr() {
            return ProgressBar::hidden();
        }
        ProgressBar::new(len as u64).with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] Embedding rows {wide_bar}")
                .expect("style template is valid"),
        )
    }

    /// Read the committed generation into memory
    #[inline]
    pub async fn load(&self) -> Result<LoadedIndex> {
        match self.load_committed().await {
            Ok(index) => Ok(index),
            Err(e) => {
                // A concurrent build may have pruned the generation between
                // reading the manifest and opening its table.
                debug!("Retrying index load: {:#}", e);
                self.load_committed().await
            }
        }
    }

    async fn load_committed(&self) -> Result<LoadedIndex> {
        let manifest = IndexManifest::read(&self.paths.rows)
            .await?
            .ok_or_else(|| {
                SliceError::Index(format!(
                    "No index has been built for {}",
                    self.paths.schema.display()
                ))
            })?;

        let vectors = if manifest.rows.is_empty() {
            FlatIndex::new(manifest.dimension)
        } else {
            let store = IndexStore::open(&self.paths.index).await?;
            store
                .load_generation(&manifest.generation, manifest.rows.len(), manifest.dimension)
                .await?
        };

        debug!(
            "Loaded index generation {} ({} rows)",
            manifest.generation,
            manifest.rows.len()
        );
        Ok(LoadedIndex { manifest, vectors })
    }

    /// Compare the schema document, the manifest, and the stored vectors
    #[inline]
    pub async fn inspect(&self) -> Result<IndexReport> {
        let reason = self.rebuild_reason(false).await?;
        ConsistencyValidator::new(&self.paths)
            .validate_consistency(reason)
            .await
    }
}

async fn schema_modified(path: &Path) -> Result<DateTime<Utc>> {
    let metadata = fs::metadata(path).await.map_err(|e| {
        SliceError::Schema(format!("Failed to read schema file {}: {}", path.display(), e))
    })?;
    let modified = metadata
        .modified()
        .context("Schema file modification time is unavailable")?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Exclusive marker file guarding a build across processes.
///
/// The file names its owner by a random token. A heartbeat task keeps its
/// modification time fresh while the build runs, and only the owner removes it.
struct BuildLock {
    path: PathBuf,
    token: String,
    heartbeat: JoinHandle<()>,
}

impl BuildLock {
    async fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        match Self::create(path).await {
            Ok(lock) => return Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to create build lock {}", path.display()));
            }
        }

        if !Self::is_stale(path).await {
            return Err(SliceError::Index(format!(
                "Another index build is in progress (lock file {})",
                path.display()
            ))
            .into());
        }

        warn!("Removing abandoned build lock {}", path.display());
        let _ = fs::remove_file(path).await;
        Self::create(path)
            .await
            .with_context(|| format!("Failed to create build lock {}", path.display()))
    }

    async fn create(path: &Path) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        Self::claim(path, file).await
    }

    /// Record a fresh owner token in a newly created lock file. A failed write
    /// removes the file again so it cannot block later builds.
    async fn claim<W: AsyncWrite + Unpin>(path: &Path, mut writer: W) -> std::io::Result<Self> {
        let token = Uuid::new_v4().simple().to_string();
        let owner = format!(
            "{}\n{}\n{}\n",
            std::process::id(),
            token,
            Utc::now().to_rfc3339()
        );

        let written = async {
            writer.write_all(owner.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            if let Err(remove_error) = fs::remove_file(path).await {
                warn!(
                    "Failed to remove unwritten build lock {}: {}",
                    path.display(),
                    remove_error
                );
            }
            return Err(e);
        }

        let heartbeat = Self::start_heartbeat(path.to_path_buf(), token.clone());
        Ok(Self {
            path: path.to_path_buf(),
            token,
            heartbeat,
        })
    }

    fn start_heartbeat(path: PathBuf, token: String) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks = time::interval_at(
                time::Instant::now() + LOCK_REFRESH_INTERVAL,
                LOCK_REFRESH_INTERVAL,
            );
            loop {
                ticks.tick().await;
                match Self::refresh(&path, &token).await {
                    Ok(true) => debug!("Refreshed build lock {}", path.display()),
                    Ok(false) => {
                        warn!("Build lock {} now belongs to another build", path.display());
                        break;
                    }
                    Err(e) => warn!("Failed to refresh build lock {}: {}", path.display(), e),
                }
            }
        })
    }

    /// Bump the lock's modification time; `false` once the lock is no longer ours
    async fn refresh(path: &Path, token: &str) -> std::io::Result<bool> {
        if !Self::is_owned_by(path, token).await {
            return Ok(false);
        }
        let file = fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await?
            .into_std()
            .await;
        file.set_modified(SystemTime::now())?;
        Ok(true)
    }

    async fn is_owned_by(path: &Path, token: &str) -> bool {
        fs::read_to_string(path)
            .await
            .is_ok_and(|owner| owner.lines().any(|line| line == token))
    }

    async fn is_stale(path: &Path) -> bool {
        let Ok(metadata) = fs::metadata(path).await else {
            return true;
        };
        metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > STALE_LOCK_AGE)
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        self.heartbeat.abort();

        let owned = std::fs::read_to_string(&self.path)
            .is_ok_and(|owner| owner.lines().any(|line| line == self.token));
        if !owned {
            warn!(
                "Build lock {} was taken over by another build; leaving it in place",
                self.path.display()
            );
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove build lock {}: {}", self.path.display(), e);
        }
    }
}
