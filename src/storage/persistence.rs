// src/storage/persistence.rs
//! Blob persistence
//!
//! Writes land in an in-memory buffer and become durable on `save`. The
//! directory-backed store never overwrites a committed blob: every flush
//! writes its blobs under a new generation number, then swaps in a new
//! `MANIFEST` (key -> file) with a single rename. That rename is the commit
//! point; a flush that fails before it leaves the previous generation intact
//! and the buffer restored.

use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

const LOCK_FILE: &str = ".lock";
const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TMP: &str = "MANIFEST.tmp";
const BLOB_SUFFIX: &str = ".blob";

/// Key/value blob store used for world state, user code and `Memory`
pub trait Persistence: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    fn set(&self, key: &str, value: Bytes) -> impl Future<Output = Result<()>> + Send;

    fn del(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Copy `from` to `to`; `NotFound` if `from` does not exist
    fn copy(&self, from: &str, to: &str) -> impl Future<Output = Result<()>> + Send;

    /// Make buffered writes durable
    fn save(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Keys are `[a-zA-Z0-9/-]+` without empty path segments
pub fn check_key(key: &str) -> Result<()> {
    let charset = key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '/' || c == '-');
    let segments = key.split('/').all(|segment| !segment.is_empty());
    if key.is_empty() || !charset || !segments {
        return Err(EngineError::UnsafeKey(key.to_string()));
    }
    Ok(())
}

/// Committed generation: which file holds each key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    generation: u64,
    files: BTreeMap<String, String>,
}

fn storage_error(what: &str, target: impl std::fmt::Debug, e: impl std::fmt::Display) -> EngineError {
    EngineError::StorageFailed(format!("Failed to {} {:?}: {}", what, target, e))
}

/// Directory-backed store with a write buffer
pub struct LocalPersistence {
    dir: PathBuf,
    /// Pending writes; `None` marks a deletion
    buffer: Mutex<HashMap<String, Option<Bytes>>>,
    manifest: Mutex<Manifest>,
}

impl LocalPersistence {
    /// Open (creating if needed) and lock `dir`
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_error("create directory", &dir, e))?;

        let lock = dir.join(LOCK_FILE);
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock)
            .await
            .map_err(|e| {
                EngineError::StorageFailed(format!(
                    "Data directory {:?} is in use by another engine ({}); remove {:?} if it is stale",
                    dir, e, lock
                ))
            })?;

        let manifest = match fs::read(dir.join(MANIFEST_FILE)).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| storage_error("parse manifest in", &dir, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest::default(),
            Err(e) => return Err(storage_error("read manifest in", &dir, e)),
        };
        let store = Self {
            dir,
            buffer: Mutex::new(HashMap::new()),
            manifest: Mutex::new(manifest),
        };
        store.sweep().await?;

        info!("Persistence opened at {:?}", store.dir);
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Buffered writes not yet saved
    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Last committed generation
    pub fn generation(&self) -> u64 {
        self.manifest.lock().generation
    }

    fn file_name(key: &str, generation: u64) -> String {
        format!("{}.{}{}", key.replace('/', "."), generation, BLOB_SUFFIX)
    }

    /// Remove blobs no committed key points at, left by an interrupted flush
    async fn sweep(&self) -> Result<()> {
        let live: std::collections::HashSet<String> = self.manifest.lock().files.values().cloned().collect();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| storage_error("list", &self.dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("list", &self.dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let orphan = (name.ends_with(BLOB_SUFFIX) && !live.contains(&name)) || name == MANIFEST_TMP;
            if orphan {
                debug!("Removing uncommitted {}", name);
                let _ = fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }

    async fn remove_files(&self, files: impl IntoIterator<Item = &String>) {
        for file in files {
            if let Err(e) = fs::remove_file(self.dir.join(file)).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", file, e);
                }
            }
        }
    }

    /// Write the next generation and commit it; returns the manifest now in
    /// force and the files it no longer references
    async fn commit(&self, pending: &HashMap<String, Option<Bytes>>) -> Result<(Manifest, Vec<String>)> {
        let mut next = self.manifest.lock().clone();
        next.generation += 1;

        let mut written = Vec::new();
        let mut superseded = Vec::new();
        let staged: Result<()> = async {
            for (key, value) in pending {
                let previous = match value {
                    Some(bytes) => {
                        let file = Self::file_name(key, next.generation);
                        fs::write(self.dir.join(&file), bytes)
                            .await
                            .map_err(|e| storage_error("write", key, e))?;
                        written.push(file.clone());
                        next.files.insert(key.clone(), file)
                    }
                    None => next.files.remove(key),
                };
                superseded.extend(previous);
            }

            let raw = serde_json::to_vec(&next).map_err(|e| storage_error("encode manifest for", &self.dir, e))?;
            let tmp = self.dir.join(MANIFEST_TMP);
            fs::write(&tmp, raw)
                .await
                .map_err(|e| storage_error("write", &tmp, e))?;
            fs::rename(&tmp, self.dir.join(MANIFEST_FILE))
                .await
                .map_err(|e| storage_error("commit generation in", &self.dir, e))
        }
        .await;

        if let Err(e) = staged {
            self.remove_files(&written).await;
            let _ = fs::remove_file(self.dir.join(MANIFEST_TMP)).await;
            return Err(e);
        }
        Ok((next, superseded))
    }
}

impl Persistence for LocalPersistence {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        check_key(key)?;
        let buffered = self.buffer.lock().get(key).cloned();
        if let Some(pending) = buffered {
            return Ok(pending);
        }
        let committed = self.manifest.lock().files.get(key).cloned();
        let Some(file) = committed else {
            return Ok(None);
        };
        match fs::read(self.dir.join(&file)).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) => Err(storage_error("read", key, e)),
        }
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        check_key(key)?;
        self.buffer.lock().insert(key.to_string(), Some(value));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        check_key(key)?;
        self.buffer.lock().insert(key.to_string(), None);
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let value = self
            .get(from)
            .await?
            .ok_or_else(|| EngineError::NotFound(from.to_string()))?;
        self.set(to, value).await
    }

    async fn save(&self) -> Result<()> {
        let pending = std::mem::take(&mut *self.buffer.lock());
        if pending.is_empty() {
            return Ok(());
        }

        match self.commit(&pending).await {
            Ok((next, superseded)) => {
                let generation = next.generation;
                *self.manifest.lock() = next;
                self.remove_files(&superseded).await;
                debug!("Committed generation {} ({} blobs)", generation, pending.len());
                Ok(())
            }
            Err(e) => {
                warn!("Flush failed, keeping {} pending writes: {}", pending.len(), e);
                let mut buffer = self.buffer.lock();
                for (key, value) in pending {
                    // Writes made while flushing win
                    buffer.entry(key).or_insert(value);
                }
                Err(e)
            }
        }
    }
}

impl Drop for LocalPersistence {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.dir.join(LOCK_FILE));
    }
}

/// In-memory store for tests and throwaway worlds
#[derive(Default)]
pub struct MemoryPersistence {
    blobs: DashMap<String, Bytes>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl Persistence for MemoryPersistence {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        check_key(key)?;
        Ok(self.blobs.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        check_key(key)?;
        self.blobs.insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        check_key(key)?;
        self.blobs.remove(key);
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let value = self
            .get(from)
            .await?
            .ok_or_else(|| EngineError::NotFound(from.to_string()))?;
        self.set(to, value).await
    }

    async fn save(&self) -> Result<()> {
        Ok(())
    }
}
