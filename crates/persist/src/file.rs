//! File-backed snapshot storage.
//!
//! Layout inside the storage directory:
//! ```text
//! storage.meta.json                            - schema version and write counter
//! snapshots/
//!   <key-sha256>.<content>.snapshot.cbor.zst   - CBOR+zstd compressed snapshot
//! integrity/
//!   manifest.json                              - key -> file name and sha256
//! ```
//!
//! File names are derived from the key hash, so any string is a valid key.
//! The manifest is the commit point of a write: a new snapshot file is
//! written first, the manifest is then replaced by rename, and only after
//! that is the superseded file removed. A write that fails at any step
//! leaves the previous value readable.

use crate::snapshot::SnapshotDoc;
use crate::storage::{Storage, StorageError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use statevault_kernel::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Current on-disk schema version.
const STORAGE_SCHEMA_VERSION: u32 = 2;

/// Metadata stored in storage.meta.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageMeta {
    pub schema_version: u32,
    /// Total successful writes over the lifetime of the directory.
    pub write_count: u64,
}

/// Integrity record for one stored key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub sha256: String,
    /// Hash of the value this write replaced.
    pub prev_hash: Option<String>,
}

/// Integrity manifest keyed by storage key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: BTreeMap<String, ManifestEntry>,
}

/// Directory-backed storage with schema versioning and integrity checking.
pub struct FileStorage {
    root: PathBuf,
    meta: RefCell<StorageMeta>,
    manifest: RefCell<IntegrityManifest>,
}

impl FileStorage {
    /// Open or create storage at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("snapshots"))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = meta_path(&root);
        let manifest_path = manifest_path(&root);

        let (meta, manifest) = if meta_path.exists() {
            let meta: StorageMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.schema_version != STORAGE_SCHEMA_VERSION {
                return Err(StorageError::SchemaMismatch {
                    file_version: meta.schema_version,
                    expected_version: STORAGE_SCHEMA_VERSION,
                });
            }
            let manifest: IntegrityManifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = StorageMeta {
                schema_version: STORAGE_SCHEMA_VERSION,
                write_count: 0,
            };
            let manifest = IntegrityManifest::default();
            write_json_atomic(&manifest_path, &manifest)?;
            write_json_atomic(&meta_path, &meta)?;
            (meta, manifest)
        };

        tracing::debug!(root = %root.display(), keys = manifest.entries.len(), "opened file storage");
        Ok(Self {
            root,
            meta: RefCell::new(meta),
            manifest: RefCell::new(manifest),
        })
    }

    /// Get the path to the storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get a copy of the metadata.
    pub fn meta(&self) -> StorageMeta {
        self.meta.borrow().clone()
    }

    /// Path of the snapshot file currently holding `key`, if stored.
    pub fn snapshot_file(&self, key: &str) -> Option<PathBuf> {
        self.manifest
            .borrow()
            .entries
            .get(key)
            .map(|entry| self.snapshot_path(&entry.filename))
    }

    /// Verify every stored file against the manifest.
    pub fn verify_integrity(&self) -> Result<(), StorageError> {
        for entry in self.manifest.borrow().entries.values() {
            let data = std::fs::read(self.snapshot_path(&entry.filename))?;
            verify_hash(entry, &data)?;
        }
        Ok(())
    }

    fn snapshot_path(&self, filename: &str) -> PathBuf {
        self.root.join("snapshots").join(filename)
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let Some(entry) = self.manifest.borrow().entries.get(key).cloned() else {
            return Ok(None);
        };
        let compressed = std::fs::read(self.snapshot_path(&entry.filename))?;
        verify_hash(&entry, &compressed)?;

        let cbor_bytes = zstd_decompress(&compressed)?;
        let doc: SnapshotDoc = cbor_deserialize(&cbor_bytes)?;
        tracing::debug!(key, nodes = doc.node_count(), "read snapshot");
        doc.decode().map(Some)
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let doc = SnapshotDoc::encode(value);
        let cbor_bytes = cbor_serialize(&doc)?;
        let compressed = zstd_compress(&cbor_bytes)?;
        let hash = sha256_hex(&compressed);
        let filename = snapshot_filename(key, &hash);

        let path = self.snapshot_path(&filename);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &compressed)?;
        std::fs::rename(&tmp, &path)?;

        let mut manifest = self.manifest.borrow().clone();
        let previous = manifest.entries.get(key).cloned();
        manifest.entries.insert(
            key.to_string(),
            ManifestEntry {
                filename: filename.clone(),
                sha256: hash,
                prev_hash: previous.as_ref().map(|e| e.sha256.clone()),
            },
        );
        if let Err(e) = write_json_atomic(&manifest_path(&self.root), &manifest) {
            // The new file is unreferenced; the previous one is untouched.
            if previous.as_ref().is_none_or(|prev| prev.filename != filename) {
                let _ = std::fs::remove_file(&path);
            }
            return Err(e);
        }
        *self.manifest.borrow_mut() = manifest;

        if let Some(prev) = previous.filter(|prev| prev.filename != filename) {
            if let Err(e) = std::fs::remove_file(self.snapshot_path(&prev.filename)) {
                tracing::warn!(key, file = %prev.filename, error = %e, "stale snapshot not removed");
            }
        }

        let meta = {
            let mut meta = self.meta.borrow_mut();
            meta.write_count += 1;
            meta.clone()
        };
        write_json_atomic(&meta_path(&self.root), &meta)?;
        tracing::debug!(key, bytes = compressed.len(), "wrote snapshot");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let mut manifest = self.manifest.borrow().clone();
        let Some(entry) = manifest.entries.remove(key) else {
            return Ok(false);
        };
        write_json_atomic(&manifest_path(&self.root), &manifest)?;
        *self.manifest.borrow_mut() = manifest;
        if let Err(e) = std::fs::remove_file(self.snapshot_path(&entry.filename)) {
            tracing::warn!(key, file = %entry.filename, error = %e, "stale snapshot not removed");
        }
        Ok(true)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.manifest.borrow().entries.keys().cloned().collect())
    }
}

fn meta_path(root: &Path) -> PathBuf {
    root.join("storage.meta.json")
}

fn manifest_path(root: &Path) -> PathBuf {
    root.join("integrity").join("manifest.json")
}

/// `<sha256(key)>.<first 16 hex of content hash>.snapshot.cbor.zst`
fn snapshot_filename(key: &str, content_hash: &str) -> String {
    let content = content_hash.get(..16).unwrap_or(content_hash);
    format!("{}.{content}.snapshot.cbor.zst", sha256_hex(key.as_bytes()))
}

fn verify_hash(entry: &ManifestEntry, data: &[u8]) -> Result<(), StorageError> {
    let actual = sha256_hex(data);
    if actual != entry.sha256 {
        return Err(StorageError::IntegrityMismatch {
            expected: entry.sha256.clone(),
            actual,
        });
    }
    Ok(())
}

/// Write JSON next to `path`, then rename it into place.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let tmp = path.with_extension("tmp");
    serde_json::to_writer_pretty(std::fs::File::create(&tmp)?, value)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StorageError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(data).map_err(|e| StorageError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
